//! Scanner command line construction

use crate::config::PipelineConfig;
use crate::models::{IpMode, ScanMode};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

/// One scanner invocation for a single whitelist file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanCommand {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ScanCommand {
    /// Build the invocation scanning `whitelist` and writing CSV to `output`
    pub fn new(
        config: &PipelineConfig,
        scan_mode: ScanMode,
        ip_mode: IpMode,
        whitelist: &Path,
        output: &Path,
    ) -> Self {
        let mut args: Vec<OsString> = Vec::new();

        let program = if config.use_sudo {
            args.push(config.scanner_bin.clone().into_os_string());
            PathBuf::from("sudo")
        } else {
            config.scanner_bin.clone()
        };

        if ip_mode == IpMode::Ipv6 {
            args.push("-6".into());
        }

        let template = config.probe_template_path(scan_mode.probe_template());
        let mut probe_args = OsString::from("--probe-args=file:");
        probe_args.push(template.as_os_str());

        args.extend([
            "-M".into(),
            "udp".into(),
            "-p".into(),
            scan_mode.port().to_string().into(),
            probe_args,
            "-O".into(),
            "csv".into(),
            "-f".into(),
            "*".into(),
            "-o".into(),
            output.as_os_str().to_owned(),
            "-r".into(),
            config.rate.to_string().into(),
            "-c".into(),
            config.cooldown_secs.to_string().into(),
            "-w".into(),
            whitelist.as_os_str().to_owned(),
        ]);

        Self { program, args }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    /// Async process builder with captured output
    pub fn to_command(&self) -> tokio::process::Command {
        let mut command = tokio::process::Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

impl fmt::Display for ScanCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}
