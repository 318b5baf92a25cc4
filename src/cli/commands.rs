//! Command implementations for the probe census CLI
//!
//! This module contains the stage drivers behind each subcommand, logging
//! setup, configuration overrides and the final summary reports.

use crate::classifier::AddressClassifier;
use crate::cli::args::{
    Args, Commands, GlobalArgs, OutputFormat, PostprocessArgs, PreprocessArgs, RunAllArgs,
    ScanArgs,
};
use crate::config::PipelineConfig;
use crate::constants::{FILTERED_SUBDIR, RAW_SUBDIR};
use crate::coordinator::Postprocessor;
use crate::models::{ClassifyStats, IpMode, PostprocessStats, ScanStats};
use crate::registry::MetadataRegistry;
use crate::scanner::ScanExecutor;
use crate::{Error, Result};
use colored::Colorize;
use indicatif::HumanDuration;
use std::path::PathBuf;
use tracing::{debug, info};

/// Main command runner
///
/// Sets up logging, builds the configuration from defaults and CLI
/// overrides, constructs the registry shared by every stage and dispatches
/// to the selected subcommand.
pub async fn run(args: Args) -> Result<()> {
    setup_logging(&args.global)?;
    debug!("Command line arguments: {:?}", args);

    args.validate()?;

    let Some(command) = &args.command else {
        return Err(Error::configuration("No command given"));
    };

    let config = apply_cli_overrides(PipelineConfig::default(), &args);
    config.validate()?;
    info!("Using data directory {}", config.data_dir.display());

    let registry = MetadataRegistry::new(config.registry_store_path());
    let format = args.global.output_format;

    match command {
        Commands::Preprocess(preprocess) => {
            let stats = run_preprocess(&config, &registry, preprocess)?;
            generate_classify_report(format, &stats)
        }
        Commands::ScanIps(scan) => {
            let stats = run_scan(&config, &registry, scan).await?;
            generate_scan_report(format, &stats)
        }
        Commands::Postprocess(postprocess) => {
            let stats = run_postprocess(&config, &registry, postprocess).await?;
            generate_postprocess_report(format, &stats)
        }
        Commands::RunAll(run_all) => run_all_stages(&config, &registry, run_all, format).await,
    }
}

/// Set up structured logging based on CLI arguments
fn setup_logging(global: &GlobalArgs) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let log_level = global.get_log_level();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("probe_census={}", log_level)));

    let initialized = if global.quiet {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_level(true)
                    .with_writer(std::io::stderr)
                    .compact(),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_level(true)
                    .with_timer(fmt::time::uptime())
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };

    initialized
        .map_err(|e| Error::configuration(format!("Failed to initialize logging: {}", e)))?;

    debug!("Logging initialized at level: {}", log_level);
    Ok(())
}

/// Apply CLI argument overrides to the configuration
fn apply_cli_overrides(mut config: PipelineConfig, args: &Args) -> PipelineConfig {
    let global = &args.global;

    if let Some(data_dir) = &global.data_dir {
        config = config.with_data_dir(data_dir);
    }
    if let Some(scanner) = &global.scanner {
        config = config.with_scanner(scanner);
    }
    if global.no_sudo {
        config = config.without_sudo();
    }
    if let Some(probe_dir) = &global.probe_dir {
        config = config.with_probe_dir(probe_dir);
    }
    if let Some(text2pcap) = &global.text2pcap {
        config.converter_bin = text2pcap.clone();
    }
    if let Some(tshark) = &global.tshark {
        config.dissector_bin = tshark.clone();
    }
    if let Some(timeout) = global.row_timeout {
        config = config.with_row_timeout(Some(timeout));
    }
    if !global.show_progress() {
        config = config.without_progress();
    }

    let (rate, cooldown, workers) = match &args.command {
        Some(Commands::ScanIps(scan)) => (scan.rate, scan.cooldown, None),
        Some(Commands::Postprocess(post)) => (None, None, post.max_workers),
        Some(Commands::RunAll(all)) => {
            if let Some(out_dir) = &all.out_dir {
                config = config.with_data_dir(out_dir);
            }
            (all.rate, all.cooldown, all.max_workers)
        }
        _ => (None, None, None),
    };

    if let Some(rate) = rate {
        config = config.with_rate(rate);
    }
    if let Some(cooldown) = cooldown {
        config = config.with_cooldown(cooldown);
    }
    if let Some(workers) = workers {
        config = config.with_workers(workers);
    }
    config
}

fn run_preprocess(
    config: &PipelineConfig,
    registry: &MetadataRegistry,
    args: &PreprocessArgs,
) -> Result<ClassifyStats> {
    let out_dir = args.out_dir.clone().unwrap_or_else(|| config.ips_dir());
    info!(
        "Preprocessing {} into {}",
        args.input_dir.display(),
        out_dir.display()
    );

    AddressClassifier::new(registry, config.persist_registry).split_ips(
        &args.input_dir,
        &out_dir,
        args.per_file,
    )
}

async fn run_scan(
    config: &PipelineConfig,
    registry: &MetadataRegistry,
    args: &ScanArgs,
) -> Result<ScanStats> {
    let input_dir = args
        .input_dir
        .clone()
        .unwrap_or_else(|| default_whitelist_dir(config, args.ip_mode));
    let out_dir = args.out_dir.clone().unwrap_or_else(|| config.encoded_dir());

    ScanExecutor::new(config, registry)
        .scan_directory(&input_dir, &out_dir, args.ip_mode, args.scan_mode)
        .await
}

async fn run_postprocess(
    config: &PipelineConfig,
    registry: &MetadataRegistry,
    args: &PostprocessArgs,
) -> Result<PostprocessStats> {
    let input_dir = args
        .input_dir
        .clone()
        .unwrap_or_else(|| default_filtered_dir(config, args.ip_mode));
    let out_dir = args.out_dir.clone().unwrap_or_else(|| config.decoded_dir());

    Postprocessor::new(config, registry)
        .run(
            &input_dir,
            &out_dir,
            args.ip_mode,
            args.scan_mode,
            !args.no_metadata,
        )
        .await
}

async fn run_all_stages(
    config: &PipelineConfig,
    registry: &MetadataRegistry,
    args: &RunAllArgs,
    format: OutputFormat,
) -> Result<()> {
    if args.ip_mode == IpMode::Ipv6 {
        return Err(Error::unsupported(
            "run-all decodes its results and IPv6 decoding is not supported; use scan-ips for IPv6",
        ));
    }

    let classify_stats = run_preprocess(
        config,
        registry,
        &PreprocessArgs {
            input_dir: args.input_dir.clone(),
            out_dir: None,
            per_file: args.per_file,
        },
    )?;
    generate_classify_report(format, &classify_stats)?;

    let scan_stats = run_scan(
        config,
        registry,
        &ScanArgs {
            ip_mode: args.ip_mode,
            scan_mode: args.scan_mode,
            input_dir: None,
            out_dir: None,
            rate: None,
            cooldown: None,
        },
    )
    .await?;
    generate_scan_report(format, &scan_stats)?;

    let postprocess_stats = run_postprocess(
        config,
        registry,
        &PostprocessArgs {
            ip_mode: args.ip_mode,
            scan_mode: args.scan_mode,
            input_dir: None,
            out_dir: None,
            max_workers: None,
            no_metadata: false,
        },
    )
    .await?;
    generate_postprocess_report(format, &postprocess_stats)
}

fn default_whitelist_dir(config: &PipelineConfig, ip_mode: IpMode) -> PathBuf {
    config.ips_dir().join(ip_mode.as_str()).join(RAW_SUBDIR)
}

fn default_filtered_dir(config: &PipelineConfig, ip_mode: IpMode) -> PathBuf {
    config
        .encoded_dir()
        .join(ip_mode.as_str())
        .join(FILTERED_SUBDIR)
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).map_err(|e| {
        Error::io(
            "Failed to render report",
            std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        )
    })?;
    println!("{}", rendered);
    Ok(())
}

fn generate_classify_report(format: OutputFormat, stats: &ClassifyStats) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(&serde_json::json!({
            "stage": "preprocess",
            "files_read": stats.files_read,
            "lines_skipped": stats.lines_skipped,
            "ipv4_written": stats.ipv4_written,
            "ipv6_written": stats.ipv6_written,
            "outputs": stats.outputs,
        }));
    }

    println!("\n{}", "Preprocessing complete".green().bold());
    println!("   • Files read: {}", stats.files_read);
    println!("   • IPv4 addresses: {}", stats.ipv4_written);
    println!("   • IPv6 addresses: {}", stats.ipv6_written);
    if stats.lines_skipped > 0 {
        println!(
            "   • {}",
            format!("Lines skipped: {}", stats.lines_skipped).yellow()
        );
    }
    for output in &stats.outputs {
        println!("   • {}", output.display());
    }
    Ok(())
}

fn generate_scan_report(format: OutputFormat, stats: &ScanStats) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(&serde_json::json!({
            "stage": "scan-ips",
            "files_scanned": stats.files_scanned,
            "files_skipped": stats.files_skipped,
            "files_failed": stats.files_failed,
            "rows_kept": stats.rows_kept,
            "rows_dropped": stats.rows_dropped,
        }));
    }

    println!("\n{}", "Scanning complete".green().bold());
    println!("   • Whitelists scanned: {}", stats.files_scanned);
    println!("   • Empty whitelists skipped: {}", stats.files_skipped);
    println!("   • Responders kept: {}", stats.rows_kept);
    println!("   • Responses dropped by filter: {}", stats.rows_dropped);
    if stats.files_failed > 0 {
        println!(
            "   • {}",
            format!("Failed scans: {}", stats.files_failed).red()
        );
    }
    Ok(())
}

fn generate_postprocess_report(format: OutputFormat, stats: &PostprocessStats) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(&serde_json::json!({
            "stage": "postprocess",
            "files_processed": stats.files_processed,
            "files_failed": stats.files_failed,
            "rows_decoded": stats.rows_decoded,
            "rows_failed": stats.rows_failed,
            "rows_written": stats.rows_written,
            "processing_time_secs": stats.processing_time.as_secs_f64(),
            "outputs": stats.outputs,
        }));
    }

    println!("\n{}", "Postprocessing complete".green().bold());
    println!("   • Files decoded: {}", stats.files_processed);
    println!("   • Rows decoded: {}", stats.rows_decoded);
    println!("   • Rows written: {}", stats.rows_written);
    println!(
        "   • Processing time: {}",
        HumanDuration(stats.processing_time)
    );
    if stats.files_failed > 0 || stats.rows_failed > 0 {
        println!(
            "   • {}",
            format!(
                "Failures: {} files, {} rows",
                stats.files_failed, stats.rows_failed
            )
            .red()
        );
    }
    for output in &stats.outputs {
        println!("   • {}", output.display());
    }
    Ok(())
}
