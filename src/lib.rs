//! Probe Census Library
//!
//! Tooling for an Internet-measurement pipeline that scans address
//! populations for UDP responders (NTP and SNMPv3), decodes the captured
//! response payloads and joins the decoded records with per-address
//! geolocation metadata.
//!
//! This library provides tools for:
//! - Splitting raw `ip,country,city,asn,asn_name` lists into per-family whitelists
//! - Driving an external scanner per whitelist and filtering its CSV output
//! - Decoding NTP headers directly and SNMPv3 engine fields through a dissector
//! - Bounded concurrent decoding with per-row failure isolation
//! - Tracking data-file to metadata-file associations across pipeline stages

pub mod classifier;
pub mod config;
pub mod constants;
pub mod coordinator;
pub mod decoder;
pub mod merge;
pub mod models;
pub mod registry;
pub mod scanner;
pub mod writer;

// CLI modules
pub mod cli {
    pub mod args;
    pub mod commands;
}

// Re-export commonly used types
pub use config::PipelineConfig;
pub use models::{AddressRecord, DecodedRecord, IpMode, MergedRecord, ScanMode, ScanResultRow};
pub use registry::MetadataRegistry;

use std::path::PathBuf;

/// Result type alias for the probe census pipeline
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for pipeline operations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// A required input directory or file is missing
    #[error("Input not found: {}", path.display())]
    InputNotFound { path: PathBuf },

    /// CSV reading or writing error
    #[error("CSV error in file '{file}': {message}")]
    CsvParsing {
        file: String,
        message: String,
        #[source]
        source: Option<csv::Error>,
    },

    /// One malformed input line
    #[error("Invalid line {line} in '{file}': {reason}")]
    InvalidLine {
        file: String,
        line: usize,
        reason: String,
    },

    /// External scanner, converter or dissector failed
    #[error("External tool '{tool}' failed: {message}")]
    ExternalTool { tool: String, message: String },

    /// No metadata association registered for a data file
    #[error("No metadata registered for data file: {}", path.display())]
    RegistryMiss { path: PathBuf },

    /// Decoding a single captured row failed
    #[error("Failed to decode row {index}: {message}")]
    RowDecode { index: usize, message: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Requested mode is not supported
    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    /// Directory traversal error
    #[error("Directory traversal error: {message}")]
    DirectoryTraversal { message: String },

    /// Processing interrupted
    #[error("Processing interrupted: {reason}")]
    ProcessingInterrupted { reason: String },
}

impl Error {
    /// Create an I/O error with context
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Create an input not found error
    pub fn input_not_found(path: impl Into<PathBuf>) -> Self {
        Self::InputNotFound { path: path.into() }
    }

    /// Create a CSV parsing error with context
    pub fn csv_parsing(
        file: impl Into<String>,
        message: impl Into<String>,
        source: Option<csv::Error>,
    ) -> Self {
        Self::CsvParsing {
            file: file.into(),
            message: message.into(),
            source,
        }
    }

    /// Create an invalid line error
    pub fn invalid_line(file: impl Into<String>, line: usize, reason: impl Into<String>) -> Self {
        Self::InvalidLine {
            file: file.into(),
            line,
            reason: reason.into(),
        }
    }

    /// Create an external tool error
    pub fn external_tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalTool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Create a registry miss error
    pub fn registry_miss(path: impl Into<PathBuf>) -> Self {
        Self::RegistryMiss { path: path.into() }
    }

    /// Create a row decode error
    pub fn row_decode(index: usize, message: impl Into<String>) -> Self {
        Self::RowDecode {
            index,
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an unsupported operation error
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    /// Create a directory traversal error
    pub fn directory_traversal(message: impl Into<String>) -> Self {
        Self::DirectoryTraversal {
            message: message.into(),
        }
    }

    /// Create a processing interrupted error
    pub fn processing_interrupted(reason: impl Into<String>) -> Self {
        Self::ProcessingInterrupted {
            reason: reason.into(),
        }
    }

    /// Whether this error should abort the invoking command rather than
    /// being isolated to one file or row
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Error::InputNotFound { .. }
                | Error::Configuration { .. }
                | Error::Unsupported { .. }
                | Error::ProcessingInterrupted { .. }
        )
    }
}

// Automatic conversions from common error types
impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::Io {
            message: "I/O operation failed".to_string(),
            source: error,
        }
    }
}

impl From<csv::Error> for Error {
    fn from(error: csv::Error) -> Self {
        Self::CsvParsing {
            file: "unknown".to_string(),
            message: "CSV processing failed".to_string(),
            source: Some(error),
        }
    }
}

impl From<glob::PatternError> for Error {
    fn from(error: glob::PatternError) -> Self {
        Self::directory_traversal(format!("Invalid glob pattern: {}", error))
    }
}

impl From<glob::GlobError> for Error {
    fn from(error: glob::GlobError) -> Self {
        Self::directory_traversal(format!("Failed to read glob entry: {}", error))
    }
}

impl From<walkdir::Error> for Error {
    fn from(error: walkdir::Error) -> Self {
        Self::directory_traversal(format!("Directory traversal failed: {}", error))
    }
}
