//! CLI error type and exit codes.

use std::process::ExitCode;

use tablefetch::config::ConfigError;
use tablefetch::BatchError;
use thiserror::Error;

/// Errors that end a command before it produces a report.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid or unreadable configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The batch could not start.
    #[error("{0}")]
    Batch(#[from] BatchError),

    /// Writing output (report file, log file) failed.
    #[error("IO error: {0}")]
    Io(String),

    /// Runtime or signal handler setup failed.
    #[error("Startup error: {0}")]
    Startup(String),
}

impl CliError {
    /// Exit code for this error.
    ///
    /// 1 is reserved for runs that finished with failures.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            CliError::Config(_) => ExitCode::from(78), // EX_CONFIG
            CliError::Batch(BatchError::Manifest(_)) => ExitCode::from(65), // EX_DATAERR
            CliError::Batch(_) => ExitCode::from(73), // EX_CANTCREAT
            CliError::Io(_) => ExitCode::from(74), // EX_IOERR
            CliError::Startup(_) => ExitCode::from(71), // EX_OSERR
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        CliError::Config(err.to_string())
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io(err.to_string())
    }
}
