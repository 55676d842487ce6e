//! Arguments and settings resolution shared across commands.
//!
//! Every setting follows the same precedence: CLI flag, then config file,
//! then built-in default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Args;
use tablefetch::config::{parse_delimiter, ConfigFile};
use tablefetch::manifest::{ColumnNames, ManifestPreset};
use tablefetch::{FetchConfig, ManifestOptions};
use url::Url;

use crate::error::CliError;

/// Manifest location and parsing options.
#[derive(Debug, Clone, Args)]
pub struct ManifestArgs {
    /// Manifest file (delimited text with a header row)
    #[arg(short, long)]
    pub input: PathBuf,

    /// Directory the files are written to
    #[arg(short, long = "output-dir")]
    pub output_dir: PathBuf,

    /// Config file (default: <config dir>/tablefetch/config.ini)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Option preset for a known manifest source (encode: one preamble
    /// line, URLs relative to https://www.encodeproject.org)
    #[arg(long)]
    pub preset: Option<String>,

    /// Base URL for relative URLs in the manifest
    #[arg(long)]
    pub base_url: Option<String>,

    /// Field delimiter: tab, comma, semicolon, pipe or a single character
    #[arg(long)]
    pub delimiter: Option<String>,

    /// Preamble lines before the header row
    #[arg(long)]
    pub skip_rows: Option<usize>,

    /// Identifier column name
    #[arg(long)]
    pub id_column: Option<String>,

    /// URL column name
    #[arg(long)]
    pub url_column: Option<String>,

    /// Target path column name
    #[arg(long)]
    pub path_column: Option<String>,

    /// Expected size column name
    #[arg(long)]
    pub size_column: Option<String>,
}

/// Transfer options.
#[derive(Debug, Clone, Args)]
pub struct TransferArgs {
    /// Maximum concurrent downloads
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,

    /// Read timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Connect timeout in seconds
    #[arg(long)]
    pub connect_timeout: Option<u64>,

    /// Retries for transient network failures
    #[arg(long)]
    pub retries: Option<u32>,

    /// Delay between retries in milliseconds
    #[arg(long)]
    pub retry_delay_ms: Option<u64>,

    /// Access token sent with every request
    #[arg(long, env = "TABLEFETCH_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Header carrying the access token
    #[arg(long)]
    pub auth_header: Option<String>,
}

/// Load the config file.
///
/// An explicitly named file must exist; the default location may be absent.
pub fn load_config(path: Option<&Path>) -> Result<ConfigFile, CliError> {
    match path {
        Some(path) if !path.exists() => Err(CliError::Config(format!(
            "config file not found: {}",
            path.display()
        ))),
        Some(path) => Ok(ConfigFile::load_from(path)?),
        None => Ok(ConfigFile::load()?),
    }
}

/// Resolve manifest reader options.
pub fn resolve_manifest_options(
    args: &ManifestArgs,
    config: &ConfigFile,
) -> Result<ManifestOptions, CliError> {
    let mut options = match &args.preset {
        Some(name) => {
            let preset = ManifestPreset::from_name(name)
                .ok_or_else(|| CliError::Config(format!("unknown preset '{}' (expected 'encode')", name)))?;
            config.manifest.apply_to(preset.options())?
        }
        None => config.manifest.to_options()?,
    };

    if let Some(delimiter) = &args.delimiter {
        let byte = parse_delimiter(delimiter).ok_or_else(|| {
            CliError::Config(format!("invalid delimiter '{}'", delimiter))
        })?;
        options = options.with_delimiter(byte);
    }
    if let Some(skip_rows) = args.skip_rows {
        options = options.with_skip_rows(skip_rows);
    }
    if let Some(base) = &args.base_url {
        let url = Url::parse(base)
            .map_err(|e| CliError::Config(format!("invalid base URL '{}': {}", base, e)))?;
        options = options.with_base_url(url);
    }

    let current = options.columns.clone();
    options = options.with_columns(ColumnNames {
        identifier: args.id_column.clone().unwrap_or(current.identifier),
        url: args.url_column.clone().unwrap_or(current.url),
        path: args.path_column.clone().unwrap_or(current.path),
        size: args.size_column.clone().unwrap_or(current.size),
    });

    Ok(options)
}

/// Resolve engine settings.
pub fn resolve_fetch_config(args: &TransferArgs, config: &ConfigFile) -> FetchConfig {
    let mut fetch = FetchConfig::from_config_file(config);

    if let Some(concurrency) = args.concurrency {
        fetch = fetch.with_parallel_downloads(concurrency);
    }
    if let Some(timeout) = args.timeout {
        fetch = fetch.with_timeout_secs(timeout);
    }
    if let Some(connect) = args.connect_timeout {
        fetch = fetch.with_connect_timeout_secs(connect);
    }
    if let Some(retries) = args.retries {
        fetch = fetch.with_max_retries(retries);
    }
    if let Some(delay_ms) = args.retry_delay_ms {
        fetch = fetch.with_retry_delay(Duration::from_millis(delay_ms));
    }
    if let Some(token) = &args.token {
        fetch = fetch.with_access_token(token.clone());
    }
    if let Some(header) = &args.auth_header {
        fetch = fetch.with_auth_header(header.clone());
    }

    fetch
}

/// Human-readable byte count.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
