//! Configuration for the fetch engine and the optional `config.ini` file.
//!
//! Settings resolve in the order: command-line flag, config file, built-in
//! default. The library only supplies the last two; the CLI layers its flags
//! on top.
//!
//! ```ini
//! [download]
//! parallel = 8
//! timeout = 60
//! connect_timeout = 30
//! retries = 2
//! retry_delay_ms = 0
//!
//! [auth]
//! token = secret
//! header = Authorization
//!
//! [manifest]
//! preset = encode
//! delimiter = tab
//! url_column = Download URL
//! size_column = File size
//! ```
//!
//! `preset = encode` supplies `skip_rows = 1` and
//! `base_url = https://www.encodeproject.org`; explicit keys override it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::Ini;

use crate::manifest::{ColumnNames, ManifestOptions, ManifestPreset};

/// Default number of concurrent transfers.
pub const DEFAULT_PARALLEL_DOWNLOADS: usize = 4;

/// Default read timeout in seconds: the longest a transfer may stall.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Default connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Default header carrying the access token.
pub const DEFAULT_AUTH_HEADER: &str = "Authorization";

/// Name of the config file inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.ini";

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors from loading or interpreting configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Read { path: PathBuf, source: ini::Error },

    #[error("failed to parse config: {0}")]
    Parse(#[from] ini::ParseError),

    #[error("invalid value '{value}' for {section}.{key}: {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },
}

/// Settings for the downloader and scheduler.
#[derive(Clone)]
pub struct FetchConfig {
    /// Maximum number of transfers in flight.
    pub parallel_downloads: usize,
    /// Maximum time to establish a connection.
    pub connect_timeout: Duration,
    /// Maximum time a single read from the connection may take.
    pub timeout: Duration,
    /// Retries after the first attempt, for transient failures only.
    pub max_retries: u32,
    /// Pause between attempts.
    pub retry_delay: Duration,
    /// Static credential attached to every request.
    pub access_token: Option<String>,
    /// Header carrying the credential.
    pub auth_header: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            parallel_downloads: DEFAULT_PARALLEL_DOWNLOADS,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::ZERO,
            access_token: None,
            auth_header: DEFAULT_AUTH_HEADER.to_string(),
        }
    }
}

impl fmt::Debug for FetchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchConfig")
            .field("parallel_downloads", &self.parallel_downloads)
            .field("connect_timeout", &self.connect_timeout)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("auth_header", &self.auth_header)
            .finish()
    }
}

impl FetchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of concurrent transfers (minimum 1).
    pub fn with_parallel_downloads(mut self, parallel: usize) -> Self {
        self.parallel_downloads = parallel.max(1);
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_connect_timeout_secs(mut self, secs: u64) -> Self {
        self.connect_timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn with_auth_header(mut self, header: impl Into<String>) -> Self {
        self.auth_header = header.into();
        self
    }

    /// Apply the `[download]` and `[auth]` sections of a config file.
    pub fn from_config_file(config: &ConfigFile) -> Self {
        let mut fetch = Self::default();
        let download = &config.download;

        if let Some(parallel) = download.parallel {
            fetch = fetch.with_parallel_downloads(parallel);
        }
        if let Some(timeout) = download.timeout {
            fetch = fetch.with_timeout_secs(timeout);
        }
        if let Some(connect) = download.connect_timeout {
            fetch = fetch.with_connect_timeout_secs(connect);
        }
        if let Some(retries) = download.retries {
            fetch = fetch.with_max_retries(retries);
        }
        if let Some(delay_ms) = download.retry_delay_ms {
            fetch = fetch.with_retry_delay(Duration::from_millis(delay_ms));
        }
        if let Some(token) = &config.auth.token {
            fetch = fetch.with_access_token(token.clone());
        }
        if let Some(header) = &config.auth.header {
            fetch = fetch.with_auth_header(header.clone());
        }
        fetch
    }
}

/// `[download]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadSection {
    pub parallel: Option<usize>,
    pub timeout: Option<u64>,
    pub connect_timeout: Option<u64>,
    pub retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
}

/// `[auth]` section.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AuthSection {
    pub token: Option<String>,
    pub header: Option<String>,
}

impl fmt::Debug for AuthSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSection")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("header", &self.header)
            .finish()
    }
}

/// `[manifest]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestSection {
    pub preset: Option<ManifestPreset>,
    pub delimiter: Option<u8>,
    pub skip_rows: Option<usize>,
    pub base_url: Option<String>,
    pub id_column: Option<String>,
    pub url_column: Option<String>,
    pub path_column: Option<String>,
    pub size_column: Option<String>,
}

impl ManifestSection {
    /// Reader options from this section, with the preset's (or built-in)
    /// defaults for unset keys.
    pub fn to_options(&self) -> ConfigResult<ManifestOptions> {
        let base = self.preset.map(ManifestPreset::options).unwrap_or_default();
        self.apply_to(base)
    }

    /// Override `options` with the keys set in this section. The section's
    /// own preset is ignored.
    pub fn apply_to(&self, mut options: ManifestOptions) -> ConfigResult<ManifestOptions> {
        if let Some(delimiter) = self.delimiter {
            options = options.with_delimiter(delimiter);
        }
        if let Some(skip_rows) = self.skip_rows {
            options = options.with_skip_rows(skip_rows);
        }
        if let Some(base) = &self.base_url {
            let url = url::Url::parse(base).map_err(|e| ConfigError::InvalidValue {
                section: "manifest".to_string(),
                key: "base_url".to_string(),
                value: base.clone(),
                reason: e.to_string(),
            })?;
            options = options.with_base_url(url);
        }

        let current = options.columns.clone();
        options = options.with_columns(ColumnNames {
            identifier: self.id_column.clone().unwrap_or(current.identifier),
            url: self.url_column.clone().unwrap_or(current.url),
            path: self.path_column.clone().unwrap_or(current.path),
            size: self.size_column.clone().unwrap_or(current.size),
        });
        Ok(options)
    }
}

/// Parsed `config.ini`. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    pub download: DownloadSection,
    pub auth: AuthSection,
    pub manifest: ManifestSection,
}

impl ConfigFile {
    /// Load from the default location. A missing file yields defaults.
    pub fn load() -> ConfigResult<Self> {
        Self::load_from(&config_file_path())
    }

    /// Load from a specific path. A missing file yields defaults.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ini(&ini)
    }

    /// Parse config text.
    pub fn parse(text: &str) -> ConfigResult<Self> {
        let ini = Ini::load_from_str(text)?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> ConfigResult<Self> {
        let download = DownloadSection {
            parallel: parse_key(ini, "download", "parallel")?,
            timeout: parse_key(ini, "download", "timeout")?,
            connect_timeout: parse_key(ini, "download", "connect_timeout")?,
            retries: parse_key(ini, "download", "retries")?,
            retry_delay_ms: parse_key(ini, "download", "retry_delay_ms")?,
        };

        let auth = AuthSection {
            token: string_key(ini, "auth", "token"),
            header: string_key(ini, "auth", "header"),
        };

        let delimiter = match string_key(ini, "manifest", "delimiter") {
            Some(value) => Some(parse_delimiter(&value).ok_or_else(|| {
                ConfigError::InvalidValue {
                    section: "manifest".to_string(),
                    key: "delimiter".to_string(),
                    value: value.clone(),
                    reason: "expected 'tab', 'comma' or a single ASCII character".to_string(),
                }
            })?),
            None => None,
        };

        let preset = match string_key(ini, "manifest", "preset") {
            Some(value) => Some(ManifestPreset::from_name(&value).ok_or_else(|| {
                ConfigError::InvalidValue {
                    section: "manifest".to_string(),
                    key: "preset".to_string(),
                    value: value.clone(),
                    reason: "expected 'encode'".to_string(),
                }
            })?),
            None => None,
        };

        let manifest = ManifestSection {
            preset,
            delimiter,
            skip_rows: parse_key(ini, "manifest", "skip_rows")?,
            base_url: string_key(ini, "manifest", "base_url"),
            id_column: string_key(ini, "manifest", "id_column"),
            url_column: string_key(ini, "manifest", "url_column"),
            path_column: string_key(ini, "manifest", "path_column"),
            size_column: string_key(ini, "manifest", "size_column"),
        };

        Ok(Self {
            download,
            auth,
            manifest,
        })
    }
}

/// Default config file location: `<config dir>/tablefetch/config.ini`.
pub fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tablefetch")
        .join(CONFIG_FILE_NAME)
}

/// Parse a delimiter name or single ASCII character.
pub fn parse_delimiter(value: &str) -> Option<u8> {
    match value.trim() {
        "tab" | "\\t" | "\t" => Some(b'\t'),
        "comma" => Some(b','),
        "semicolon" => Some(b';'),
        "pipe" => Some(b'|'),
        other => {
            let bytes = other.as_bytes();
            (bytes.len() == 1 && bytes[0].is_ascii()).then(|| bytes[0])
        }
    }
}

fn string_key(ini: &Ini, section: &str, key: &str) -> Option<String> {
    ini.section(Some(section))
        .and_then(|props| props.get(key))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn parse_key<T>(ini: &Ini, section: &str, key: &str) -> ConfigResult<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match string_key(ini, section, key) {
        None => Ok(None),
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                section: section.to_string(),
                key: key.to_string(),
                value,
                reason: e.to_string(),
            }),
    }
}
