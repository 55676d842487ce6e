//! Delimited manifest reader.
//!
//! Columns are located by header name, so reordering the columns of a
//! manifest does not change what is read. A malformed data row becomes a
//! [`RowError`] and reading continues with the next row; only an unreadable
//! stream or a header lacking a required column aborts the read.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Component, Path, PathBuf};

use csv::StringRecord;
use tracing::debug;
use url::Url;

use super::record::{Manifest, ManifestRecord, RowError, RowErrorKind};

/// Default identifier column.
pub const DEFAULT_ID_COLUMN: &str = "ID";

/// Default URL column.
pub const DEFAULT_URL_COLUMN: &str = "Download URL";

/// Default target path column.
pub const DEFAULT_PATH_COLUMN: &str = "Path";

/// Default size column.
pub const DEFAULT_SIZE_COLUMN: &str = "File size";

/// Host that ENCODE report URLs are relative to.
pub const ENCODE_BASE_URL: &str = "https://www.encodeproject.org";

/// Result type for manifest reads.
pub type ManifestResult<T> = Result<T, ManifestError>;

/// Errors that abort a manifest read as a whole.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to open manifest {}: {source}", .path.display())]
    Open { path: PathBuf, source: io::Error },

    #[error("failed to read manifest: {0}")]
    Io(#[from] io::Error),

    #[error("failed to read manifest: {0}")]
    Csv(#[from] csv::Error),

    #[error("manifest header has no '{column}' column")]
    MissingColumn { column: String },
}

/// Header names of the logical manifest columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnNames {
    /// Identifier column. Optional in the header: when absent the target
    /// path doubles as the identifier.
    pub identifier: String,
    /// Remote URL column. Required.
    pub url: String,
    /// Target path column. Optional in the header: when absent the path is
    /// the last segment of the URL.
    pub path: String,
    /// Expected size column. Required.
    pub size: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            identifier: DEFAULT_ID_COLUMN.to_string(),
            url: DEFAULT_URL_COLUMN.to_string(),
            path: DEFAULT_PATH_COLUMN.to_string(),
            size: DEFAULT_SIZE_COLUMN.to_string(),
        }
    }
}

/// Options controlling how a manifest is parsed.
#[derive(Debug, Clone)]
pub struct ManifestOptions {
    /// Field delimiter.
    pub delimiter: u8,
    /// Number of preamble lines before the header row.
    pub skip_rows: usize,
    /// Header names to look for.
    pub columns: ColumnNames,
    /// Base URL that relative URL cells are resolved against.
    pub base_url: Option<Url>,
}

impl Default for ManifestOptions {
    fn default() -> Self {
        Self {
            delimiter: b'\t',
            skip_rows: 0,
            columns: ColumnNames::default(),
            base_url: None,
        }
    }
}

impl ManifestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_skip_rows(mut self, skip_rows: usize) -> Self {
        self.skip_rows = skip_rows;
        self
    }

    pub fn with_columns(mut self, columns: ColumnNames) -> Self {
        self.columns = columns;
        self
    }

    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = Some(base_url);
        self
    }
}

/// Named option sets for well-known manifest sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestPreset {
    /// ENCODE portal file reports: one title line above the header and
    /// download URLs relative to the portal.
    Encode,
}

impl ManifestPreset {
    /// Look a preset up by name, ignoring ASCII case.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "encode" => Some(Self::Encode),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Encode => "encode",
        }
    }

    /// Reader options this preset starts from.
    pub fn options(self) -> ManifestOptions {
        match self {
            Self::Encode => ManifestOptions {
                skip_rows: 1,
                base_url: Url::parse(ENCODE_BASE_URL).ok(),
                ..ManifestOptions::default()
            },
        }
    }
}

/// Column positions resolved from the header row.
#[derive(Debug)]
struct ColumnLayout {
    identifier: Option<usize>,
    url: usize,
    path: Option<usize>,
    size: usize,
}

impl ColumnLayout {
    fn resolve(headers: &StringRecord, names: &ColumnNames) -> ManifestResult<Self> {
        let required = |name: &str| {
            find_column(headers, name).ok_or_else(|| ManifestError::MissingColumn {
                column: name.to_string(),
            })
        };

        Ok(Self {
            identifier: find_column(headers, &names.identifier),
            url: required(&names.url)?,
            path: find_column(headers, &names.path),
            size: required(&names.size)?,
        })
    }
}

/// Exact match first, then ASCII case-insensitive.
fn find_column(headers: &StringRecord, name: &str) -> Option<usize> {
    headers
        .iter()
        .position(|h| h == name)
        .or_else(|| headers.iter().position(|h| h.eq_ignore_ascii_case(name)))
}

/// Reads manifests into validated records.
///
/// Never touches the filesystem beyond the manifest itself, and never the
/// network.
#[derive(Debug, Clone, Default)]
pub struct ManifestReader {
    options: ManifestOptions,
}

impl ManifestReader {
    pub fn new(options: ManifestOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ManifestOptions {
        &self.options
    }

    /// Read a manifest file.
    pub fn read_path(&self, path: &Path) -> ManifestResult<Manifest> {
        let file = File::open(path).map_err(|source| ManifestError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        self.read(file)
    }

    /// Read a manifest from any byte stream.
    pub fn read<R: Read>(&self, input: R) -> ManifestResult<Manifest> {
        let mut input = BufReader::new(input);
        let skipped = skip_lines(&mut input, self.options.skip_rows)?;

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.options.delimiter)
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(input);

        let headers = reader.headers()?.clone();
        let layout = ColumnLayout::resolve(&headers, &self.options.columns)?;

        let mut manifest = Manifest::default();
        let mut seen_paths: HashMap<String, usize> = HashMap::new();
        let mut seen_ids: HashMap<String, usize> = HashMap::new();
        let mut raw = StringRecord::new();
        let mut row = 0;

        loop {
            let read = reader.read_record(&mut raw);
            match read {
                Ok(false) => break,
                Ok(true) => {
                    row += 1;
                    let line = raw.position().map(|p| p.line() + skipped);
                    let parsed = self
                        .parse_row(&raw, &layout, row)
                        .and_then(|record| check_unique(record, &mut seen_paths, &mut seen_ids));
                    match parsed {
                        Ok(record) => manifest.records.push(record),
                        Err(kind) => manifest.row_errors.push(RowError::new(row, line, kind)),
                    }
                }
                Err(err) => {
                    if matches!(err.kind(), csv::ErrorKind::Io(_)) {
                        return Err(err.into());
                    }
                    row += 1;
                    let line = err.position().map(|p| p.line() + skipped);
                    manifest.row_errors.push(RowError::new(
                        row,
                        line,
                        RowErrorKind::Malformed {
                            reason: err.to_string(),
                        },
                    ));
                }
            }
        }

        debug!(
            records = manifest.records.len(),
            row_errors = manifest.row_errors.len(),
            "Manifest read"
        );

        Ok(manifest)
    }

    fn parse_row(
        &self,
        raw: &StringRecord,
        layout: &ColumnLayout,
        row: usize,
    ) -> Result<ManifestRecord, RowErrorKind> {
        let columns = &self.options.columns;

        let identifier = layout
            .identifier
            .map(|idx| field(raw, idx, &columns.identifier))
            .transpose()?;
        let url_cell = field(raw, layout.url, &columns.url)?;
        let size_cell = field(raw, layout.size, &columns.size)?;

        let expected_size = parse_size(size_cell)?;
        let remote_url = self.resolve_url(url_cell)?;

        let path_cell = match layout.path {
            Some(idx) => field(raw, idx, &columns.path)?.to_string(),
            None => file_name_from_url(&remote_url).ok_or_else(|| RowErrorKind::InvalidUrl {
                value: remote_url.to_string(),
                reason: "no file name in URL path".to_string(),
            })?,
        };
        let relative_path = normalize_relative_path(&path_cell)?;
        let identifier = identifier
            .map(str::to_string)
            .unwrap_or_else(|| relative_path.clone());

        Ok(
            ManifestRecord::new(identifier, remote_url.as_str(), relative_path, expected_size)
                .at_row(row),
        )
    }

    fn resolve_url(&self, cell: &str) -> Result<Url, RowErrorKind> {
        let invalid = |reason: String| RowErrorKind::InvalidUrl {
            value: cell.to_string(),
            reason,
        };

        let url = match Url::parse(cell) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => match &self.options.base_url {
                Some(base) => base.join(cell).map_err(|e| invalid(e.to_string()))?,
                None => return Err(invalid("relative URL and no base URL configured".into())),
            },
            Err(e) => return Err(invalid(e.to_string())),
        };

        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(invalid(format!("unsupported scheme '{}'", other))),
        }
    }
}

fn skip_lines<R: BufRead>(input: &mut R, count: usize) -> io::Result<u64> {
    let mut skipped = 0;
    let mut buf = Vec::new();
    for _ in 0..count {
        buf.clear();
        if input.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        skipped += 1;
    }
    Ok(skipped)
}

fn field<'a>(raw: &'a StringRecord, idx: usize, column: &str) -> Result<&'a str, RowErrorKind> {
    match raw.get(idx) {
        None => Err(RowErrorKind::MissingField {
            column: column.to_string(),
        }),
        Some("") => Err(RowErrorKind::EmptyField {
            column: column.to_string(),
        }),
        Some(value) => Ok(value),
    }
}

fn parse_size(value: &str) -> Result<u64, RowErrorKind> {
    value.parse::<u64>().map_err(|_| RowErrorKind::InvalidSize {
        value: value.to_string(),
    })
}

/// Last non-empty path segment of a URL.
fn file_name_from_url(url: &Url) -> Option<String> {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}

/// Reject absolute paths and parent traversal, and collapse `.` and repeated
/// separators so that duplicate detection sees one spelling per path.
fn normalize_relative_path(value: &str) -> Result<String, RowErrorKind> {
    let unsafe_path = || RowErrorKind::UnsafePath {
        value: value.to_string(),
    };

    let mut parts = Vec::new();
    for component in Path::new(value).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str().ok_or_else(unsafe_path)?),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(unsafe_path())
            }
        }
    }

    if parts.is_empty() {
        return Err(unsafe_path());
    }
    Ok(parts.join("/"))
}

fn check_unique(
    record: ManifestRecord,
    seen_paths: &mut HashMap<String, usize>,
    seen_ids: &mut HashMap<String, usize>,
) -> Result<ManifestRecord, RowErrorKind> {
    if let Some(&first_row) = seen_paths.get(&record.relative_path) {
        return Err(RowErrorKind::DuplicatePath {
            value: record.relative_path,
            first_row,
        });
    }
    if let Some(&first_row) = seen_ids.get(&record.identifier) {
        return Err(RowErrorKind::DuplicateIdentifier {
            value: record.identifier,
            first_row,
        });
    }
    seen_paths.insert(record.relative_path.clone(), record.row);
    seen_ids.insert(record.identifier.clone(), record.row);
    Ok(record)
}
