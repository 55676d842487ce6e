//! Manifest ingestion.
//!
//! A manifest is a delimited text file with a header row, one data row per
//! remote file. [`ManifestReader`] turns it into an ordered list of
//! [`ManifestRecord`]s plus the [`RowError`]s of rows it had to reject.
//!
//! # Example
//!
//! ```ignore
//! use tablefetch::manifest::{ManifestOptions, ManifestReader};
//!
//! let reader = ManifestReader::new(ManifestOptions::new().with_skip_rows(1));
//! let manifest = reader.read_path(Path::new("report.tsv"))?;
//!
//! for err in &manifest.row_errors {
//!     eprintln!("{}", err);
//! }
//! ```

mod reader;
mod record;

pub use reader::{
    ColumnNames, ManifestError, ManifestOptions, ManifestPreset, ManifestReader, ManifestResult,
    DEFAULT_ID_COLUMN, DEFAULT_PATH_COLUMN, DEFAULT_SIZE_COLUMN, DEFAULT_URL_COLUMN,
    ENCODE_BASE_URL,
};
pub use record::{Manifest, ManifestRecord, RowError, RowErrorKind};
