//! Dry-run planning: what a batch would do, without touching the network.

use std::path::{Path, PathBuf};

use tracing::debug;

use super::decision::{decide, Decision, FetchReason, LocalFileState};
use crate::manifest::ManifestRecord;

/// Decision for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedRecord {
    pub record: ManifestRecord,
    pub destination: PathBuf,
    pub decision: Decision,
}

/// Decisions for a whole manifest, in manifest order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub entries: Vec<PlannedRecord>,
}

impl Plan {
    pub fn skip_count(&self) -> usize {
        self.entries.iter().filter(|e| e.decision.is_skip()).count()
    }

    pub fn fetch_count(&self) -> usize {
        self.entries.len() - self.skip_count()
    }

    /// Sum of expected sizes of the records that would be fetched.
    pub fn bytes_to_fetch(&self) -> u64 {
        self.entries
            .iter()
            .filter(|e| !e.decision.is_skip())
            .map(|e| e.record.expected_size)
            .sum()
    }

    /// Records that would be fetched because a differently sized file is in
    /// the way.
    pub fn mismatched(&self) -> impl Iterator<Item = &PlannedRecord> {
        self.entries.iter().filter(|e| {
            matches!(
                e.decision,
                Decision::Fetch(FetchReason::SizeMismatch { .. })
            )
        })
    }
}

/// Observe every record's target path under `output_dir` and decide.
pub fn plan(records: &[ManifestRecord], output_dir: &Path) -> Plan {
    let entries = records
        .iter()
        .map(|record| {
            let destination = output_dir.join(&record.relative_path);
            let decision = decide(record, &LocalFileState::observe(&destination));
            debug!(row = record.row, path = %record.relative_path, ?decision, "Planned");
            PlannedRecord {
                record: record.clone(),
                destination,
                decision,
            }
        })
        .collect();

    Plan { entries }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(row: usize, path: &str, size: u64) -> ManifestRecord {
        ManifestRecord::new(
            format!("id{}", row),
            format!("https://example.com/{}", path),
            path,
            size,
        )
        .at_row(row)
    }

    #[test]
    fn test_plan_mixes_skip_and_fetch() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("done.bin"), b"1234").unwrap();
        std::fs::write(dir.path().join("partial.bin"), b"12").unwrap();
        let records = vec![
            record(1, "done.bin", 4),
            record(2, "partial.bin", 10),
            record(3, "missing.bin", 7),
        ];

        let plan = plan(&records, dir.path());

        assert_eq!(plan.entries.len(), 3);
        assert_eq!(plan.skip_count(), 1);
        assert_eq!(plan.fetch_count(), 2);
        assert_eq!(plan.bytes_to_fetch(), 17);
        assert_eq!(plan.entries[0].decision, Decision::Skip);
        assert_eq!(
            plan.entries[2].decision,
            Decision::Fetch(FetchReason::Missing)
        );
        let mismatched: Vec<_> = plan.mismatched().map(|e| e.record.row).collect();
        assert_eq!(mismatched, vec![2]);
    }

    #[test]
    fn test_plan_does_not_create_files() {
        let dir = TempDir::new().unwrap();
        let records = vec![record(1, "sub/a.bin", 1)];

        let plan = plan(&records, dir.path());

        assert_eq!(plan.entries[0].destination, dir.path().join("sub/a.bin"));
        assert!(!dir.path().join("sub").exists());
    }
}
