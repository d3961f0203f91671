//! Diff engine over two build logs
//!
//! Each log's `path → hash` map is treated as a set. Every path that differs
//! lands in exactly one bucket.

use qpk_formats::{AssetDiff, PatchChanges};

use crate::ledger::BuildLog;

/// Classified differences between two builds
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffSummary {
    /// Version compared from
    pub from_version: u32,
    /// Version compared to
    pub to_version: u32,
    /// Paths only in the newer build
    pub added: Vec<AssetDiff>,
    /// Paths in both builds with different hashes
    pub modified: Vec<AssetDiff>,
    /// Paths only in the older build
    pub deleted: Vec<AssetDiff>,
}

impl DiffSummary {
    /// Number of changed paths
    pub fn total_changes(&self) -> usize {
        self.added.len() + self.modified.len() + self.deleted.len()
    }

    /// True when the builds hold identical content
    pub fn is_empty(&self) -> bool {
        self.total_changes() == 0
    }

    /// Changed paths grouped by operation
    pub fn changes(&self) -> PatchChanges {
        PatchChanges::from_diffs(&self.records())
    }

    /// All records, sorted by path
    pub fn records(&self) -> Vec<AssetDiff> {
        let mut all: Vec<AssetDiff> = self
            .added
            .iter()
            .chain(&self.modified)
            .chain(&self.deleted)
            .cloned()
            .collect();
        all.sort_by(|a, b| a.path.cmp(&b.path));
        all
    }

    /// Bytes that a patch must carry: added plus modified sizes
    pub fn payload_size(&self) -> u64 {
        self.added
            .iter()
            .chain(&self.modified)
            .filter_map(|d| d.size)
            .sum()
    }
}

/// Compare two build logs
pub fn analyze_differences(from: &BuildLog, to: &BuildLog) -> DiffSummary {
    let mut summary = DiffSummary {
        from_version: from.bundle_version,
        to_version: to.bundle_version,
        ..DiffSummary::default()
    };

    for (path, new) in &to.assets {
        match from.assets.get(path) {
            None => summary
                .added
                .push(AssetDiff::added(path, &new.hash, new.size).with_versions(None, new.version)),
            Some(old) if old.hash != new.hash => summary.modified.push(
                AssetDiff::modified(path, &old.hash, &new.hash, new.size)
                    .with_versions(old.version, new.version),
            ),
            Some(_) => {}
        }
    }

    for (path, old) in &from.assets {
        if !to.assets.contains_key(path) {
            summary
                .deleted
                .push(AssetDiff::deleted(path, &old.hash).with_versions(old.version, None));
        }
    }

    summary
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ledger::LoggedAsset;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use qpk_formats::{ContainerFormat, sha256_hex};
    use std::collections::{BTreeMap, BTreeSet};

    fn log(version: u32, files: &[(&str, &str)]) -> BuildLog {
        BuildLog {
            bundle_name: "main".to_string(),
            build_number: format!("b{version}"),
            bundle_version: version,
            format: ContainerFormat::Qpk,
            container_file: String::new(),
            container_hash: String::new(),
            container_size: 0,
            merkle_root: String::new(),
            created_at: Utc::now(),
            assets: files
                .iter()
                .map(|(path, content)| {
                    (
                        (*path).to_string(),
                        LoggedAsset {
                            hash: sha256_hex(content.as_bytes()),
                            size: content.len() as u64,
                            version: None,
                            mtime: None,
                            asset_type: None,
                            sub_type: None,
                            locales: Vec::new(),
                        },
                    )
                })
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn test_added_modified_unchanged() {
        let v1 = log(1, &[("a.png", "A"), ("b.png", "B")]);
        let v2 = log(2, &[("a.png", "A"), ("b.png", "B2"), ("c.png", "C")]);

        let diff = analyze_differences(&v1, &v2);
        let changes = diff.changes();

        assert_eq!(changes.modified, vec!["b.png"]);
        assert_eq!(changes.added, vec!["c.png"]);
        assert!(changes.deleted.is_empty());
        assert_eq!(diff.total_changes(), 2);
        assert_eq!(diff.payload_size(), 3);

        let modified = &diff.modified[0];
        assert_eq!(modified.old_hash.as_deref(), Some(sha256_hex(b"B").as_str()));
        assert_eq!(modified.new_hash.as_deref(), Some(sha256_hex(b"B2").as_str()));
        assert!(diff.added[0].old_hash.is_none());
    }

    #[test]
    fn test_deleted_and_identical() {
        let v1 = log(1, &[("a.png", "A"), ("gone.png", "G")]);
        let v2 = log(2, &[("a.png", "A")]);

        let diff = analyze_differences(&v1, &v2);
        assert_eq!(diff.changes().deleted, vec!["gone.png"]);
        assert!(diff.deleted[0].new_hash.is_none());

        assert!(analyze_differences(&v2, &v2).is_empty());
    }

    proptest! {
        #[test]
        fn buckets_partition_the_changed_paths(
            before in prop::collection::btree_map("[a-e]{1,2}", "[xy]", 0..12),
            after in prop::collection::btree_map("[a-e]{1,2}", "[xy]", 0..12),
        ) {
            let from_files: Vec<(&str, &str)> = before.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
            let to_files: Vec<(&str, &str)> = after.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
            let diff = analyze_differences(&log(1, &from_files), &log(2, &to_files));
            let changes = diff.changes();

            let expected: BTreeSet<&String> = before
                .keys()
                .chain(after.keys())
                .filter(|path| before.get(*path) != after.get(*path))
                .collect();

            let mut seen = BTreeSet::new();
            for path in changes.added.iter().chain(&changes.modified).chain(&changes.deleted) {
                prop_assert!(seen.insert(path), "{} appears twice", path);
            }
            prop_assert_eq!(seen, expected);
        }
    }
}
