//! Patch records shared by producer and consumer
//!
//! A patch manifest lists every changed path once, under exactly one of
//! `added`, `modified` or `deleted`. [`validate_patch`] is run by both sides
//! before any state is touched.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::manifest::{BundleManifest, ValidationReport};

/// Kind of change recorded for one path
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffOperation {
    /// Present only in the newer build
    Added,
    /// Present in both builds with different content
    Modified,
    /// Present only in the older build
    Deleted,
}

impl fmt::Display for DiffOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        })
    }
}

/// Change record for one path
///
/// `Added` carries no `old_hash`, `Deleted` carries no `new_hash`,
/// `Modified` carries both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetDiff {
    /// Logical asset path
    pub path: String,
    /// Change kind
    pub operation: DiffOperation,
    /// Hash in the older build
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_hash: Option<String>,
    /// Hash in the newer build
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_hash: Option<String>,
    /// Asset version in the older build
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_version: Option<u32>,
    /// Asset version in the newer build
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_version: Option<u32>,
    /// Payload size in the newer build
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl AssetDiff {
    /// A path that appeared
    pub fn added(path: impl Into<String>, new_hash: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            operation: DiffOperation::Added,
            old_hash: None,
            new_hash: Some(new_hash.into()),
            old_version: None,
            new_version: None,
            size: Some(size),
        }
    }

    /// A path whose content changed
    pub fn modified(
        path: impl Into<String>,
        old_hash: impl Into<String>,
        new_hash: impl Into<String>,
        size: u64,
    ) -> Self {
        Self {
            path: path.into(),
            operation: DiffOperation::Modified,
            old_hash: Some(old_hash.into()),
            new_hash: Some(new_hash.into()),
            old_version: None,
            new_version: None,
            size: Some(size),
        }
    }

    /// A path that disappeared
    pub fn deleted(path: impl Into<String>, old_hash: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            operation: DiffOperation::Deleted,
            old_hash: Some(old_hash.into()),
            new_hash: None,
            old_version: None,
            new_version: None,
            size: None,
        }
    }

    /// Attach asset versions
    #[must_use]
    pub const fn with_versions(mut self, old: Option<u32>, new: Option<u32>) -> Self {
        self.old_version = old;
        self.new_version = new;
        self
    }
}

/// Changed paths grouped by operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchChanges {
    /// Paths present only in the newer build
    pub added: Vec<String>,
    /// Paths with changed content
    pub modified: Vec<String>,
    /// Paths present only in the older build
    pub deleted: Vec<String>,
}

impl PatchChanges {
    /// Group diff records by operation, each list sorted
    pub fn from_diffs(diffs: &[AssetDiff]) -> Self {
        let mut changes = Self::default();
        for diff in diffs {
            let bucket = match diff.operation {
                DiffOperation::Added => &mut changes.added,
                DiffOperation::Modified => &mut changes.modified,
                DiffOperation::Deleted => &mut changes.deleted,
            };
            bucket.push(diff.path.clone());
        }
        changes.added.sort();
        changes.modified.sort();
        changes.deleted.sort();
        changes
    }

    /// Total number of changed paths
    pub fn total(&self) -> usize {
        self.added.len() + self.modified.len() + self.deleted.len()
    }

    /// True when nothing changed
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Deterministic identifier of a patch between two versions
pub fn patch_version(from: u32, to: u32) -> String {
    format!("{from}-{to}")
}

/// Check that a patch manifest can be applied on top of `current_version`
///
/// `stored_hash` looks up the locally recorded hash of a path. A mismatch
/// against the patch's `oldHash` is a warning only, so locally modified
/// caches can still be patched.
pub fn validate_patch<F>(
    patch: &BundleManifest,
    current_version: u32,
    stored_hash: F,
) -> ValidationReport
where
    F: Fn(&str) -> Option<String>,
{
    let mut report = ValidationReport::ok();

    if !patch.is_patch {
        report.error("manifest is not a patch");
        return report;
    }

    match patch.from_version {
        Some(from) if from == current_version => {}
        Some(from) => report.error(format!(
            "patch applies to version {from}, current version is {current_version}"
        )),
        None => report.error("patch has no fromVersion"),
    }

    match (patch.from_version, patch.to_version) {
        (Some(from), Some(to)) if to <= from => {
            report.error(format!("patch target version {to} is not after {from}"));
        }
        (_, None) => report.error("patch has no toVersion"),
        _ => {}
    }

    if patch.changes.is_none() {
        report.error("patch has no change list");
    }

    for diff in &patch.change_details {
        if diff.operation == DiffOperation::Added {
            continue;
        }
        let Some(expected) = diff.old_hash.as_deref() else {
            continue;
        };
        match stored_hash(&diff.path) {
            Some(actual) if actual == expected => {}
            Some(actual) => report.warn(format!(
                "{} was modified locally: expected {expected}, found {actual}",
                diff.path
            )),
            None => report.warn(format!("{} is not present locally", diff.path)),
        }
    }

    report
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::generator::{ManifestOptions, generate_manifest};

    fn patch_manifest(from: u32, to: u32, details: Vec<AssetDiff>) -> BundleManifest {
        let mut manifest = generate_manifest("main", &[], &ManifestOptions::default())
            .expect("Operation should succeed");
        manifest.is_patch = true;
        manifest.from_version = Some(from);
        manifest.to_version = Some(to);
        manifest.patch_version = Some(patch_version(from, to));
        manifest.changes = Some(PatchChanges::from_diffs(&details));
        manifest.total_changes = Some(details.len());
        manifest.change_details = details;
        manifest
    }

    #[test]
    fn test_changes_grouped_by_operation() {
        let diffs = vec![
            AssetDiff::added("c.png", "h3", 1),
            AssetDiff::modified("b.png", "h2", "h2b", 1),
            AssetDiff::deleted("d.png", "h4"),
        ];
        let changes = PatchChanges::from_diffs(&diffs);
        assert_eq!(changes.added, vec!["c.png"]);
        assert_eq!(changes.modified, vec!["b.png"]);
        assert_eq!(changes.deleted, vec!["d.png"]);
        assert_eq!(changes.total(), 3);
    }

    #[test]
    fn test_version_mismatch_is_an_error() {
        let patch = patch_manifest(5, 6, Vec::new());
        let report = validate_patch(&patch, 4, |_| None);
        assert!(!report.valid);
        assert!(report.errors[0].contains("version 5"));

        assert!(validate_patch(&patch, 5, |_| None).valid);
    }

    #[test]
    fn test_old_hash_mismatch_is_a_warning() {
        let patch = patch_manifest(1, 2, vec![AssetDiff::modified("b.png", "old", "new", 3)]);
        let report = validate_patch(&patch, 1, |_| Some("edited".to_string()));
        assert!(report.valid);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_full_bundle_is_not_a_patch() {
        let manifest = generate_manifest("main", &[], &ManifestOptions::default())
            .expect("Operation should succeed");
        assert!(!validate_patch(&manifest, 1, |_| None).valid);
    }
}
