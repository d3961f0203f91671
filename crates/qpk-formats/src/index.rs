//! Bundle indices
//!
//! `index.json` points at the latest build of one bundle, keeps a short ring
//! of earlier builds and lists the published patches. A workspace adds
//! `workspace-index.json` holding every bundle index plus a global patch
//! list. Producers write these files; consumers read them to discover
//! patches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Number of earlier builds kept in an index
pub const MAX_PREVIOUS_BUILDS: usize = 10;

/// Single-bundle index file name
pub const INDEX_FILE: &str = "index.json";

/// Workspace index file name
pub const WORKSPACE_INDEX_FILE: &str = "workspace-index.json";

/// Summary of one build as kept in an index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildDescriptor {
    /// Bundle version
    pub version: u32,
    /// Build identifier
    pub build_number: String,
    /// Container file name
    pub file: String,
    /// Container hash
    pub hash: String,
    /// Container size
    pub size: u64,
    /// Merkle root
    pub merkle_root: String,
    /// Number of assets
    pub asset_count: usize,
    /// Build time
    pub created_at: DateTime<Utc>,
}

/// Published patch as kept in an index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchDescriptor {
    /// Patch file name
    pub file: String,
    /// SHA-256 of the patch file
    pub hash: String,
    /// Version the patch applies to
    pub from_version: u32,
    /// Version the patch produces
    pub to_version: u32,
    /// Number of changed paths
    pub change_count: usize,
    /// Patch file size
    pub size: u64,
    /// Registration time
    pub created_at: DateTime<Utc>,
}

impl PatchDescriptor {
    /// `(from, to)` pair identifying the patch
    pub const fn version_pair(&self) -> (u32, u32) {
        (self.from_version, self.to_version)
    }
}

/// Insert `patch`, replacing any patch for the same version pair, and keep
/// the list sorted newest first
fn upsert_patch(patches: &mut Vec<PatchDescriptor>, patch: PatchDescriptor) {
    patches.retain(|p| p.version_pair() != patch.version_pair());
    patches.push(patch);
    patches.sort_by(|a, b| b.version_pair().cmp(&a.version_pair()));
}

/// Mutable pointer structure for one bundle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleIndex {
    /// Bundle name
    pub bundle_name: String,
    /// Current bundle version
    pub current_version: u32,
    /// Current build identifier
    #[serde(default)]
    pub current_build: String,
    /// Latest build
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest: Option<BuildDescriptor>,
    /// Earlier builds, newest first, at most [`MAX_PREVIOUS_BUILDS`]
    #[serde(default)]
    pub previous_builds: Vec<BuildDescriptor>,
    /// Available patches, sorted descending by (from, to)
    #[serde(default)]
    pub patches: Vec<PatchDescriptor>,
    /// Last modification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl BundleIndex {
    /// Make `build` the latest, rotating the prior latest into the ring
    pub fn record_build(&mut self, build: BuildDescriptor) {
        if let Some(previous) = self.latest.take()
            && previous.build_number != build.build_number
        {
            self.previous_builds.insert(0, previous);
            self.previous_builds.truncate(MAX_PREVIOUS_BUILDS);
        }
        self.current_version = build.version;
        self.current_build.clone_from(&build.build_number);
        self.latest = Some(build);
        self.updated_at = Some(Utc::now());
    }

    /// Register a patch
    pub fn record_patch(&mut self, patch: PatchDescriptor) {
        upsert_patch(&mut self.patches, patch);
        self.updated_at = Some(Utc::now());
    }

    /// Patches applicable on top of `version`
    pub fn patches_from(&self, version: u32) -> impl Iterator<Item = &PatchDescriptor> {
        self.patches.iter().filter(move |p| p.from_version == version)
    }
}

/// A patch listed in the workspace-wide patch list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspacePatch {
    /// Bundle the patch belongs to
    pub bundle_name: String,
    /// Patch details
    #[serde(flatten)]
    pub patch: PatchDescriptor,
}

/// Index of every bundle in a workspace
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceBundleIndex {
    /// Per-bundle indices by name
    #[serde(default)]
    pub bundles: BTreeMap<String, BundleIndex>,
    /// Patches of every bundle, sorted by bundle then descending versions
    #[serde(default)]
    pub global_patches: Vec<WorkspacePatch>,
    /// Last modification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl WorkspaceBundleIndex {
    /// Register a patch of `bundle` in the global list
    pub fn record_patch(&mut self, bundle: &str, patch: PatchDescriptor) {
        self.global_patches
            .retain(|p| !(p.bundle_name == bundle && p.patch.version_pair() == patch.version_pair()));
        self.global_patches.push(WorkspacePatch {
            bundle_name: bundle.to_string(),
            patch,
        });
        self.global_patches.sort_by(|a, b| {
            a.bundle_name
                .cmp(&b.bundle_name)
                .then_with(|| b.patch.version_pair().cmp(&a.patch.version_pair()))
        });
    }

    /// Patches of `bundle` applicable on top of `version`
    ///
    /// Reads the bundle's own index first and falls back to the global list.
    pub fn patches_from(&self, bundle: &str, version: u32) -> Vec<PatchDescriptor> {
        if let Some(index) = self.bundles.get(bundle) {
            let patches: Vec<_> = index.patches_from(version).cloned().collect();
            if !patches.is_empty() {
                return patches;
            }
        }
        self.global_patches
            .iter()
            .filter(|p| p.bundle_name == bundle && p.patch.from_version == version)
            .map(|p| p.patch.clone())
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn descriptor(version: u32, build: &str) -> BuildDescriptor {
        BuildDescriptor {
            version,
            build_number: build.to_string(),
            file: format!("main-v{version}.qpk"),
            hash: String::new(),
            size: 0,
            merkle_root: String::new(),
            asset_count: 0,
            created_at: Utc::now(),
        }
    }

    fn patch(from: u32, to: u32, changes: usize) -> PatchDescriptor {
        PatchDescriptor {
            file: format!("main-patch-v{from}-v{to}.qpk"),
            hash: String::new(),
            from_version: from,
            to_version: to,
            change_count: changes,
            size: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_previous_builds_ring_is_capped() {
        let mut index = BundleIndex::default();
        for version in 1..=13 {
            index.record_build(descriptor(version, &format!("b{version}")));
        }

        assert_eq!(index.current_version, 13);
        assert_eq!(index.previous_builds.len(), MAX_PREVIOUS_BUILDS);
        assert_eq!(index.previous_builds[0].version, 12);
        assert_eq!(index.previous_builds[9].version, 3);
    }

    #[test]
    fn test_same_build_is_not_rotated() {
        let mut index = BundleIndex::default();
        index.record_build(descriptor(1, "b1"));
        index.record_build(descriptor(1, "b1"));
        assert!(index.previous_builds.is_empty());
    }

    #[test]
    fn test_patches_unique_and_sorted_descending() {
        let mut index = BundleIndex::default();
        index.record_patch(patch(1, 2, 3));
        index.record_patch(patch(2, 3, 1));
        index.record_patch(patch(1, 3, 4));
        index.record_patch(patch(1, 2, 5));

        let pairs: Vec<(u32, u32)> = index
            .patches
            .iter()
            .map(PatchDescriptor::version_pair)
            .collect();
        assert_eq!(pairs, vec![(2, 3), (1, 3), (1, 2)]);
        assert_eq!(index.patches[2].change_count, 5);
        assert_eq!(index.patches_from(1).count(), 2);
    }

    #[test]
    fn test_workspace_falls_back_to_global_patches() {
        let mut workspace = WorkspaceBundleIndex::default();
        workspace.record_patch("music", patch(3, 4, 1));
        workspace.record_patch("characters", patch(1, 2, 2));

        assert_eq!(workspace.global_patches[0].bundle_name, "characters");
        assert_eq!(workspace.patches_from("music", 3).len(), 1);
        assert!(workspace.patches_from("music", 1).is_empty());

        let mut index = BundleIndex {
            bundle_name: "music".to_string(),
            ..BundleIndex::default()
        };
        index.record_patch(patch(3, 5, 7));
        workspace.bundles.insert("music".to_string(), index);
        let patches = workspace.patches_from("music", 3);
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].to_version, 5);
    }

    #[test]
    fn test_workspace_patch_is_flattened() {
        let mut workspace = WorkspaceBundleIndex::default();
        workspace.record_patch("music", patch(1, 2, 1));
        let json = serde_json::to_value(&workspace).unwrap();
        assert_eq!(json["globalPatches"][0]["bundleName"], "music");
        assert_eq!(json["globalPatches"][0]["fromVersion"], 1);

        let back: WorkspaceBundleIndex = serde_json::from_value(json).unwrap();
        assert_eq!(back, workspace);
    }
}
