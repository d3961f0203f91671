//! Persistent version ledger
//!
//! The ledger is plain JSON on disk and is only ever touched by one producer
//! process at a time.
//!
//! ```text
//! <root>/                          single-bundle mode
//! ├── version.json                 current version pair
//! ├── index.json                   latest build, previous builds, patches
//! └── builds/v<version>-<build>.json
//!
//! <root>/                          workspace mode
//! ├── workspace-index.json         every bundle plus global patches
//! └── <bundle>/
//!     ├── version.json
//!     ├── index.json
//!     └── builds/...
//! ```
//!
//! Missing or unreadable files are treated as absent. Corrupt ones are
//! logged and replaced by an empty structure on the next write.

use chrono::{DateTime, Utc};
use qpk_formats::{
    AssetInfo, BuildDescriptor, BundleIndex, ContainerFormat, INDEX_FILE, MerkleLeaf,
    PatchDescriptor, WORKSPACE_INDEX_FILE, WorkspaceBundleIndex, merkle_root, sha256_hex,
    write_atomic,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{LedgerError, LedgerResult};

/// Persisted version pair file name
pub const VERSION_FILE: &str = "version.json";

/// Build log directory name
pub const BUILDS_DIR: &str = "builds";

/// Version and build identifier assigned to one build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    /// Monotonic bundle version
    pub bundle_version: u32,
    /// Opaque build identifier
    pub build_number: String,
    /// When the pair was assigned
    pub updated_at: DateTime<Utc>,
}

/// Listing entry of a build log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggedAsset {
    /// Content hash
    pub hash: String,
    /// Payload size
    pub size: u64,
    /// Asset-level version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    /// Source modification time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtime: Option<DateTime<Utc>>,
    /// Asset type, kept so patches can rebuild manifest entries
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub asset_type: Option<String>,
    /// Sub-type group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<String>,
    /// Locales served
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locales: Vec<String>,
}

impl LoggedAsset {
    /// Record an analyzed asset
    pub fn from_info(info: &AssetInfo) -> Self {
        Self {
            hash: info.hash.clone(),
            size: info.size,
            version: info.version,
            mtime: None,
            asset_type: Some(info.asset_type.as_str().to_string()),
            sub_type: info.sub_type.clone(),
            locales: info.locales.clone(),
        }
    }

    /// Attach the source modification time
    #[must_use]
    pub const fn with_mtime(mut self, mtime: Option<DateTime<Utc>>) -> Self {
        self.mtime = mtime;
        self
    }
}

/// Full record of one successful build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildLog {
    /// Bundle name
    pub bundle_name: String,
    /// Build identifier
    pub build_number: String,
    /// Bundle version
    pub bundle_version: u32,
    /// Container format
    pub format: ContainerFormat,
    /// Container file name, relative to the bundle directory
    pub container_file: String,
    /// SHA-256 of the container file
    pub container_hash: String,
    /// Container size in bytes
    pub container_size: u64,
    /// Merkle root over the asset hashes
    pub merkle_root: String,
    /// Build time
    pub created_at: DateTime<Utc>,
    /// Every asset by logical path
    pub assets: BTreeMap<String, LoggedAsset>,
}

impl BuildLog {
    /// File name under the builds directory
    pub fn file_name(&self) -> String {
        format!("v{}-{}.json", self.bundle_version, self.build_number)
    }

    /// Sum of asset sizes
    pub fn total_size(&self) -> u64 {
        self.assets.values().map(|a| a.size).sum()
    }

    /// Index entry describing this build
    pub fn descriptor(&self) -> BuildDescriptor {
        BuildDescriptor {
            version: self.bundle_version,
            build_number: self.build_number.clone(),
            file: self.container_file.clone(),
            hash: self.container_hash.clone(),
            size: self.container_size,
            merkle_root: self.merkle_root.clone(),
            asset_count: self.assets.len(),
            created_at: self.created_at,
        }
    }
}

/// Generate a build identifier: `YYYYMMDDHHMMSS-<6 hex>`
pub fn generate_build_number(now: DateTime<Utc>) -> String {
    format!(
        "{}-{:06x}",
        now.format("%Y%m%d%H%M%S"),
        rand::random::<u32>() & 0x00ff_ffff
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LedgerMode {
    Single,
    Workspace,
}

/// Handle on the ledger of one bundle
///
/// Construct one per producer invocation and pass it to every operation
/// that records builds or patches.
#[derive(Debug, Clone)]
pub struct VersionLedger {
    root: PathBuf,
    bundle_name: String,
    mode: LedgerMode,
}

impl VersionLedger {
    /// Ledger for a single bundle stored directly under `root`
    pub fn new(root: impl Into<PathBuf>, bundle_name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            bundle_name: bundle_name.into(),
            mode: LedgerMode::Single,
        }
    }

    /// Ledger for one bundle of a workspace rooted at `root`
    pub fn workspace(root: impl Into<PathBuf>, bundle_name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            bundle_name: bundle_name.into(),
            mode: LedgerMode::Workspace,
        }
    }

    /// Bundle name
    pub fn bundle_name(&self) -> &str {
        &self.bundle_name
    }

    /// Whether this ledger also maintains the workspace index
    pub fn is_workspace(&self) -> bool {
        self.mode == LedgerMode::Workspace
    }

    /// Directory holding this bundle's containers and ledger files
    pub fn bundle_dir(&self) -> PathBuf {
        match self.mode {
            LedgerMode::Single => self.root.clone(),
            LedgerMode::Workspace => self.root.join(&self.bundle_name),
        }
    }

    /// Path of the build log directory
    pub fn builds_dir(&self) -> PathBuf {
        self.bundle_dir().join(BUILDS_DIR)
    }

    /// Path of the single-bundle index
    pub fn index_path(&self) -> PathBuf {
        self.bundle_dir().join(INDEX_FILE)
    }

    /// Path of the workspace index
    pub fn workspace_index_path(&self) -> PathBuf {
        self.root.join(WORKSPACE_INDEX_FILE)
    }

    fn version_path(&self) -> PathBuf {
        self.bundle_dir().join(VERSION_FILE)
    }

    /// Assign the version pair for the next build and persist it
    ///
    /// The version is reused unless `increment` is set; the first build is
    /// always version 1. A fresh build number is generated every time.
    pub fn get_version_info(&self, increment: bool) -> LedgerResult<VersionInfo> {
        let current = read_json::<VersionInfo>(&self.version_path()).map(|v| v.bundle_version);
        let bundle_version = match current {
            Some(version) if version > 0 && !increment => version,
            Some(version) => version.saturating_add(1),
            None => 1,
        };

        let now = Utc::now();
        let info = VersionInfo {
            bundle_version,
            build_number: generate_build_number(now),
            updated_at: now,
        };
        write_json(&self.version_path(), &info)?;

        debug!(
            bundle = %self.bundle_name,
            version = info.bundle_version,
            build = %info.build_number,
            "Assigned version"
        );
        Ok(info)
    }

    /// Record a finished build
    ///
    /// Hashes the container at `container_path`, computes the Merkle root
    /// over `assets`, writes the build log and makes it the index's latest
    /// build.
    pub fn save_build_log(
        &self,
        version: &VersionInfo,
        format: ContainerFormat,
        container_path: &Path,
        assets: BTreeMap<String, LoggedAsset>,
    ) -> LedgerResult<BuildLog> {
        let container =
            fs::read(container_path).map_err(|e| LedgerError::io(container_path, e))?;

        let root = merkle_root(
            assets
                .iter()
                .map(|(path, asset)| MerkleLeaf::new(path.clone(), asset.hash.clone())),
        );

        let log = BuildLog {
            bundle_name: self.bundle_name.clone(),
            build_number: version.build_number.clone(),
            bundle_version: version.bundle_version,
            format,
            container_file: container_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            container_hash: sha256_hex(&container),
            container_size: container.len() as u64,
            merkle_root: root,
            created_at: Utc::now(),
            assets,
        };

        write_json(&self.builds_dir().join(log.file_name()), &log)?;

        let mut index = self.load_index();
        index.record_build(log.descriptor());
        self.save_index(index)?;

        info!(
            bundle = %self.bundle_name,
            version = log.bundle_version,
            build = %log.build_number,
            assets = log.assets.len(),
            "Saved build log"
        );
        Ok(log)
    }

    /// Every readable build log, ordered by version then build time
    pub fn list_build_logs(&self) -> LedgerResult<Vec<BuildLog>> {
        let dir = self.builds_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(LedgerError::io(dir, e)),
        };

        let mut logs: Vec<BuildLog> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|path| read_json::<BuildLog>(&path))
            .filter(|log| log.bundle_name == self.bundle_name)
            .collect();
        logs.sort_by(|a, b| {
            a.bundle_version
                .cmp(&b.bundle_version)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(logs)
    }

    /// Most recent build log for `version`
    pub fn load_build_log(&self, version: u32) -> LedgerResult<Option<BuildLog>> {
        Ok(self
            .list_build_logs()?
            .into_iter()
            .rev()
            .find(|log| log.bundle_version == version))
    }

    /// Build log for `version`, or [`LedgerError::MissingBuildLog`]
    pub fn require_build_log(&self, version: u32) -> LedgerResult<BuildLog> {
        self.load_build_log(version)?
            .ok_or_else(|| LedgerError::MissingBuildLog {
                bundle: self.bundle_name.clone(),
                version,
            })
    }

    /// Build log the index points at, falling back to the newest on disk
    pub fn latest_build_log(&self) -> LedgerResult<Option<BuildLog>> {
        let logs = self.list_build_logs()?;
        if let Some(latest) = self.load_index().latest
            && let Some(log) = logs
                .iter()
                .find(|log| log.build_number == latest.build_number)
        {
            return Ok(Some(log.clone()));
        }
        Ok(logs.into_iter().last())
    }

    /// Register a published patch in the index (and workspace index)
    pub fn register_patch(&self, patch: PatchDescriptor) -> LedgerResult<()> {
        let mut index = self.load_index();
        index.record_patch(patch.clone());
        self.save_index(index)?;

        if self.is_workspace() {
            let mut workspace = self.load_workspace_index();
            workspace.record_patch(&self.bundle_name, patch.clone());
            workspace.updated_at = Some(Utc::now());
            write_json(&self.workspace_index_path(), &workspace)?;
        }

        info!(
            bundle = %self.bundle_name,
            from = patch.from_version,
            to = patch.to_version,
            file = %patch.file,
            "Registered patch"
        );
        Ok(())
    }

    /// Current index, or a fresh one when missing or corrupt
    pub fn load_index(&self) -> BundleIndex {
        read_json(&self.index_path()).unwrap_or_else(|| BundleIndex {
            bundle_name: self.bundle_name.clone(),
            ..BundleIndex::default()
        })
    }

    /// Current workspace index, or a fresh one when missing or corrupt
    pub fn load_workspace_index(&self) -> WorkspaceBundleIndex {
        read_json(&self.workspace_index_path()).unwrap_or_default()
    }

    fn save_index(&self, index: BundleIndex) -> LedgerResult<()> {
        write_json(&self.index_path(), &index)?;

        if self.is_workspace() {
            let mut workspace = self.load_workspace_index();
            workspace.bundles.insert(self.bundle_name.clone(), index);
            workspace.updated_at = Some(Utc::now());
            write_json(&self.workspace_index_path(), &workspace)?;
        }
        Ok(())
    }
}

/// Read a JSON file, treating missing and corrupt files as absent
fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "Ledger file absent");
            return None;
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Unreadable ledger file, treating as absent");
            return None;
        }
    };

    match serde_json::from_slice(&data) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Corrupt ledger file, treating as absent");
            None
        }
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> LedgerResult<()> {
    let data = serde_json::to_vec_pretty(value).map_err(|source| LedgerError::Serialize {
        path: path.to_path_buf(),
        source,
    })?;
    write_atomic(path, &data)?;
    Ok(())
}
