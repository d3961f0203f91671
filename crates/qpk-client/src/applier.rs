//! Transactional patch application
//!
//! A patch is fetched and validated against the installed version before
//! anything is staged. The resulting mutations are committed as a single
//! [`StoreTransaction`] expecting the version the patch was validated
//! against, so a rejected or conflicting apply leaves the store untouched.

use chrono::Utc;
use qpk_formats::{
    BundleIndex, INDEX_FILE, PatchChanges, PatchDescriptor, ValidationReport,
    WORKSPACE_INDEX_FILE, WorkspaceBundleIndex, validate_patch,
};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{ClientError, ClientResult, FetchError};
use crate::fetcher::{BundleFetcher, LoadOptions, LoadedBundle};
use crate::store::{AssetStore, StoreTransaction, StoredAsset, StoredBundle, VersionCheck};

/// Result of a dry-run patch load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchPreview {
    /// Version the patch applies to
    pub from_version: Option<u32>,
    /// Version the patch produces
    pub to_version: Option<u32>,
    /// Changed paths
    pub changes: PatchChanges,
    /// Outcome of validation against the installed version
    pub report: ValidationReport,
}

/// Summary of an applied patch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    /// Version before the patch
    pub from_version: u32,
    /// Version after the patch
    pub to_version: u32,
    /// Changed paths
    pub changes: PatchChanges,
    /// Installed path count after the patch
    pub asset_count: usize,
    /// Problems tolerated during validation
    pub warnings: Vec<String>,
}

/// URL of a patch listed in an index published under `base_url`
pub fn patch_url(base_url: &str, patch: &PatchDescriptor) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), patch.file)
}

/// Installs bundles and applies patches to an [`AssetStore`]
#[derive(Debug)]
pub struct PatchApplier<S> {
    fetcher: BundleFetcher,
    store: Arc<S>,
}

impl<S: AssetStore> PatchApplier<S> {
    /// Applier writing to `store`
    pub const fn new(fetcher: BundleFetcher, store: Arc<S>) -> Self {
        Self { fetcher, store }
    }

    /// Backing store
    pub const fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Fetcher used for downloads
    pub const fn fetcher(&self) -> &BundleFetcher {
        &self.fetcher
    }

    /// Download a full bundle and replace whatever is installed under `bundle`
    pub async fn install_bundle(
        &self,
        url: &str,
        bundle: &str,
        options: &LoadOptions,
    ) -> ClientResult<StoredBundle> {
        let loaded = self.fetcher.load_bundle(url, bundle, options).await?;
        if loaded.manifest.is_patch {
            return Err(ClientError::Validation {
                bundle: bundle.to_string(),
                report: ValidationReport::from_errors(vec![
                    "manifest is a patch, not a full bundle".to_string(),
                ]),
            });
        }

        let existing = self.store.assets_for_bundle(bundle).await?;
        let descriptor = StoredBundle {
            name: bundle.to_string(),
            version: loaded.manifest.version,
            build_number: loaded.manifest.build_number.clone(),
            hash: loaded.hash.clone(),
            asset_count: loaded.paths().len(),
            last_updated: Utc::now(),
        };

        let mut transaction = StoreTransaction::new(descriptor.clone(), VersionCheck::Any);
        let incoming: BTreeSet<&str> = loaded.assets.iter().map(|a| a.key.as_str()).collect();
        for asset in existing.iter().filter(|a| !incoming.contains(a.key.as_str())) {
            transaction.delete(asset.key.clone());
        }
        for asset in &loaded.assets {
            transaction.put(asset.clone());
        }
        self.store.commit(transaction).await?;

        info!(
            bundle,
            version = descriptor.version,
            assets = descriptor.asset_count,
            "Installed bundle"
        );
        Ok(descriptor)
    }

    /// Load and validate a patch without touching the store
    pub async fn preview_patch(
        &self,
        url: &str,
        bundle: &str,
        options: &LoadOptions,
    ) -> ClientResult<PatchPreview> {
        let (current, stored) = self.installed(bundle).await?;
        let loaded = self.fetcher.load_bundle(url, bundle, options).await?;
        let report = validate(&loaded, &current, &stored);

        Ok(PatchPreview {
            from_version: loaded.manifest.from_version,
            to_version: loaded.manifest.to_version,
            changes: loaded.manifest.changes.clone().unwrap_or_default(),
            report,
        })
    }

    /// Fetch, validate and apply a patch as one transaction
    ///
    /// Deletions are staged first, then additions, then modifications. The
    /// commit fails with a version conflict if another apply won the race.
    pub async fn apply_patch(
        &self,
        url: &str,
        bundle: &str,
        options: &LoadOptions,
    ) -> ClientResult<ApplyReport> {
        let (current, stored) = self.installed(bundle).await?;
        let loaded = self.fetcher.load_bundle(url, bundle, options).await?;

        let report = validate(&loaded, &current, &stored);
        for warning in &report.warnings {
            warn!(bundle, "{warning}");
        }
        if !report.valid {
            warn!(bundle, errors = ?report.errors, "Rejected patch");
            return Err(ClientError::Validation {
                bundle: bundle.to_string(),
                report,
            });
        }

        let manifest = &loaded.manifest;
        let changes = manifest.changes.clone().unwrap_or_default();
        let to_version = manifest.to_version.unwrap_or(manifest.version);
        let asset_count =
            (current.asset_count + changes.added.len()).saturating_sub(changes.deleted.len());

        let descriptor = StoredBundle {
            name: bundle.to_string(),
            version: to_version,
            build_number: manifest.build_number.clone(),
            hash: loaded.hash.clone(),
            asset_count,
            last_updated: Utc::now(),
        };
        let transaction = stage(descriptor, current.version, &changes, &stored, &loaded.assets);
        debug!(
            bundle,
            deletes = transaction.deletes().len(),
            puts = transaction.puts().len(),
            "Staged patch"
        );
        self.store.commit(transaction).await?;

        info!(
            bundle,
            from = current.version,
            to = to_version,
            added = changes.added.len(),
            modified = changes.modified.len(),
            deleted = changes.deleted.len(),
            "Applied patch"
        );

        Ok(ApplyReport {
            from_version: current.version,
            to_version,
            changes,
            asset_count,
            warnings: report.warnings,
        })
    }

    /// Patches published under `base_url` that apply on top of
    /// `current_version`
    ///
    /// Reads `workspace-index.json` first and falls back to `index.json`.
    /// Chaining several patches is left to the caller.
    pub async fn available_patches(
        &self,
        base_url: &str,
        bundle: &str,
        current_version: u32,
        options: &LoadOptions,
    ) -> ClientResult<Vec<PatchDescriptor>> {
        let base = base_url.trim_end_matches('/');

        let workspace_url = format!("{base}/{WORKSPACE_INDEX_FILE}");
        match self
            .fetch_index::<WorkspaceBundleIndex>(&workspace_url, bundle, options)
            .await
        {
            Ok(Some(workspace)) => {
                if workspace.bundles.contains_key(bundle)
                    || workspace.global_patches.iter().any(|p| p.bundle_name == bundle)
                {
                    return Ok(workspace.patches_from(bundle, current_version));
                }
                debug!(bundle, "Bundle not listed in workspace index");
            }
            Ok(None) => debug!(bundle, "No workspace index"),
            Err(ClientError::Index { reason, .. }) => {
                warn!(bundle, %reason, "Ignoring unreadable workspace index");
            }
            Err(e) => return Err(e),
        }

        let index_url = format!("{base}/{INDEX_FILE}");
        let Some(index) = self
            .fetch_index::<BundleIndex>(&index_url, bundle, options)
            .await?
        else {
            return Ok(Vec::new());
        };
        if !index.bundle_name.is_empty() && index.bundle_name != bundle {
            return Err(ClientError::Index {
                bundle: bundle.to_string(),
                reason: format!("index describes bundle {}", index.bundle_name),
            });
        }
        Ok(index.patches_from(current_version).cloned().collect())
    }

    async fn installed(&self, bundle: &str) -> ClientResult<(StoredBundle, Vec<StoredAsset>)> {
        let current = self
            .store
            .get_bundle(bundle)
            .await?
            .ok_or_else(|| ClientError::NotInstalled(bundle.to_string()))?;
        let assets = self.store.assets_for_bundle(bundle).await?;
        Ok((current, assets))
    }

    async fn fetch_index<T: DeserializeOwned>(
        &self,
        url: &str,
        bundle: &str,
        options: &LoadOptions,
    ) -> ClientResult<Option<T>> {
        let data = match self.fetcher.download(url, bundle, options).await {
            Ok(data) => data,
            Err(ClientError::Network {
                source: FetchError::HttpStatus(StatusCode::NOT_FOUND),
                ..
            }) => return Ok(None),
            Err(e) => return Err(e),
        };
        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|e| ClientError::Index {
                bundle: bundle.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Validate a loaded patch against the installed state
fn validate(loaded: &LoadedBundle, current: &StoredBundle, stored: &[StoredAsset]) -> ValidationReport {
    let hashes: BTreeMap<&str, &str> = stored
        .iter()
        .map(|a| (a.path.as_str(), a.hash.as_str()))
        .collect();
    validate_patch(&loaded.manifest, current.version, |path| {
        hashes.get(path).map(|h| (*h).to_string())
    })
}

/// Stage deletions, then additions, then modifications
fn stage(
    descriptor: StoredBundle,
    base_version: u32,
    changes: &PatchChanges,
    stored: &[StoredAsset],
    incoming: &[StoredAsset],
) -> StoreTransaction {
    let mut transaction = StoreTransaction::new(descriptor, VersionCheck::Exactly(base_version));

    let deleted: BTreeSet<&str> = changes.deleted.iter().map(String::as_str).collect();
    let modified: BTreeSet<&str> = changes.modified.iter().map(String::as_str).collect();
    let incoming_keys: BTreeSet<&str> = incoming.iter().map(|a| a.key.as_str()).collect();

    // Locale variants a modified path no longer ships are dropped with it
    for asset in stored.iter().filter(|a| {
        deleted.contains(a.path.as_str())
            || (modified.contains(a.path.as_str()) && !incoming_keys.contains(a.key.as_str()))
    }) {
        transaction.delete(asset.key.clone());
    }

    let added: BTreeSet<&str> = changes.added.iter().map(String::as_str).collect();
    let (additions, modifications): (Vec<&StoredAsset>, Vec<&StoredAsset>) = incoming
        .iter()
        .partition(|a| added.contains(a.path.as_str()));
    for asset in additions.into_iter().chain(modifications) {
        transaction.put(asset.clone());
    }

    transaction
}
