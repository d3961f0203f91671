//! Local asset store
//!
//! The store is an external collaborator keyed by
//! `bundleName:locale:type:name`. Every mutation goes through one
//! [`StoreTransaction`], which the store commits all-or-nothing.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::error::{StoreError, StoreResult};

/// One materialized asset variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAsset {
    /// Composite key `bundle:locale:type:name`
    pub key: String,
    /// Owning bundle
    pub bundle_name: String,
    /// Locale this variant serves
    pub locale: String,
    /// Asset type
    pub asset_type: String,
    /// Sub-type group
    pub sub_type: String,
    /// Name within the group
    pub name: String,
    /// Logical path
    pub path: String,
    /// Content hash
    pub hash: String,
    /// Payload
    pub data: Bytes,
    /// Bundle version the payload came from
    pub version: u32,
    /// When the payload was stored
    pub updated_at: DateTime<Utc>,
}

impl StoredAsset {
    /// Payload size
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Descriptor of an installed bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBundle {
    /// Bundle name
    pub name: String,
    /// Installed version
    pub version: u32,
    /// Build identifier of the installed version
    pub build_number: Option<String>,
    /// SHA-256 of the last container applied
    pub hash: String,
    /// Number of logical paths installed
    pub asset_count: usize,
    /// Last install or patch
    pub last_updated: DateTime<Utc>,
}

/// Expected state of the bundle descriptor when a transaction commits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionCheck {
    /// No check
    Any,
    /// The bundle must be at exactly this version
    Exactly(u32),
}

/// A staged batch of mutations for one bundle
#[derive(Debug, Clone)]
pub struct StoreTransaction {
    bundle: StoredBundle,
    expected: VersionCheck,
    deletes: Vec<String>,
    puts: Vec<StoredAsset>,
}

impl StoreTransaction {
    /// Transaction ending with `bundle` as the descriptor
    pub const fn new(bundle: StoredBundle, expected: VersionCheck) -> Self {
        Self {
            bundle,
            expected,
            deletes: Vec::new(),
            puts: Vec::new(),
        }
    }

    /// Stage a deletion
    pub fn delete(&mut self, key: impl Into<String>) {
        self.deletes.push(key.into());
    }

    /// Stage an insertion or replacement
    pub fn put(&mut self, asset: StoredAsset) {
        self.puts.push(asset);
    }

    /// Bundle descriptor written on commit
    pub const fn bundle(&self) -> &StoredBundle {
        &self.bundle
    }

    /// Expected base version
    pub const fn expected(&self) -> VersionCheck {
        self.expected
    }

    /// Staged deletions, in order
    pub fn deletes(&self) -> &[String] {
        &self.deletes
    }

    /// Staged puts, in order
    pub fn puts(&self) -> &[StoredAsset] {
        &self.puts
    }

    /// Split into descriptor, deletions and puts
    pub fn into_parts(self) -> (StoredBundle, Vec<String>, Vec<StoredAsset>) {
        (self.bundle, self.deletes, self.puts)
    }
}

/// Persistent key-value store of assets and bundle descriptors
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Asset stored under `key`
    async fn get_asset(&self, key: &str) -> StoreResult<Option<StoredAsset>>;

    /// Every asset of `bundle`
    async fn assets_for_bundle(&self, bundle: &str) -> StoreResult<Vec<StoredAsset>>;

    /// Descriptor of `bundle`
    async fn get_bundle(&self, name: &str) -> StoreResult<Option<StoredBundle>>;

    /// Apply a transaction atomically
    ///
    /// Fails with [`StoreError::VersionConflict`] without mutating anything
    /// when the stored version does not match the transaction's expectation.
    async fn commit(&self, transaction: StoreTransaction) -> StoreResult<()>;
}

#[derive(Debug, Default)]
struct MemoryState {
    assets: BTreeMap<String, StoredAsset>,
    bundles: BTreeMap<String, StoredBundle>,
}

/// In-memory [`AssetStore`] behind a single lock
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored asset variants
    pub fn asset_count(&self) -> usize {
        self.state.lock().assets.len()
    }
}

#[async_trait]
impl AssetStore for MemoryStore {
    async fn get_asset(&self, key: &str) -> StoreResult<Option<StoredAsset>> {
        Ok(self.state.lock().assets.get(key).cloned())
    }

    async fn assets_for_bundle(&self, bundle: &str) -> StoreResult<Vec<StoredAsset>> {
        Ok(self
            .state
            .lock()
            .assets
            .values()
            .filter(|asset| asset.bundle_name == bundle)
            .cloned()
            .collect())
    }

    async fn get_bundle(&self, name: &str) -> StoreResult<Option<StoredBundle>> {
        Ok(self.state.lock().bundles.get(name).cloned())
    }

    async fn commit(&self, transaction: StoreTransaction) -> StoreResult<()> {
        let mut state = self.state.lock();
        let name = transaction.bundle().name.clone();
        let actual = state.bundles.get(&name).map(|b| b.version);

        if let VersionCheck::Exactly(expected) = transaction.expected()
            && actual != Some(expected)
        {
            return Err(StoreError::VersionConflict {
                bundle: name,
                expected: Some(expected),
                actual,
            });
        }

        let foreign: BTreeSet<&str> = transaction
            .puts()
            .iter()
            .filter(|asset| asset.bundle_name != name)
            .map(|asset| asset.key.as_str())
            .collect();
        if !foreign.is_empty() {
            return Err(StoreError::Backend(format!(
                "transaction for {name} writes assets of other bundles: {foreign:?}"
            )));
        }

        let (bundle, deletes, puts) = transaction.into_parts();
        debug!(
            bundle = %bundle.name,
            version = bundle.version,
            deletes = deletes.len(),
            puts = puts.len(),
            "Committing store transaction"
        );
        for key in deletes {
            state.assets.remove(&key);
        }
        for asset in puts {
            state.assets.insert(asset.key.clone(), asset);
        }
        state.bundles.insert(bundle.name.clone(), bundle);
        Ok(())
    }
}
