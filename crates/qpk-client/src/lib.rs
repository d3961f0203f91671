//! Consumer side of QPK asset bundles
//!
//! Fetches bundles and patches over HTTP, verifies every asset against its
//! manifest hash and installs the result into an [`AssetStore`] as one
//! transaction.
//!
//! # Features
//!
//! - Bounded retries with exponential backoff and per-attempt timeouts
//! - Cooperative cancellation of downloads and backoff sleeps
//! - Download progress fed from Content-Length
//! - Patch validation before any mutation, compare-and-swap on commit
//! - Patch discovery through published bundle indices
//!
//! # Example
//!
//! ```no_run
//! use qpk_client::{BundleFetcher, FetchConfig, LoadOptions, MemoryStore, PatchApplier};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), qpk_client::ClientError> {
//! let fetcher = BundleFetcher::new(FetchConfig::from_env())?;
//! let applier = PatchApplier::new(fetcher, Arc::new(MemoryStore::new()));
//!
//! let options = LoadOptions::default();
//! let base = "https://cdn.example.com/bundles";
//! let installed = applier
//!     .install_bundle(&format!("{base}/main-v1.qpk"), "main", &options)
//!     .await?;
//!
//! let patches = applier
//!     .available_patches(base, "main", installed.version, &options)
//!     .await?;
//! if let Some(patch) = patches.first() {
//!     let url = qpk_client::patch_url(base, patch);
//!     applier.apply_patch(&url, "main", &options).await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod applier;
pub mod cancel;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod retry;
pub mod store;
pub mod transport;

pub use applier::{ApplyReport, PatchApplier, PatchPreview, patch_url};
pub use cancel::CancellationToken;
pub use config::{DEFAULT_ATTEMPT_TIMEOUT, FetchConfig};
pub use error::{ClientError, ClientResult, FetchError, FetchResult, StoreError, StoreResult};
pub use fetcher::{BundleFetcher, LoadOptions, LoadedBundle, ProgressCallback};
pub use retry::RetryPolicy;
pub use store::{AssetStore, MemoryStore, StoreTransaction, StoredAsset, StoredBundle, VersionCheck};
pub use transport::HttpClient;
