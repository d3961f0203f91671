//! Bundle fetcher
//!
//! Downloads a bundle or patch with bounded retries, then unpacks it:
//!
//! 1. format detection by extension, falling back to magic bytes
//! 2. whole-file decryption plugins, in registration order
//! 3. a registered container plugin, else the built-in codec
//! 4. per asset and locale hash verification; one mismatch fails the load
//!
//! Nothing is written to the local store here.

use bytes::Bytes;
use chrono::Utc;
use qpk_formats::{
    AssetType, BundleManifest, CodecOptions, ContainerFormat, asset_key, sha256_hex,
    verify_assets,
};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::config::FetchConfig;
use crate::error::{ClientError, ClientResult, FetchError, FetchResult};
use crate::store::StoredAsset;
use crate::transport::HttpClient;

/// Progress callback receiving `(downloaded, total)` bytes
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Per-call options of a load
#[derive(Clone, Default)]
pub struct LoadOptions {
    /// Aborts the download and any backoff sleep
    pub cancel: Option<CancellationToken>,
    /// Download progress
    pub progress: Option<ProgressCallback>,
    /// Skip format detection
    pub format: Option<ContainerFormat>,
}

impl fmt::Debug for LoadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadOptions")
            .field("cancel", &self.cancel)
            .field("progress", &self.progress.is_some())
            .field("format", &self.format)
            .finish()
    }
}

impl LoadOptions {
    /// Attach a cancellation token
    #[must_use]
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Attach a progress callback
    #[must_use]
    pub fn with_progress(mut self, progress: impl Fn(u64, u64) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(progress));
        self
    }

    /// Force a container format
    #[must_use]
    pub const fn with_format(mut self, format: ContainerFormat) -> Self {
        self.format = Some(format);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }
}

/// A downloaded and verified bundle or patch
#[derive(Debug, Clone)]
pub struct LoadedBundle {
    /// Bundle or patch manifest
    pub manifest: BundleManifest,
    /// Detected container format
    pub format: ContainerFormat,
    /// SHA-256 of the downloaded file
    pub hash: String,
    /// Downloaded size
    pub size: u64,
    /// One record per asset and locale
    pub assets: Vec<StoredAsset>,
}

impl LoadedBundle {
    /// Distinct logical paths carried by the bundle
    pub fn paths(&self) -> BTreeSet<&str> {
        self.assets.iter().map(|a| a.path.as_str()).collect()
    }
}

/// Downloads and unpacks bundles
#[derive(Debug, Clone)]
pub struct BundleFetcher {
    http: HttpClient,
    config: FetchConfig,
    codec: CodecOptions,
}

impl BundleFetcher {
    /// Fetcher with built-in codecs and no key
    pub fn new(config: FetchConfig) -> ClientResult<Self> {
        Ok(Self {
            http: HttpClient::new(&config)?,
            config,
            codec: CodecOptions::default(),
        })
    }

    /// Decode with the given key and plugins
    #[must_use]
    pub fn with_codec(mut self, codec: CodecOptions) -> Self {
        self.codec = codec;
        self
    }

    /// Active configuration
    pub const fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Download, unpack and verify the bundle at `url`
    pub async fn load_bundle(
        &self,
        url: &str,
        bundle: &str,
        options: &LoadOptions,
    ) -> ClientResult<LoadedBundle> {
        let data = self.download(url, bundle, options).await?;
        self.unpack(url, bundle, data, options.format)
    }

    /// Download `url` with retries, timeouts and cancellation
    pub async fn download(
        &self,
        url: &str,
        bundle: &str,
        options: &LoadOptions,
    ) -> ClientResult<Vec<u8>> {
        if options.is_cancelled() {
            return Err(ClientError::fetch(bundle, FetchError::Cancelled));
        }

        debug!(bundle, url, "Downloading");
        let data = self
            .config
            .retry
            .execute(options.cancel.as_ref(), |attempt| {
                debug!(bundle, attempt, "Download attempt");
                self.attempt(url, options)
            })
            .await
            .map_err(|e| ClientError::fetch(bundle, e))?;

        debug!(bundle, size = data.len(), "Downloaded");
        Ok(data)
    }

    async fn attempt(&self, url: &str, options: &LoadOptions) -> FetchResult<Vec<u8>> {
        let timeout = self.config.attempt_timeout;
        let request = async {
            match tokio::time::timeout(
                timeout,
                self.http.get_with_progress(url, options.progress.as_deref()),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout(timeout)),
            }
        };

        match &options.cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    () = token.cancelled() => Err(FetchError::Cancelled),
                    result = request => result,
                }
            }
            None => request.await,
        }
    }

    /// Unpack and verify downloaded bytes
    ///
    /// `source` is the URL or file name used for format detection.
    pub fn unpack(
        &self,
        source: &str,
        bundle: &str,
        data: Vec<u8>,
        format: Option<ContainerFormat>,
    ) -> ClientResult<LoadedBundle> {
        let hash = sha256_hex(&data);
        let size = data.len() as u64;
        let format = format.unwrap_or_else(|| ContainerFormat::detect(source, &data));

        let data = self.codec.plugins.decrypt_file(data)?;
        let container = match self.codec.plugins.container(format) {
            Some(plugin) => {
                debug!(bundle, plugin = plugin.name(), %format, "Unpacking with container plugin");
                plugin.unpack(&data)?
            }
            None => format.codec().decode(&data, &self.codec)?,
        };

        if container.manifest.name != bundle {
            warn!(
                bundle,
                manifest = %container.manifest.name,
                "Manifest names a different bundle"
            );
        }

        let now = Utc::now();
        let version = container.manifest.version;
        let assets: Vec<StoredAsset> = verify_assets(&container)?
            .into_iter()
            .map(|asset| {
                let asset_type = AssetType::parse(asset.asset_type).unwrap_or(AssetType::Other);
                StoredAsset {
                    key: asset_key(bundle, asset.locale, asset_type, asset.name),
                    bundle_name: bundle.to_string(),
                    locale: asset.locale.to_string(),
                    asset_type: asset.asset_type.to_string(),
                    sub_type: asset.sub_type.to_string(),
                    name: asset.name.to_string(),
                    path: asset.path.to_string(),
                    hash: asset.hash.to_string(),
                    data: Bytes::copy_from_slice(asset.data),
                    version,
                    updated_at: now,
                }
            })
            .collect();

        info!(
            bundle,
            %format,
            version,
            patch = container.manifest.is_patch,
            assets = assets.len(),
            "Loaded bundle"
        );

        Ok(LoadedBundle {
            manifest: container.manifest,
            format,
            hash,
            size,
            assets,
        })
    }
}
