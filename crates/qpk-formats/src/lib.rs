//! Wire formats for QPK asset bundles
//!
#![allow(clippy::cast_possible_truncation)] // Intentional for binary format parsing
#![allow(clippy::module_name_repetitions)] // Clear naming is preferred
#![allow(clippy::doc_markdown)] // Format names don't need backticks
#![allow(clippy::missing_errors_doc)] // Error enums are self-describing
#![allow(clippy::return_self_not_must_use)] // Builder patterns
#![allow(clippy::must_use_candidate)] // Accessors
//! This crate holds everything that producer and consumer must agree on
//! byte-for-byte:
//!
//! - **Containers**: the compact QPK binary layout and a ZIP-compatible
//!   alternative, both behind [`ContainerCodec`]
//! - **Manifest**: the JSON description of a bundle or patch, its generator
//!   and advisory validation
//! - **Integrity**: SHA-256 content hashes and the Merkle root over a bundle
//! - **Patches**: per-path change records and pre-apply validation
//! - **Indices**: the build and patch pointers producers publish
//! - **Plugins**: compression, encryption and processing strategies
//!
//! # Example
//!
//! ```
//! use qpk_formats::{
//!     AssetInfo, AssetPayload, AssetType, CodecOptions, ContainerFormat, ManifestOptions,
//!     generate_manifest, open_container,
//! };
//!
//! let data = b"hello".to_vec();
//! let info = AssetInfo::from_data("scripts/intro.txt", AssetType::Script, &data);
//! let manifest = generate_manifest("main", &[info.clone()], &ManifestOptions::default())?;
//!
//! let options = CodecOptions::for_manifest(&manifest);
//! let codec = ContainerFormat::Qpk.codec();
//! let bytes = codec.encode(&[AssetPayload::new(info, data)], &manifest, &options)?;
//!
//! let decoded = open_container(ContainerFormat::Qpk, &bytes, &options)?;
//! assert_eq!(decoded.get("scripts/intro.txt"), Some(&b"hello"[..]));
//! # Ok::<(), qpk_formats::FormatError>(())
//! ```

#![warn(missing_docs)]

pub mod asset;
pub mod container;
pub mod error;
pub mod generator;
pub mod hash;
pub mod index;
pub mod manifest;
pub mod merkle;
pub mod patch;
pub mod plugin;
pub mod verify;

pub use asset::{
    AssetInfo, AssetPayload, AssetType, DEFAULT_GROUP, DEFAULT_LOCALE, asset_key,
    locale_candidates, manifest_key,
};
pub use container::{
    CodecOptions, ContainerCodec, ContainerSummary, DecodedContainer, QpkCodec, QpkHeader,
    ZipCodec, open_container, write_atomic,
};
pub use error::{FormatError, FormatResult};
pub use generator::{ManifestOptions, ensure_unique_keys, generate_manifest};
pub use hash::{is_sha256_hex, sha256_hex};
pub use index::{
    BuildDescriptor, BundleIndex, INDEX_FILE, MAX_PREVIOUS_BUILDS, PatchDescriptor,
    WORKSPACE_INDEX_FILE, WorkspaceBundleIndex, WorkspacePatch,
};
pub use manifest::{
    BundleManifest, CompressionAlgorithm, CompressionSettings, ContainerFormat,
    EncryptionAlgorithm, EncryptionSettings, ManifestAsset, ValidationReport,
    validate_manifest_value,
};
pub use merkle::{MerkleLeaf, merkle_root};
pub use patch::{AssetDiff, DiffOperation, PatchChanges, patch_version, validate_patch};
pub use plugin::{
    CompressionPlugin, ContainerPlugin, DecryptionPlugin, EncryptionKey, EncryptionPlugin,
    PluginRegistry, ProcessingPlugin,
};
pub use verify::{VerifiedAsset, verify_assets};
