//! Manifest generation from analyzer output
//!
//! [`generate_manifest`] is pure: the same assets and options always produce
//! the same manifest, except for `createdAt` when no timestamp is supplied.

use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};

use crate::asset::{AssetInfo, AssetType, DEFAULT_LOCALE};
use crate::error::{FormatError, FormatResult};
use crate::manifest::{
    AssetTable, BundleManifest, CompressionSettings, ContainerFormat, EncryptionSettings,
    ManifestAsset,
};
use crate::merkle::{MerkleLeaf, merkle_root};

/// Options controlling manifest generation
#[derive(Debug, Clone)]
pub struct ManifestOptions {
    /// Bundle version recorded in the manifest
    pub version: u32,
    /// Build identifier
    pub build_number: Option<String>,
    /// Container format the manifest will be packed into
    pub format: ContainerFormat,
    /// Compression policy
    pub compression: CompressionSettings,
    /// Encryption policy
    pub encryption: EncryptionSettings,
    /// Explicit default locale; detected from the assets when unset
    pub default_locale: Option<String>,
    /// Compute and embed the Merkle root
    pub merkle_root: bool,
    /// Fixed creation time; `Utc::now()` when unset
    pub created_at: Option<DateTime<Utc>>,
}

impl Default for ManifestOptions {
    fn default() -> Self {
        Self {
            version: 1,
            build_number: None,
            format: ContainerFormat::Qpk,
            compression: CompressionSettings::default(),
            encryption: EncryptionSettings::default(),
            default_locale: None,
            merkle_root: true,
            created_at: None,
        }
    }
}

/// Build a manifest for `assets`
///
/// Assets are grouped by type, then sub-type, then by the path with its
/// leading type folder removed. Two assets of one type landing on the same
/// name fail with [`FormatError::DuplicateAsset`].
pub fn generate_manifest(
    name: &str,
    assets: &[AssetInfo],
    options: &ManifestOptions,
) -> FormatResult<BundleManifest> {
    ensure_unique_keys(assets)?;

    let mut table = AssetTable::new();
    let mut total_size = 0u64;
    let mut total_files = 0usize;

    for asset in assets {
        let mut locales = asset.locales.clone();
        if locales.is_empty() {
            locales.push(DEFAULT_LOCALE.to_string());
        }

        let names = table
            .entry(asset.asset_type.as_str().to_string())
            .or_default()
            .entry(asset.sub_type_key().to_string())
            .or_default();

        names.insert(
            asset.manifest_key(),
            ManifestAsset {
                path: asset.path.clone(),
                size: asset.size,
                hash: asset.hash.clone(),
                locales,
                version: asset.version,
            },
        );
        total_size += asset.size;
        total_files += 1;
    }

    let default_locale = options
        .default_locale
        .clone()
        .unwrap_or_else(|| detect_default_locale(assets));
    let locales = order_locales(assets, &default_locale);

    let merkle_root = options.merkle_root.then(|| {
        merkle_root(
            assets
                .iter()
                .map(|a| MerkleLeaf::new(a.path.clone(), a.hash.clone())),
        )
    });

    Ok(BundleManifest {
        name: name.to_string(),
        version: options.version,
        build_number: options.build_number.clone(),
        format: options.format,
        compression: options.compression,
        encryption: options.encryption,
        locales,
        default_locale,
        assets: table,
        total_size,
        total_files,
        merkle_root,
        created_at: options.created_at.unwrap_or_else(Utc::now),
        is_patch: false,
        from_version: None,
        to_version: None,
        patch_version: None,
        changes: None,
        total_changes: None,
        change_details: Vec::new(),
    })
}

/// Fail with [`FormatError::DuplicateAsset`] when two assets of one type
/// share a manifest name
///
/// Consumers store assets under `bundle:locale:type:name`, so the sub-type
/// does not separate two assets.
pub fn ensure_unique_keys(assets: &[AssetInfo]) -> FormatResult<()> {
    let mut seen: HashMap<(AssetType, String), &str> = HashMap::new();
    for asset in assets {
        let key = asset.manifest_key();
        if let Some(first) = seen.insert((asset.asset_type, key.clone()), &asset.path) {
            return Err(FormatError::DuplicateAsset {
                key,
                first: first.to_string(),
                second: asset.path.clone(),
            });
        }
    }
    Ok(())
}

/// `default` when any asset uses it, otherwise the alphabetically first locale
pub fn detect_default_locale(assets: &[AssetInfo]) -> String {
    let all = collect_locales(assets);
    if all.is_empty() || all.contains(DEFAULT_LOCALE) {
        return DEFAULT_LOCALE.to_string();
    }
    all.into_iter()
        .next()
        .unwrap_or_else(|| DEFAULT_LOCALE.to_string())
}

fn collect_locales(assets: &[AssetInfo]) -> BTreeSet<String> {
    assets
        .iter()
        .flat_map(|a| a.locales.iter().cloned())
        .collect()
}

/// Default locale first, the rest sorted
fn order_locales(assets: &[AssetInfo], default_locale: &str) -> Vec<String> {
    let mut locales = vec![default_locale.to_string()];
    locales.extend(
        collect_locales(assets)
            .into_iter()
            .filter(|l| l != default_locale),
    );
    locales
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn assets() -> Vec<AssetInfo> {
        vec![
            AssetInfo::from_data("images/bg/room.png", AssetType::Image, b"room")
                .with_sub_type("bg"),
            AssetInfo::from_data("audio/voice/line.ogg", AssetType::Audio, b"line")
                .with_sub_type("voice")
                .with_locales(["ja", "en"]),
            AssetInfo::from_data("data/config.json", AssetType::Data, b"{}"),
        ]
    }

    #[test]
    fn test_groups_by_type_and_sub_type() {
        let manifest = generate_manifest("main", &assets(), &ManifestOptions::default())
            .expect("Operation should succeed");

        assert_eq!(manifest.total_files, 3);
        assert_eq!(manifest.total_size, 10);
        let room = &manifest.assets["image"]["bg"]["bg/room.png"];
        assert_eq!(room.path, "images/bg/room.png");
        assert!(manifest.assets["data"]["default"].contains_key("config.json"));
        assert!(manifest.validate().valid);
    }

    #[test]
    fn test_locale_ordering_puts_default_first() {
        let manifest = generate_manifest("main", &assets(), &ManifestOptions::default())
            .expect("Operation should succeed");
        assert_eq!(manifest.default_locale, "default");
        assert_eq!(manifest.locales, vec!["default", "en", "ja"]);
    }

    #[test]
    fn test_default_locale_detection_without_default() {
        let only_localized = vec![
            AssetInfo::from_data("a/x.txt", AssetType::Script, b"x").with_locales(["ja"]),
            AssetInfo::from_data("a/y.txt", AssetType::Script, b"y").with_locales(["en"]),
        ];
        assert_eq!(detect_default_locale(&only_localized), "en");

        let manifest = generate_manifest(
            "main",
            &only_localized,
            &ManifestOptions {
                default_locale: Some("ja".to_string()),
                ..ManifestOptions::default()
            },
        )
        .expect("Operation should succeed");
        assert_eq!(manifest.locales, vec!["ja", "en"]);
    }

    #[test]
    fn test_merkle_root_matches_asset_hashes() {
        let list = assets();
        let manifest = generate_manifest("main", &list, &ManifestOptions::default())
            .expect("Operation should succeed");
        let expected = merkle_root(
            list.iter()
                .map(|a| MerkleLeaf::new(a.path.clone(), a.hash.clone())),
        );
        assert_eq!(manifest.merkle_root, Some(expected));
    }

    #[test]
    fn test_empty_assets() {
        let manifest = generate_manifest("empty", &[], &ManifestOptions::default())
            .expect("Operation should succeed");
        assert_eq!(manifest.total_files, 0);
        assert_eq!(manifest.locales, vec!["default"]);
        assert!(manifest.validate().valid);
    }

    #[test]
    fn test_duplicate_manifest_key_is_rejected() {
        let colliding = vec![
            AssetInfo::from_data("images/button.png", AssetType::Image, b"a"),
            AssetInfo::from_data("image/button.png", AssetType::Image, b"b").with_sub_type("ui"),
        ];
        let err = generate_manifest("main", &colliding, &ManifestOptions::default())
            .expect_err("colliding keys");
        match err {
            FormatError::DuplicateAsset { key, first, second } => {
                assert_eq!(key, "button.png");
                assert_eq!(first, "images/button.png");
                assert_eq!(second, "image/button.png");
            }
            other => unreachable!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_same_file_name_in_foreign_folders() {
        let assets = vec![
            AssetInfo::from_data("ui/button.png", AssetType::Other, b"ui"),
            AssetInfo::from_data("icons/button.png", AssetType::Other, b"icon"),
            AssetInfo::from_data("images/button.png", AssetType::Image, b"image"),
        ];
        assert!(ensure_unique_keys(&assets).is_ok());

        let manifest = generate_manifest("main", &assets, &ManifestOptions::default())
            .expect("Operation should succeed");
        assert_eq!(manifest.total_files, 3);
        let other = &manifest.assets["other"]["default"];
        assert_eq!(other["ui/button.png"].path, "ui/button.png");
        assert_eq!(other["icons/button.png"].path, "icons/button.png");
        assert!(manifest.assets["image"]["default"].contains_key("button.png"));
    }
}
