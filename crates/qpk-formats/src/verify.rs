//! Post-decode integrity verification
//!
//! Every manifest entry is resolved once per locale it serves. The first
//! present candidate path from [`locale_candidates`] is hashed and compared
//! with the declared hash. The first mismatch fails the whole container.

use tracing::warn;

use crate::asset::locale_candidates;
use crate::container::DecodedContainer;
use crate::error::{FormatError, FormatResult};
use crate::hash::sha256_hex;

/// One asset-locale pair whose payload passed verification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifiedAsset<'a> {
    /// Type group from the manifest
    pub asset_type: &'a str,
    /// Sub-type group from the manifest
    pub sub_type: &'a str,
    /// Name within the group
    pub name: &'a str,
    /// Locale this payload serves
    pub locale: &'a str,
    /// Logical path declared in the manifest
    pub path: &'a str,
    /// In-container path the payload was read from
    pub resolved_path: &'a str,
    /// Declared content hash
    pub hash: &'a str,
    /// Payload bytes
    pub data: &'a [u8],
}

/// Resolve and hash-check every asset-locale pair of a decoded container
///
/// Entries with an empty declared hash are resolved but not hashed.
pub fn verify_assets(container: &DecodedContainer) -> FormatResult<Vec<VerifiedAsset<'_>>> {
    let mut verified = Vec::new();

    for entry in container.manifest.entries() {
        let asset = entry.asset;
        for locale in &asset.locales {
            let Some((resolved_path, data)) = locale_candidates(&asset.path, locale)
                .into_iter()
                .find_map(|candidate| container.entries.get_key_value(&candidate))
            else {
                return Err(FormatError::MissingAsset {
                    path: asset.path.clone(),
                    locale: locale.clone(),
                });
            };

            if !asset.hash.is_empty() {
                let actual = sha256_hex(data);
                if actual != asset.hash {
                    warn!(path = %resolved_path, expected = %asset.hash, actual = %actual, "Integrity check failed");
                    return Err(FormatError::Integrity {
                        path: resolved_path.clone(),
                        expected: asset.hash.clone(),
                        actual,
                    });
                }
            }

            verified.push(VerifiedAsset {
                asset_type: entry.asset_type,
                sub_type: entry.sub_type,
                name: entry.name,
                locale,
                path: &asset.path,
                resolved_path,
                hash: &asset.hash,
                data,
            });
        }
    }

    Ok(verified)
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::asset::{AssetInfo, AssetType};
    use crate::generator::{ManifestOptions, generate_manifest};
    use std::collections::BTreeMap;

    fn container(assets: &[AssetInfo], entries: &[(&str, &[u8])]) -> DecodedContainer {
        DecodedContainer {
            manifest: generate_manifest("main", assets, &ManifestOptions::default())
                .expect("Operation should succeed"),
            entries: entries
                .iter()
                .map(|(path, data)| ((*path).to_string(), data.to_vec()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn test_localized_variants_resolve_in_order() {
        let info = AssetInfo::from_data("audio/voice/line.ogg", AssetType::Audio, b"en")
            .with_locales(["en", "ja"]);
        // `ja` lives in a locale folder, `en` as a suffixed file
        let mut decoded = container(
            std::slice::from_ref(&info),
            &[
                ("audio/voice/line.en.ogg", b"en"),
                ("audio/voice/ja/line.ogg", b"en"),
            ],
        );

        let verified = verify_assets(&decoded).expect("Operation should succeed");
        assert_eq!(verified.len(), 2);
        assert_eq!(verified[0].resolved_path, "audio/voice/line.en.ogg");
        assert_eq!(verified[1].resolved_path, "audio/voice/ja/line.ogg");

        decoded.entries.remove("audio/voice/ja/line.ogg");
        let err = verify_assets(&decoded).unwrap_err();
        assert!(matches!(err, FormatError::MissingAsset { ref locale, .. } if locale == "ja"));
    }

    #[test]
    fn test_mismatch_names_the_asset() {
        let info = AssetInfo::from_data("images/a.png", AssetType::Image, b"original");
        let decoded = container(&[info.clone()], &[("images/a.png", b"tampered")]);

        match verify_assets(&decoded).unwrap_err() {
            FormatError::Integrity {
                path,
                expected,
                actual,
            } => {
                assert_eq!(path, "images/a.png");
                assert_eq!(expected, info.hash);
                assert_eq!(actual, sha256_hex(b"tampered"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
