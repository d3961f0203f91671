//! ZIP-compatible container
//!
//! Entries are stored under their logical paths and the manifest is stored
//! as plaintext `manifest.json`. DEFLATE compression uses the archive's own
//! method; other algorithms and encryption are applied to each payload before
//! it is stored.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::{
    CodecOptions, ContainerCodec, ContainerSummary, DecodedContainer, check_manifest_policy,
    open_entry,
};
use crate::asset::AssetPayload;
use crate::error::{FormatError, FormatResult};
use crate::manifest::{BundleManifest, CompressionAlgorithm, ContainerFormat};
use crate::plugin::PayloadTransform;

/// Archive member holding the manifest
pub const MANIFEST_ENTRY: &str = "manifest.json";

/// Codec for ZIP archives
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipCodec;

impl ZipCodec {
    /// Per-payload transform and archive method for a policy
    fn layout(
        options: &CodecOptions,
        compressed: bool,
        encrypted: bool,
    ) -> FormatResult<(PayloadTransform, CompressionMethod)> {
        let native = compressed && options.effective_compression() == CompressionAlgorithm::Deflate;
        let transform = options.transform(compressed && !native, encrypted)?;
        let method = if native {
            CompressionMethod::Deflated
        } else {
            CompressionMethod::Stored
        };
        Ok((transform, method))
    }

    fn open_archive(data: &[u8]) -> FormatResult<ZipArchive<Cursor<&[u8]>>> {
        ZipArchive::new(Cursor::new(data))
            .map_err(|e| FormatError::InvalidContainer(format!("not a zip archive: {e}")))
    }
}

impl ContainerCodec for ZipCodec {
    fn format(&self) -> ContainerFormat {
        ContainerFormat::Zip
    }

    fn encode(
        &self,
        assets: &[AssetPayload],
        manifest: &BundleManifest,
        options: &CodecOptions,
    ) -> FormatResult<Vec<u8>> {
        let (transform, method) = Self::layout(
            options,
            options.compression.is_enabled(),
            options.encryption.enabled,
        )?;
        let file_options = SimpleFileOptions::default().compression_method(method);

        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for asset in assets {
            if asset.info.path == MANIFEST_ENTRY {
                return Err(FormatError::InvalidContainer(format!(
                    "asset path {MANIFEST_ENTRY} is reserved"
                )));
            }
            writer.start_file(asset.info.path.as_str(), file_options)?;
            writer.write_all(&transform.seal(&asset.data)?)?;
        }

        writer.start_file(MANIFEST_ENTRY, file_options)?;
        writer.write_all(&manifest.to_json()?)?;

        let data = writer.finish()?.into_inner();
        debug!(entries = assets.len(), size = data.len(), "Encoded ZIP container");
        Ok(data)
    }

    fn decode(&self, data: &[u8], options: &CodecOptions) -> FormatResult<DecodedContainer> {
        let mut archive = Self::open_archive(data)?;

        let manifest = {
            let mut file = archive.by_name(MANIFEST_ENTRY).map_err(|_| {
                FormatError::CorruptManifest(format!("archive has no {MANIFEST_ENTRY}"))
            })?;
            let mut json = Vec::new();
            file.read_to_end(&mut json)
                .map_err(|e| FormatError::CorruptManifest(e.to_string()))?;
            BundleManifest::from_json(&json)?
        };

        let compressed = manifest.compression.is_enabled();
        let encrypted = manifest.encryption.enabled;
        check_manifest_policy(&manifest, compressed, encrypted, options)?;
        let (transform, _) = Self::layout(options, compressed, encrypted)?;

        let mut entries = BTreeMap::new();
        for index in 0..archive.len() {
            let mut file = archive.by_index(index)?;
            if file.is_dir() || file.name() == MANIFEST_ENTRY {
                continue;
            }
            let path = file.name().to_string();
            let mut stored = Vec::new();
            if let Err(e) = file.read_to_end(&mut stored) {
                // CRC or inflate failure on a single member
                debug!(path = %path, error = %e, "Archive member unreadable");
                return Err(FormatError::Integrity {
                    expected: manifest
                        .find_by_path(&path)
                        .map(|entry| entry.asset.hash.clone())
                        .unwrap_or_default(),
                    actual: String::new(),
                    path,
                });
            }
            let payload = open_entry(&transform, &manifest, &path, &stored)?;
            entries.insert(path, payload);
        }

        Ok(DecodedContainer { manifest, entries })
    }

    fn inspect(&self, data: &[u8]) -> FormatResult<ContainerSummary> {
        let mut archive = Self::open_archive(data)?;
        let mut paths = Vec::new();
        let mut manifest_size = 0;
        let mut compressed = false;

        for index in 0..archive.len() {
            let file = archive.by_index_raw(index)?;
            if file.is_dir() {
                continue;
            }
            if file.name() == MANIFEST_ENTRY {
                manifest_size = file.compressed_size();
                continue;
            }
            compressed |= file.compression() != CompressionMethod::Stored;
            paths.push(file.name().to_string());
        }

        Ok(ContainerSummary {
            format: ContainerFormat::Zip,
            version: None,
            compressed,
            encrypted: false,
            entry_count: paths.len(),
            manifest_size,
            total_size: data.len() as u64,
            paths,
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::asset::{AssetInfo, AssetType};
    use crate::generator::{ManifestOptions, generate_manifest};
    use crate::manifest::CompressionSettings;

    fn sample(compression: CompressionSettings) -> (Vec<AssetPayload>, BundleManifest) {
        let data = b"zip payload ".repeat(16);
        let info = AssetInfo::from_data("data/table.json", AssetType::Data, &data);
        let manifest = generate_manifest(
            "main",
            std::slice::from_ref(&info),
            &ManifestOptions {
                format: ContainerFormat::Zip,
                compression,
                ..ManifestOptions::default()
            },
        )
        .expect("Operation should succeed");
        (vec![AssetPayload::new(info, data)], manifest)
    }

    #[test]
    fn test_round_trip_deflated() {
        let (assets, manifest) = sample(CompressionSettings::default());
        let options = CodecOptions::for_manifest(&manifest);

        let data = ZipCodec.encode(&assets, &manifest, &options).unwrap();
        assert!(data.starts_with(b"PK"));

        let decoded = ZipCodec.decode(&data, &options).unwrap();
        assert_eq!(decoded.manifest, manifest);
        assert_eq!(decoded.get("data/table.json"), Some(assets[0].data.as_slice()));

        let summary = ZipCodec.inspect(&data).unwrap();
        assert!(summary.compressed);
        assert_eq!(summary.paths, vec!["data/table.json"]);
    }

    #[test]
    fn test_missing_manifest_is_corrupt() {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("a.txt", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"a").unwrap();
        let data = writer.finish().unwrap().into_inner();

        let err = ZipCodec.decode(&data, &CodecOptions::default()).unwrap_err();
        assert!(matches!(err, FormatError::CorruptManifest(_)));
    }

    #[test]
    fn test_garbage_is_invalid_container() {
        let err = ZipCodec
            .decode(b"definitely not a zip", &CodecOptions::default())
            .unwrap_err();
        assert!(matches!(err, FormatError::InvalidContainer(_)));
    }

    #[test]
    fn test_reserved_manifest_path() {
        let info = AssetInfo::from_data(MANIFEST_ENTRY, AssetType::Data, b"{}");
        let manifest = generate_manifest("main", &[], &ManifestOptions::default())
            .expect("Operation should succeed");
        let err = ZipCodec
            .encode(
                &[AssetPayload::new(info, b"{}".to_vec())],
                &manifest,
                &CodecOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, FormatError::InvalidContainer(_)));
    }
}
