//! Bundle manifest, the JSON document describing one container
//!
//! The manifest is shared verbatim between producer and consumer. Field names
//! are camelCase and timestamps are ISO-8601 strings on the wire.
//!
//! ```text
//! assets
//! └── <type>            "image", "audio", ...
//!     └── <subType>     "bg", "bgm", or "default"
//!         └── <name>    path without its leading type folder
//!             └── { path, size, hash, locales, version? }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{FormatError, FormatResult};
use crate::hash::is_sha256_hex;
use crate::patch::{AssetDiff, PatchChanges};

/// Container format tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    /// Compact custom binary format
    #[default]
    Qpk,
    /// ZIP-compatible archive
    Zip,
}

impl ContainerFormat {
    /// Wire name
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Qpk => "qpk",
            Self::Zip => "zip",
        }
    }

    /// Conventional file extension, without the dot
    pub const fn extension(self) -> &'static str {
        self.as_str()
    }

    /// Parse a wire name or extension
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "qpk" => Some(Self::Qpk),
            "zip" => Some(Self::Zip),
            _ => None,
        }
    }
}

impl fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compression algorithm tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    /// Stored as-is
    None,
    /// DEFLATE (built in)
    #[default]
    Deflate,
    /// LZMA (requires a registered plugin)
    Lzma,
}

impl CompressionAlgorithm {
    /// Wire name
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Deflate => "deflate",
            Self::Lzma => "lzma",
        }
    }
}

impl fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encryption algorithm tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EncryptionAlgorithm {
    /// Salsa20 stream cipher (built in)
    #[default]
    #[serde(rename = "salsa20")]
    Salsa20,
    /// AES-256-GCM (requires a registered plugin)
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
}

impl EncryptionAlgorithm {
    /// Wire name
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Salsa20 => "salsa20",
            Self::Aes256Gcm => "aes-256-gcm",
        }
    }
}

impl fmt::Display for EncryptionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compression policy of a bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionSettings {
    /// Algorithm tag
    pub algorithm: CompressionAlgorithm,
    /// Algorithm-specific level (0-9 for DEFLATE)
    pub level: u32,
}

impl CompressionSettings {
    /// No compression
    pub const fn none() -> Self {
        Self {
            algorithm: CompressionAlgorithm::None,
            level: 0,
        }
    }

    /// Whether payloads are transformed at all
    pub fn is_enabled(&self) -> bool {
        self.algorithm != CompressionAlgorithm::None
    }
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            algorithm: CompressionAlgorithm::Deflate,
            level: 6,
        }
    }
}

/// Encryption policy of a bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EncryptionSettings {
    /// Whether payloads are encrypted
    pub enabled: bool,
    /// Algorithm used when enabled
    pub algorithm: EncryptionAlgorithm,
}

impl EncryptionSettings {
    /// Encryption switched on with the given algorithm
    pub const fn with(algorithm: EncryptionAlgorithm) -> Self {
        Self {
            enabled: true,
            algorithm,
        }
    }
}

/// One asset entry of a manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestAsset {
    /// Logical path of the asset inside the container
    pub path: String,
    /// Payload size in bytes
    pub size: u64,
    /// Hex SHA-256 of the payload
    pub hash: String,
    /// Locales served by this entry
    pub locales: Vec<String>,
    /// Asset-level version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
}

/// Nested asset table: type → sub-type → name → entry
pub type AssetTable = BTreeMap<String, BTreeMap<String, BTreeMap<String, ManifestAsset>>>;

/// Declarative description of one bundle or patch container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleManifest {
    /// Bundle name
    pub name: String,
    /// Monotonic bundle version
    pub version: u32,
    /// Opaque build identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_number: Option<String>,
    /// Container format
    pub format: ContainerFormat,
    /// Compression policy
    pub compression: CompressionSettings,
    /// Encryption policy
    pub encryption: EncryptionSettings,
    /// Locales in bundle order, default first
    pub locales: Vec<String>,
    /// Locale used when no better match exists
    pub default_locale: String,
    /// Assets grouped by type, sub-type and name
    pub assets: AssetTable,
    /// Sum of payload sizes
    pub total_size: u64,
    /// Number of asset entries
    pub total_files: usize,
    /// Merkle root over the asset hashes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merkle_root: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,

    /// Set on patch manifests
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_patch: bool,
    /// Version a patch applies on top of
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_version: Option<u32>,
    /// Version a patch produces
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_version: Option<u32>,
    /// Composite patch identifier, `<from>-<to>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_version: Option<String>,
    /// Changed paths per operation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<PatchChanges>,
    /// Number of changed paths
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_changes: Option<usize>,
    /// Per-path diff records, carrying old and new hashes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub change_details: Vec<AssetDiff>,
}

/// A manifest entry together with its grouping keys
#[derive(Debug, Clone, Copy)]
pub struct ManifestEntryRef<'a> {
    /// Type group
    pub asset_type: &'a str,
    /// Sub-type group
    pub sub_type: &'a str,
    /// Name within the group
    pub name: &'a str,
    /// The entry
    pub asset: &'a ManifestAsset,
}

impl BundleManifest {
    /// Iterate over every asset entry in table order
    pub fn entries(&self) -> impl Iterator<Item = ManifestEntryRef<'_>> {
        self.assets.iter().flat_map(|(asset_type, groups)| {
            groups.iter().flat_map(move |(sub_type, names)| {
                names.iter().map(move |(name, asset)| ManifestEntryRef {
                    asset_type,
                    sub_type,
                    name,
                    asset,
                })
            })
        })
    }

    /// Look up an entry by its logical path
    pub fn find_by_path(&self, path: &str) -> Option<ManifestEntryRef<'_>> {
        self.entries().find(|entry| entry.asset.path == path)
    }

    /// All logical asset paths, sorted
    pub fn asset_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.entries().map(|e| e.asset.path.clone()).collect();
        paths.sort();
        paths
    }

    /// Serialize to JSON bytes
    pub fn to_json(&self) -> FormatResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse JSON bytes, mapping failures to `CorruptManifest`
    pub fn from_json(data: &[u8]) -> FormatResult<Self> {
        serde_json::from_slice(data).map_err(|e| FormatError::CorruptManifest(e.to_string()))
    }

    /// Advisory validation, see [`validate_manifest_value`]
    pub fn validate(&self) -> ValidationReport {
        match serde_json::to_value(self) {
            Ok(value) => validate_manifest_value(&value),
            Err(e) => ValidationReport::from_errors(vec![format!("unserializable manifest: {e}")]),
        }
    }
}

/// Result of a validation pass; validation never fails with an error
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// True when no errors were recorded
    pub valid: bool,
    /// Problems that make the input unusable
    pub errors: Vec<String>,
    /// Problems that are reported but tolerated
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ValidationReport {
    /// A report with no findings
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Build a report from a list of errors
    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            warnings: Vec::new(),
        }
    }

    /// Record an error
    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
        self.valid = false;
    }

    /// Record a warning
    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

const KNOWN_FORMATS: [&str; 2] = ["qpk", "zip"];
const KNOWN_COMPRESSION: [&str; 3] = ["none", "deflate", "lzma"];
const KNOWN_ENCRYPTION: [&str; 2] = ["salsa20", "aes-256-gcm"];

/// Validate a manifest given as raw JSON
///
/// Checks required fields, known format/compression/encryption tags, a
/// non-empty locale list containing the default locale, and 64-character
/// hex hashes on every asset. Returns a report instead of failing.
pub fn validate_manifest_value(value: &Value) -> ValidationReport {
    let mut report = ValidationReport::ok();

    let Some(object) = value.as_object() else {
        report.error("manifest must be a JSON object");
        return report;
    };

    for field in [
        "name",
        "version",
        "format",
        "compression",
        "encryption",
        "locales",
        "defaultLocale",
        "assets",
        "totalSize",
        "totalFiles",
    ] {
        if !object.contains_key(field) {
            report.error(format!("missing required field: {field}"));
        }
    }

    if let Some(format) = object.get("format") {
        match format.as_str() {
            Some(f) if KNOWN_FORMATS.contains(&f) => {}
            _ => report.error(format!("unknown format: {format}")),
        }
    }

    if let Some(compression) = object.get("compression") {
        match compression.get("algorithm").and_then(Value::as_str) {
            Some(a) if KNOWN_COMPRESSION.contains(&a) => {}
            other => report.error(format!("unknown compression algorithm: {other:?}")),
        }
        if !compression.get("level").is_some_and(Value::is_u64) {
            report.error("compression.level must be a non-negative integer");
        }
    }

    if let Some(encryption) = object.get("encryption") {
        let enabled = encryption.get("enabled").and_then(Value::as_bool);
        if enabled.is_none() {
            report.error("encryption.enabled must be a boolean");
        }
        if enabled == Some(true) {
            match encryption.get("algorithm").and_then(Value::as_str) {
                Some(a) if KNOWN_ENCRYPTION.contains(&a) => {}
                other => report.error(format!("unknown encryption algorithm: {other:?}")),
            }
        }
    }

    let default_locale = object.get("defaultLocale").and_then(Value::as_str);
    match object.get("locales").and_then(Value::as_array) {
        Some(locales) if !locales.is_empty() => {
            if let Some(default) = default_locale
                && !locales.iter().any(|l| l.as_str() == Some(default))
            {
                report.error(format!("locales do not contain default locale {default}"));
            }
        }
        _ => report.error("locales must be a non-empty array"),
    }

    if let Some(assets) = object.get("assets").and_then(Value::as_object) {
        for (asset_type, groups) in assets {
            let Some(groups) = groups.as_object() else {
                report.error(format!("assets.{asset_type} must be an object"));
                continue;
            };
            for (sub_type, names) in groups {
                let Some(names) = names.as_object() else {
                    report.error(format!("assets.{asset_type}.{sub_type} must be an object"));
                    continue;
                };
                for (name, entry) in names {
                    match entry.get("hash").and_then(Value::as_str) {
                        Some(hash) if is_sha256_hex(hash) => {}
                        _ => report.error(format!(
                            "asset {asset_type}/{sub_type}/{name} has an invalid hash"
                        )),
                    }
                }
            }
        }
    }

    if object.get("isPatch").and_then(Value::as_bool) == Some(true) {
        for field in ["fromVersion", "toVersion", "changes"] {
            if !object.contains_key(field) {
                report.error(format!("patch manifest missing field: {field}"));
            }
        }
    }

    report
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal() -> Value {
        json!({
            "name": "main",
            "version": 1,
            "format": "qpk",
            "compression": { "algorithm": "deflate", "level": 6 },
            "encryption": { "enabled": false, "algorithm": "salsa20" },
            "locales": ["default", "en"],
            "defaultLocale": "default",
            "assets": {
                "image": { "bg": { "room.png": {
                    "path": "images/bg/room.png",
                    "size": 3,
                    "hash": "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
                    "locales": ["default"]
                }}}
            },
            "totalSize": 3,
            "totalFiles": 1,
            "createdAt": "2024-01-01T00:00:00Z"
        })
    }

    #[test]
    fn test_minimal_manifest_is_valid() {
        let report = validate_manifest_value(&minimal());
        assert!(report.valid, "{:?}", report.errors);

        let parsed: BundleManifest = serde_json::from_value(minimal()).unwrap();
        assert_eq!(parsed.total_files, 1);
        assert!(parsed.find_by_path("images/bg/room.png").is_some());
        assert!(parsed.validate().valid);
    }

    #[test]
    fn test_validation_collects_every_problem() {
        let mut value = minimal();
        value["format"] = json!("rar");
        value["compression"]["algorithm"] = json!("brotli");
        value["locales"] = json!(["en"]);
        value["assets"]["image"]["bg"]["room.png"]["hash"] = json!("abc");
        value.as_object_mut().unwrap().remove("totalFiles");

        let report = validate_manifest_value(&value);
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 5, "{:?}", report.errors);
    }

    #[test]
    fn test_validation_never_fails_on_garbage() {
        let report = validate_manifest_value(&json!([1, 2, 3]));
        assert!(!report.valid);
    }

    #[test]
    fn test_patch_fields_required_when_flagged() {
        let mut value = minimal();
        value["isPatch"] = json!(true);
        let report = validate_manifest_value(&value);
        assert_eq!(report.errors.len(), 3);
    }

    #[test]
    fn test_corrupt_json_maps_to_corrupt_manifest() {
        let err = BundleManifest::from_json(b"{not json").unwrap_err();
        assert!(matches!(err, FormatError::CorruptManifest(_)));
    }
}
