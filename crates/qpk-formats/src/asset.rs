//! Asset descriptions supplied by the analyzer
//!
//! An asset is identified by its content hash while it travels through the
//! producer. Once stored by a consumer it is re-keyed as
//! `bundleName:locale:type:name`, see [`asset_key`].

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::hash::sha256_hex;

/// Locale used when an asset is not localized
pub const DEFAULT_LOCALE: &str = "default";

/// Sub-type group for assets without a sub-type
pub const DEFAULT_GROUP: &str = "default";

/// Broad asset category, the first grouping level of a manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    /// Bitmaps, sprites, backgrounds
    Image,
    /// Music, voice, sound effects
    Audio,
    /// Movies and animated sequences
    Video,
    /// Scene and dialogue scripts
    Script,
    /// Font files
    Font,
    /// Character definitions and their sprites
    Character,
    /// Structured data (JSON, tables)
    Data,
    /// Anything else
    Other,
}

impl AssetType {
    /// All known types, in manifest order
    pub const ALL: [Self; 8] = [
        Self::Image,
        Self::Audio,
        Self::Video,
        Self::Script,
        Self::Font,
        Self::Character,
        Self::Data,
        Self::Other,
    ];

    /// Type whose folder is `folder`, see [`Self::names_folder`]
    pub fn from_folder(folder: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.names_folder(folder))
    }

    /// Whether `folder` is this type's folder: the wire name, singular or
    /// plural, in any case (`image`, `Images`)
    pub fn names_folder(self, folder: &str) -> bool {
        let singular = folder.strip_suffix(['s', 'S']).unwrap_or(folder);
        folder.eq_ignore_ascii_case(self.as_str()) || singular.eq_ignore_ascii_case(self.as_str())
    }

    /// Wire name of the type
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Script => "script",
            Self::Font => "font",
            Self::Character => "character",
            Self::Data => "data",
            Self::Other => "other",
        }
    }

    /// Parse a wire name
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == value)
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-file description produced by the asset analyzer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetInfo {
    /// Logical path inside the bundle, `/`-separated
    pub path: String,
    /// Asset category
    #[serde(rename = "type")]
    pub asset_type: AssetType,
    /// Optional second grouping level (e.g. "bgm", "characters")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<String>,
    /// Locales this file serves; never empty once normalized
    pub locales: Vec<String>,
    /// Payload size in bytes
    pub size: u64,
    /// Hex SHA-256 of the payload
    pub hash: String,
    /// Asset-level version, if the analyzer tracks one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
}

impl AssetInfo {
    /// Describe a payload with the default locale
    pub fn from_data(path: impl Into<String>, asset_type: AssetType, data: &[u8]) -> Self {
        Self {
            path: path.into(),
            asset_type,
            sub_type: None,
            locales: vec![DEFAULT_LOCALE.to_string()],
            size: data.len() as u64,
            hash: sha256_hex(data),
            version: None,
        }
    }

    /// Set the sub-type
    pub fn with_sub_type(mut self, sub_type: impl Into<String>) -> Self {
        self.sub_type = Some(sub_type.into());
        self
    }

    /// Replace the locale set
    pub fn with_locales<I, S>(mut self, locales: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.locales = locales.into_iter().map(Into::into).collect();
        self.normalize_locales();
        self
    }

    /// Set the asset version
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    /// Deduplicate locales and fall back to `default` when none are given
    pub fn normalize_locales(&mut self) {
        let mut seen = Vec::with_capacity(self.locales.len());
        for locale in self.locales.drain(..) {
            if !locale.is_empty() && !seen.contains(&locale) {
                seen.push(locale);
            }
        }
        if seen.is_empty() {
            seen.push(DEFAULT_LOCALE.to_string());
        }
        self.locales = seen;
    }

    /// Name used under the type/sub-type grouping of a manifest
    pub fn manifest_key(&self) -> String {
        manifest_key(&self.path, self.asset_type)
    }

    /// Grouping key for the second manifest level
    pub fn sub_type_key(&self) -> &str {
        self.sub_type.as_deref().unwrap_or(DEFAULT_GROUP)
    }
}

/// An asset together with the bytes that will be stored for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetPayload {
    /// Analyzer description
    pub info: AssetInfo,
    /// Raw bytes
    pub data: Vec<u8>,
}

impl AssetPayload {
    /// Pair a description with its bytes
    pub fn new(info: AssetInfo, data: Vec<u8>) -> Self {
        Self { info, data }
    }
}

/// Strip the leading folder of `asset_type` from a logical path
///
/// `images/bg/room.png` becomes `bg/room.png` for an image. Any other
/// leading folder is kept, so `ui/button.png` and `icons/button.png` stay
/// distinct names of the same type.
pub fn manifest_key(path: &str, asset_type: AssetType) -> String {
    let trimmed = path.trim_start_matches('/');
    match trimmed.split_once('/') {
        Some((folder, rest)) if !rest.is_empty() && asset_type.names_folder(folder) => {
            rest.to_string()
        }
        _ => trimmed.to_string(),
    }
}

/// Composite key under which a consumer stores an asset
pub fn asset_key(bundle: &str, locale: &str, asset_type: AssetType, name: &str) -> String {
    format!("{bundle}:{locale}:{asset_type}:{name}")
}

/// In-container paths that may hold the `locale` variant of `path`, in
/// lookup order
///
/// A concrete locale is looked up as a suffixed file name
/// (`voice/line.en.ogg`), then a locale folder (`voice/en/line.ogg`), then
/// the bare path. The default locale only uses the bare path.
pub fn locale_candidates(path: &str, locale: &str) -> Vec<String> {
    if locale == DEFAULT_LOCALE {
        return vec![path.to_string()];
    }

    let (dir, file) = match path.rsplit_once('/') {
        Some((dir, file)) => (Some(dir), file),
        None => (None, path),
    };
    let suffixed = match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}.{locale}.{ext}"),
        _ => format!("{file}.{locale}"),
    };

    let join = |name: &str| match dir {
        Some(dir) => format!("{dir}/{name}"),
        None => name.to_string(),
    };

    vec![
        join(&suffixed),
        join(&format!("{locale}/{file}")),
        path.to_string(),
    ]
}
