//! Asset directory analyzer
//!
//! Walks an asset directory and describes every regular file. The first
//! path segment names the asset type (`images/bg.png` is an image); files
//! outside a recognized directory are `other`. A nested directory below the
//! type directory becomes the sub-type (`audio/bgm/theme.ogg`). Every asset
//! is served for the default locale. Hidden files and directories are
//! skipped.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use qpk_build::SourceAsset;
use qpk_formats::{AssetInfo, AssetPayload, AssetType};
use std::fs;
use std::path::Path;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Asset type for a logical path
pub fn asset_type_for(path: &str) -> AssetType {
    let Some((first, _)) = path.split_once('/') else {
        return AssetType::Other;
    };
    AssetType::from_folder(first).unwrap_or(AssetType::Other)
}

/// Sub-type for a logical path: the second segment of a nested path
pub fn sub_type_for(path: &str) -> Option<&str> {
    let mut segments = path.split('/');
    let _type_dir = segments.next()?;
    let sub_type = segments.next()?;
    segments.next().map(|_| sub_type)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

/// Logical path of `path` relative to `root`, with `/` separators
fn logical_path(root: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(root)
        .with_context(|| format!("{} is outside {}", path.display(), root.display()))?;
    Ok(relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/"))
}

/// Analyze every file under `root`, sorted by logical path
pub fn analyze_directory(root: &Path) -> Result<Vec<SourceAsset>> {
    if !root.is_dir() {
        anyhow::bail!("asset directory {} does not exist", root.display());
    }

    let mut assets = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e));
    for entry in walker {
        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = logical_path(root, entry.path())?;
        let data = fs::read(entry.path())
            .with_context(|| format!("failed to read {}", entry.path().display()))?;
        let asset_type = asset_type_for(&path);
        debug!(path = %path, asset_type = %asset_type, size = data.len(), "Analyzed asset");

        let mut info = AssetInfo::from_data(path.as_str(), asset_type, &data);
        if let Some(sub_type) = sub_type_for(&path) {
            info = info.with_sub_type(sub_type);
        }
        let mut source = SourceAsset::new(AssetPayload::new(info, data));
        if let Some(modified) = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .map(DateTime::<Utc>::from)
        {
            source = source.with_modified(modified);
        }
        assets.push(source);
    }

    Ok(assets)
}
