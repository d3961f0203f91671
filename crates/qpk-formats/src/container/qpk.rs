//! QPK binary container
//!
//! ```text
//! offset  size  field
//! 0       4     magic "QPK\0"
//! 4       4     version (1)
//! 8       4     flags (bit0 compressed, bit1 encrypted)
//! 12      4     header size (32)
//! 16      8     manifest offset
//! 24      8     manifest size
//! 32      ...   entries: [u32 pathLen][path][u32 dataLen][data]
//! ...           manifest JSON at manifest offset
//! ```
//!
//! All integers are little-endian. When compressed or encrypted, each entry
//! payload and the manifest section are transformed independently.

use binrw::{BinRead, BinWrite};
use std::collections::BTreeMap;
use std::io::Cursor;
use tracing::debug;

use super::{
    CodecOptions, ContainerCodec, ContainerSummary, DecodedContainer, check_manifest_policy,
    open_entry,
};
use crate::asset::AssetPayload;
use crate::error::{FormatError, FormatResult};
use crate::manifest::{BundleManifest, ContainerFormat};
use crate::plugin::PayloadTransform;

/// Magic bytes at offset 0
pub const QPK_MAGIC: [u8; 4] = *b"QPK\0";

/// Only supported container version
pub const QPK_VERSION: u32 = 1;

/// Fixed header length
pub const QPK_HEADER_SIZE: u32 = 32;

/// Header flag bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QpkFlags {
    /// Sections are compressed
    pub compressed: bool,
    /// Sections are encrypted
    pub encrypted: bool,
}

impl QpkFlags {
    const COMPRESSED: u32 = 0x1;
    const ENCRYPTED: u32 = 0x2;

    /// Pack into the header word
    pub const fn bits(self) -> u32 {
        let mut bits = 0;
        if self.compressed {
            bits |= Self::COMPRESSED;
        }
        if self.encrypted {
            bits |= Self::ENCRYPTED;
        }
        bits
    }

    /// Unpack from the header word; unknown bits are ignored
    pub const fn from_bits(bits: u32) -> Self {
        Self {
            compressed: bits & Self::COMPRESSED != 0,
            encrypted: bits & Self::ENCRYPTED != 0,
        }
    }
}

/// Fixed-size QPK header
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct QpkHeader {
    /// Raw magic bytes, compared as a sequence
    pub magic: [u8; 4],
    /// Container version
    pub version: u32,
    /// Packed [`QpkFlags`]
    pub flags: u32,
    /// Header length, always 32
    pub header_size: u32,
    /// Absolute offset of the manifest section
    pub manifest_offset: u64,
    /// Stored length of the manifest section
    pub manifest_size: u64,
}

impl QpkHeader {
    /// Header for a container with the given layout
    pub const fn new(flags: QpkFlags, manifest_offset: u64, manifest_size: u64) -> Self {
        Self {
            magic: QPK_MAGIC,
            version: QPK_VERSION,
            flags: flags.bits(),
            header_size: QPK_HEADER_SIZE,
            manifest_offset,
            manifest_size,
        }
    }

    /// Decoded flag bits
    pub const fn flags(&self) -> QpkFlags {
        QpkFlags::from_bits(self.flags)
    }

    /// Parse and validate the header of `data`
    pub fn parse(data: &[u8]) -> FormatResult<Self> {
        if data.len() < QPK_HEADER_SIZE as usize {
            return Err(FormatError::InvalidContainer(format!(
                "{} bytes is too short for a QPK header",
                data.len()
            )));
        }
        let header = Self::read(&mut Cursor::new(data))?;

        if header.magic != QPK_MAGIC {
            return Err(FormatError::InvalidContainer(format!(
                "bad magic {:02x?}",
                header.magic
            )));
        }
        if header.version != QPK_VERSION {
            return Err(FormatError::UnsupportedVersion(header.version));
        }
        if header.header_size != QPK_HEADER_SIZE {
            return Err(FormatError::CorruptHeader(format!(
                "header size {} (expected {QPK_HEADER_SIZE})",
                header.header_size
            )));
        }

        let end = header
            .manifest_offset
            .checked_add(header.manifest_size)
            .ok_or_else(|| FormatError::CorruptHeader("manifest range overflows".to_string()))?;
        if header.manifest_offset < u64::from(QPK_HEADER_SIZE) || end > data.len() as u64 {
            return Err(FormatError::CorruptHeader(format!(
                "manifest range {}..{end} outside container of {} bytes",
                header.manifest_offset,
                data.len()
            )));
        }

        Ok(header)
    }

    fn manifest_range(&self) -> std::ops::Range<usize> {
        // Bounds were checked against the buffer length in `parse`
        let start = usize::try_from(self.manifest_offset).unwrap_or(usize::MAX);
        let len = usize::try_from(self.manifest_size).unwrap_or(usize::MAX);
        start..start.saturating_add(len)
    }

    fn data_range(&self) -> std::ops::Range<usize> {
        QPK_HEADER_SIZE as usize..self.manifest_range().start
    }
}

/// One serialized entry
#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
struct EntryRecord {
    path_len: u32,
    #[br(count = path_len)]
    path: Vec<u8>,
    data_len: u32,
    #[br(count = data_len)]
    data: Vec<u8>,
}

impl EntryRecord {
    fn new(path: &str, data: Vec<u8>) -> FormatResult<Self> {
        let too_large =
            |what: &str| FormatError::InvalidContainer(format!("{what} of {path} exceeds 4 GB"));
        Ok(Self {
            path_len: u32::try_from(path.len()).map_err(|_| too_large("path"))?,
            path: path.as_bytes().to_vec(),
            data_len: u32::try_from(data.len()).map_err(|_| too_large("payload"))?,
            data,
        })
    }
}

/// Walk the data section, yielding raw stored records
fn read_records(section: &[u8]) -> FormatResult<Vec<(String, Vec<u8>)>> {
    let mut cursor = Cursor::new(section);
    let mut records = Vec::new();

    while (cursor.position() as usize) < section.len() {
        let offset = cursor.position();
        let record = EntryRecord::read(&mut cursor).map_err(|e| {
            FormatError::InvalidContainer(format!("truncated entry at data offset {offset}: {e}"))
        })?;
        let path = String::from_utf8(record.path).map_err(|_| {
            FormatError::InvalidContainer(format!("entry path at data offset {offset} is not UTF-8"))
        })?;
        records.push((path, record.data));
    }

    Ok(records)
}

/// Codec for the QPK binary format
#[derive(Debug, Clone, Copy, Default)]
pub struct QpkCodec;

impl QpkCodec {
    fn read_manifest(
        data: &[u8],
        header: &QpkHeader,
        options: &CodecOptions,
    ) -> FormatResult<(BundleManifest, PayloadTransform)> {
        let flags = header.flags();
        let transform = options.transform(flags.compressed, flags.encrypted)?;

        let section = &data[header.manifest_range()];
        let json = transform
            .open(section)
            .map_err(|e| FormatError::CorruptManifest(format!("manifest section: {e}")))?;
        let manifest = BundleManifest::from_json(&json)?;
        check_manifest_policy(&manifest, flags.compressed, flags.encrypted, options)?;

        Ok((manifest, transform))
    }
}

impl ContainerCodec for QpkCodec {
    fn format(&self) -> ContainerFormat {
        ContainerFormat::Qpk
    }

    fn encode(
        &self,
        assets: &[AssetPayload],
        manifest: &BundleManifest,
        options: &CodecOptions,
    ) -> FormatResult<Vec<u8>> {
        let transform = options.encode_transform()?;
        let flags = QpkFlags {
            compressed: transform.compresses(),
            encrypted: transform.encrypts(),
        };

        let mut cursor = Cursor::new(Vec::new());
        cursor.set_position(u64::from(QPK_HEADER_SIZE));

        for asset in assets {
            let stored = transform.seal(&asset.data)?;
            EntryRecord::new(&asset.info.path, stored)?.write(&mut cursor)?;
        }

        let manifest_offset = cursor.position();
        let manifest_section = transform.seal(&manifest.to_json()?)?;
        let manifest_size = manifest_section.len() as u64;

        let mut data = cursor.into_inner();
        data.extend_from_slice(&manifest_section);

        let mut header_cursor = Cursor::new(&mut data[..QPK_HEADER_SIZE as usize]);
        QpkHeader::new(flags, manifest_offset, manifest_size).write(&mut header_cursor)?;

        debug!(
            entries = assets.len(),
            size = data.len(),
            compressed = flags.compressed,
            encrypted = flags.encrypted,
            "Encoded QPK container"
        );
        Ok(data)
    }

    fn decode(&self, data: &[u8], options: &CodecOptions) -> FormatResult<DecodedContainer> {
        let header = QpkHeader::parse(data)?;
        let (manifest, transform) = Self::read_manifest(data, &header, options)?;

        let mut entries = BTreeMap::new();
        for (path, stored) in read_records(&data[header.data_range()])? {
            let payload = open_entry(&transform, &manifest, &path, &stored)?;
            entries.insert(path, payload);
        }

        Ok(DecodedContainer { manifest, entries })
    }

    fn inspect(&self, data: &[u8]) -> FormatResult<ContainerSummary> {
        let header = QpkHeader::parse(data)?;
        let flags = header.flags();
        let paths: Vec<String> = read_records(&data[header.data_range()])?
            .into_iter()
            .map(|(path, _)| path)
            .collect();

        Ok(ContainerSummary {
            format: ContainerFormat::Qpk,
            version: Some(header.version),
            compressed: flags.compressed,
            encrypted: flags.encrypted,
            entry_count: paths.len(),
            manifest_size: header.manifest_size,
            total_size: data.len() as u64,
            paths,
        })
    }
}
