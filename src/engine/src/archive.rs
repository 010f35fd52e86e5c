//! Tar member scanning shared by the tar-backed repository and the layer
//! unpacker/packer.
//!
//! Members are indexed once with their header and the offset of their
//! content, so content can later be read back positionally in any order.

use std::fs::File;
use std::io::{self, Read};
use std::os::unix::fs::FileExt;
use std::path::Path;

use ocipack_core::config::OciCompression;
use ocipack_core::error::{PackError, Result};
use tar::EntryType;

use crate::oci::data_ref::ReadAtReader;

/// One member of an uncompressed tar archive.
#[derive(Debug, Clone)]
pub struct TarMember {
    /// Normalized member name (no `./` prefix, no trailing `/`)
    pub name: String,
    /// Hardlink target (normalized) or symlink target (verbatim)
    pub link_name: Option<String>,
    /// Original header, carrying mode, owner, times and type
    pub header: tar::Header,
    /// Offset of the member content within the archive
    pub data_offset: u64,
    /// Content size in bytes
    pub size: u64,
}

impl TarMember {
    pub fn entry_type(&self) -> EntryType {
        self.header.entry_type()
    }

    /// Regular file content lives in this member.
    pub fn is_regular(&self) -> bool {
        is_regular_type(self.entry_type())
    }

    pub fn is_hardlink(&self) -> bool {
        self.entry_type() == EntryType::Link
    }

    pub fn is_dir(&self) -> bool {
        self.entry_type() == EntryType::Directory
    }

    /// Basename of the member.
    pub fn base_name(&self) -> &str {
        split_name(&self.name).1
    }

    /// Read this member's content out of the archive it was scanned from.
    pub fn content<'a>(&self, archive: &'a File) -> impl Read + 'a {
        ReadAtReader::new(archive, self.data_offset).take(self.size)
    }
}

/// Regular-file entry types.
pub fn is_regular_type(entry_type: EntryType) -> bool {
    matches!(entry_type, EntryType::Regular | EntryType::Continuous)
}

/// Split a normalized name into `(directory, basename)`; the directory of a
/// top-level name is empty.
pub fn split_name(name: &str) -> (&str, &str) {
    match name.rsplit_once('/') {
        Some((dir, base)) => (dir, base),
        None => ("", name),
    }
}

/// Normalize a member path: strip `./` and `/` prefixes and trailing `/`.
///
/// Returns `None` for the archive root itself.
pub fn normalize_entry_name(raw: &Path) -> Option<String> {
    let raw = raw.to_string_lossy();
    let mut name: &str = &raw;

    loop {
        if let Some(rest) = name.strip_prefix("./") {
            name = rest;
        } else if let Some(rest) = name.strip_prefix('/') {
            name = rest;
        } else {
            break;
        }
    }

    let name = name.trim_end_matches('/');
    if name.is_empty() || name == "." {
        None
    } else {
        Some(name.to_string())
    }
}

/// Index every member of an uncompressed tar archive, in archive order.
///
/// `label` names the archive in error messages.
pub fn scan_members(file: &File, label: &str) -> Result<Vec<TarMember>> {
    let mut archive = tar::Archive::new(file);
    let entries = archive
        .entries()
        .map_err(|e| PackError::MalformedArchive(format!("{}: {}", label, e)))?;

    let mut members = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| PackError::MalformedArchive(format!("{}: {}", label, e)))?;
        let entry_type = entry.header().entry_type();

        match entry_type {
            EntryType::XGlobalHeader
            | EntryType::XHeader
            | EntryType::GNULongName
            | EntryType::GNULongLink => continue,
            EntryType::GNUSparse => {
                return Err(PackError::UnsupportedFeature(format!(
                    "sparse member in {}",
                    label
                )));
            }
            _ => {}
        }

        let path = entry
            .path()
            .map_err(|e| PackError::MalformedArchive(format!("{}: {}", label, e)))?;
        let name = match normalize_entry_name(&path) {
            Some(name) => name,
            None => continue,
        };

        let link_name = entry
            .link_name()
            .map_err(|e| PackError::MalformedArchive(format!("{}: {}", label, e)))?
            .and_then(|link| {
                if entry_type == EntryType::Link {
                    normalize_entry_name(&link)
                } else {
                    Some(link.to_string_lossy().into_owned())
                }
            });

        members.push(TarMember {
            name,
            link_name,
            header: entry.header().clone(),
            data_offset: entry.raw_file_position(),
            size: entry.size(),
        });
    }

    Ok(members)
}

/// Sniff the compression of a file from its magic bytes.
pub fn detect_compression(file: &File) -> io::Result<Option<OciCompression>> {
    let mut magic = [0u8; 4];
    let n = file.read_at(&mut magic, 0)?;

    if n >= 2 && magic[..2] == [0x1f, 0x8b] {
        Ok(Some(OciCompression::Gzip))
    } else if n == 4 && magic == [0x28, 0xb5, 0x2f, 0xfd] {
        Ok(Some(OciCompression::Zstd))
    } else {
        Ok(None)
    }
}

/// Wrap a reader with the matching decompressor.
pub fn decompressor<'a, R: Read + 'a>(
    reader: R,
    compression: Option<OciCompression>,
) -> io::Result<Box<dyn Read + 'a>> {
    Ok(match compression {
        None => Box::new(reader),
        Some(OciCompression::Gzip) => Box::new(flate2::read::GzDecoder::new(reader)),
        Some(OciCompression::Zstd) => Box::new(zstd::stream::read::Decoder::new(reader)?),
    })
}
