//! Handles to byte ranges and their lazily computed digests.

use std::fs::File;
use std::io::{self, Read};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use ocipack_core::error::{PackError, Result};

use super::digest::sha256_reader;

/// A reference to a byte range that can be opened on demand.
#[derive(Debug, Clone)]
pub enum DataRef {
    /// Owned in-memory bytes
    Bytes(Arc<[u8]>),
    /// A whole file on disk, opened on each read
    File(PathBuf),
    /// The content of one member of an open, uncompressed tar archive
    TarEntry(TarEntryRef),
}

/// Location of a tar member's content inside its archive.
///
/// Holds a shared handle to the archive, so the reference keeps the handle
/// open for as long as it lives.
#[derive(Debug, Clone)]
pub struct TarEntryRef {
    archive: Arc<File>,
    name: String,
    offset: u64,
    size: u64,
}

impl TarEntryRef {
    pub fn new(archive: Arc<File>, name: impl Into<String>, offset: u64, size: u64) -> Self {
        Self {
            archive,
            name: name.into(),
            offset,
            size,
        }
    }

    /// Member name inside the archive.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Byte offset of the member content inside the archive.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

impl PartialEq for DataRef {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (DataRef::Bytes(a), DataRef::Bytes(b)) => a == b,
            (DataRef::File(a), DataRef::File(b)) => a == b,
            (DataRef::TarEntry(a), DataRef::TarEntry(b)) => {
                Arc::ptr_eq(&a.archive, &b.archive) && a.offset == b.offset && a.size == b.size
            }
            _ => false,
        }
    }
}

impl DataRef {
    /// Wrap owned bytes.
    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        DataRef::Bytes(Arc::from(data.into()))
    }

    /// Reference a file by path.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        DataRef::File(path.into())
    }

    /// Open a fresh reader over the referenced bytes.
    pub fn open(&self) -> Result<Box<dyn Read + Send + '_>> {
        match self {
            DataRef::Bytes(bytes) => Ok(Box::new(&bytes[..])),
            DataRef::File(path) => {
                let file = File::open(path).map_err(|e| PackError::io_context(path.display(), e))?;
                Ok(Box::new(file))
            }
            DataRef::TarEntry(entry) => Ok(Box::new(
                ReadAtReader::new(&entry.archive, entry.offset).take(entry.size),
            )),
        }
    }

    /// Number of referenced bytes.
    pub fn size(&self) -> Result<u64> {
        match self {
            DataRef::Bytes(bytes) => Ok(bytes.len() as u64),
            DataRef::File(path) => std::fs::metadata(path)
                .map(|m| m.len())
                .map_err(|e| PackError::io_context(path.display(), e)),
            DataRef::TarEntry(entry) => Ok(entry.size),
        }
    }

    /// Read the whole range into memory.
    pub fn read_all(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.open()?.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// The backing path when this is a plain file reference.
    pub fn as_file_path(&self) -> Option<&Path> {
        match self {
            DataRef::File(path) => Some(path),
            _ => None,
        }
    }
}

/// A `Read` adapter over a shared file using positional reads, so several
/// readers over one archive never disturb each other's position.
#[derive(Debug)]
pub(crate) struct ReadAtReader<'a> {
    file: &'a File,
    offset: u64,
}

impl<'a> ReadAtReader<'a> {
    pub(crate) fn new(file: &'a File, offset: u64) -> Self {
        Self { file, offset }
    }
}

impl Read for ReadAtReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.file.read_at(buf, self.offset)?;
        self.offset += n as u64;
        Ok(n)
    }
}

/// Memoized facts about a [`DataRef`].
///
/// Digest and size are computed on first access by streaming the data once.
#[derive(Debug, Clone)]
pub struct DataRefInfo {
    data: DataRef,
    digest: OnceLock<String>,
    size: OnceLock<u64>,
}

impl DataRefInfo {
    pub fn new(data: DataRef) -> Self {
        Self {
            data,
            digest: OnceLock::new(),
            size: OnceLock::new(),
        }
    }

    /// Seed the cache with an already known digest and size.
    pub fn with_known(data: DataRef, digest: impl Into<String>, size: u64) -> Self {
        let info = Self::new(data);
        let _ = info.digest.set(digest.into());
        let _ = info.size.set(size);
        info
    }

    pub fn data(&self) -> &DataRef {
        &self.data
    }

    /// `sha256:<hex>` of the referenced bytes.
    pub fn digest(&self) -> Result<&str> {
        if let Some(digest) = self.digest.get() {
            return Ok(digest);
        }

        let mut reader = self.data.open()?;
        let (digest, size) = sha256_reader(&mut reader)?;
        let _ = self.size.set(size);
        Ok(self.digest.get_or_init(|| digest))
    }

    pub fn size(&self) -> Result<u64> {
        if let Some(size) = self.size.get() {
            return Ok(*size);
        }

        let size = self.data.size()?;
        Ok(*self.size.get_or_init(|| size))
    }
}
