//! Tar output with running size and digest of both encodings.
//!
//! ```text
//! tar::Builder
//!   └─ HashingWriter        uncompressed size + sha256
//!        └─ Compressor      none / gzip / zstd
//!             └─ HashingWriter   compressed size + sha256
//!                  └─ BufWriter<File>
//! ```

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use ocipack_core::config::OciCompression;
use ocipack_core::error::{PackError, Result};
use sha2::{Digest, Sha256};
use tar::EntryType;

use crate::archive::{is_regular_type, TarMember};

/// Running totals of a tar writer.
///
/// With compression enabled, the compressed figures trail the uncompressed
/// ones by whatever the encoder is still buffering, until the writer is
/// flushed or finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenTarInfo {
    /// Entries appended so far
    pub entry_count: usize,
    pub compressed_size: u64,
    /// Hex, no algorithm prefix
    pub compressed_sha256: String,
    pub uncompressed_size: u64,
    /// Hex, no algorithm prefix
    pub uncompressed_sha256: String,
}

/// Counts and hashes everything written through it.
struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    size: u64,
}

impl<W> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            size: 0,
        }
    }

    fn snapshot(&self) -> (u64, String) {
        (self.size, hex::encode(self.hasher.clone().finalize()))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.size += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

enum Compressor<W: Write> {
    None(W),
    Gzip(flate2::write::GzEncoder<W>),
    Zstd(zstd::stream::write::Encoder<'static, W>),
}

impl<W: Write> Compressor<W> {
    fn new(inner: W, compression: Option<OciCompression>, level: Option<u32>) -> io::Result<Self> {
        Ok(match compression {
            None => Compressor::None(inner),
            Some(c @ OciCompression::Gzip) => {
                let level = level.unwrap_or_else(|| c.default_level());
                Compressor::Gzip(flate2::write::GzEncoder::new(
                    inner,
                    flate2::Compression::new(level),
                ))
            }
            Some(c @ OciCompression::Zstd) => {
                let level = level.unwrap_or_else(|| c.default_level());
                Compressor::Zstd(zstd::stream::write::Encoder::new(inner, level as i32)?)
            }
        })
    }

    fn get_ref(&self) -> &W {
        match self {
            Compressor::None(w) => w,
            Compressor::Gzip(e) => e.get_ref(),
            Compressor::Zstd(e) => e.get_ref(),
        }
    }

    fn finish(self) -> io::Result<W> {
        match self {
            Compressor::None(w) => Ok(w),
            Compressor::Gzip(e) => e.finish(),
            Compressor::Zstd(e) => e.finish(),
        }
    }
}

impl<W: Write> Write for Compressor<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Compressor::None(w) => w.write(buf),
            Compressor::Gzip(e) => e.write(buf),
            Compressor::Zstd(e) => e.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Compressor::None(w) => w.flush(),
            Compressor::Gzip(e) => e.flush(),
            Compressor::Zstd(e) => e.flush(),
        }
    }
}

type Output = HashingWriter<BufWriter<File>>;

/// Writes one layer tar, optionally compressed.
pub struct OciDataTarWriter {
    path: PathBuf,
    builder: tar::Builder<HashingWriter<Compressor<Output>>>,
    entry_count: usize,
    compressed: bool,
    /// Uncompressed and compressed sizes at the last flush
    flushed_at: (u64, u64),
}

impl OciDataTarWriter {
    /// Create (truncating) the tar at `path`.
    pub fn create(
        path: &Path,
        compression: Option<OciCompression>,
        level: Option<u32>,
    ) -> Result<Self> {
        let file = File::create(path).map_err(|e| PackError::io_context(path.display(), e))?;
        let output = HashingWriter::new(BufWriter::new(file));
        let compressor = Compressor::new(output, compression, level)
            .map_err(|e| PackError::io_context(path.display(), e))?;

        Ok(Self {
            path: path.to_path_buf(),
            builder: tar::Builder::new(HashingWriter::new(compressor)),
            entry_count: 0,
            compressed: compression.is_some(),
            flushed_at: (0, 0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry, keeping the header's metadata.
    ///
    /// `content` must yield exactly `header.size()` bytes for regular files
    /// and is ignored for every other type.
    pub fn add_entry(
        &mut self,
        header: &tar::Header,
        name: &str,
        link_name: Option<&str>,
        content: Option<&mut dyn Read>,
    ) -> Result<()> {
        let mut header = header.clone();
        let entry_type = header.entry_type();

        let result = match (entry_type, link_name) {
            (EntryType::Link | EntryType::Symlink, Some(target)) => {
                header.set_size(0);
                self.builder.append_link(&mut header, name, target)
            }
            (EntryType::Link | EntryType::Symlink, None) => {
                return Err(PackError::MalformedArchive(format!(
                    "link {} has no target",
                    name
                )));
            }
            _ => match content {
                Some(reader) if is_regular_type(entry_type) => {
                    self.builder.append_data(&mut header, name, reader)
                }
                _ => {
                    header.set_size(0);
                    self.builder.append_data(&mut header, name, io::empty())
                }
            },
        };

        result
            .map_err(|e| PackError::io_context(format!("{} in {}", name, self.path.display()), e))?;
        self.entry_count += 1;
        Ok(())
    }

    /// Copy a scanned member, reading its content from `archive`.
    pub fn add_member(&mut self, archive: &File, member: &TarMember) -> Result<()> {
        if member.is_regular() {
            let mut content = member.content(archive);
            self.add_entry(
                &member.header,
                &member.name,
                member.link_name.as_deref(),
                Some(&mut content),
            )
        } else {
            self.add_entry(&member.header, &member.name, member.link_name.as_deref(), None)
        }
    }

    /// Push everything the encoder buffers out to the file, so the compressed
    /// totals catch up with the entries written so far.
    ///
    /// Each gzip flush closes a deflate block, so frequent flushing inflates
    /// the output.
    pub fn flush(&mut self) -> Result<()> {
        self.builder
            .get_mut()
            .flush()
            .map_err(|e| PackError::io_context(self.path.display(), e))?;
        self.flushed_at = (self.builder.get_ref().size, self.compressed_size());
        Ok(())
    }

    /// Uncompressed bytes written since the last flush. Always zero without
    /// compression.
    pub fn unflushed_size(&self) -> u64 {
        if self.compressed {
            self.builder.get_ref().size - self.flushed_at.0
        } else {
            0
        }
    }

    /// Estimate of the compressed size: the size at the last flush plus the
    /// unflushed input counted at full size. Exact without compression.
    pub fn estimated_size(&self) -> u64 {
        if self.compressed {
            self.flushed_at.1 + self.unflushed_size()
        } else {
            self.compressed_size()
        }
    }

    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    /// Bytes written to the output file so far.
    pub fn compressed_size(&self) -> u64 {
        self.builder.get_ref().inner.get_ref().size
    }

    /// Running totals.
    pub fn info(&self) -> WrittenTarInfo {
        let uncompressed = self.builder.get_ref();
        let (uncompressed_size, uncompressed_sha256) = uncompressed.snapshot();
        let (compressed_size, compressed_sha256) = uncompressed.inner.get_ref().snapshot();

        WrittenTarInfo {
            entry_count: self.entry_count,
            compressed_size,
            compressed_sha256,
            uncompressed_size,
            uncompressed_sha256,
        }
    }

    /// Write the tar footer, close the compression frame and flush.
    pub fn finish(self) -> Result<WrittenTarInfo> {
        let path = self.path;
        let entry_count = self.entry_count;
        let uncompressed = self
            .builder
            .into_inner()
            .map_err(|e| PackError::io_context(path.display(), e))?;
        let (uncompressed_size, uncompressed_sha256) = uncompressed.snapshot();

        let mut output = uncompressed
            .inner
            .finish()
            .map_err(|e| PackError::io_context(path.display(), e))?;
        output
            .flush()
            .map_err(|e| PackError::io_context(path.display(), e))?;
        let (compressed_size, compressed_sha256) = output.snapshot();

        tracing::debug!(
            path = %path.display(),
            entries = entry_count,
            compressed_size,
            uncompressed_size,
            "Finished layer tar"
        );

        Ok(WrittenTarInfo {
            entry_count,
            compressed_size,
            compressed_sha256,
            uncompressed_size,
            uncompressed_sha256,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::scan_members;
    use crate::oci::digest::sha256_bytes;
    use tempfile::TempDir;

    fn file_header(size: u64) -> tar::Header {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_mode(0o644);
        header.set_uid(1000);
        header.set_mtime(1_700_000_000);
        header.set_size(size);
        header
    }

    fn write_sample(path: &Path, compression: Option<OciCompression>) -> WrittenTarInfo {
        let mut writer = OciDataTarWriter::create(path, compression, None).unwrap();

        let mut dir = tar::Header::new_gnu();
        dir.set_entry_type(EntryType::Directory);
        dir.set_mode(0o755);
        writer.add_entry(&dir, "etc", None, None).unwrap();

        let mut content: &[u8] = b"hello world";
        writer
            .add_entry(&file_header(11), "etc/motd", None, Some(&mut content))
            .unwrap();

        let mut link = tar::Header::new_gnu();
        link.set_entry_type(EntryType::Symlink);
        writer
            .add_entry(&link, "etc/greeting", Some("motd"), None)
            .unwrap();

        writer.finish().unwrap()
    }

    #[test]
    fn test_uncompressed_sizes_match() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("layer.tar");
        let info = write_sample(&path, None);

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(info.compressed_size, bytes.len() as u64);
        assert_eq!(info.uncompressed_size, info.compressed_size);
        assert_eq!(info.uncompressed_sha256, sha256_bytes(&bytes));
        assert_eq!(info.compressed_sha256, info.uncompressed_sha256);
    }

    #[test]
    fn test_gzip_digests_cover_both_streams() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("layer.tar.gz");
        let info = write_sample(&path, Some(OciCompression::Gzip));

        let compressed = std::fs::read(&path).unwrap();
        assert_eq!(info.compressed_sha256, sha256_bytes(&compressed));

        let mut decompressed = Vec::new();
        flate2::read::GzDecoder::new(&compressed[..])
            .read_to_end(&mut decompressed)
            .unwrap();
        assert_eq!(info.uncompressed_size, decompressed.len() as u64);
        assert_eq!(info.uncompressed_sha256, sha256_bytes(&decompressed));
    }

    #[test]
    fn test_zstd_output_decodes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("layer.tar.zst");
        let info = write_sample(&path, Some(OciCompression::Zstd));

        let decompressed = zstd::decode_all(File::open(&path).unwrap()).unwrap();
        assert_eq!(info.uncompressed_sha256, sha256_bytes(&decompressed));
    }

    #[test]
    fn test_metadata_preserved() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("layer.tar");
        write_sample(&path, None);

        let file = File::open(&path).unwrap();
        let members = scan_members(&file, "layer.tar").unwrap();
        let names: Vec<&str> = members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["etc", "etc/motd", "etc/greeting"]);

        let motd = &members[1];
        assert_eq!(motd.header.mode().unwrap(), 0o644);
        assert_eq!(motd.header.uid().unwrap(), 1000);
        assert_eq!(motd.header.mtime().unwrap(), 1_700_000_000);
        let mut content = String::new();
        motd.content(&file).read_to_string(&mut content).unwrap();
        assert_eq!(content, "hello world");

        assert_eq!(members[2].link_name.as_deref(), Some("motd"));
    }

    #[test]
    fn test_long_names_survive() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("layer.tar");
        let long = format!("{}/file", "d".repeat(150));

        let mut writer = OciDataTarWriter::create(&path, None, None).unwrap();
        let mut content: &[u8] = b"x";
        writer
            .add_entry(&file_header(1), &long, None, Some(&mut content))
            .unwrap();
        writer.finish().unwrap();

        let members = scan_members(&File::open(&path).unwrap(), "layer.tar").unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].name, long);
    }

    #[test]
    fn test_flush_catches_up_compressed_size() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("layer.tar.gz");
        let mut writer =
            OciDataTarWriter::create(&path, Some(OciCompression::Gzip), None).unwrap();

        let mut content: &[u8] = &[3u8; 8192];
        writer
            .add_entry(&file_header(8192), "blob", None, Some(&mut content))
            .unwrap();
        writer.flush().unwrap();

        let flushed = writer.info();
        assert_eq!(flushed.entry_count, 1);
        assert!(flushed.compressed_size > 0);
        assert_eq!(
            flushed.compressed_size,
            std::fs::metadata(&path).unwrap().len()
        );

        let finished = writer.finish().unwrap();
        assert!(finished.compressed_size > flushed.compressed_size);
    }

    #[test]
    fn test_estimated_size_counts_unflushed_input() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("layer.tar.gz");
        let mut writer =
            OciDataTarWriter::create(&path, Some(OciCompression::Gzip), None).unwrap();

        let mut content: &[u8] = &[7u8; 4096];
        writer
            .add_entry(&file_header(4096), "blob", None, Some(&mut content))
            .unwrap();
        // Header block plus content
        assert_eq!(writer.unflushed_size(), 512 + 4096);
        assert_eq!(writer.estimated_size(), 512 + 4096);

        writer.flush().unwrap();
        assert_eq!(writer.unflushed_size(), 0);
        assert_eq!(writer.estimated_size(), writer.compressed_size());
    }

    #[test]
    fn test_uncompressed_estimate_is_exact() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("layer.tar");
        let mut writer = OciDataTarWriter::create(&path, None, None).unwrap();

        let mut content: &[u8] = b"abc";
        writer
            .add_entry(&file_header(3), "f", None, Some(&mut content))
            .unwrap();
        assert_eq!(writer.unflushed_size(), 0);
        assert_eq!(writer.estimated_size(), 1024);
    }

    #[test]
    fn test_info_is_monotonic() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("layer.tar");
        let mut writer = OciDataTarWriter::create(&path, None, None).unwrap();

        let before = writer.info();
        let mut content: &[u8] = &[7u8; 4096];
        writer
            .add_entry(&file_header(4096), "blob", None, Some(&mut content))
            .unwrap();
        let after = writer.info();

        assert!(after.uncompressed_size > before.uncompressed_size);
        assert_eq!(writer.compressed_size(), after.compressed_size);
        let finished = writer.finish().unwrap();
        assert!(finished.uncompressed_size >= after.uncompressed_size);
    }
}
