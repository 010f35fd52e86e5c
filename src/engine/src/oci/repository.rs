//! Read-only, digest-addressed blob stores.
//!
//! Three backends share the [`OciRepository`] interface:
//!
//! - [`DirectoryOciRepository`]: an OCI image-layout directory on disk
//! - [`TarFileOciRepository`]: an uncompressed tar holding an image layout
//!   (`docker save` output or an OCI archive)
//! - [`DictOciRepository`]: an in-memory `digest -> DataRef` map
//!
//! Reads are not re-verified against their digest.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use ocipack_core::error::{PackError, Result};

use super::builder::BuiltOciRepository;
use super::data_ref::{DataRef, TarEntryRef};
use super::digest::{parse_digest, sha256_digest};
use crate::archive::{detect_compression, scan_members};

/// Name of the root index file of an image layout.
pub const INDEX_FILE_NAME: &str = "index.json";

/// Name of the image-layout marker file.
pub const OCI_LAYOUT_FILE_NAME: &str = "oci-layout";

/// Content of the image-layout marker file.
pub const OCI_LAYOUT_CONTENT: &str = r#"{"imageLayoutVersion":"1.0.0"}"#;

/// A read-only store of blobs addressed by `sha256:<hex>` digests.
pub trait OciRepository: Send + Sync {
    /// Cheap existence check.
    fn contains_blob(&self, digest: &str) -> bool;

    /// Reference a blob without copying its bytes.
    fn ref_blob(&self, digest: &str) -> Result<DataRef>;

    /// Read a blob into memory.
    fn read_blob(&self, digest: &str) -> Result<Vec<u8>> {
        self.ref_blob(digest)?.read_all()
    }
}

/// A repository backed by named files, blobs living at `blobs/<algo>/<hex>`.
pub trait FileOciRepository: OciRepository {
    fn contains_file(&self, name: &str) -> bool;

    fn ref_file(&self, name: &str) -> Result<DataRef>;

    fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        self.ref_file(name)?.read_all()
    }
}

/// Layout-relative file name of a blob.
pub fn blob_file_name(digest: &str) -> Result<String> {
    let (algo, hex) = parse_digest(digest)?;
    Ok(format!("blobs/{}/{}", algo, hex))
}

/// Open an image layout at `path`: a directory, or an uncompressed tar file.
pub fn open_repository(path: &Path) -> Result<Box<dyn FileOciRepository>> {
    let metadata = std::fs::metadata(path)
        .map_err(|_| PackError::NotFound(format!("Repository {}", path.display())))?;

    if metadata.is_dir() {
        let repo = DirectoryOciRepository::new(path)?;
        repo.validate_layout()?;
        Ok(Box::new(repo))
    } else if metadata.is_file() {
        let repo = TarFileOciRepository::open(path)?;
        if !repo.contains_file(INDEX_FILE_NAME) {
            return Err(PackError::NotFound(format!(
                "{} in {}",
                INDEX_FILE_NAME,
                path.display()
            )));
        }
        Ok(Box::new(repo))
    } else {
        Err(PackError::NotFound(format!(
            "Repository {} is neither a directory nor a file",
            path.display()
        )))
    }
}

// =============================================================================
// Directory
// =============================================================================

/// An OCI image layout directory.
#[derive(Debug, Clone)]
pub struct DirectoryOciRepository {
    root: PathBuf,
}

impl DirectoryOciRepository {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(PackError::NotFound(format!(
                "Repository directory {}",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Check that the directory looks like an image layout.
    ///
    /// `oci-layout` is optional since older `docker save` output omits it;
    /// `index.json` is the entry point and required.
    pub fn validate_layout(&self) -> Result<()> {
        if !self.root.join(INDEX_FILE_NAME).is_file() {
            return Err(PackError::NotFound(format!(
                "Not a valid OCI layout: missing {} in {}",
                INDEX_FILE_NAME,
                self.root.display()
            )));
        }

        if !self.root.join(OCI_LAYOUT_FILE_NAME).is_file() {
            tracing::debug!(root = %self.root.display(), "Image layout has no oci-layout marker");
        }

        Ok(())
    }

    /// Resolve a layout-relative name, refusing anything outside the root.
    fn resolve(&self, name: &str) -> Result<PathBuf> {
        let relative = Path::new(name);
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => {
                    return Err(PackError::InvalidPath(format!(
                        "{} escapes repository root {}",
                        name,
                        self.root.display()
                    )));
                }
            }
        }
        Ok(self.root.join(relative))
    }
}

impl OciRepository for DirectoryOciRepository {
    fn contains_blob(&self, digest: &str) -> bool {
        blob_file_name(digest)
            .map(|name| self.contains_file(&name))
            .unwrap_or(false)
    }

    fn ref_blob(&self, digest: &str) -> Result<DataRef> {
        let name = blob_file_name(digest)?;
        if !self.contains_file(&name) {
            return Err(PackError::NotFound(digest.to_string()));
        }
        self.ref_file(&name)
    }
}

impl FileOciRepository for DirectoryOciRepository {
    fn contains_file(&self, name: &str) -> bool {
        self.resolve(name).map(|p| p.is_file()).unwrap_or(false)
    }

    fn ref_file(&self, name: &str) -> Result<DataRef> {
        let path = self.resolve(name)?;
        if !path.is_file() {
            return Err(PackError::NotFound(format!(
                "{} in {}",
                name,
                self.root.display()
            )));
        }
        Ok(DataRef::File(path))
    }
}

// =============================================================================
// Tar file
// =============================================================================

/// An image layout stored inside an uncompressed tar archive.
///
/// Members are indexed once on open; blob refs share the open archive handle.
#[derive(Debug)]
pub struct TarFileOciRepository {
    path: PathBuf,
    archive: Arc<File>,
    members: HashMap<String, (u64, u64)>,
}

impl TarFileOciRepository {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = File::open(&path).map_err(|e| PackError::io_context(path.display(), e))?;

        if let Some(compression) = detect_compression(&file)? {
            return Err(PackError::UnsupportedFeature(format!(
                "{} compressed repository archive {}",
                compression,
                path.display()
            )));
        }

        let label = path.display().to_string();
        let members = scan_members(&file, &label)?
            .into_iter()
            .filter(|m| m.is_regular())
            .map(|m| (m.name, (m.data_offset, m.size)))
            .collect::<HashMap<_, _>>();

        tracing::debug!(
            archive = %path.display(),
            files = members.len(),
            "Indexed tar repository"
        );

        Ok(Self {
            path,
            archive: Arc::new(file),
            members,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OciRepository for TarFileOciRepository {
    fn contains_blob(&self, digest: &str) -> bool {
        blob_file_name(digest)
            .map(|name| self.contains_file(&name))
            .unwrap_or(false)
    }

    fn ref_blob(&self, digest: &str) -> Result<DataRef> {
        let name = blob_file_name(digest)?;
        if !self.contains_file(&name) {
            return Err(PackError::NotFound(digest.to_string()));
        }
        self.ref_file(&name)
    }
}

impl FileOciRepository for TarFileOciRepository {
    fn contains_file(&self, name: &str) -> bool {
        self.members.contains_key(name)
    }

    fn ref_file(&self, name: &str) -> Result<DataRef> {
        let (offset, size) = self.members.get(name).ok_or_else(|| {
            PackError::NotFound(format!("{} in {}", name, self.path.display()))
        })?;
        Ok(DataRef::TarEntry(TarEntryRef::new(
            self.archive.clone(),
            name,
            *offset,
            *size,
        )))
    }
}

// =============================================================================
// In-memory
// =============================================================================

/// An in-memory repository.
#[derive(Debug, Clone, Default)]
pub struct DictOciRepository {
    blobs: HashMap<String, DataRef>,
}

impl DictOciRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store bytes under their computed digest, returning the digest.
    pub fn insert_bytes(&mut self, data: impl Into<Vec<u8>>) -> String {
        let data = data.into();
        let digest = sha256_digest(&data);
        self.blobs.insert(digest.clone(), DataRef::from_bytes(data));
        digest
    }

    /// Drop a blob, returning whether it was present.
    pub fn remove(&mut self, digest: &str) -> bool {
        self.blobs.remove(digest).is_some()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl From<&BuiltOciRepository> for DictOciRepository {
    fn from(built: &BuiltOciRepository) -> Self {
        Self {
            blobs: built
                .blobs
                .iter()
                .map(|(digest, blob)| (digest.clone(), blob.data().clone()))
                .collect(),
        }
    }
}

impl OciRepository for DictOciRepository {
    fn contains_blob(&self, digest: &str) -> bool {
        self.blobs.contains_key(digest)
    }

    fn ref_blob(&self, digest: &str) -> Result<DataRef> {
        self.blobs
            .get(digest)
            .cloned()
            .ok_or_else(|| PackError::NotFound(digest.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;

    fn create_layout_dir(path: &Path, blobs: &[&[u8]]) -> Vec<String> {
        fs::create_dir_all(path.join("blobs/sha256")).unwrap();
        fs::write(path.join(OCI_LAYOUT_FILE_NAME), OCI_LAYOUT_CONTENT).unwrap();
        fs::write(path.join(INDEX_FILE_NAME), r#"{"schemaVersion":2,"manifests":[]}"#).unwrap();

        blobs
            .iter()
            .map(|data| {
                let digest = sha256_digest(data);
                fs::write(path.join(blob_file_name(&digest).unwrap()), data).unwrap();
                digest
            })
            .collect()
    }

    #[test]
    fn test_blob_file_name() {
        let digest = sha256_digest(b"x");
        let hex = digest.strip_prefix("sha256:").unwrap();
        assert_eq!(blob_file_name(&digest).unwrap(), format!("blobs/sha256/{}", hex));
        assert!(blob_file_name("sha256:../../etc").is_err());
    }

    // --- Directory ---

    #[test]
    fn test_directory_reads_blobs() {
        let tmp = TempDir::new().unwrap();
        let digests = create_layout_dir(tmp.path(), &[b"hello"]);
        let repo = DirectoryOciRepository::new(tmp.path()).unwrap();

        assert!(repo.contains_blob(&digests[0]));
        assert_eq!(repo.read_blob(&digests[0]).unwrap(), b"hello");
        assert!(matches!(
            repo.ref_blob(&digests[0]).unwrap(),
            DataRef::File(_)
        ));
    }

    #[test]
    fn test_directory_missing_blob_not_found() {
        let tmp = TempDir::new().unwrap();
        create_layout_dir(tmp.path(), &[]);
        let repo = DirectoryOciRepository::new(tmp.path()).unwrap();

        let digest = sha256_digest(b"absent");
        assert!(!repo.contains_blob(&digest));
        assert!(matches!(
            repo.read_blob(&digest),
            Err(PackError::NotFound(_))
        ));
    }

    #[test]
    fn test_directory_rejects_traversal() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("repo");
        create_layout_dir(&root, &[]);
        fs::write(tmp.path().join("secret"), "s3cret").unwrap();

        let repo = DirectoryOciRepository::new(&root).unwrap();
        assert!(!repo.contains_file("../secret"));
        assert!(matches!(
            repo.read_file("../secret"),
            Err(PackError::InvalidPath(_))
        ));
        assert!(matches!(
            repo.read_file("/etc/passwd"),
            Err(PackError::InvalidPath(_))
        ));
        assert!(!repo.contains_blob("sha256:../../secret"));
    }

    #[test]
    fn test_directory_reads_index_by_name() {
        let tmp = TempDir::new().unwrap();
        create_layout_dir(tmp.path(), &[]);
        let repo = DirectoryOciRepository::new(tmp.path()).unwrap();

        let index = repo.read_file(INDEX_FILE_NAME).unwrap();
        assert!(String::from_utf8(index).unwrap().contains("manifests"));
    }

    #[test]
    fn test_directory_validate_layout_requires_index() {
        let tmp = TempDir::new().unwrap();
        let repo = DirectoryOciRepository::new(tmp.path()).unwrap();
        let err = repo.validate_layout().unwrap_err();
        assert!(err.to_string().contains("index.json"));
    }

    // --- Tar file ---

    fn create_layout_tar(dir: &Path, tar_path: &Path) {
        let mut builder = tar::Builder::new(File::create(tar_path).unwrap());
        builder.append_dir_all(".", dir).unwrap();
        builder.into_inner().unwrap().flush().unwrap();
    }

    #[test]
    fn test_tar_file_reads_blobs_and_files() {
        let tmp = TempDir::new().unwrap();
        let layout = tmp.path().join("layout");
        let digests = create_layout_dir(&layout, &[b"first", b"second blob"]);
        let tar_path = tmp.path().join("image.tar");
        create_layout_tar(&layout, &tar_path);

        let repo = TarFileOciRepository::open(&tar_path).unwrap();
        assert!(repo.contains_file(INDEX_FILE_NAME));
        assert!(repo.contains_blob(&digests[1]));
        assert_eq!(repo.read_blob(&digests[0]).unwrap(), b"first");
        assert_eq!(repo.read_blob(&digests[1]).unwrap(), b"second blob");

        let data = repo.ref_blob(&digests[1]).unwrap();
        assert!(matches!(data, DataRef::TarEntry(_)));
        assert_eq!(data.size().unwrap(), 11);
    }

    #[test]
    fn test_tar_file_missing_blob_not_found() {
        let tmp = TempDir::new().unwrap();
        let layout = tmp.path().join("layout");
        create_layout_dir(&layout, &[]);
        let tar_path = tmp.path().join("image.tar");
        create_layout_tar(&layout, &tar_path);

        let repo = TarFileOciRepository::open(&tar_path).unwrap();
        assert!(matches!(
            repo.ref_blob(&sha256_digest(b"nope")),
            Err(PackError::NotFound(_))
        ));
    }

    #[test]
    fn test_tar_file_rejects_compressed_archive() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("image.tar.gz");
        let mut encoder = flate2::write::GzEncoder::new(
            File::create(&path).unwrap(),
            flate2::Compression::default(),
        );
        encoder.write_all(&[0u8; 1024]).unwrap();
        encoder.finish().unwrap();

        assert!(matches!(
            TarFileOciRepository::open(&path),
            Err(PackError::UnsupportedFeature(_))
        ));
    }

    // --- In-memory ---

    #[test]
    fn test_dict_repository() {
        let mut repo = DictOciRepository::new();
        let digest = repo.insert_bytes(b"hello".to_vec());

        assert_eq!(digest, sha256_digest(b"hello"));
        assert!(repo.contains_blob(&digest));
        assert_eq!(repo.read_blob(&digest).unwrap(), b"hello");

        assert!(repo.remove(&digest));
        assert!(repo.is_empty());
        assert!(matches!(repo.ref_blob(&digest), Err(PackError::NotFound(_))));
    }

    // --- open_repository ---

    #[test]
    fn test_open_repository_picks_backend() {
        let tmp = TempDir::new().unwrap();
        let layout = tmp.path().join("layout");
        create_layout_dir(&layout, &[]);
        let tar_path = tmp.path().join("image.tar");
        create_layout_tar(&layout, &tar_path);

        assert!(open_repository(&layout).unwrap().contains_file(INDEX_FILE_NAME));
        assert!(open_repository(&tar_path).unwrap().contains_file(INDEX_FILE_NAME));
        assert!(matches!(
            open_repository(&tmp.path().join("missing")),
            Err(PackError::NotFound(_))
        ));
    }
}
