//! Content-addressing of an image graph into a set of blobs.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use ocipack_core::error::{PackError, Result};

use super::data::{OciImageIndex, OciImageIndexItem, OciImageLayer, OciImageManifest};
use super::data_ref::{DataRef, DataRefInfo};
use super::media::{
    MediaObject, OciMediaDescriptor, OciMediaImageConfig, OciMediaImageIndex,
    OciMediaImageManifest, MEDIA_TYPE_OCTET_STREAM,
};
use super::repository::{blob_file_name, INDEX_FILE_NAME, OCI_LAYOUT_CONTENT, OCI_LAYOUT_FILE_NAME};

/// A content-addressed unit of a built repository.
#[derive(Debug, Clone)]
pub struct Blob {
    digest: String,
    info: DataRefInfo,
    media_type: Option<String>,
}

impl Blob {
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn data(&self) -> &DataRef {
        self.info.data()
    }

    pub fn info(&self) -> &DataRefInfo {
        &self.info
    }

    pub fn media_type(&self) -> Option<&str> {
        self.media_type.as_deref()
    }

    pub fn size(&self) -> Result<u64> {
        self.info.size()
    }

    /// Descriptor pointing at this blob.
    pub fn descriptor(&self) -> Result<OciMediaDescriptor> {
        Ok(OciMediaDescriptor::new(
            self.media_type.as_deref().unwrap_or(MEDIA_TYPE_OCTET_STREAM),
            self.digest.clone(),
            self.size()?,
        ))
    }
}

/// Output of [`OciRepositoryBuilder`].
#[derive(Debug, Clone)]
pub struct BuiltOciRepository {
    /// Every blob, keyed by digest
    pub blobs: BTreeMap<String, Blob>,
    /// Descriptor of the root index; its digest is the entry point
    pub media_index_descriptor: OciMediaDescriptor,
}

impl BuiltOciRepository {
    /// The root index blob.
    pub fn root_index_blob(&self) -> Result<&Blob> {
        self.blobs
            .get(&self.media_index_descriptor.digest)
            .ok_or_else(|| PackError::NotFound(self.media_index_descriptor.digest.clone()))
    }

    /// Write the repository as an OCI image layout directory.
    ///
    /// Blob files already present under `dir` are left untouched.
    pub fn write_layout(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).map_err(|e| PackError::io_context(dir.display(), e))?;

        fs::write(dir.join(OCI_LAYOUT_FILE_NAME), OCI_LAYOUT_CONTENT)
            .map_err(|e| PackError::io_context(dir.join(OCI_LAYOUT_FILE_NAME).display(), e))?;

        let mut written = 0usize;
        for (digest, blob) in &self.blobs {
            let path = dir.join(blob_file_name(digest)?);
            if path.exists() {
                continue;
            }
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .map_err(|e| PackError::io_context(parent.display(), e))?;
            }

            let file = File::create(&path).map_err(|e| PackError::io_context(path.display(), e))?;
            let mut out = BufWriter::new(file);
            io::copy(&mut blob.data().open()?, &mut out)
                .map_err(|e| PackError::io_context(path.display(), e))?;
            out.flush()
                .map_err(|e| PackError::io_context(path.display(), e))?;
            written += 1;
        }

        let index = self.root_index_blob()?.data().read_all()?;
        fs::write(dir.join(INDEX_FILE_NAME), index)
            .map_err(|e| PackError::io_context(dir.join(INDEX_FILE_NAME).display(), e))?;

        tracing::debug!(
            dir = %dir.display(),
            blobs = self.blobs.len(),
            written,
            "Wrote OCI image layout"
        );

        Ok(())
    }
}

/// Accumulates blobs while converting an image graph to its wire form.
///
/// Children are always registered before the parent that points at them.
#[derive(Debug, Default)]
pub struct OciRepositoryBuilder {
    blobs: BTreeMap<String, Blob>,
}

impl OciRepositoryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a blob under the digest of its data.
    ///
    /// Registering a digest twice is an error.
    pub fn add_blob(&mut self, info: DataRefInfo, media_type: Option<&str>) -> Result<&Blob> {
        let digest = info.digest()?.to_string();
        if self.blobs.contains_key(&digest) {
            return Err(PackError::DuplicateBlob(digest));
        }

        tracing::debug!(
            digest = %digest,
            media_type = media_type.unwrap_or(MEDIA_TYPE_OCTET_STREAM),
            "Registered blob"
        );

        let blob = Blob {
            digest: digest.clone(),
            info,
            media_type: media_type.map(str::to_string),
        };
        Ok(self.blobs.entry(digest).or_insert(blob))
    }

    /// Serialize a media object and register it as a blob.
    pub fn add_media(&mut self, media: &MediaObject) -> Result<OciMediaDescriptor> {
        let bytes = media.to_json_bytes()?;
        let info = DataRefInfo::new(DataRef::from_bytes(bytes));
        self.add_blob(info, Some(media.media_type()))?.descriptor()
    }

    /// Register a layer's bytes directly; layers have no JSON wrapper.
    pub fn add_layer(&mut self, layer: &OciImageLayer) -> Result<OciMediaDescriptor> {
        let info = DataRefInfo::new(layer.data.clone());
        self.add_blob(info, Some(layer.kind.media_type()))?.descriptor()
    }

    /// Convert a manifest, registering its config and layers.
    pub fn to_media_manifest(&mut self, manifest: &OciImageManifest) -> Result<OciMediaImageManifest> {
        let config = self.add_media(&MediaObject::Config(OciMediaImageConfig::from(
            &manifest.config,
        )))?;

        let layers = manifest
            .layers
            .iter()
            .map(|layer| self.add_layer(layer))
            .collect::<Result<Vec<_>>>()?;

        Ok(OciMediaImageManifest::new(
            config,
            layers,
            manifest.annotations.clone(),
        ))
    }

    /// Convert an index, registering every child index and manifest.
    pub fn to_media_index(&mut self, index: &OciImageIndex) -> Result<OciMediaImageIndex> {
        let mut manifests = Vec::with_capacity(index.manifests.len());

        for item in &index.manifests {
            let descriptor = match item {
                OciImageIndexItem::Index(child) => {
                    let media = self.to_media_index(child)?;
                    self.add_media(&MediaObject::Index(media))?
                }
                OciImageIndexItem::Manifest(manifest) => {
                    let media = self.to_media_manifest(manifest)?;
                    let mut descriptor = self.add_media(&MediaObject::Manifest(media))?;
                    descriptor.platform = manifest.platform.clone();
                    descriptor
                }
            };
            manifests.push(descriptor);
        }

        Ok(OciMediaImageIndex::new(manifests, index.annotations.clone()))
    }

    /// Content-address a whole index tree.
    pub fn build_index_repository(mut self, index: &OciImageIndex) -> Result<BuiltOciRepository> {
        let media = self.to_media_index(index)?;
        let media_index_descriptor = self.add_media(&MediaObject::Index(media))?;

        tracing::debug!(
            root = %media_index_descriptor.digest,
            blobs = self.blobs.len(),
            "Built OCI repository"
        );

        Ok(BuiltOciRepository {
            blobs: self.blobs,
            media_index_descriptor,
        })
    }
}

/// Content-address `index` with a fresh builder.
pub fn build_oci_index_repository(index: &OciImageIndex) -> Result<BuiltOciRepository> {
    OciRepositoryBuilder::new().build_index_repository(index)
}
