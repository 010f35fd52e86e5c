//! Dereferenced, editable image graph.
//!
//! Where the media model holds descriptors, this model holds the objects
//! they point at: an index owns its child indexes and manifests, a manifest
//! owns its config and layers, and a layer owns a [`DataRef`] to its bytes.

use std::collections::BTreeMap;

use oci_spec::image::Platform;
use ocipack_core::config::OciCompression;
use ocipack_core::error::{PackError, Result};
use serde_json::Value;

use super::data_ref::DataRef;
use super::media::{
    OciMediaImageConfig, OciMediaRootFs, DOCKER_MEDIA_TYPE_LAYER_TAR,
    DOCKER_MEDIA_TYPE_LAYER_TAR_GZIP, MEDIA_TYPE_IMAGE_CONFIG, MEDIA_TYPE_LAYER_TAR,
    MEDIA_TYPE_LAYER_TAR_GZIP, MEDIA_TYPE_LAYER_TAR_ZSTD, SCHEMA_VERSION,
};

/// Tar encoding of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OciImageLayerKind {
    Tar,
    TarGzip,
    TarZstd,
}

impl OciImageLayerKind {
    pub fn media_type(&self) -> &'static str {
        match self {
            OciImageLayerKind::Tar => MEDIA_TYPE_LAYER_TAR,
            OciImageLayerKind::TarGzip => MEDIA_TYPE_LAYER_TAR_GZIP,
            OciImageLayerKind::TarZstd => MEDIA_TYPE_LAYER_TAR_ZSTD,
        }
    }

    /// Map a layer media type, accepting the Docker rootfs aliases.
    pub fn from_media_type(media_type: &str) -> Option<Self> {
        match media_type {
            MEDIA_TYPE_LAYER_TAR | DOCKER_MEDIA_TYPE_LAYER_TAR => Some(OciImageLayerKind::Tar),
            MEDIA_TYPE_LAYER_TAR_GZIP | DOCKER_MEDIA_TYPE_LAYER_TAR_GZIP => {
                Some(OciImageLayerKind::TarGzip)
            }
            MEDIA_TYPE_LAYER_TAR_ZSTD => Some(OciImageLayerKind::TarZstd),
            _ => None,
        }
    }

    pub fn from_compression(compression: Option<OciCompression>) -> Self {
        match compression {
            None => OciImageLayerKind::Tar,
            Some(OciCompression::Gzip) => OciImageLayerKind::TarGzip,
            Some(OciCompression::Zstd) => OciImageLayerKind::TarZstd,
        }
    }

    pub fn compression(&self) -> Option<OciCompression> {
        match self {
            OciImageLayerKind::Tar => None,
            OciImageLayerKind::TarGzip => Some(OciCompression::Gzip),
            OciImageLayerKind::TarZstd => Some(OciCompression::Zstd),
        }
    }
}

/// One filesystem diff.
#[derive(Debug, Clone, PartialEq)]
pub struct OciImageLayer {
    pub kind: OciImageLayerKind,
    pub data: DataRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OciImageRootFs {
    pub type_: String,
    /// Digests of the uncompressed layer tars, bottom first
    pub diff_ids: Vec<String>,
}

/// Image configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct OciImageConfig {
    pub architecture: String,
    pub os: String,
    pub rootfs: OciImageRootFs,
    pub created: Option<String>,
    pub author: Option<String>,
    pub os_version: Option<String>,
    pub os_features: Option<Vec<String>>,
    pub variant: Option<String>,
    pub config: Option<Value>,
    pub history: Option<Vec<Value>>,
}

impl From<OciMediaImageConfig> for OciImageConfig {
    fn from(media: OciMediaImageConfig) -> Self {
        Self {
            architecture: media.architecture,
            os: media.os,
            rootfs: OciImageRootFs {
                type_: media.rootfs.type_,
                diff_ids: media.rootfs.diff_ids,
            },
            created: media.created,
            author: media.author,
            os_version: media.os_version,
            os_features: media.os_features,
            variant: media.variant,
            config: media.config,
            history: media.history,
        }
    }
}

impl From<&OciImageConfig> for OciMediaImageConfig {
    fn from(config: &OciImageConfig) -> Self {
        Self {
            media_type: MEDIA_TYPE_IMAGE_CONFIG.to_string(),
            schema_version: SCHEMA_VERSION,
            architecture: config.architecture.clone(),
            os: config.os.clone(),
            rootfs: OciMediaRootFs {
                type_: config.rootfs.type_.clone(),
                diff_ids: config.rootfs.diff_ids.clone(),
            },
            created: config.created.clone(),
            author: config.author.clone(),
            os_version: config.os_version.clone(),
            os_features: config.os_features.clone(),
            variant: config.variant.clone(),
            config: config.config.clone(),
            history: config.history.clone(),
        }
    }
}

/// An image manifest with its config and layers resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct OciImageManifest {
    pub config: OciImageConfig,
    pub layers: Vec<OciImageLayer>,
    pub annotations: Option<BTreeMap<String, String>>,
    /// Platform recorded on the descriptor that referenced this manifest
    pub platform: Option<Platform>,
}

/// A child of an image index.
#[derive(Debug, Clone, PartialEq)]
pub enum OciImageIndexItem {
    Index(OciImageIndex),
    Manifest(OciImageManifest),
}

/// An image index tree.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OciImageIndex {
    pub manifests: Vec<OciImageIndexItem>,
    pub annotations: Option<BTreeMap<String, String>>,
}

fn cardinality(found: usize) -> PackError {
    PackError::Cardinality {
        expected: "manifest".to_string(),
        found,
    }
}

impl OciImageIndex {
    /// Descend through single-child indexes to the index that directly holds
    /// exactly one manifest.
    pub fn resolve_single_leaf_index(&self) -> Result<&OciImageIndex> {
        match self.manifests.as_slice() {
            [OciImageIndexItem::Manifest(_)] => Ok(self),
            [OciImageIndexItem::Index(child)] => child.resolve_single_leaf_index(),
            items => Err(cardinality(items.len())),
        }
    }

    pub fn resolve_single_leaf_index_mut(&mut self) -> Result<&mut OciImageIndex> {
        if matches!(self.manifests.as_slice(), [OciImageIndexItem::Manifest(_)]) {
            return Ok(self);
        }
        match self.manifests.as_mut_slice() {
            [OciImageIndexItem::Index(child)] => child.resolve_single_leaf_index_mut(),
            items => Err(cardinality(items.len())),
        }
    }

    /// The one manifest of a single-leaf index tree.
    pub fn single_manifest(&self) -> Result<&OciImageManifest> {
        match self.resolve_single_leaf_index()?.manifests.first() {
            Some(OciImageIndexItem::Manifest(manifest)) => Ok(manifest),
            _ => Err(cardinality(0)),
        }
    }

    pub fn single_manifest_mut(&mut self) -> Result<&mut OciImageManifest> {
        match self.resolve_single_leaf_index_mut()?.manifests.first_mut() {
            Some(OciImageIndexItem::Manifest(manifest)) => Ok(manifest),
            _ => Err(cardinality(0)),
        }
    }
}
