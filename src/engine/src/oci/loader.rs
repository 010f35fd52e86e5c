//! Rehydration of a repository's wire objects into the editable image graph.

use ocipack_core::error::{PackError, Result};

use super::data::{
    OciImageConfig, OciImageIndex, OciImageIndexItem, OciImageLayer, OciImageLayerKind,
    OciImageManifest,
};
use super::media::{
    decode_media, MediaObject, OciMediaDescriptor, OciMediaImageIndex, OciMediaImageManifest,
};
use super::repository::{FileOciRepository, OciRepository, INDEX_FILE_NAME};

/// Reads wire objects out of a repository and resolves their descriptors.
pub struct OciRepositoryLoader<'a, R: OciRepository + ?Sized> {
    repo: &'a R,
}

impl<'a, R: OciRepository + ?Sized> OciRepositoryLoader<'a, R> {
    pub fn new(repo: &'a R) -> Self {
        Self { repo }
    }

    /// Fetch a blob and decode it according to the descriptor's media type.
    pub fn read_descriptor(&self, descriptor: &OciMediaDescriptor) -> Result<MediaObject> {
        let bytes = self.repo.read_blob(&descriptor.digest)?;
        decode_media(&descriptor.media_type, &bytes)
    }

    /// Rehydrate an index.
    ///
    /// Children whose blob is absent are dropped, and child indexes left
    /// empty by that are pruned. The index itself is returned even if empty.
    pub fn from_media_index(&self, media: &OciMediaImageIndex) -> Result<OciImageIndex> {
        let mut manifests = Vec::with_capacity(media.manifests.len());

        for descriptor in &media.manifests {
            if !self.repo.contains_blob(&descriptor.digest) {
                tracing::warn!(
                    digest = %descriptor.digest,
                    media_type = %descriptor.media_type,
                    "Dropping index entry with missing blob"
                );
                continue;
            }

            match self.read_descriptor(descriptor)? {
                MediaObject::Index(child) => {
                    let child = self.from_media_index(&child)?;
                    if child.manifests.is_empty() {
                        tracing::debug!(digest = %descriptor.digest, "Pruned empty index");
                        continue;
                    }
                    manifests.push(OciImageIndexItem::Index(child));
                }
                MediaObject::Manifest(manifest) => {
                    let mut manifest = self.from_media_manifest(&manifest)?;
                    manifest.platform = descriptor.platform.clone();
                    manifests.push(OciImageIndexItem::Manifest(manifest));
                }
                MediaObject::Config(_) => {
                    return Err(PackError::UnsupportedMediaType(format!(
                        "{} listed in an image index",
                        descriptor.media_type
                    )));
                }
            }
        }

        Ok(OciImageIndex {
            manifests,
            annotations: media.annotations.clone(),
        })
    }

    /// Rehydrate a manifest, resolving its config and layers.
    pub fn from_media_manifest(&self, media: &OciMediaImageManifest) -> Result<OciImageManifest> {
        let config = match self.read_descriptor(&media.config)? {
            MediaObject::Config(config) => OciImageConfig::from(config),
            _ => {
                return Err(PackError::UnsupportedMediaType(format!(
                    "{} used as image config",
                    media.config.media_type
                )));
            }
        };

        let layers = media
            .layers
            .iter()
            .map(|descriptor| self.load_layer(descriptor))
            .collect::<Result<Vec<_>>>()?;

        if config.rootfs.diff_ids.len() != layers.len() {
            tracing::warn!(
                diff_ids = config.rootfs.diff_ids.len(),
                layers = layers.len(),
                "Image config diff_ids do not match manifest layers"
            );
        }

        Ok(OciImageManifest {
            config,
            layers,
            annotations: media.annotations.clone(),
            platform: None,
        })
    }

    fn load_layer(&self, descriptor: &OciMediaDescriptor) -> Result<OciImageLayer> {
        let kind = OciImageLayerKind::from_media_type(&descriptor.media_type)
            .ok_or_else(|| PackError::UnsupportedMediaType(descriptor.media_type.clone()))?;

        Ok(OciImageLayer {
            kind,
            data: self.repo.ref_blob(&descriptor.digest)?,
        })
    }
}

/// Read `index.json`, the entry point of an image layout.
pub fn read_root_index<R: FileOciRepository + ?Sized>(repo: &R) -> Result<OciMediaImageIndex> {
    let bytes = repo.read_file(INDEX_FILE_NAME)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Read and rehydrate the root index of an image layout.
pub fn load_root_index<R: FileOciRepository + ?Sized>(repo: &R) -> Result<OciImageIndex> {
    let media = read_root_index(repo)?;
    let index = OciRepositoryLoader::new(repo).from_media_index(&media)?;

    tracing::debug!(manifests = index.manifests.len(), "Loaded root index");

    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::builder::build_oci_index_repository;
    use crate::oci::data::OciImageRootFs;
    use crate::oci::data_ref::DataRef;
    use crate::oci::media::{MEDIA_TYPE_IMAGE_INDEX, MEDIA_TYPE_IMAGE_MANIFEST};
    use crate::oci::repository::{DictOciRepository, DirectoryOciRepository};
    use tempfile::TempDir;

    fn manifest(layers: &[&[u8]], author: &str) -> OciImageManifest {
        OciImageManifest {
            config: OciImageConfig {
                architecture: "amd64".to_string(),
                os: "linux".to_string(),
                rootfs: OciImageRootFs {
                    type_: "layers".to_string(),
                    diff_ids: layers
                        .iter()
                        .map(|l| crate::oci::digest::sha256_digest(l))
                        .collect(),
                },
                created: Some("2024-01-01T00:00:00Z".to_string()),
                author: Some(author.to_string()),
                os_version: None,
                os_features: None,
                variant: None,
                config: Some(serde_json::json!({"Cmd": ["/bin/sh"]})),
                history: Some(vec![serde_json::json!({"created_by": "ADD"})]),
            },
            layers: layers
                .iter()
                .enumerate()
                .map(|(i, l)| OciImageLayer {
                    kind: if i % 2 == 0 {
                        OciImageLayerKind::Tar
                    } else {
                        OciImageLayerKind::TarGzip
                    },
                    data: DataRef::from_bytes(l.to_vec()),
                })
                .collect(),
            annotations: None,
            platform: None,
        }
    }

    #[test]
    fn test_round_trip_through_dict_repository() {
        let original = OciImageIndex {
            manifests: vec![
                OciImageIndexItem::Index(OciImageIndex {
                    manifests: vec![OciImageIndexItem::Manifest(manifest(
                        &[b"base", b"top"],
                        "nested",
                    ))],
                    annotations: None,
                }),
                OciImageIndexItem::Manifest(manifest(&[b"other"], "direct")),
            ],
            annotations: Some(
                [("org.opencontainers.image.ref.name".to_string(), "latest".to_string())]
                    .into_iter()
                    .collect(),
            ),
        };

        let built = build_oci_index_repository(&original).unwrap();
        let repo = DictOciRepository::from(&built);
        let root = match OciRepositoryLoader::new(&repo)
            .read_descriptor(&built.media_index_descriptor)
            .unwrap()
        {
            MediaObject::Index(index) => index,
            other => panic!("expected index, got {:?}", other),
        };

        let loaded = OciRepositoryLoader::new(&repo).from_media_index(&root).unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_round_trip_through_layout_directory() {
        let tmp = TempDir::new().unwrap();
        let original = OciImageIndex {
            manifests: vec![OciImageIndexItem::Manifest(manifest(&[b"only"], "dir"))],
            annotations: None,
        };
        build_oci_index_repository(&original)
            .unwrap()
            .write_layout(tmp.path())
            .unwrap();

        let repo = DirectoryOciRepository::new(tmp.path()).unwrap();
        let loaded = load_root_index(&repo).unwrap();

        let manifest = loaded.single_manifest().unwrap();
        assert_eq!(manifest.config.author.as_deref(), Some("dir"));
        assert_eq!(manifest.layers.len(), 1);
        assert_eq!(manifest.layers[0].data.read_all().unwrap(), b"only");
    }

    #[test]
    fn test_missing_manifest_dropped_and_empty_index_pruned() {
        let original = OciImageIndex {
            manifests: vec![
                OciImageIndexItem::Index(OciImageIndex {
                    manifests: vec![OciImageIndexItem::Manifest(manifest(&[b"gone"], "gone"))],
                    annotations: None,
                }),
                OciImageIndexItem::Manifest(manifest(&[b"kept"], "kept")),
            ],
            annotations: None,
        };
        let built = build_oci_index_repository(&original).unwrap();

        let root_bytes = built.root_index_blob().unwrap().data().read_all().unwrap();
        let root: OciMediaImageIndex = serde_json::from_slice(&root_bytes).unwrap();
        let child_index_bytes = built.blobs[&root.manifests[0].digest].data().read_all().unwrap();
        let child_index: OciMediaImageIndex = serde_json::from_slice(&child_index_bytes).unwrap();

        // Remove the nested manifest blob only
        let mut repo = DictOciRepository::from(&built);
        assert!(repo.remove(&child_index.manifests[0].digest));

        let loaded = OciRepositoryLoader::new(&repo).from_media_index(&root).unwrap();
        assert_eq!(loaded.manifests.len(), 1);
        assert_eq!(
            loaded.single_manifest().unwrap().config.author.as_deref(),
            Some("kept")
        );
    }

    #[test]
    fn test_missing_layer_blob_is_not_found() {
        let original = OciImageIndex {
            manifests: vec![OciImageIndexItem::Manifest(manifest(&[b"layer"], "x"))],
            annotations: None,
        };
        let built = build_oci_index_repository(&original).unwrap();
        let mut repo = DictOciRepository::from(&built);
        repo.remove(&crate::oci::digest::sha256_digest(b"layer"));

        let root_bytes = built.root_index_blob().unwrap().data().read_all().unwrap();
        let root: OciMediaImageIndex = serde_json::from_slice(&root_bytes).unwrap();
        let err = OciRepositoryLoader::new(&repo).from_media_index(&root).unwrap_err();
        assert!(matches!(err, PackError::NotFound(_)));
    }

    #[test]
    fn test_unknown_layer_media_type() {
        let mut repo = DictOciRepository::new();
        let config = repo.insert_bytes(
            br#"{"architecture":"amd64","os":"linux","rootfs":{"type":"layers","diff_ids":[]}}"#
                .to_vec(),
        );
        let layer = repo.insert_bytes(b"{}".to_vec());
        let manifest = format!(
            r#"{{"schemaVersion":2,"mediaType":"{}","config":{{"mediaType":"application/vnd.oci.image.config.v1+json","digest":"{}","size":10}},"layers":[{{"mediaType":"application/vnd.in-toto+json","digest":"{}","size":2}}]}}"#,
            MEDIA_TYPE_IMAGE_MANIFEST, config, layer
        );
        let manifest = repo.insert_bytes(manifest.into_bytes());

        let mut root = OciMediaImageIndex::new(vec![], None);
        root.manifests.push(OciMediaDescriptor::new(
            MEDIA_TYPE_IMAGE_MANIFEST,
            manifest,
            0,
        ));
        let err = OciRepositoryLoader::new(&repo).from_media_index(&root).unwrap_err();
        assert!(matches!(err, PackError::UnsupportedMediaType(_)));
        assert_eq!(root.media_type, MEDIA_TYPE_IMAGE_INDEX);
    }
}
