//! Route descriptions for serving a built repository over the registry API.
//!
//! Only the `(paths, target)` table is produced here; serving it is left to
//! whatever HTTP layer embeds the engine.

use ocipack_core::error::Result;

use super::builder::BuiltOciRepository;
use super::data_ref::DataRef;
use super::media::{is_manifest_media_type, MEDIA_TYPE_OCTET_STREAM};

/// What a route serves.
#[derive(Debug, Clone, PartialEq)]
pub struct DataServerTarget {
    pub content_type: String,
    pub content_length: u64,
    pub data: DataRef,
}

/// One or more request paths mapped to the same content.
#[derive(Debug, Clone, PartialEq)]
pub struct DataServerRoute {
    pub paths: Vec<String>,
    pub target: DataServerTarget,
}

/// Build the route table for repository `repo_name`.
///
/// The root index is served at `manifests/latest`; index and manifest blobs
/// under `manifests/<digest>`, all other blobs under `blobs/<digest>`.
pub fn build_data_server_routes(
    repo_name: &str,
    built: &BuiltOciRepository,
) -> Result<Vec<DataServerRoute>> {
    let base = format!("/v2/{}", repo_name.trim_matches('/'));
    let mut routes = Vec::with_capacity(built.blobs.len() + 1);

    for (digest, blob) in &built.blobs {
        let content_type = blob.media_type().unwrap_or(MEDIA_TYPE_OCTET_STREAM);
        let kind = if is_manifest_media_type(content_type) {
            "manifests"
        } else {
            "blobs"
        };

        routes.push(DataServerRoute {
            paths: vec![format!("{}/{}/{}", base, kind, digest)],
            target: DataServerTarget {
                content_type: content_type.to_string(),
                content_length: blob.size()?,
                data: blob.data().clone(),
            },
        });
    }

    let root = built.root_index_blob()?;
    routes.push(DataServerRoute {
        paths: vec![format!("{}/manifests/latest", base)],
        target: DataServerTarget {
            content_type: built.media_index_descriptor.media_type.clone(),
            content_length: root.size()?,
            data: root.data().clone(),
        },
    });

    routes.sort_by(|a, b| a.paths.cmp(&b.paths));

    tracing::debug!(repo = %repo_name, routes = routes.len(), "Built data server routes");

    Ok(routes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::builder::build_oci_index_repository;
    use crate::oci::data::{
        OciImageConfig, OciImageIndex, OciImageIndexItem, OciImageLayer, OciImageLayerKind,
        OciImageManifest, OciImageRootFs,
    };
    use crate::oci::media::{MEDIA_TYPE_IMAGE_INDEX, MEDIA_TYPE_LAYER_TAR_GZIP};

    fn built() -> BuiltOciRepository {
        let index = OciImageIndex {
            manifests: vec![OciImageIndexItem::Manifest(OciImageManifest {
                config: OciImageConfig {
                    architecture: "amd64".to_string(),
                    os: "linux".to_string(),
                    rootfs: OciImageRootFs {
                        type_: "layers".to_string(),
                        diff_ids: vec!["sha256:00".to_string()],
                    },
                    created: None,
                    author: None,
                    os_version: None,
                    os_features: None,
                    variant: None,
                    config: None,
                    history: None,
                },
                layers: vec![OciImageLayer {
                    kind: OciImageLayerKind::TarGzip,
                    data: DataRef::from_bytes(b"layer".to_vec()),
                }],
                annotations: None,
                platform: None,
            })],
            annotations: None,
        };
        build_oci_index_repository(&index).unwrap()
    }

    #[test]
    fn test_routes_cover_every_blob_and_latest() {
        let built = built();
        let routes = build_data_server_routes("app", &built).unwrap();
        assert_eq!(routes.len(), built.blobs.len() + 1);

        let paths: Vec<&str> = routes.iter().map(|r| r.paths[0].as_str()).collect();
        let mut sorted = paths.clone();
        sorted.sort();
        assert_eq!(paths, sorted);

        let latest = routes
            .iter()
            .find(|r| r.paths[0] == "/v2/app/manifests/latest")
            .unwrap();
        assert_eq!(latest.target.content_type, MEDIA_TYPE_IMAGE_INDEX);
        assert_eq!(latest.target.content_length, built.media_index_descriptor.size);
    }

    #[test]
    fn test_route_kind_follows_media_type() {
        let built = built();
        let routes = build_data_server_routes("/app/", &built).unwrap();

        for route in &routes {
            let path = &route.paths[0];
            if route.target.content_type == MEDIA_TYPE_LAYER_TAR_GZIP {
                assert!(path.starts_with("/v2/app/blobs/sha256:"));
                assert_eq!(route.target.data.read_all().unwrap(), b"layer");
            } else if is_manifest_media_type(&route.target.content_type) {
                assert!(path.starts_with("/v2/app/manifests/"));
            } else {
                assert!(path.starts_with("/v2/app/blobs/"));
            }
        }
    }
}
