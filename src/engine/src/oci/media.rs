//! OCI wire-format objects and media-type dispatch.
//!
//! These structs mirror the JSON shapes of the OCI image spec. Serialization
//! is compact and deterministic: struct fields are emitted in declaration
//! order and every map is a `BTreeMap` (or a `serde_json::Value` object, which
//! keeps its keys sorted).

use std::collections::BTreeMap;

use oci_spec::image::Platform;
use ocipack_core::error::{PackError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const SCHEMA_VERSION: u32 = 2;

pub const MEDIA_TYPE_IMAGE_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const MEDIA_TYPE_IMAGE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_TYPE_IMAGE_CONFIG: &str = "application/vnd.oci.image.config.v1+json";

pub const MEDIA_TYPE_LAYER_TAR: &str = "application/vnd.oci.image.layer.v1.tar";
pub const MEDIA_TYPE_LAYER_TAR_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
pub const MEDIA_TYPE_LAYER_TAR_ZSTD: &str = "application/vnd.oci.image.layer.v1.tar+zstd";

pub const DOCKER_MEDIA_TYPE_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
pub const DOCKER_MEDIA_TYPE_MANIFEST: &str =
    "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_MEDIA_TYPE_CONFIG: &str = "application/vnd.docker.container.image.v1+json";
pub const DOCKER_MEDIA_TYPE_LAYER_TAR: &str = "application/vnd.docker.image.rootfs.diff.tar";
pub const DOCKER_MEDIA_TYPE_LAYER_TAR_GZIP: &str =
    "application/vnd.docker.image.rootfs.diff.tar.gzip";

/// Content type for blobs registered without a media type.
pub const MEDIA_TYPE_OCTET_STREAM: &str = "application/octet-stream";

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

fn default_index_media_type() -> String {
    MEDIA_TYPE_IMAGE_INDEX.to_string()
}

fn default_manifest_media_type() -> String {
    MEDIA_TYPE_IMAGE_MANIFEST.to_string()
}

fn default_config_media_type() -> String {
    MEDIA_TYPE_IMAGE_CONFIG.to_string()
}

/// A pointer to a blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciMediaDescriptor {
    pub media_type: String,
    pub digest: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urls: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
    /// Base64 of the embedded blob content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

impl OciMediaDescriptor {
    pub fn new(media_type: impl Into<String>, digest: impl Into<String>, size: u64) -> Self {
        Self {
            media_type: media_type.into(),
            digest: digest.into(),
            size,
            urls: None,
            annotations: None,
            data: None,
            artifact_type: None,
            platform: None,
        }
    }
}

/// `application/vnd.oci.image.index.v1+json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciMediaImageIndex {
    #[serde(default = "default_index_media_type")]
    pub media_type: String,
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub manifests: Vec<OciMediaDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl OciMediaImageIndex {
    pub fn new(
        manifests: Vec<OciMediaDescriptor>,
        annotations: Option<BTreeMap<String, String>>,
    ) -> Self {
        Self {
            media_type: default_index_media_type(),
            schema_version: SCHEMA_VERSION,
            manifests,
            annotations,
        }
    }
}

/// `application/vnd.oci.image.manifest.v1+json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciMediaImageManifest {
    #[serde(default = "default_manifest_media_type")]
    pub media_type: String,
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub config: OciMediaDescriptor,
    pub layers: Vec<OciMediaDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl OciMediaImageManifest {
    pub fn new(
        config: OciMediaDescriptor,
        layers: Vec<OciMediaDescriptor>,
        annotations: Option<BTreeMap<String, String>>,
    ) -> Self {
        Self {
            media_type: default_manifest_media_type(),
            schema_version: SCHEMA_VERSION,
            config,
            layers,
            annotations,
        }
    }
}

/// Root filesystem section of an image config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OciMediaRootFs {
    #[serde(rename = "type")]
    pub type_: String,
    pub diff_ids: Vec<String>,
}

/// `application/vnd.oci.image.config.v1+json`
///
/// `mediaType` and `schemaVersion` are written for symmetry with the other
/// objects and defaulted when absent, as they are in every real config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciMediaImageConfig {
    #[serde(default = "default_config_media_type")]
    pub media_type: String,
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub architecture: String,
    pub os: String,
    pub rootfs: OciMediaRootFs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(rename = "os.version", default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(rename = "os.features", default, skip_serializing_if = "Option::is_none")]
    pub os_features: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    /// Execution parameters, kept opaque
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<Value>>,
}

/// Any decoded media object.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaObject {
    Index(OciMediaImageIndex),
    Manifest(OciMediaImageManifest),
    Config(OciMediaImageConfig),
}

impl MediaObject {
    /// Media type the object is registered under when written.
    pub fn media_type(&self) -> &'static str {
        match self {
            MediaObject::Index(_) => MEDIA_TYPE_IMAGE_INDEX,
            MediaObject::Manifest(_) => MEDIA_TYPE_IMAGE_MANIFEST,
            MediaObject::Config(_) => MEDIA_TYPE_IMAGE_CONFIG,
        }
    }

    /// Compact JSON encoding.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        let bytes = match self {
            MediaObject::Index(index) => serde_json::to_vec(index)?,
            MediaObject::Manifest(manifest) => serde_json::to_vec(manifest)?,
            MediaObject::Config(config) => serde_json::to_vec(config)?,
        };
        Ok(bytes)
    }
}

type DecodeFn = fn(&[u8]) -> Result<MediaObject>;

fn decode_index(bytes: &[u8]) -> Result<MediaObject> {
    Ok(MediaObject::Index(serde_json::from_slice(bytes)?))
}

fn decode_manifest(bytes: &[u8]) -> Result<MediaObject> {
    Ok(MediaObject::Manifest(serde_json::from_slice(bytes)?))
}

fn decode_config(bytes: &[u8]) -> Result<MediaObject> {
    Ok(MediaObject::Config(serde_json::from_slice(bytes)?))
}

/// Media types that decode into a [`MediaObject`], queried by exact match.
static MEDIA_DECODERS: &[(&str, DecodeFn)] = &[
    (MEDIA_TYPE_IMAGE_INDEX, decode_index),
    (MEDIA_TYPE_IMAGE_MANIFEST, decode_manifest),
    (MEDIA_TYPE_IMAGE_CONFIG, decode_config),
    (DOCKER_MEDIA_TYPE_MANIFEST_LIST, decode_index),
    (DOCKER_MEDIA_TYPE_MANIFEST, decode_manifest),
    (DOCKER_MEDIA_TYPE_CONFIG, decode_config),
];

fn find_decoder(media_type: &str) -> Option<DecodeFn> {
    MEDIA_DECODERS
        .iter()
        .find(|(registered, _)| *registered == media_type)
        .map(|(_, decode)| *decode)
}

/// Decode blob bytes according to their media type.
pub fn decode_media(media_type: &str, bytes: &[u8]) -> Result<MediaObject> {
    let decode = find_decoder(media_type)
        .ok_or_else(|| PackError::UnsupportedMediaType(media_type.to_string()))?;
    decode(bytes)
}

/// Whether a media type is served as a manifest (index or image manifest).
pub fn is_manifest_media_type(media_type: &str) -> bool {
    matches!(
        media_type,
        MEDIA_TYPE_IMAGE_INDEX
            | MEDIA_TYPE_IMAGE_MANIFEST
            | DOCKER_MEDIA_TYPE_MANIFEST_LIST
            | DOCKER_MEDIA_TYPE_MANIFEST
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> OciMediaImageConfig {
        OciMediaImageConfig {
            media_type: MEDIA_TYPE_IMAGE_CONFIG.to_string(),
            schema_version: SCHEMA_VERSION,
            architecture: "amd64".to_string(),
            os: "linux".to_string(),
            rootfs: OciMediaRootFs {
                type_: "layers".to_string(),
                diff_ids: vec!["sha256:aa".to_string()],
            },
            created: None,
            author: None,
            os_version: None,
            os_features: None,
            variant: None,
            config: Some(serde_json::json!({"Env": ["PATH=/bin"], "Cmd": ["sh"]})),
            history: None,
        }
    }

    #[test]
    fn test_media_registry_has_unique_types() {
        let mut types: Vec<&str> = MEDIA_DECODERS.iter().map(|(t, _)| *t).collect();
        let count = types.len();
        types.sort();
        types.dedup();
        assert_eq!(types.len(), count);
    }

    #[test]
    fn test_decode_unknown_media_type() {
        let err = decode_media("application/x-unknown", b"{}").unwrap_err();
        assert!(matches!(err, PackError::UnsupportedMediaType(_)));
    }

    #[test]
    fn test_index_json_is_compact_and_ordered() {
        let index = OciMediaImageIndex::new(
            vec![OciMediaDescriptor::new(MEDIA_TYPE_IMAGE_MANIFEST, "sha256:ab", 7)],
            None,
        );
        let json = String::from_utf8(MediaObject::Index(index).to_json_bytes().unwrap()).unwrap();
        assert_eq!(
            json,
            r#"{"mediaType":"application/vnd.oci.image.index.v1+json","schemaVersion":2,"manifests":[{"mediaType":"application/vnd.oci.image.manifest.v1+json","digest":"sha256:ab","size":7}]}"#
        );
    }

    #[test]
    fn test_config_field_names() {
        let mut config = sample_config();
        config.os_version = Some("10.0".to_string());
        let json = String::from_utf8(MediaObject::Config(config).to_json_bytes().unwrap()).unwrap();

        assert!(json.contains(r#""rootfs":{"type":"layers","diff_ids":["sha256:aa"]}"#));
        assert!(json.contains(r#""os.version":"10.0""#));
        // Opaque config keys come out sorted
        assert!(json.contains(r#""config":{"Cmd":["sh"],"Env":["PATH=/bin"]}"#));
        assert!(!json.contains("history"));
    }

    #[test]
    fn test_docker_config_defaults_media_type() {
        let json = r#"{"architecture":"arm64","os":"linux","rootfs":{"type":"layers","diff_ids":[]},"history":[{"created_by":"x"}]}"#;
        let decoded = decode_media(DOCKER_MEDIA_TYPE_CONFIG, json.as_bytes()).unwrap();

        match decoded {
            MediaObject::Config(config) => {
                assert_eq!(config.media_type, MEDIA_TYPE_IMAGE_CONFIG);
                assert_eq!(config.schema_version, 2);
                assert_eq!(config.architecture, "arm64");
                assert_eq!(config.history.map(|h| h.len()), Some(1));
            }
            other => panic!("expected config, got {:?}", other),
        }
    }

    #[test]
    fn test_manifest_is_readable_by_oci_spec() {
        let manifest = OciMediaImageManifest::new(
            OciMediaDescriptor::new(
                MEDIA_TYPE_IMAGE_CONFIG,
                format!("sha256:{}", "a".repeat(64)),
                10,
            ),
            vec![OciMediaDescriptor::new(
                MEDIA_TYPE_LAYER_TAR_GZIP,
                format!("sha256:{}", "b".repeat(64)),
                20,
            )],
            None,
        );
        let bytes = MediaObject::Manifest(manifest).to_json_bytes().unwrap();

        let parsed: oci_spec::image::ImageManifest = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed.schema_version(), 2);
        assert_eq!(parsed.layers().len(), 1);
        assert_eq!(parsed.layers()[0].size(), 20);
    }

    #[test]
    fn test_is_manifest_media_type() {
        assert!(is_manifest_media_type(MEDIA_TYPE_IMAGE_INDEX));
        assert!(is_manifest_media_type(DOCKER_MEDIA_TYPE_MANIFEST));
        assert!(!is_manifest_media_type(MEDIA_TYPE_IMAGE_CONFIG));
        assert!(!is_manifest_media_type(MEDIA_TYPE_LAYER_TAR));
    }
}
