//! Serializable OCI image layout documents.
//!
//! These are produced by the packager only; descriptors are always derived
//! from a computed [`Digest`] and the size of the blob on disk.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::media_type;
use crate::digest::Digest;

/// OCI schema version for manifests and indexes.
pub const SCHEMA_VERSION: u32 = 2;

/// Operating system recorded in configs and platforms.
pub const IMAGE_OS: &str = "linux";

/// Reference to a content-addressed blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: Digest,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Descriptor {
    pub(crate) fn new(media_type: &str, digest: Digest, size: u64) -> Self {
        Self {
            media_type: media_type.to_string(),
            digest,
            size,
            platform: None,
            annotations: BTreeMap::new(),
        }
    }
}

/// Platform a manifest targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Platform {
    pub architecture: String,
    pub os: String,
}

/// Root filesystem section of the image config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootFs {
    #[serde(rename = "type")]
    pub fs_type: String,
    pub diff_ids: Vec<Digest>,
}

/// `application/vnd.oci.image.config.v1+json` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageConfig {
    pub architecture: String,
    pub os: String,
    pub rootfs: RootFs,
}

impl ImageConfig {
    pub fn new(architecture: impl Into<String>, diff_ids: Vec<Digest>) -> Self {
        Self {
            architecture: architecture.into(),
            os: IMAGE_OS.to_string(),
            rootfs: RootFs {
                fs_type: "layers".to_string(),
                diff_ids,
            },
        }
    }
}

/// `application/vnd.oci.image.manifest.v1+json` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub schema_version: u32,
    pub media_type: String,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Manifest {
    pub fn new(
        config: Descriptor,
        layers: Vec<Descriptor>,
        annotations: BTreeMap<String, String>,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            media_type: media_type::IMAGE_MANIFEST.to_string(),
            config,
            layers,
            annotations,
        }
    }
}

/// `index.json` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Index {
    pub schema_version: u32,
    pub media_type: String,
    pub manifests: Vec<Descriptor>,
}

impl Index {
    pub fn new(manifests: Vec<Descriptor>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            media_type: media_type::IMAGE_INDEX.to_string(),
            manifests,
        }
    }
}

/// `oci-layout` marker document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutMarker {
    pub image_layout_version: String,
}

impl Default for LayoutMarker {
    fn default() -> Self {
        Self {
            image_layout_version: media_type::IMAGE_LAYOUT_VERSION.to_string(),
        }
    }
}
