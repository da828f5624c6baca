//! OCI media types and well-known annotation keys.

/// Content descriptor.
pub const DESCRIPTOR: &str = "application/vnd.oci.descriptor.v1+json";

/// `oci-layout` header.
pub const LAYOUT_HEADER: &str = "application/vnd.oci.layout.header.v1+json";

/// Image manifest.
pub const IMAGE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";

/// Image index.
pub const IMAGE_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// Uncompressed layer.
pub const IMAGE_LAYER: &str = "application/vnd.oci.image.layer.v1.tar";

/// Gzip-compressed layer.
pub const IMAGE_LAYER_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

/// Image configuration.
pub const IMAGE_CONFIG: &str = "application/vnd.oci.image.config.v1+json";

/// Version written to `oci-layout`.
pub const IMAGE_LAYOUT_VERSION: &str = "1.0.0";

/// Reference name of a manifest inside `index.json`.
pub const ANNOTATION_REF_NAME: &str = "org.opencontainers.image.ref.name";

/// Human-readable image title.
pub const ANNOTATION_TITLE: &str = "org.opencontainers.image.title";
