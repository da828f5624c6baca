use thiserror::Error;

/// ukpack error types
#[derive(Error, Debug)]
pub enum PackError {
    /// Bad or missing construction input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Digest algorithm outside the supported set
    #[error("Unsupported digest algorithm: {0} (supported: sha256, sha384, sha512)")]
    UnsupportedAlgorithm(String),

    /// Digest whose encoded portion does not match its algorithm
    #[error("Invalid digest format: {0}")]
    InvalidDigestFormat(String),

    /// Unrecognized staging directory key
    #[error("Unknown staging key: {0}")]
    UnknownKey(String),

    /// Staging directory creation or deletion failed
    #[error("Staging error: {0}")]
    Staging(String),

    /// A build stage failed
    #[error("Packaging failed at stage {stage}: {source}")]
    Packaging {
        stage: String,
        #[source]
        source: Box<PackError>,
    },

    /// Archive path does not exist
    #[error("Archive not found: {0}")]
    ArchiveNotFound(String),

    /// Archive exists but is not a tar archive
    #[error("Not a tar archive: {0}")]
    NotATarArchive(String),

    /// Archive content is not a usable OCI image layout
    #[error("Invalid image layout: {0}")]
    InvalidLayout(String),

    /// Unexpected status while uploading a blob
    #[error("Blob upload failed: [{method}] {stage} -> {status}")]
    BlobUpload {
        method: String,
        stage: String,
        status: u16,
    },

    /// Unexpected status while uploading the manifest
    #[error("Manifest upload failed: [PUT] {reference} -> {status}")]
    ManifestUpload { reference: String, status: u16 },

    /// HTTP transport failure
    #[error("HTTP error: {0}")]
    Http(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl PackError {
    /// Wrap an error as the cause of a failed build stage.
    pub fn packaging(stage: impl Into<String>, source: PackError) -> Self {
        PackError::Packaging {
            stage: stage.into(),
            source: Box::new(source),
        }
    }
}

impl From<serde_json::Error> for PackError {
    fn from(err: serde_json::Error) -> Self {
        PackError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for PackError {
    fn from(err: serde_yaml::Error) -> Self {
        PackError::Serialization(err.to_string())
    }
}

/// Result type alias for ukpack operations
pub type Result<T> = std::result::Result<T, PackError>;
