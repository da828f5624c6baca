//! ukpack runtime - unikernel image packaging and registry push.
//!
//! This crate provides the digest engine, the staging tree used while an
//! image is assembled, the OCI image builder and the registry push client.

#![allow(clippy::result_large_err)]

pub mod digest;
pub mod oci;

// Re-export common types
pub use digest::{digest_bytes, digest_file, digester, Algorithm, Digest, Digester};
pub use oci::{
    ArtifactWrapper, FilesystemWrapper, ImageWrapper, PackageOptions, PackageResult, Packager,
};
pub use oci::{Compression, StagingKey, StagingTree};
pub use oci::{
    ImageArchive, PushOptions, PushResult, RegistryAuth, RegistryEndpoint, RegistryPusher,
    UploadMode,
};

/// ukpack runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
