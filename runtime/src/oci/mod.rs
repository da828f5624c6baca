//! OCI image packaging and registry push.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Image archive                           │
//! │                                                              │
//! │  ├── oci-layout           (OCI layout marker)                │
//! │  ├── index.json           (Image index)                      │
//! │  └── blobs/                                                  │
//! │      └── <algorithm>/                                        │
//! │          ├── <manifest>   (Image manifest)                   │
//! │          ├── <config>     (Image configuration)              │
//! │          └── <layer>      (rootfs tarball)                   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`Packager`] builds the archive inside a [`StagingTree`];
//! [`ImageArchive`] reads it back and [`RegistryPusher`] uploads it.

pub mod annotations;
mod archive;
mod descriptor;
mod layer;
pub mod media_type;
mod packager;
pub mod registry;
pub mod staging;
pub mod upload;

pub use annotations::{parse_kconfig, read_kconfig, ImageAnnotations};
pub use archive::{BlobRef, ImageArchive};
pub use descriptor::{Descriptor, ImageConfig, Index, LayoutMarker, Manifest, Platform, RootFs};
pub use layer::Compression;
pub use packager::{
    write_layout_marker, ArtifactWrapper, BuildStage, FilesystemWrapper, ImageWrapper,
    LayerOutput, PackageOptions, PackageResult, Packager, StageOutput,
};
pub use registry::{PushOptions, PushResult, RegistryAuth, RegistryEndpoint, RegistryPusher};
pub use staging::{StagingKey, StagingTree};
pub use upload::{chunk_ranges, ByteRange, ChunkRanges, UploadMode, UploadSession};
