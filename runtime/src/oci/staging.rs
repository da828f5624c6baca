//! Ephemeral staging directory for assembling an image layout.
//!
//! ```text
//! <tmp>/
//! ├── rootfs/                 (layer contents)
//! │   ├── image/              (kernel image)
//! │   ├── filesystem/         (optional filesystem image)
//! │   └── artifacts/          (extra artifacts)
//! ├── oci/                    (becomes the final archive)
//! │   ├── oci-layout
//! │   ├── index.json
//! │   └── blobs/<algorithm>/  (content-addressed blobs)
//! ├── tars/                   (layer tarballs before digesting)
//! └── scratch/                (JSON documents before digesting)
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tempfile::TempDir;
use ukpack_core::error::{PackError, Result};

use crate::digest::{Algorithm, Digest};

/// Symbolic names for locations inside a [`StagingTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StagingKey {
    Root,
    Rootfs,
    Image,
    Filesystem,
    Artifacts,
    Oci,
    OciBlobs,
    BlobStore,
    Tars,
    Scratch,
    IndexJson,
    OciLayout,
}

impl StagingKey {
    pub const ALL: [StagingKey; 12] = [
        StagingKey::Root,
        StagingKey::Rootfs,
        StagingKey::Image,
        StagingKey::Filesystem,
        StagingKey::Artifacts,
        StagingKey::Oci,
        StagingKey::OciBlobs,
        StagingKey::BlobStore,
        StagingKey::Tars,
        StagingKey::Scratch,
        StagingKey::IndexJson,
        StagingKey::OciLayout,
    ];

    /// Directories pre-created by [`StagingTree::create`], parents first.
    pub const DIRECTORIES: [StagingKey; 9] = [
        StagingKey::Rootfs,
        StagingKey::Image,
        StagingKey::Filesystem,
        StagingKey::Artifacts,
        StagingKey::Oci,
        StagingKey::OciBlobs,
        StagingKey::BlobStore,
        StagingKey::Tars,
        StagingKey::Scratch,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Rootfs => "rootfs",
            Self::Image => "image",
            Self::Filesystem => "filesystem",
            Self::Artifacts => "artifacts",
            Self::Oci => "oci",
            Self::OciBlobs => "oci_blobs",
            Self::BlobStore => "blob_store",
            Self::Tars => "tars",
            Self::Scratch => "scratch",
            Self::IndexJson => "index_json",
            Self::OciLayout => "oci_layout",
        }
    }

    /// Path relative to the staging root.
    fn relative(&self, algorithm: Algorithm) -> PathBuf {
        match self {
            Self::Root => PathBuf::new(),
            Self::Rootfs => PathBuf::from("rootfs"),
            Self::Image => PathBuf::from("rootfs/image"),
            Self::Filesystem => PathBuf::from("rootfs/filesystem"),
            Self::Artifacts => PathBuf::from("rootfs/artifacts"),
            Self::Oci => PathBuf::from("oci"),
            Self::OciBlobs => PathBuf::from("oci/blobs"),
            Self::BlobStore => Path::new("oci/blobs").join(algorithm.as_str()),
            Self::Tars => PathBuf::from("tars"),
            Self::Scratch => PathBuf::from("scratch"),
            Self::IndexJson => PathBuf::from("oci/index.json"),
            Self::OciLayout => PathBuf::from("oci/oci-layout"),
        }
    }
}

impl fmt::Display for StagingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StagingKey {
    type Err = PackError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|key| key.name() == s)
            .ok_or_else(|| PackError::UnknownKey(s.to_string()))
    }
}

/// Staging directory owned by a single build.
///
/// [`StagingTree::delete`] consumes the tree; dropping it without calling
/// `delete` still removes the directory.
pub struct StagingTree {
    dir: TempDir,
    algorithm: Algorithm,
    paths: HashMap<StagingKey, PathBuf>,
}

impl StagingTree {
    /// Allocate a fresh temporary root and create the fixed subtree.
    pub fn create(algorithm: Algorithm) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("ukpack-")
            .tempdir()
            .map_err(|e| PackError::Staging(format!("Failed to create staging root: {}", e)))?;

        let paths: HashMap<StagingKey, PathBuf> = StagingKey::ALL
            .into_iter()
            .map(|key| (key, dir.path().join(key.relative(algorithm))))
            .collect();

        for key in StagingKey::DIRECTORIES {
            let path = &paths[&key];
            std::fs::create_dir(path).map_err(|e| {
                PackError::Staging(format!(
                    "Failed to create staging directory {}: {}",
                    path.display(),
                    e
                ))
            })?;
        }

        tracing::debug!(root = %dir.path().display(), %algorithm, "Created staging tree");

        Ok(Self {
            dir,
            algorithm,
            paths,
        })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Digest algorithm the blob store is keyed by.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Resolve a key to its absolute path.
    pub fn path(&self, key: StagingKey) -> Result<&Path> {
        self.paths
            .get(&key)
            .map(PathBuf::as_path)
            .ok_or_else(|| PackError::UnknownKey(key.to_string()))
    }

    /// Resolve a key given by name.
    pub fn path_of(&self, name: &str) -> Result<&Path> {
        self.path(name.parse()?)
    }

    /// Content-addressed location for a blob with the given hex encoding.
    pub fn blob_path(&self, encoded: &str) -> Result<PathBuf> {
        Ok(self.path(StagingKey::BlobStore)?.join(encoded))
    }

    /// Move a digested file into the blob store under its digest.
    pub fn commit_blob(&self, source: &Path, digest: &Digest) -> Result<PathBuf> {
        digest.validate()?;
        if digest.algorithm() != self.algorithm {
            return Err(PackError::InvalidDigestFormat(format!(
                "{} does not match blob store algorithm {}",
                digest, self.algorithm
            )));
        }

        let target = self.blob_path(digest.encoded())?;
        std::fs::rename(source, &target).map_err(|e| {
            PackError::Staging(format!(
                "Failed to move {} into blob store: {}",
                source.display(),
                e
            ))
        })?;

        tracing::debug!(%digest, path = %target.display(), "Committed blob");
        Ok(target)
    }

    /// Remove the whole staging root.
    ///
    /// A root that is already gone, fully or partly, is not an error.
    pub fn delete(self) -> Result<()> {
        let root = self.dir.path().to_path_buf();
        match self.dir.close() {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(PackError::Staging(format!(
                    "Failed to delete staging root {}: {}",
                    root.display(),
                    e
                )))
            }
        }
        tracing::debug!(root = %root.display(), "Deleted staging tree");
        Ok(())
    }
}
