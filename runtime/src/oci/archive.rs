//! Reading packaged image archives for push.
//!
//! The archive is unpacked into a private temporary directory, then
//! `index.json` and the first manifest are parsed with `oci-spec` to find the
//! blobs that must be uploaded.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use oci_spec::image::{ImageIndex, ImageManifest};
use tempfile::TempDir;
use ukpack_core::error::{PackError, Result};

use crate::digest::Digest;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// A blob referenced by the manifest and present in the archive.
#[derive(Debug, Clone, PartialEq)]
pub struct BlobRef {
    pub digest: Digest,
    pub media_type: String,
    pub size: u64,
    pub path: PathBuf,
}

/// An unpacked image archive.
#[derive(Debug)]
pub struct ImageArchive {
    path: PathBuf,
    dir: TempDir,
    manifest_bytes: Vec<u8>,
    manifest_digest: Digest,
    manifest_media_type: String,
    blobs: Vec<BlobRef>,
}

impl ImageArchive {
    /// Open and unpack an archive, resolving its first manifest.
    ///
    /// # Errors
    ///
    /// - `ArchiveNotFound` if `path` is not an existing file
    /// - `NotATarArchive` if the content is not a (gzipped) tar
    /// - `InvalidLayout` if `index.json`, the manifest or a blob is missing
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(PackError::ArchiveNotFound(path.display().to_string()));
        }

        let dir = tempfile::Builder::new()
            .prefix("ukpack-push-")
            .tempdir()?;
        unpack(&path, dir.path())?;

        let index = load_index(dir.path())?;
        let entry = index.manifests().first().ok_or_else(|| {
            PackError::InvalidLayout("index.json lists no manifests".to_string())
        })?;
        let manifest_digest: Digest = entry.digest().to_string().parse()?;
        let manifest_media_type = entry.media_type().to_string();

        let manifest_path = blob_path(dir.path(), &manifest_digest)?;
        let manifest_bytes = std::fs::read(&manifest_path)?;
        let manifest: ImageManifest = serde_json::from_slice(&manifest_bytes)
            .map_err(|e| PackError::InvalidLayout(format!("Failed to parse manifest: {}", e)))?;

        let mut blobs = Vec::with_capacity(manifest.layers().len() + 1);
        for desc in std::iter::once(manifest.config()).chain(manifest.layers().iter()) {
            let digest: Digest = desc.digest().to_string().parse()?;
            let path = blob_path(dir.path(), &digest)?;
            let size = std::fs::metadata(&path)?.len();
            if size != desc.size() as u64 {
                return Err(PackError::InvalidLayout(format!(
                    "blob {} is {} bytes, manifest says {}",
                    digest,
                    size,
                    desc.size()
                )));
            }
            blobs.push(BlobRef {
                digest,
                media_type: desc.media_type().to_string(),
                size,
                path,
            });
        }

        tracing::debug!(
            archive = %path.display(),
            manifest = %manifest_digest,
            blobs = blobs.len(),
            "Opened image archive"
        );

        Ok(Self {
            path,
            dir,
            manifest_bytes,
            manifest_digest,
            manifest_media_type,
            blobs,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory the archive was unpacked into.
    pub fn root_dir(&self) -> &Path {
        self.dir.path()
    }

    /// Manifest exactly as stored in the archive.
    pub fn manifest_bytes(&self) -> &[u8] {
        &self.manifest_bytes
    }

    pub fn manifest_digest(&self) -> &Digest {
        &self.manifest_digest
    }

    /// Media type recorded for the manifest in `index.json`.
    pub fn manifest_media_type(&self) -> &str {
        &self.manifest_media_type
    }

    /// Blobs to upload: the config first, then layers in manifest order.
    pub fn blobs(&self) -> &[BlobRef] {
        &self.blobs
    }

    /// Repository name used when none is given: the archive file name.
    pub fn default_repository_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// Extract a plain or gzipped tar into `dest`.
fn unpack(path: &Path, dest: &Path) -> Result<()> {
    let mut file = File::open(path)?;
    let mut magic = [0u8; 2];
    let is_gzip = match file.read_exact(&mut magic) {
        Ok(()) => magic == GZIP_MAGIC,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => false,
        Err(e) => return Err(e.into()),
    };
    file.seek(SeekFrom::Start(0))?;

    let reader: Box<dyn Read> = if is_gzip {
        Box::new(flate2::read::GzDecoder::new(file))
    } else {
        Box::new(file)
    };

    let not_tar =
        |detail: String| PackError::NotATarArchive(format!("{}: {}", path.display(), detail));

    let mut archive = tar::Archive::new(reader);
    let mut count = 0usize;
    for entry in archive.entries().map_err(|e| not_tar(e.to_string()))? {
        let mut entry = entry.map_err(|e| not_tar(e.to_string()))?;
        entry.unpack_in(dest).map_err(|e| not_tar(e.to_string()))?;
        count += 1;
    }

    if count == 0 {
        return Err(not_tar("no entries".to_string()));
    }

    tracing::debug!(entries = count, gzip = is_gzip, "Unpacked archive");
    Ok(())
}

fn load_index(root: &Path) -> Result<ImageIndex> {
    let index_path = root.join("index.json");
    if !index_path.is_file() {
        return Err(PackError::InvalidLayout(
            "archive has no index.json".to_string(),
        ));
    }
    let content = std::fs::read(&index_path)?;
    serde_json::from_slice(&content)
        .map_err(|e| PackError::InvalidLayout(format!("Failed to parse index.json: {}", e)))
}

fn blob_path(root: &Path, digest: &Digest) -> Result<PathBuf> {
    let path = root
        .join("blobs")
        .join(digest.algorithm().as_str())
        .join(digest.encoded());
    if !path.is_file() {
        return Err(PackError::InvalidLayout(format!(
            "blob {} missing from archive",
            digest
        )));
    }
    Ok(path)
}
