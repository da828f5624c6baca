//! Tarball creation for the rootfs layer and the final image archive.
//!
//! Archives are reproducible: entries are added in sorted order with
//! deterministic headers, and gzip output carries no timestamp.

use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use flate2::write::GzEncoder;
use ukpack_core::error::{PackError, Result};

use super::media_type;

/// Compression applied to the layer and the final archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// Plain tar
    Tar,
    /// Gzip-compressed tar
    #[default]
    Gzip,
}

impl Compression {
    pub const ALL: [Compression; 2] = [Compression::Tar, Compression::Gzip];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tar => "tar",
            Self::Gzip => "gzip",
        }
    }

    /// Media type of a filesystem layer written with this compression.
    pub fn layer_media_type(&self) -> &'static str {
        match self {
            Self::Tar => media_type::IMAGE_LAYER,
            Self::Gzip => media_type::IMAGE_LAYER_GZIP,
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Compression {
    type Err = PackError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tar" => Ok(Self::Tar),
            "gzip" => Ok(Self::Gzip),
            _ => Err(PackError::Validation(format!(
                "unknown compression '{}' (supported: tar, gzip)",
                s
            ))),
        }
    }
}

/// Write a tar of `src_dir` into `writer`, returning the writer.
///
/// Entries are named `prefix/<relative path>`. With an empty prefix the
/// directory's contents sit at the archive root and the directory itself is
/// not recorded.
pub fn write_tar<W: Write>(writer: W, src_dir: &Path, prefix: &Path) -> Result<W> {
    let mut builder = tar::Builder::new(writer);
    builder.mode(tar::HeaderMode::Deterministic);

    if !prefix.as_os_str().is_empty() {
        builder.append_dir(prefix, src_dir).map_err(|e| {
            PackError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to add {} to archive: {}", prefix.display(), e),
            ))
        })?;
    }
    add_dir_to_tar(&mut builder, src_dir, src_dir, prefix)?;

    builder.into_inner().map_err(|e| {
        PackError::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to finalize archive: {}", e),
        ))
    })
}

/// Recursively add a directory's contents to a tar builder in sorted order.
fn add_dir_to_tar<W: Write>(
    builder: &mut tar::Builder<W>,
    root: &Path,
    current: &Path,
    prefix: &Path,
) -> Result<()> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(current)
        .map_err(|e| {
            PackError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read directory {}: {}", current.display(), e),
            ))
        })?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<_>>()?;
    paths.sort();

    for path in paths {
        let relative = path.strip_prefix(root).map_err(|e| {
            PackError::Staging(format!(
                "Failed to compute relative path for {}: {}",
                path.display(),
                e
            ))
        })?;
        let tar_path = prefix.join(relative);

        if path.is_dir() {
            builder.append_dir(&tar_path, &path)?;
            add_dir_to_tar(builder, root, &path, prefix)?;
        } else {
            builder.append_path_with_name(&path, &tar_path)?;
        }
    }

    Ok(())
}

/// Tar `src_dir` into `output` with the given compression.
pub fn create_archive(
    src_dir: &Path,
    prefix: &Path,
    output: &Path,
    compression: Compression,
) -> Result<()> {
    let file = File::create(output).map_err(|e| {
        PackError::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to create {}: {}", output.display(), e),
        ))
    })?;

    match compression {
        Compression::Tar => {
            let file = write_tar(file, src_dir, prefix)?;
            file.sync_all()?;
        }
        Compression::Gzip => {
            let encoder = GzEncoder::new(file, flate2::Compression::default());
            let encoder = write_tar(encoder, src_dir, prefix)?;
            let file = encoder.finish()?;
            file.sync_all()?;
        }
    }

    Ok(())
}

/// Gzip-compress `input` into `output`.
pub fn gzip_file(input: &Path, output: &Path) -> Result<()> {
    let mut reader = File::open(input)?;
    let mut encoder = GzEncoder::new(File::create(output)?, flate2::Compression::default());
    std::io::copy(&mut reader, &mut encoder)?;
    encoder.finish()?;
    Ok(())
}
