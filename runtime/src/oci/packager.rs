//! Image builder for packaging a unikernel as an OCI image archive.
//!
//! # Process
//!
//! 1. Copy kernel, filesystem image and artifacts into a staging rootfs,
//!    tar it and store the tarball as the filesystem layer blob
//! 2. Write the image config blob referencing the layer's diff ID
//! 3. Write the manifest blob referencing config and layer
//! 4. Write `index.json` referencing the manifest
//! 5. Write the `oci-layout` marker
//! 6. Tar the layout into the output archive
//!
//! The staging tree is deleted after the last stage, or as soon as any
//! stage fails.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use ukpack_core::error::{PackError, Result};

use super::annotations::{read_kconfig, ImageAnnotations};
use super::descriptor::{Descriptor, ImageConfig, Index, LayoutMarker, Manifest, Platform, IMAGE_OS};
use super::layer::{create_archive, gzip_file, write_tar, Compression};
use super::media_type;
use super::staging::{StagingKey, StagingTree};
use crate::digest::{digest_file, Algorithm, Digest, DEFAULT_BUFFER_SIZE};

/// Reference to an existing file to be packaged.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactWrapper {
    path: PathBuf,
}

impl ArtifactWrapper {
    /// Wrap a file or directory; it must exist.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = require_existing(path.into(), "artifact")?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Filesystem image (e.g. an initrd) shipped next to the kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct FilesystemWrapper {
    path: PathBuf,
}

impl FilesystemWrapper {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = require_existing(path.into(), "filesystem image")?;
        if !path.is_file() {
            return Err(PackError::Validation(format!(
                "filesystem image {} is not a file",
                path.display()
            )));
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Kernel image plus the metadata required to describe it.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageWrapper {
    path: PathBuf,
    architecture: String,
    platform: String,
    config: Option<PathBuf>,
}

impl ImageWrapper {
    /// Validate the kernel path, architecture and platform.
    pub fn new(
        path: impl Into<PathBuf>,
        architecture: impl Into<String>,
        platform: impl Into<String>,
    ) -> Result<Self> {
        let path = path.into();
        let architecture = architecture.into();
        let platform = platform.into();

        if path.as_os_str().is_empty() {
            return Err(PackError::Validation(
                "kernel image path is required".to_string(),
            ));
        }
        if architecture.trim().is_empty() {
            return Err(PackError::Validation("architecture is required".to_string()));
        }
        if platform.trim().is_empty() {
            return Err(PackError::Validation("platform is required".to_string()));
        }
        let path = require_existing(path, "kernel image")?;
        if !path.is_file() {
            return Err(PackError::Validation(format!(
                "kernel image {} is not a file",
                path.display()
            )));
        }

        Ok(Self {
            path,
            architecture,
            platform,
            config: None,
        })
    }

    /// Attach the kernel `.config` whose options become annotations.
    pub fn with_config(mut self, config: impl Into<PathBuf>) -> Result<Self> {
        self.config = Some(require_existing(config.into(), "kernel config")?);
        Ok(self)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn architecture(&self) -> &str {
        &self.architecture
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }

    /// Kernel file name.
    pub fn file_name(&self) -> String {
        file_name(&self.path)
    }
}

fn require_existing(path: PathBuf, what: &str) -> Result<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(PackError::Validation(format!("{} path is empty", what)));
    }
    if !path.exists() {
        return Err(PackError::Validation(format!(
            "{} not found: {}",
            what,
            path.display()
        )));
    }
    Ok(path)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Build settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageOptions {
    /// Digest algorithm for every blob
    pub algorithm: Algorithm,
    /// Compression of the layer and the final archive
    pub compression: Compression,
    /// Read buffer used when hashing files
    pub buffer_size: usize,
    /// Value for `org.opencontainers.image.ref.name` in `index.json`
    pub ref_name: Option<String>,
}

impl Default for PackageOptions {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::default(),
            compression: Compression::default(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            ref_name: None,
        }
    }
}

/// Build stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    Staging,
    FilesystemLayer,
    Config,
    Manifest,
    Index,
    LayoutMarker,
    Archive,
}

impl BuildStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Staging => "staging",
            Self::FilesystemLayer => "build-filesystem-layer",
            Self::Config => "build-config",
            Self::Manifest => "build-manifest",
            Self::Index => "build-index",
            Self::LayoutMarker => "write-layout-marker",
            Self::Archive => "archive",
        }
    }
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A blob written to the blob store.
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub descriptor: Descriptor,
    pub path: PathBuf,
}

/// The filesystem layer blob and its diff ID.
#[derive(Debug, Clone)]
pub struct LayerOutput {
    pub descriptor: Descriptor,
    /// Digest of the uncompressed layer tar
    pub diff_id: Digest,
    pub path: PathBuf,
}

/// Result of a successful build.
#[derive(Debug, Clone)]
pub struct PackageResult {
    /// Descriptor of the manifest referenced by `index.json`
    pub manifest: Descriptor,
    /// Descriptor of the image config
    pub config: Descriptor,
    /// Layer descriptors, in manifest order
    pub layers: Vec<Descriptor>,
    /// Path of the written archive
    pub archive: PathBuf,
    /// Archive size in bytes
    pub archive_size: u64,
}

/// Packages a kernel image, optional filesystem image and artifacts into an
/// OCI image archive.
pub struct Packager {
    image: ImageWrapper,
    filesystem: Option<FilesystemWrapper>,
    artifacts: Vec<ArtifactWrapper>,
    options: PackageOptions,
}

impl Packager {
    pub fn new(image: ImageWrapper, options: PackageOptions) -> Self {
        Self {
            image,
            filesystem: None,
            artifacts: Vec::new(),
            options,
        }
    }

    pub fn with_filesystem(mut self, filesystem: FilesystemWrapper) -> Self {
        self.filesystem = Some(filesystem);
        self
    }

    pub fn with_artifacts(mut self, artifacts: Vec<ArtifactWrapper>) -> Self {
        self.artifacts = artifacts;
        self
    }

    pub fn options(&self) -> &PackageOptions {
        &self.options
    }

    /// Run every stage and write the archive to `output`.
    pub fn package(&self, output: &Path) -> Result<PackageResult> {
        tracing::info!(
            kernel = %self.image.path().display(),
            architecture = %self.image.architecture(),
            platform = %self.image.platform(),
            algorithm = %self.options.algorithm,
            compression = %self.options.compression,
            "Packaging unikernel image"
        );

        let staging = run_stage(BuildStage::Staging, || {
            StagingTree::create(self.options.algorithm)
        })?;

        let result = self.build_in(&staging, output);
        let cleanup = staging.delete();

        match (result, cleanup) {
            (Ok(result), Ok(())) => {
                tracing::info!(
                    manifest = %result.manifest.digest,
                    archive = %result.archive.display(),
                    size = result.archive_size,
                    "Image packaged"
                );
                Ok(result)
            }
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(cleanup_err)) => {
                tracing::warn!(
                    error = %cleanup_err,
                    "Failed to delete staging tree after build error"
                );
                Err(e)
            }
        }
    }

    fn build_in(&self, staging: &StagingTree, output: &Path) -> Result<PackageResult> {
        let layer = run_stage(BuildStage::FilesystemLayer, || {
            self.build_filesystem_layer(staging)
        })?;
        let config = run_stage(BuildStage::Config, || self.build_config(staging, &layer))?;
        let layers = vec![layer.descriptor.clone()];
        let manifest = run_stage(BuildStage::Manifest, || {
            self.build_manifest(staging, &config, &layers)
        })?;
        run_stage(BuildStage::Index, || {
            self.build_index(staging, std::slice::from_ref(&manifest))
        })?;
        run_stage(BuildStage::LayoutMarker, || write_layout_marker(staging))?;
        let archive_size = run_stage(BuildStage::Archive, || self.archive(staging, output))?;

        Ok(PackageResult {
            manifest: manifest.descriptor,
            config: config.descriptor,
            layers,
            archive: output.to_path_buf(),
            archive_size,
        })
    }

    /// Stage 1: stage the rootfs, tar it and store it as the layer blob.
    pub fn build_filesystem_layer(&self, staging: &StagingTree) -> Result<LayerOutput> {
        let image_dir = staging.path(StagingKey::Image)?;
        copy_file(self.image.path(), &image_dir.join(self.image.file_name()))?;

        if let Some(fs) = &self.filesystem {
            let fs_dir = staging.path(StagingKey::Filesystem)?;
            copy_file(fs.path(), &fs_dir.join(file_name(fs.path())))?;
        }

        let artifacts_dir = staging.path(StagingKey::Artifacts)?;
        for artifact in &self.artifacts {
            let target = artifacts_dir.join(file_name(artifact.path()));
            if target.exists() {
                return Err(PackError::Validation(format!(
                    "duplicate artifact name: {}",
                    file_name(artifact.path())
                )));
            }
            if artifact.path().is_dir() {
                copy_dir_recursive(artifact.path(), &target)?;
            } else {
                copy_file(artifact.path(), &target)?;
            }
        }

        let tars_dir = staging.path(StagingKey::Tars)?;
        let tar_path = tars_dir.join("rootfs.tar");
        let file = std::fs::File::create(&tar_path)?;
        let file = write_tar(file, staging.path(StagingKey::Rootfs)?, Path::new("rootfs"))?;
        file.sync_all()?;

        let diff_id = self.digest(&tar_path)?;

        let (layer_path, digest) = match self.options.compression {
            Compression::Tar => (tar_path, diff_id.clone()),
            Compression::Gzip => {
                let gz_path = tars_dir.join("rootfs.tar.gz");
                gzip_file(&tar_path, &gz_path)?;
                let digest = self.digest(&gz_path)?;
                (gz_path, digest)
            }
        };

        let size = std::fs::metadata(&layer_path)?.len();
        let path = staging.commit_blob(&layer_path, &digest)?;

        tracing::info!(%digest, %diff_id, size, "Built filesystem layer");

        Ok(LayerOutput {
            descriptor: Descriptor::new(self.options.compression.layer_media_type(), digest, size),
            diff_id,
            path,
        })
    }

    /// Stage 2: write the image config blob.
    pub fn build_config(&self, staging: &StagingTree, layer: &LayerOutput) -> Result<StageOutput> {
        layer.descriptor.digest.validate()?;
        layer.diff_id.validate()?;

        let config = ImageConfig::new(self.image.architecture(), vec![layer.diff_id.clone()]);
        let output =
            self.write_json_blob(staging, "config.json", media_type::IMAGE_CONFIG, &config)?;

        tracing::info!(digest = %output.descriptor.digest, "Built image config");
        Ok(output)
    }

    /// Stage 3: write the manifest blob.
    pub fn build_manifest(
        &self,
        staging: &StagingTree,
        config: &StageOutput,
        layers: &[Descriptor],
    ) -> Result<StageOutput> {
        config.descriptor.digest.validate()?;
        for layer in layers {
            layer.digest.validate()?;
        }

        let mut annotations = ImageAnnotations {
            architecture: Some(self.image.architecture().to_string()),
            platform: Some(self.image.platform().to_string()),
            title: Some(self.image.file_name()),
            ..Default::default()
        };
        if let Some(path) = self.image.config() {
            annotations.kconfig = read_kconfig(path)?;
        }

        let manifest = Manifest::new(
            config.descriptor.clone(),
            layers.to_vec(),
            annotations.to_map(),
        );
        let output =
            self.write_json_blob(staging, "manifest.json", media_type::IMAGE_MANIFEST, &manifest)?;

        tracing::info!(digest = %output.descriptor.digest, "Built image manifest");
        Ok(output)
    }

    /// Stage 4: write `index.json` at its fixed path.
    pub fn build_index(&self, staging: &StagingTree, manifests: &[StageOutput]) -> Result<Index> {
        if manifests.is_empty() {
            return Err(PackError::Validation(
                "index requires at least one manifest".to_string(),
            ));
        }

        let mut entries = Vec::with_capacity(manifests.len());
        for manifest in manifests {
            manifest.descriptor.digest.validate()?;
            let mut descriptor = manifest.descriptor.clone();
            descriptor.platform = Some(Platform {
                architecture: self.image.architecture().to_string(),
                os: IMAGE_OS.to_string(),
            });
            if let Some(name) = &self.options.ref_name {
                descriptor
                    .annotations
                    .insert(media_type::ANNOTATION_REF_NAME.to_string(), name.clone());
            }
            entries.push(descriptor);
        }

        let index = Index::new(entries);
        std::fs::write(staging.path(StagingKey::IndexJson)?, serde_json::to_vec(&index)?)?;

        tracing::info!(manifests = index.manifests.len(), "Wrote index.json");
        Ok(index)
    }

    /// Final step: tar the layout into `output` via a sibling temporary file.
    fn archive(&self, staging: &StagingTree, output: &Path) -> Result<u64> {
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let partial = output.with_file_name(format!(".{}.partial", file_name(output)));
        let written = create_archive(
            staging.path(StagingKey::Oci)?,
            Path::new(""),
            &partial,
            self.options.compression,
        )
        .and_then(|()| std::fs::rename(&partial, output).map_err(PackError::from));

        if let Err(e) = written {
            let _ = std::fs::remove_file(&partial);
            return Err(e);
        }

        Ok(std::fs::metadata(output)?.len())
    }

    fn digest(&self, path: &Path) -> Result<Digest> {
        let digest = digest_file(path, self.options.algorithm, self.options.buffer_size)?;
        digest.validate()?;
        Ok(digest)
    }

    /// Serialize `value`, digest it and move it into the blob store.
    fn write_json_blob<T: Serialize>(
        &self,
        staging: &StagingTree,
        name: &str,
        media_type: &str,
        value: &T,
    ) -> Result<StageOutput> {
        let bytes = serde_json::to_vec(value)?;
        let scratch = staging.path(StagingKey::Scratch)?.join(name);
        std::fs::write(&scratch, &bytes)?;

        let digest = self.digest(&scratch)?;
        let path = staging.commit_blob(&scratch, &digest)?;

        Ok(StageOutput {
            descriptor: Descriptor::new(media_type, digest, bytes.len() as u64),
            path,
        })
    }
}

/// Stage 5: write the `oci-layout` marker.
pub fn write_layout_marker(staging: &StagingTree) -> Result<()> {
    let marker = serde_json::to_vec(&LayoutMarker::default())?;
    std::fs::write(staging.path(StagingKey::OciLayout)?, marker)?;
    Ok(())
}

fn run_stage<T>(stage: BuildStage, f: impl FnOnce() -> Result<T>) -> Result<T> {
    tracing::debug!(%stage, "Running build stage");
    f().map_err(|e| {
        tracing::debug!(%stage, error = %e, "Build stage failed");
        PackError::packaging(stage.as_str(), e)
    })
}

fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    std::fs::copy(src, dst).map_err(|e| {
        PackError::Io(std::io::Error::new(
            e.kind(),
            format!(
                "Failed to copy {} to {}: {}",
                src.display(),
                dst.display(),
                e
            ),
        ))
    })?;
    tracing::debug!(src = %src.display(), dst = %dst.display(), "Staged file");
    Ok(())
}

/// Recursively copy a directory.
fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst)?;

    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if src_path.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            copy_file(&src_path, &dst_path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::digest_bytes;
    use std::collections::HashMap;
    use std::fs;
    use std::io::Read;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        kernel: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let kernel = dir.path().join("helloworld_kvm-x86_64");
        fs::write(&kernel, b"k").unwrap();
        Fixture { dir, kernel }
    }

    fn image(f: &Fixture) -> ImageWrapper {
        ImageWrapper::new(&f.kernel, "x86_64", "kvm").unwrap()
    }

    /// Read every regular file of an archive into memory.
    fn read_archive(path: &Path, compression: Compression) -> HashMap<String, Vec<u8>> {
        let file = fs::File::open(path).unwrap();
        let reader: Box<dyn Read> = match compression {
            Compression::Tar => Box::new(file),
            Compression::Gzip => Box::new(flate2::read::GzDecoder::new(file)),
        };
        let mut archive = tar::Archive::new(reader);
        let mut files = HashMap::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            if entry.header().entry_type().is_file() {
                let name = entry.path().unwrap().to_string_lossy().to_string();
                let mut data = Vec::new();
                entry.read_to_end(&mut data).unwrap();
                files.insert(name, data);
            }
        }
        files
    }

    fn blob<'a>(files: &'a HashMap<String, Vec<u8>>, digest: &Digest) -> &'a [u8] {
        let name = format!("blobs/{}/{}", digest.algorithm(), digest.encoded());
        files.get(&name).unwrap_or_else(|| panic!("missing {}", name))
    }

    // --- wrappers ---

    #[test]
    fn test_image_wrapper_requires_fields() {
        let f = fixture();
        assert!(matches!(
            ImageWrapper::new("", "x86_64", "kvm"),
            Err(PackError::Validation(_))
        ));
        assert!(matches!(
            ImageWrapper::new(&f.kernel, "", "kvm"),
            Err(PackError::Validation(_))
        ));
        assert!(matches!(
            ImageWrapper::new(&f.kernel, "x86_64", " "),
            Err(PackError::Validation(_))
        ));
        assert!(matches!(
            ImageWrapper::new(f.dir.path().join("missing"), "x86_64", "kvm"),
            Err(PackError::Validation(_))
        ));
    }

    #[test]
    fn test_image_wrapper_rejects_directory() {
        let f = fixture();
        assert!(ImageWrapper::new(f.dir.path(), "x86_64", "kvm").is_err());
    }

    #[test]
    fn test_image_wrapper_config_must_exist() {
        let f = fixture();
        let err = image(&f).with_config(f.dir.path().join(".config")).unwrap_err();
        assert!(matches!(err, PackError::Validation(_)));
    }

    #[test]
    fn test_artifact_and_filesystem_wrappers_check_existence() {
        let f = fixture();
        assert!(ArtifactWrapper::new(f.dir.path().join("nope")).is_err());
        assert!(FilesystemWrapper::new(f.dir.path().join("nope")).is_err());
        assert!(ArtifactWrapper::new(f.dir.path()).is_ok());
        assert!(FilesystemWrapper::new(f.dir.path()).is_err());
    }

    #[test]
    fn test_build_stage_names() {
        assert_eq!(BuildStage::FilesystemLayer.to_string(), "build-filesystem-layer");
        assert_eq!(BuildStage::LayoutMarker.to_string(), "write-layout-marker");
    }

    // --- stages ---

    #[test]
    fn test_filesystem_layer_stage_tar() {
        let f = fixture();
        let options = PackageOptions {
            compression: Compression::Tar,
            ..Default::default()
        };
        let packager = Packager::new(image(&f), options);
        let staging = StagingTree::create(Algorithm::Sha256).unwrap();

        let layer = packager.build_filesystem_layer(&staging).unwrap();
        let bytes = fs::read(&layer.path).unwrap();

        assert_eq!(layer.descriptor.media_type, media_type::IMAGE_LAYER);
        assert_eq!(layer.descriptor.size, bytes.len() as u64);
        assert_eq!(layer.descriptor.digest, digest_bytes(Algorithm::Sha256, &bytes));
        assert_eq!(layer.diff_id, layer.descriptor.digest);
        assert_eq!(
            layer.path,
            staging.blob_path(layer.descriptor.digest.encoded()).unwrap()
        );

        let mut archive = tar::Archive::new(&bytes[..]);
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
            .collect();
        assert!(names.contains(&"rootfs/image/helloworld_kvm-x86_64".to_string()));

        staging.delete().unwrap();
    }

    #[test]
    fn test_filesystem_layer_stage_gzip_diff_id() {
        let f = fixture();
        let packager = Packager::new(image(&f), PackageOptions::default());
        let staging = StagingTree::create(Algorithm::Sha256).unwrap();

        let layer = packager.build_filesystem_layer(&staging).unwrap();
        let compressed = fs::read(&layer.path).unwrap();
        let mut uncompressed = Vec::new();
        flate2::read::GzDecoder::new(&compressed[..])
            .read_to_end(&mut uncompressed)
            .unwrap();

        assert_eq!(layer.descriptor.media_type, media_type::IMAGE_LAYER_GZIP);
        assert_eq!(layer.descriptor.digest, digest_bytes(Algorithm::Sha256, &compressed));
        assert_eq!(layer.diff_id, digest_bytes(Algorithm::Sha256, &uncompressed));
        assert_ne!(layer.diff_id, layer.descriptor.digest);

        staging.delete().unwrap();
    }

    #[test]
    fn test_filesystem_layer_includes_filesystem_and_artifacts() {
        let f = fixture();
        let initrd = f.dir.path().join("initrd.cpio");
        fs::write(&initrd, b"initrd").unwrap();
        let assets = f.dir.path().join("assets");
        fs::create_dir(&assets).unwrap();
        fs::write(assets.join("index.html"), b"<html>").unwrap();
        let readme = f.dir.path().join("README");
        fs::write(&readme, b"hi").unwrap();

        let packager = Packager::new(
            image(&f),
            PackageOptions {
                compression: Compression::Tar,
                ..Default::default()
            },
        )
        .with_filesystem(FilesystemWrapper::new(&initrd).unwrap())
        .with_artifacts(vec![
            ArtifactWrapper::new(&assets).unwrap(),
            ArtifactWrapper::new(&readme).unwrap(),
        ]);
        let staging = StagingTree::create(Algorithm::Sha256).unwrap();
        let layer = packager.build_filesystem_layer(&staging).unwrap();

        let file = fs::File::open(&layer.path).unwrap();
        let mut archive = tar::Archive::new(file);
        let mut contents = HashMap::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            if entry.header().entry_type().is_file() {
                let name = entry.path().unwrap().to_string_lossy().to_string();
                let mut data = Vec::new();
                entry.read_to_end(&mut data).unwrap();
                contents.insert(name, data);
            }
        }

        assert_eq!(contents["rootfs/filesystem/initrd.cpio"], b"initrd");
        assert_eq!(contents["rootfs/artifacts/assets/index.html"], b"<html>");
        assert_eq!(contents["rootfs/artifacts/README"], b"hi");
        assert_eq!(contents["rootfs/image/helloworld_kvm-x86_64"], b"k");

        staging.delete().unwrap();
    }

    #[test]
    fn test_duplicate_artifact_names_rejected() {
        let f = fixture();
        let a = f.dir.path().join("a");
        let b = f.dir.path().join("b");
        fs::create_dir_all(a.join("data")).unwrap();
        fs::create_dir_all(b.join("data")).unwrap();

        let packager = Packager::new(image(&f), PackageOptions::default()).with_artifacts(vec![
            ArtifactWrapper::new(a.join("data")).unwrap(),
            ArtifactWrapper::new(b.join("data")).unwrap(),
        ]);
        let staging = StagingTree::create(Algorithm::Sha256).unwrap();
        assert!(matches!(
            packager.build_filesystem_layer(&staging),
            Err(PackError::Validation(_))
        ));
        staging.delete().unwrap();
    }

    #[test]
    fn test_config_stage_references_diff_id() {
        let f = fixture();
        let packager = Packager::new(image(&f), PackageOptions::default());
        let staging = StagingTree::create(Algorithm::Sha256).unwrap();

        let layer = packager.build_filesystem_layer(&staging).unwrap();
        let config = packager.build_config(&staging, &layer).unwrap();

        let bytes = fs::read(&config.path).unwrap();
        let parsed: ImageConfig = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed.architecture, "x86_64");
        assert_eq!(parsed.os, "linux");
        assert_eq!(parsed.rootfs.diff_ids, vec![layer.diff_id.clone()]);
        assert_eq!(config.descriptor.media_type, media_type::IMAGE_CONFIG);
        assert_eq!(config.descriptor.size, bytes.len() as u64);
        assert_eq!(config.descriptor.digest, digest_bytes(Algorithm::Sha256, &bytes));

        staging.delete().unwrap();
    }

    #[test]
    fn test_manifest_stage_annotations() {
        let f = fixture();
        let kconfig = f.dir.path().join(".config");
        fs::write(&kconfig, "CONFIG_UK_NAME=\"hello\"\n# CONFIG_X is not set\n").unwrap();

        let packager = Packager::new(
            image(&f).with_config(&kconfig).unwrap(),
            PackageOptions::default(),
        );
        let staging = StagingTree::create(Algorithm::Sha256).unwrap();
        let layer = packager.build_filesystem_layer(&staging).unwrap();
        let config = packager.build_config(&staging, &layer).unwrap();
        let manifest = packager
            .build_manifest(&staging, &config, &[layer.descriptor.clone()])
            .unwrap();

        let parsed: Manifest = serde_json::from_slice(&fs::read(&manifest.path).unwrap()).unwrap();
        assert_eq!(parsed.schema_version, 2);
        assert_eq!(parsed.config, config.descriptor);
        assert_eq!(parsed.layers, vec![layer.descriptor.clone()]);
        assert_eq!(parsed.annotations["org.unikraft.image.architecture"], "x86_64");
        assert_eq!(parsed.annotations["org.unikraft.image.platform"], "kvm");
        assert_eq!(parsed.annotations["org.unikraft.kconfig.CONFIG_UK_NAME"], "hello");
        assert!(!parsed.annotations.contains_key("org.unikraft.kconfig.CONFIG_X"));

        staging.delete().unwrap();
    }

    #[test]
    fn test_index_stage_writes_fixed_path() {
        let f = fixture();
        let options = PackageOptions {
            ref_name: Some("latest".to_string()),
            ..Default::default()
        };
        let packager = Packager::new(image(&f), options);
        let staging = StagingTree::create(Algorithm::Sha256).unwrap();
        let layer = packager.build_filesystem_layer(&staging).unwrap();
        let config = packager.build_config(&staging, &layer).unwrap();
        let manifest = packager
            .build_manifest(&staging, &config, &[layer.descriptor.clone()])
            .unwrap();

        let index = packager
            .build_index(&staging, std::slice::from_ref(&manifest))
            .unwrap();
        let on_disk: Index =
            serde_json::from_slice(&fs::read(staging.path(StagingKey::IndexJson).unwrap()).unwrap())
                .unwrap();

        assert_eq!(on_disk, index);
        assert_eq!(index.manifests[0].digest, manifest.descriptor.digest);
        assert_eq!(
            index.manifests[0].annotations[media_type::ANNOTATION_REF_NAME],
            "latest"
        );
        assert_eq!(
            index.manifests[0].platform.as_ref().unwrap().architecture,
            "x86_64"
        );

        assert!(packager.build_index(&staging, &[]).is_err());
        staging.delete().unwrap();
    }

    #[test]
    fn test_layout_marker_stage() {
        let staging = StagingTree::create(Algorithm::Sha256).unwrap();
        write_layout_marker(&staging).unwrap();
        let marker = fs::read_to_string(staging.path(StagingKey::OciLayout).unwrap()).unwrap();
        assert_eq!(marker, r#"{"imageLayoutVersion":"1.0.0"}"#);
        staging.delete().unwrap();
    }

    // --- end to end ---

    #[test]
    fn test_package_roundtrip_digests() {
        let f = fixture();
        let output = f.dir.path().join("package").join("helloworld");
        let packager = Packager::new(image(&f), PackageOptions::default());

        let result = packager.package(&output).unwrap();
        assert!(output.is_file());
        assert_eq!(result.archive_size, fs::metadata(&output).unwrap().len());

        let files = read_archive(&output, Compression::Gzip);
        assert!(files.contains_key("oci-layout"));
        assert!(files.contains_key("index.json"));

        let index: Index = serde_json::from_slice(&files["index.json"]).unwrap();
        assert_eq!(index.manifests[0].digest, result.manifest.digest);

        let manifest_bytes = blob(&files, &result.manifest.digest);
        assert_eq!(
            digest_bytes(Algorithm::Sha256, manifest_bytes),
            result.manifest.digest
        );
        let manifest: Manifest = serde_json::from_slice(manifest_bytes).unwrap();

        let config_bytes = blob(&files, &manifest.config.digest);
        assert_eq!(
            digest_bytes(Algorithm::Sha256, config_bytes),
            manifest.config.digest
        );
        assert_eq!(manifest.config.size, config_bytes.len() as u64);

        let layer_bytes = blob(&files, &manifest.layers[0].digest);
        assert_eq!(
            digest_bytes(Algorithm::Sha256, layer_bytes),
            manifest.layers[0].digest
        );
        assert_eq!(manifest.layers[0].size, layer_bytes.len() as u64);
        assert_eq!(manifest.layers, result.layers);
    }

    #[test]
    fn test_package_is_reproducible() {
        let f = fixture();
        let options = PackageOptions {
            compression: Compression::Tar,
            ..Default::default()
        };
        let first = Packager::new(image(&f), options.clone())
            .package(&f.dir.path().join("a.tar"))
            .unwrap();
        let second = Packager::new(image(&f), options)
            .package(&f.dir.path().join("b.tar"))
            .unwrap();

        assert_eq!(first.layers[0].digest, second.layers[0].digest);
        assert_eq!(first.manifest.digest, second.manifest.digest);
        assert_eq!(
            fs::read(f.dir.path().join("a.tar")).unwrap(),
            fs::read(f.dir.path().join("b.tar")).unwrap()
        );
    }

    #[test]
    fn test_package_one_byte_kernel_layer_digest() {
        let dir = TempDir::new().unwrap();
        let kernel = dir.path().join("k");
        fs::write(&kernel, b"k").unwrap();
        let options = PackageOptions {
            algorithm: Algorithm::Sha256,
            compression: Compression::Tar,
            ..Default::default()
        };
        let output = dir.path().join("k.tar");
        let image = ImageWrapper::new(&kernel, "x86_64", "kvm").unwrap();
        let result = Packager::new(image, options).package(&output).unwrap();

        assert_eq!(
            result.layers[0].digest.to_string(),
            "sha256:7bcbbf0a3f03f9a39f49565206265693a4746ef9007c40163a47347116a6eb65"
        );

        let files = read_archive(&output, Compression::Tar);
        assert!(files.contains_key("oci-layout"));
        assert!(files.contains_key("index.json"));
        assert_eq!(
            digest_bytes(Algorithm::Sha256, blob(&files, &result.layers[0].digest)),
            result.layers[0].digest
        );
    }

    #[test]
    fn test_package_with_sha512() {
        let f = fixture();
        let options = PackageOptions {
            algorithm: Algorithm::Sha512,
            compression: Compression::Tar,
            ..Default::default()
        };
        let output = f.dir.path().join("out.tar");
        let result = Packager::new(image(&f), options).package(&output).unwrap();

        assert_eq!(result.manifest.digest.algorithm(), Algorithm::Sha512);
        assert_eq!(result.manifest.digest.encoded().len(), 128);
        let files = read_archive(&output, Compression::Tar);
        assert!(files.keys().any(|k| k.starts_with("blobs/sha512/")));
    }

    #[test]
    fn test_package_output_parses_with_oci_spec() {
        let f = fixture();
        let output = f.dir.path().join("image.tar");
        let options = PackageOptions {
            compression: Compression::Tar,
            ..Default::default()
        };
        Packager::new(image(&f), options).package(&output).unwrap();

        let files = read_archive(&output, Compression::Tar);
        let index: oci_spec::image::ImageIndex =
            serde_json::from_slice(&files["index.json"]).unwrap();
        let manifest_digest: Digest = index.manifests()[0].digest().to_string().parse().unwrap();
        let manifest: oci_spec::image::ImageManifest =
            serde_json::from_slice(blob(&files, &manifest_digest)).unwrap();
        assert_eq!(manifest.layers().len(), 1);
    }

    #[test]
    fn test_package_failure_reports_stage() {
        let f = fixture();
        let packager = Packager::new(image(&f), PackageOptions::default());
        // Output whose parent is a regular file cannot be created.
        let blocker = f.dir.path().join("blocker");
        fs::write(&blocker, b"").unwrap();

        let err = packager.package(&blocker.join("image")).unwrap_err();
        match err {
            PackError::Packaging { stage, .. } => assert_eq!(stage, "archive"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
