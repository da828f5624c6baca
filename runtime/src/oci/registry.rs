//! OCI registry client for pushing packaged images.
//!
//! Speaks the blob upload subset of the OCI Distribution protocol directly
//! over `reqwest`:
//!
//! ```text
//! POST  /v2/<project>/<repo>/blobs/uploads/         -> 202 + Location
//! PATCH <location>  Content-Range: <start>-<end>    -> 202 (per chunk)
//! PUT   <location>?digest=<alg>:<hex>               -> 201
//! GET   /v2/<project>/<repo>/blobs/<digest>         -> 200 (optional)
//! PUT   /v2/<project>/<repo>/manifests/<tag>        -> 201
//! ```
//!
//! Requests are issued one at a time; blobs are pushed config first, then
//! layers, then the manifest.

use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, LOCATION};
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use ukpack_core::error::{PackError, Result};

use super::archive::{BlobRef, ImageArchive};
use super::media_type;
use super::upload::{chunk_ranges, UploadMode, UploadSession};
use crate::digest::Digest;

const OCTET_STREAM: &str = "application/octet-stream";

/// Authentication credentials for a container registry.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    /// Create anonymous authentication (no credentials).
    pub fn anonymous() -> Self {
        Self {
            username: None,
            password: None,
        }
    }

    /// Create basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Basic credentials when both parts are present, anonymous otherwise.
    pub fn from_parts(username: Option<String>, password: Option<String>) -> Self {
        match (username, password) {
            (Some(u), Some(p)) => Self::basic(u, p),
            _ => Self::anonymous(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_none()
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => request.basic_auth(u, Some(p)),
            _ => request,
        }
    }
}

/// Target repository on a registry.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryEndpoint {
    server: Url,
    project: String,
    repository: String,
}

impl RegistryEndpoint {
    pub fn new(
        server: &str,
        project: impl Into<String>,
        repository: impl Into<String>,
    ) -> Result<Self> {
        let mut server = Url::parse(server)
            .map_err(|e| PackError::Config(format!("Invalid registry URL '{}': {}", server, e)))?;
        if !matches!(server.scheme(), "http" | "https") {
            return Err(PackError::Config(format!(
                "Registry URL must be http or https: {}",
                server
            )));
        }
        if !server.path().ends_with('/') {
            let path = format!("{}/", server.path());
            server.set_path(&path);
        }

        let project = project.into();
        let repository = repository.into();
        if project.is_empty() {
            return Err(PackError::Validation("project name is empty".to_string()));
        }
        if repository.is_empty() {
            return Err(PackError::Validation("repository name is empty".to_string()));
        }

        Ok(Self {
            server,
            project,
            repository,
        })
    }

    pub fn server(&self) -> &Url {
        &self.server
    }

    /// `<project>/<repository>`
    pub fn name(&self) -> String {
        format!("{}/{}", self.project, self.repository)
    }

    pub fn uploads_url(&self) -> Result<Url> {
        self.join(&format!("v2/{}/blobs/uploads/", self.name()))
    }

    pub fn blob_url(&self, digest: &Digest) -> Result<Url> {
        self.join(&format!("v2/{}/blobs/{}", self.name(), digest))
    }

    pub fn manifest_url(&self, reference: &str) -> Result<Url> {
        self.join(&format!("v2/{}/manifests/{}", self.name(), reference))
    }

    /// Resolve a `Location` header value, absolute or server-relative.
    pub fn resolve(&self, location: &str) -> Result<Url> {
        self.join(location)
    }

    fn join(&self, path: &str) -> Result<Url> {
        self.server
            .join(path)
            .map_err(|e| PackError::Http(format!("Invalid URL '{}': {}", path, e)))
    }
}

/// Push settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PushOptions {
    /// Manifest reference, usually a tag
    pub tag: String,
    pub upload_mode: UploadMode,
    /// GET each blob after committing it
    pub verify: bool,
}

impl Default for PushOptions {
    fn default() -> Self {
        Self {
            tag: "latest".to_string(),
            upload_mode: UploadMode::default(),
            verify: true,
        }
    }
}

/// Result of pushing an image.
#[derive(Debug, Clone, PartialEq)]
pub struct PushResult {
    /// URL of the pushed manifest
    pub manifest_url: String,
    /// Number of blobs uploaded
    pub blobs_pushed: usize,
    /// Total blob bytes sent
    pub bytes_uploaded: u64,
    /// HTTP requests issued
    pub requests: usize,
}

#[derive(Debug, Default)]
struct PushStats {
    requests: usize,
    bytes: u64,
}

/// Pushes an image archive to one registry repository.
pub struct RegistryPusher {
    client: reqwest::Client,
    endpoint: RegistryEndpoint,
    auth: RegistryAuth,
    options: PushOptions,
}

impl RegistryPusher {
    pub fn new(
        endpoint: RegistryEndpoint,
        auth: RegistryAuth,
        options: PushOptions,
    ) -> Result<Self> {
        if options.tag.is_empty() {
            return Err(PackError::Validation("tag is empty".to_string()));
        }
        if let UploadMode::Chunked { chunk_size: 0 } = options.upload_mode {
            return Err(PackError::Validation(
                "chunk size must be greater than zero".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("ukpack/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PackError::Http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            auth,
            options,
        })
    }

    /// Upload every blob of `archive`, then its manifest.
    pub async fn push(&self, archive: &ImageArchive) -> Result<PushResult> {
        tracing::info!(
            archive = %archive.path().display(),
            registry = %self.endpoint.server(),
            repository = %self.endpoint.name(),
            tag = %self.options.tag,
            user = self.auth.username().unwrap_or("<anonymous>"),
            "Pushing image to registry"
        );

        let mut stats = PushStats::default();
        for blob in archive.blobs() {
            self.push_blob(blob, &mut stats).await?;
        }

        let manifest_url = self.push_manifest(archive, &mut stats).await?;

        tracing::info!(
            manifest_url = %manifest_url,
            blobs = archive.blobs().len(),
            bytes = stats.bytes,
            requests = stats.requests,
            "Image pushed successfully"
        );

        Ok(PushResult {
            manifest_url: manifest_url.to_string(),
            blobs_pushed: archive.blobs().len(),
            bytes_uploaded: stats.bytes,
            requests: stats.requests,
        })
    }

    async fn push_blob(&self, blob: &BlobRef, stats: &mut PushStats) -> Result<()> {
        tracing::info!(
            digest = %blob.digest,
            media_type = %blob.media_type,
            size = blob.size,
            "Uploading blob"
        );

        let mut session = self.initiate(stats).await?;

        match self.options.upload_mode {
            UploadMode::Chunked { chunk_size } => {
                self.upload_chunks(blob, &mut session, chunk_size as u64, stats)
                    .await?;
                self.commit(blob, &session, Vec::new(), stats).await?;
            }
            UploadMode::Monolithic => {
                let data = tokio::fs::read(&blob.path).await?;
                stats.bytes += data.len() as u64;
                self.commit(blob, &session, data, stats).await?;
            }
        }

        if self.options.verify {
            self.verify(blob, stats).await?;
        }
        Ok(())
    }

    /// POST a new upload session.
    async fn initiate(&self, stats: &mut PushStats) -> Result<UploadSession> {
        let url = self.endpoint.uploads_url()?;
        let response = self
            .send(self.client.post(url).header(CONTENT_LENGTH, 0), stats)
            .await?;
        expect_status(&response, StatusCode::ACCEPTED, "POST", "initiate")?;

        let location = self.location(&response)?.ok_or_else(|| {
            PackError::Http("upload initiation response has no Location header".to_string())
        })?;
        tracing::debug!(location = %location, "Upload session started");
        Ok(UploadSession::new(location))
    }

    /// PATCH the blob in consecutive chunks.
    async fn upload_chunks(
        &self,
        blob: &BlobRef,
        session: &mut UploadSession,
        chunk_size: u64,
        stats: &mut PushStats,
    ) -> Result<()> {
        let mut file = tokio::fs::File::open(&blob.path).await?;

        for range in chunk_ranges(blob.size, chunk_size)? {
            let mut chunk = vec![0u8; range.len() as usize];
            file.seek(std::io::SeekFrom::Start(range.start)).await?;
            file.read_exact(&mut chunk).await?;

            let request = self
                .client
                .patch(session.location().clone())
                .header(CONTENT_TYPE, OCTET_STREAM)
                .header(CONTENT_RANGE, range.to_string())
                .header(CONTENT_LENGTH, range.len())
                .body(chunk);
            let response = self.send(request, stats).await?;
            expect_status(
                &response,
                StatusCode::ACCEPTED,
                "PATCH",
                &format!("chunk {}", range),
            )?;

            let location = self.location(&response)?;
            session.advance(range, location)?;
            stats.bytes += range.len();

            tracing::debug!(
                digest = %blob.digest,
                range = %range,
                total = blob.size,
                "Uploaded chunk"
            );
        }

        Ok(())
    }

    /// PUT to the session location with the digest, committing the blob.
    async fn commit(
        &self,
        blob: &BlobRef,
        session: &UploadSession,
        body: Vec<u8>,
        stats: &mut PushStats,
    ) -> Result<()> {
        let request = self
            .client
            .put(session.commit_url(&blob.digest))
            .header(CONTENT_TYPE, OCTET_STREAM)
            .header(CONTENT_LENGTH, body.len())
            .body(body);
        let response = self.send(request, stats).await?;
        expect_status(&response, StatusCode::CREATED, "PUT", "commit")?;
        Ok(())
    }

    /// GET the blob back by digest.
    async fn verify(&self, blob: &BlobRef, stats: &mut PushStats) -> Result<()> {
        let url = self.endpoint.blob_url(&blob.digest)?;
        let response = self.send(self.client.get(url), stats).await?;
        expect_status(&response, StatusCode::OK, "GET", "verify")?;
        tracing::debug!(digest = %blob.digest, "Blob verified");
        Ok(())
    }

    async fn push_manifest(&self, archive: &ImageArchive, stats: &mut PushStats) -> Result<Url> {
        let url = self.endpoint.manifest_url(&self.options.tag)?;
        let content_type = match archive.manifest_media_type() {
            "" => media_type::IMAGE_MANIFEST,
            other => other,
        };

        let request = self
            .client
            .put(url.clone())
            .header(CONTENT_TYPE, content_type)
            .body(archive.manifest_bytes().to_vec());
        let response = self.send(request, stats).await?;

        if response.status() != StatusCode::CREATED {
            return Err(PackError::ManifestUpload {
                reference: self.options.tag.clone(),
                status: response.status().as_u16(),
            });
        }

        tracing::info!(digest = %archive.manifest_digest(), url = %url, "Manifest pushed");
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder, stats: &mut PushStats) -> Result<Response> {
        stats.requests += 1;
        self.auth
            .apply(request)
            .send()
            .await
            .map_err(|e| PackError::Http(e.to_string()))
    }

    fn location(&self, response: &Response) -> Result<Option<Url>> {
        match response.headers().get(LOCATION) {
            None => Ok(None),
            Some(value) => {
                let value = value
                    .to_str()
                    .map_err(|e| PackError::Http(format!("Invalid Location header: {}", e)))?;
                self.endpoint.resolve(value).map(Some)
            }
        }
    }
}

fn expect_status(
    response: &Response,
    expected: StatusCode,
    method: &str,
    stage: &str,
) -> Result<()> {
    let status = response.status();
    if status != expected {
        tracing::debug!(
            method,
            stage,
            %status,
            url = %response.url(),
            "Unexpected registry status"
        );
        return Err(PackError::BlobUpload {
            method: method.to_string(),
            stage: stage.to_string(),
            status: status.as_u16(),
        });
    }
    Ok(())
}
