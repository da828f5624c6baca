//! Layered settings for the `package` and `push` commands.
//!
//! Values come from an optional YAML file, then environment variables, then
//! command-line flags (applied by the CLI). No registry address or credential
//! is compiled in.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{PackError, Result};

/// Environment variable pointing at an explicit settings file.
pub const CONFIG_PATH_ENV: &str = "UKPACK_CONFIG";

/// Environment variable overriding the registry URL.
pub const REGISTRY_URL_ENV: &str = "UKPACK_REGISTRY_URL";

/// Environment variable overriding the registry project.
pub const REGISTRY_PROJECT_ENV: &str = "UKPACK_REGISTRY_PROJECT";

/// Registry username; only used together with [`REGISTRY_PASSWORD_ENV`].
pub const REGISTRY_USERNAME_ENV: &str = "REGISTRY_USERNAME";

/// Registry password; only used together with [`REGISTRY_USERNAME_ENV`].
pub const REGISTRY_PASSWORD_ENV: &str = "REGISTRY_PASSWORD";

/// Default upload chunk size: 256 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// Top-level settings file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Image build defaults
    pub package: PackageSettings,

    /// Registry push defaults
    pub registry: RegistrySettings,
}

/// Defaults for `ukpack package`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageSettings {
    /// Digest algorithm name (sha256, sha384, sha512)
    pub algorithm: String,

    /// Compression name (tar, gzip)
    pub compression: String,

    /// Directory receiving built archives
    pub output_dir: PathBuf,
}

impl Default for PackageSettings {
    fn default() -> Self {
        Self {
            algorithm: "sha256".to_string(),
            compression: "gzip".to_string(),
            output_dir: PathBuf::from("package"),
        }
    }
}

/// Defaults for `ukpack push`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    /// Registry base URL (e.g. "https://registry.example.com")
    pub server: Option<String>,

    /// Project (namespace) under which repositories live
    pub project: String,

    /// Basic auth username
    pub username: Option<String>,

    /// Basic auth password
    pub password: Option<String>,

    /// Bytes per PATCH request
    pub chunk_size: usize,

    /// Manifest reference to push
    pub tag: String,

    /// GET each blob back after committing it
    pub verify: bool,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            server: None,
            project: "library".to_string(),
            username: None,
            password: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            tag: "latest".to_string(),
            verify: true,
        }
    }
}

impl Settings {
    /// Default settings file location (`~/.ukpack/config.yaml`).
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".ukpack").join("config.yaml"))
    }

    /// Load settings from `$UKPACK_CONFIG` or the default path, then apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .or_else(Self::default_path);

        let mut settings = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok());
        Ok(settings)
    }

    /// Read a settings file. A missing file yields the defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No settings file, using defaults");
            return Ok(Self::default());
        }

        let data = std::fs::read_to_string(path).map_err(|e| {
            PackError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let settings: Settings = serde_yaml::from_str(&data).map_err(|e| {
            PackError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        settings.validate()?;

        tracing::debug!(path = %path.display(), "Loaded settings file");
        Ok(settings)
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(REGISTRY_URL_ENV) {
            self.registry.server = Some(url);
        }
        if let Some(project) = lookup(REGISTRY_PROJECT_ENV) {
            self.registry.project = project;
        }
        if let (Some(user), Some(pass)) =
            (lookup(REGISTRY_USERNAME_ENV), lookup(REGISTRY_PASSWORD_ENV))
        {
            self.registry.username = Some(user);
            self.registry.password = Some(pass);
        }
    }

    fn validate(&self) -> Result<()> {
        if self.registry.chunk_size == 0 {
            return Err(PackError::Config(
                "registry.chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.registry.project.is_empty() {
            return Err(PackError::Config(
                "registry.project must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
