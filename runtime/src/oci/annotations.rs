//! Manifest annotations describing a packaged unikernel.
//!
//! Annotations follow the `org.unikraft.*` namespace.
//!
//! # Annotation Schema
//!
//! - `org.unikraft.image.architecture` - Target CPU architecture (e.g., "x86_64")
//! - `org.unikraft.image.platform` - Target platform (e.g., "kvm", "xen")
//! - `org.unikraft.kconfig.<OPTION>` - Each enabled option of the kernel `.config`
//! - `org.opencontainers.image.title` - Kernel image file name
//!
//! # Example
//!
//! A `.config` containing
//!
//! ```text
//! CONFIG_UK_NAME="helloworld"
//! CONFIG_LIBUKDEBUG=y
//! # CONFIG_LIBUKNETDEV is not set
//! ```
//!
//! yields `org.unikraft.kconfig.CONFIG_UK_NAME=helloworld` and
//! `org.unikraft.kconfig.CONFIG_LIBUKDEBUG=y`.

use std::collections::BTreeMap;
use std::path::Path;

use ukpack_core::error::{PackError, Result};

use super::media_type::ANNOTATION_TITLE;

pub const ANNOTATION_ARCHITECTURE: &str = "org.unikraft.image.architecture";
pub const ANNOTATION_PLATFORM: &str = "org.unikraft.image.platform";
pub const ANNOTATION_KCONFIG_PREFIX: &str = "org.unikraft.kconfig.";

/// Annotations attached to the image manifest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageAnnotations {
    /// Target CPU architecture
    pub architecture: Option<String>,

    /// Target platform
    pub platform: Option<String>,

    /// Kernel image file name
    pub title: Option<String>,

    /// Enabled kernel configuration options
    pub kconfig: BTreeMap<String, String>,
}

impl ImageAnnotations {
    /// Flatten into the manifest annotation map.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();

        if let Some(arch) = &self.architecture {
            map.insert(ANNOTATION_ARCHITECTURE.to_string(), arch.clone());
        }
        if let Some(plat) = &self.platform {
            map.insert(ANNOTATION_PLATFORM.to_string(), plat.clone());
        }
        if let Some(title) = &self.title {
            map.insert(ANNOTATION_TITLE.to_string(), title.clone());
        }
        for (key, value) in &self.kconfig {
            map.insert(format!("{}{}", ANNOTATION_KCONFIG_PREFIX, key), value.clone());
        }

        map
    }
}

/// Read the enabled options of a kernel `.config` file.
pub fn read_kconfig(path: &Path) -> Result<BTreeMap<String, String>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        PackError::Validation(format!(
            "Failed to read kernel config {}: {}",
            path.display(),
            e
        ))
    })?;
    Ok(parse_kconfig(&content))
}

/// Parse `.config` text, keeping `CONFIG_*=value` lines.
pub fn parse_kconfig(content: &str) -> BTreeMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .filter(|(key, _)| key.starts_with("CONFIG_"))
        .map(|(key, value)| {
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            (key.trim().to_string(), value.to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
#
# Automatically generated file; DO NOT EDIT.
# Unikraft/0.5.0 Configuration
#
CONFIG_UK_FULLVERSION="0.5.0~c0ffee"
CONFIG_UK_NAME="helloworld"
CONFIG_ARCH_X86_64=y
# CONFIG_ARCH_ARM_64 is not set
CONFIG_LIBUKDEBUG=y
CONFIG_LIBUKALLOC_IFMALLOC_STACK=0x8000

NOT_A_CONFIG=1
"#;

    #[test]
    fn test_parse_kconfig_enabled_options() {
        let options = parse_kconfig(SAMPLE);

        assert_eq!(options.get("CONFIG_UK_NAME"), Some(&"helloworld".to_string()));
        assert_eq!(options.get("CONFIG_ARCH_X86_64"), Some(&"y".to_string()));
        assert_eq!(
            options.get("CONFIG_LIBUKALLOC_IFMALLOC_STACK"),
            Some(&"0x8000".to_string())
        );
        assert_eq!(
            options.get("CONFIG_UK_FULLVERSION"),
            Some(&"0.5.0~c0ffee".to_string())
        );
    }

    #[test]
    fn test_parse_kconfig_skips_comments_and_foreign_keys() {
        let options = parse_kconfig(SAMPLE);
        assert!(!options.contains_key("CONFIG_ARCH_ARM_64"));
        assert!(!options.contains_key("NOT_A_CONFIG"));
        assert_eq!(options.len(), 5);
    }

    #[test]
    fn test_parse_kconfig_empty() {
        assert!(parse_kconfig("").is_empty());
    }

    #[test]
    fn test_read_kconfig_missing_file() {
        let tmp = TempDir::new().unwrap();
        let err = read_kconfig(&tmp.path().join(".config")).unwrap_err();
        assert!(matches!(err, PackError::Validation(_)));
    }

    #[test]
    fn test_to_map() {
        let mut annotations = ImageAnnotations {
            architecture: Some("x86_64".to_string()),
            platform: Some("kvm".to_string()),
            title: Some("helloworld_kvm-x86_64".to_string()),
            ..Default::default()
        };
        annotations
            .kconfig
            .insert("CONFIG_LIBUKDEBUG".to_string(), "y".to_string());

        let map = annotations.to_map();
        assert_eq!(map.get(ANNOTATION_ARCHITECTURE), Some(&"x86_64".to_string()));
        assert_eq!(map.get(ANNOTATION_PLATFORM), Some(&"kvm".to_string()));
        assert_eq!(
            map.get("org.unikraft.kconfig.CONFIG_LIBUKDEBUG"),
            Some(&"y".to_string())
        );
        assert_eq!(
            map.get("org.opencontainers.image.title"),
            Some(&"helloworld_kvm-x86_64".to_string())
        );
    }

    #[test]
    fn test_empty_annotations() {
        assert!(ImageAnnotations::default().to_map().is_empty());
    }
}
