//! ukpack Core - Foundational Types
//!
//! Error taxonomy and layered settings shared by the runtime and CLI crates.

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::{PackageSettings, RegistrySettings, Settings};
pub use error::{PackError, Result};

/// ukpack version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
