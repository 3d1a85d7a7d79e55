// src/package.rs

//! Backend-independent package views
//!
//! [`PackageView`] is implemented by the non-owning native handle and by
//! test doubles. [`PackageInfo`] is an owned snapshot that is safe to keep
//! after the session is gone and to send across the worker channel.

use serde::{Deserialize, Serialize};

/// Repository name reported for packages without an owning sync database
pub const LOCAL_REPOSITORY: &str = "local";

/// Read access to package fields
///
/// Implementations compute every field on demand; nothing is cached across
/// calls.
pub trait PackageView {
    /// Package name
    fn name(&self) -> String;

    /// Full version string (epoch:pkgver-pkgrel)
    fn version(&self) -> String;

    /// Download size in bytes (installed size for local packages)
    fn size(&self) -> i64;

    /// One-line description
    fn description(&self) -> Option<String>;

    /// Upstream URL
    fn url(&self) -> Option<String>;

    /// Dependency strings this package replaces
    fn replaces(&self) -> Vec<String>;

    /// Name of the owning repository, or "local"
    fn repository(&self) -> String;

    /// Owned snapshot of every field
    fn to_info(&self) -> PackageInfo {
        PackageInfo {
            name: self.name(),
            version: self.version(),
            size: self.size(),
            description: self.description(),
            url: self.url(),
            replaces: self.replaces(),
            repository: self.repository(),
        }
    }
}

/// Owned package snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub name: String,
    pub version: String,
    pub size: i64,
    pub description: Option<String>,
    pub url: Option<String>,
    #[serde(default)]
    pub replaces: Vec<String>,
    pub repository: String,
}

/// An installed package with a strictly newer version available
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateInfo {
    pub name: String,
    pub current_version: String,
    pub new_version: String,
    pub repository: String,
    pub download_size: i64,
}
