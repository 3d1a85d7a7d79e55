// src/session.rs

//! Library session seam
//!
//! [`Session`] is the surface of one native library handle that the sync
//! client drives; [`Connector`] opens sessions. The native implementation
//! lives in [`crate::alpm`]; tests use in-memory fakes.

use crate::callback::CallbackRelay;
use crate::config::{DbUsage, SigLevel, SignatureLevels};
use crate::error::Result;
use crate::package::PackageView;
use crate::repository::CachePaths;
use crate::transaction::TransactionBackend;
use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;

/// One open library handle
///
/// Dropping the session releases the native handle.
pub trait Session: TransactionBackend<Package: PackageView> {
    /// Set the package architecture
    fn set_architecture(&mut self, arch: &str) -> Result<()>;

    /// Add a package cache directory
    fn add_cache_dir(&mut self, dir: &Path) -> Result<()>;

    /// Add a hook directory
    fn add_hook_dir(&mut self, dir: &Path) -> Result<()>;

    /// Apply the default, local-file and remote-file signature levels
    fn set_signature_levels(&mut self, levels: SignatureLevels) -> Result<()>;

    /// Route native callbacks to `relay`, with fetches resolved into `caches`
    fn install_callbacks(&mut self, relay: Arc<CallbackRelay>, caches: CachePaths) -> Result<()>;

    /// Register a sync repository
    fn register_repository(&mut self, name: &str, sig_level: SigLevel, usage: DbUsage)
    -> Result<()>;

    /// Append a mirror URL to a registered repository
    fn add_server(&mut self, repository: &str, url: &str) -> Result<()>;

    /// Refresh metadata of every registered repository
    fn update_databases(&mut self, force: bool) -> Result<()>;

    /// First package named `name` across sync repositories, in priority order
    fn find_sync_package(&self, name: &str) -> Option<Self::Package>;

    /// Installed package named `name`
    fn find_local_package(&self, name: &str) -> Option<Self::Package>;

    /// Every installed package
    fn installed_packages(&self) -> Vec<Self::Package>;

    /// Sync package that would upgrade `installed`, if any
    fn newer_version(&self, installed: &Self::Package) -> Option<Self::Package>;

    /// Compare two version strings
    fn compare_versions(&self, a: &str, b: &str) -> Ordering;
}

/// Opens library sessions
pub trait Connector {
    type Session: Session;

    /// Open a session against an installation root and database directory
    fn connect(&self, root: &Path, db_path: &Path) -> Result<Self::Session>;
}
