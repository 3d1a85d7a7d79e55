// src/client.rs

//! Sync client: the top-level orchestrator
//!
//! Owns at most one library session, opened by [`SyncClient::initialize`]
//! and reopened on every re-initialize (the previous session is always
//! released first). Package operations look up their target before any
//! transaction opens and run through [`transaction::execute`], which
//! guarantees release.
//!
//! Native, lookup and transport failures are wrapped into
//! [`Error::Operation`] naming the attempted operation; protocol and
//! authentication failures pass through unchanged.

use crate::callback::CallbackRelay;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::package::{PackageInfo, PackageView, UpdateInfo};
use crate::repository::CachePaths;
use crate::session::{Connector, Session};
use crate::transaction::{self, TransFlags, TransactionOutcome};
use std::cmp::Ordering;
use std::fs;
use std::io;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Orchestrates sessions, transactions and callbacks
pub struct SyncClient<C: Connector> {
    connector: C,
    config: ClientConfig,
    relay: Arc<CallbackRelay>,
    session: Option<C::Session>,
}

impl<C: Connector> SyncClient<C> {
    /// Create a client; no session is opened until first use
    pub fn new(connector: C, config: ClientConfig, relay: CallbackRelay) -> Self {
        Self {
            connector,
            config,
            relay: Arc::new(relay),
            session: None,
        }
    }

    /// Active configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// True while a session is open
    pub fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    /// Open a fresh session
    ///
    /// Releases any previous session, removes a stale lock file, then
    /// applies architecture, cache/hook directories, signature levels,
    /// callbacks and the configured repositories.
    pub fn initialize(&mut self) -> Result<()> {
        self.initialize_inner()
            .map_err(|e| wrap("initialize the package library", e))
    }

    fn initialize_inner(&mut self) -> Result<()> {
        self.shutdown();
        self.remove_stale_lock();

        let config = &self.config;
        info!(
            "Initializing package library (root {}, db {})",
            config.root_path.display(),
            config.db_path.display()
        );

        let mut session = self.connector.connect(&config.root_path, &config.db_path)?;

        let arch = config.resolved_architecture();
        debug!("Using architecture {}", arch);
        session.set_architecture(&arch)?;
        session.add_cache_dir(&config.cache_dir)?;
        for dir in &config.hook_dirs {
            session.add_hook_dir(dir)?;
        }
        session.set_signature_levels(config.signature_levels()?)?;
        session.install_callbacks(Arc::clone(&self.relay), CachePaths::from_config(config))?;

        for repo in &config.repositories {
            session.register_repository(
                &repo.name,
                config.repository_sig_level(repo)?,
                repo.usage_flags()?,
            )?;
            for server in repo.expanded_servers(&arch) {
                debug!("Adding mirror {} to {}", server, repo.name);
                session.add_server(&repo.name, &server)?;
            }
        }

        self.session = Some(session);
        Ok(())
    }

    fn remove_stale_lock(&self) {
        let lock = self.config.lock_file();
        match fs::remove_file(&lock) {
            Ok(()) => warn!("Removed stale lock file {}", lock.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => debug!("Could not remove lock file {}: {}", lock.display(), e),
        }
    }

    /// Release the session, if any
    pub fn shutdown(&mut self) {
        if self.session.take().is_some() {
            debug!("Released package library session");
        }
    }

    fn session(&mut self) -> Result<&mut C::Session> {
        if self.session.is_none() {
            self.initialize_inner()?;
        }
        self.session
            .as_mut()
            .ok_or_else(|| Error::InvalidState("session missing after initialize".to_string()))
    }

    fn flags_or_default(&self, flags: Option<TransFlags>) -> Result<TransFlags> {
        match flags {
            Some(flags) => Ok(flags),
            None => self.config.transaction_flags(),
        }
    }

    /// Refresh every registered repository's metadata
    pub fn sync(&mut self, force: bool) -> Result<()> {
        self.session()
            .and_then(|session| session.update_databases(force))
            .map_err(|e| wrap("synchronize package databases", e))?;
        info!("Package databases synchronized");
        Ok(())
    }

    /// Install a package from the sync repositories with default flags
    pub fn install(&mut self, name: &str) -> Result<TransactionOutcome> {
        self.install_with_flags(name, None)
    }

    /// Install a package with explicit flags (`None` uses configured defaults)
    pub fn install_with_flags(
        &mut self,
        name: &str,
        flags: Option<TransFlags>,
    ) -> Result<TransactionOutcome> {
        let action = format!("install '{name}'");
        let outcome = self.install_inner(name, flags).map_err(|e| wrap(&action, e))?;
        info!("Installed {}", name);
        Ok(outcome)
    }

    fn install_inner(&mut self, name: &str, flags: Option<TransFlags>) -> Result<TransactionOutcome> {
        let flags = self.flags_or_default(flags)?;
        let session = self.session()?;
        let package = session
            .find_sync_package(name)
            .ok_or_else(|| Error::NotFound(format!("package '{name}' in sync repositories")))?;
        transaction::execute(session, flags, |txn| txn.add_package(&package))
    }

    /// Remove an installed package with default flags
    pub fn remove(&mut self, name: &str) -> Result<TransactionOutcome> {
        self.remove_with_flags(name, None)
    }

    /// Remove an installed package with explicit flags
    pub fn remove_with_flags(
        &mut self,
        name: &str,
        flags: Option<TransFlags>,
    ) -> Result<TransactionOutcome> {
        let action = format!("remove '{name}'");
        let outcome = self.remove_inner(name, flags).map_err(|e| wrap(&action, e))?;
        info!("Removed {}", name);
        Ok(outcome)
    }

    fn remove_inner(&mut self, name: &str, flags: Option<TransFlags>) -> Result<TransactionOutcome> {
        let flags = self.flags_or_default(flags)?;
        let session = self.session()?;
        let package = session
            .find_local_package(name)
            .ok_or_else(|| Error::NotFound(format!("installed package '{name}'")))?;
        transaction::execute(session, flags, |txn| txn.remove_package(&package))
    }

    /// Upgrade every installed package with default flags
    pub fn update_all(&mut self) -> Result<TransactionOutcome> {
        self.update_all_with_flags(None)
    }

    /// Upgrade every installed package with explicit flags
    ///
    /// Succeeds without preparing when nothing needs upgrading.
    pub fn update_all_with_flags(&mut self, flags: Option<TransFlags>) -> Result<TransactionOutcome> {
        let outcome = self
            .flags_or_default(flags)
            .and_then(|flags| {
                let session = self.session()?;
                transaction::execute(session, flags, |txn| txn.sysupgrade(false))
            })
            .map_err(|e| wrap("upgrade the system", e))?;

        match outcome {
            TransactionOutcome::NothingToDo => info!("System is up to date"),
            TransactionOutcome::Committed => info!("System upgraded"),
        }
        Ok(outcome)
    }

    /// Installed packages with a strictly newer sync version
    pub fn packages_needing_update(&mut self) -> Result<Vec<UpdateInfo>> {
        let session = self
            .session()
            .map_err(|e| wrap("check for updates", e))?;

        let updates: Vec<UpdateInfo> = session
            .installed_packages()
            .iter()
            .filter_map(|installed| {
                let candidate = session.newer_version(installed)?;
                let current_version = installed.version();
                let new_version = candidate.version();
                if session.compare_versions(&new_version, &current_version) != Ordering::Greater {
                    return None;
                }
                Some(UpdateInfo {
                    name: installed.name(),
                    current_version,
                    new_version,
                    repository: candidate.repository(),
                    download_size: candidate.size(),
                })
            })
            .collect();

        debug!("{} package(s) need updating", updates.len());
        Ok(updates)
    }

    /// Snapshot of every installed package
    pub fn installed_packages(&mut self) -> Result<Vec<PackageInfo>> {
        let session = self
            .session()
            .map_err(|e| wrap("list installed packages", e))?;
        Ok(session
            .installed_packages()
            .iter()
            .map(PackageView::to_info)
            .collect())
    }

    /// Look up a package by name in the sync repositories
    pub fn find_package(&mut self, name: &str) -> Result<PackageInfo> {
        self.session()
            .and_then(|session| {
                session
                    .find_sync_package(name)
                    .map(|package| package.to_info())
                    .ok_or_else(|| Error::NotFound(format!("package '{name}' in sync repositories")))
            })
            .map_err(|e| wrap(&format!("find '{name}'"), e))
    }
}

impl<C: Connector> Drop for SyncClient<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Attach the attempted operation to failures that the client translates
fn wrap(action: &str, err: Error) -> Error {
    if err.is_operation_failure() {
        Error::Operation {
            action: action.to_string(),
            source: Box::new(err),
        }
    } else {
        err
    }
}
