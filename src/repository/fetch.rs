// src/repository/fetch.rs

//! Fetch resolver for native "obtain this file" requests
//!
//! Resolution order:
//! 1. Pick a destination (suggested path, or the database/package cache by
//!    file suffix).
//! 2. An existing destination satisfies a non-forced request without any
//!    network access.
//! 3. Absolute URLs are fetched directly.
//! 4. Relative names are matched to a repository by name prefix, then by
//!    scanning repository package listings for the exact file name.
//! 5. Mirrors of the matched repository (or of every repository, in order,
//!    if none matched) are tried in registration order until one succeeds.

use super::client::RepositoryClient;
use crate::callback::{FetchOutcome, FetchRequest};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use url::Url;

/// File suffixes that belong in the database cache
const DATABASE_SUFFIXES: &[&str] = &[".db", ".db.sig", ".files", ".files.sig"];

/// A repository and its expanded mirror URLs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryMirrors {
    pub name: String,
    pub servers: Vec<String>,
}

/// Source of repository and mirror information
///
/// The native session implements this over its registered databases; a
/// static list covers configuration-only use and tests.
pub trait MirrorSource {
    /// Registered repositories in priority order
    fn repositories(&self) -> Vec<RepositoryMirrors>;

    /// Repository whose package listing has an archive named `file_name`
    fn repository_for_file(&self, file_name: &str) -> Option<String>;
}

/// Fixed repository list
#[derive(Debug, Clone, Default)]
pub struct StaticMirrors {
    repositories: Vec<RepositoryMirrors>,
    files: HashMap<String, String>,
}

impl StaticMirrors {
    pub fn new(repositories: Vec<RepositoryMirrors>) -> Self {
        Self {
            repositories,
            files: HashMap::new(),
        }
    }

    /// Record that `repository` provides the archive `file_name`
    pub fn with_file(mut self, file_name: impl Into<String>, repository: impl Into<String>) -> Self {
        self.files.insert(file_name.into(), repository.into());
        self
    }
}

impl MirrorSource for StaticMirrors {
    fn repositories(&self) -> Vec<RepositoryMirrors> {
        self.repositories.clone()
    }

    fn repository_for_file(&self, file_name: &str) -> Option<String> {
        self.files.get(file_name).cloned()
    }
}

/// Cache directories for fetched files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePaths {
    /// Sync database files (`<db_path>/sync`)
    pub database: PathBuf,
    /// Package archives
    pub packages: PathBuf,
}

impl CachePaths {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            database: config.database_cache(),
            packages: config.cache_dir.clone(),
        }
    }
}

/// True if `name` is a sync database or database signature file
pub fn is_database_file(name: &str) -> bool {
    DATABASE_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

/// Join a mirror base and a file name with exactly one slash
pub fn join_url(base: &str, name: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        name.trim_start_matches('/')
    )
}

/// Parse `identifier` as an absolute URL
fn absolute_url(identifier: &str) -> Option<Url> {
    Url::parse(identifier)
        .ok()
        .filter(|url| url.has_host() || url.scheme() == "file")
}

/// Final path component of an identifier (URL or relative name)
fn file_name_of(identifier: &str) -> String {
    if let Some(url) = absolute_url(identifier)
        && let Some(last) = url.path_segments().and_then(|mut segments| segments.next_back())
        && !last.is_empty()
    {
        return last.to_string();
    }
    Path::new(identifier)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| identifier.to_string())
}

/// Resolves fetch requests against mirrors
pub struct FetchResolver<M> {
    mirrors: M,
    caches: CachePaths,
    client: RepositoryClient,
}

impl<M: MirrorSource> FetchResolver<M> {
    /// Create a resolver with a default HTTP client
    pub fn new(mirrors: M, caches: CachePaths) -> Result<Self> {
        Ok(Self::with_client(mirrors, caches, RepositoryClient::new()?))
    }

    pub fn with_client(mirrors: M, caches: CachePaths, client: RepositoryClient) -> Self {
        Self {
            mirrors,
            caches,
            client,
        }
    }

    /// Where a request's file ends up
    ///
    /// A suggested directory gets the identifier's file name appended.
    pub fn destination(&self, request: &FetchRequest) -> PathBuf {
        let file_name = file_name_of(&request.identifier);
        match &request.destination {
            Some(path) if path.is_dir() || path.as_os_str().to_string_lossy().ends_with('/') => {
                path.join(file_name)
            }
            Some(path) => path.clone(),
            None if is_database_file(&file_name) => self.caches.database.join(file_name),
            None => self.caches.packages.join(file_name),
        }
    }

    /// Place the requested file at its destination
    ///
    /// An existing destination satisfies a non-forced request as
    /// [`FetchOutcome::UpToDate`]. Failures of individual mirrors are logged
    /// and skipped; the call fails only when every candidate failed.
    pub fn resolve(&self, request: &FetchRequest) -> Result<FetchOutcome> {
        let dest = self.destination(request);

        if !request.force && dest.exists() {
            debug!("{} already present at {}", request.identifier, dest.display());
            return Ok(FetchOutcome::UpToDate(dest));
        }

        if let Some(url) = absolute_url(&request.identifier) {
            self.fetch_url(&url, &dest)?;
            return Ok(FetchOutcome::Fetched(dest));
        }

        let name = request.identifier.trim_start_matches('/');
        let candidates = self.candidates(name);
        if candidates.iter().all(|repo| repo.servers.is_empty()) {
            return Err(Error::Transport(format!("no mirrors registered for {name}")));
        }

        for repo in &candidates {
            for server in &repo.servers {
                let url = join_url(server, name);
                match self.client.download_file(&url, &dest) {
                    Ok(_) => {
                        info!("Fetched {} from {}", name, repo.name);
                        return Ok(FetchOutcome::Fetched(dest));
                    }
                    Err(e) => warn!("Mirror {} failed: {}", server, e),
                }
            }
        }

        Err(Error::Transport(format!("all mirrors failed for {name}")))
    }

    fn fetch_url(&self, url: &Url, dest: &Path) -> Result<()> {
        if url.scheme() == "file" {
            let source = url
                .to_file_path()
                .map_err(|_| Error::Transport(format!("invalid file URL {url}")))?;
            self.client.copy_file(&source, dest)?;
        } else {
            self.client.download_file(url.as_str(), dest)?;
        }
        Ok(())
    }

    /// Repositories to try for a relative name, in order
    fn candidates(&self, name: &str) -> Vec<RepositoryMirrors> {
        let repositories = self.mirrors.repositories();

        // "core.db" belongs to "core"; the separator keeps "coreutils-*" from matching.
        let by_prefix = repositories
            .iter()
            .filter(|repo| {
                name.strip_prefix(repo.name.as_str())
                    .is_some_and(|rest| rest.starts_with('.'))
            })
            .max_by_key(|repo| repo.name.len());
        if let Some(repo) = by_prefix {
            debug!("{} matched repository {} by name", name, repo.name);
            return vec![repo.clone()];
        }

        if let Some(owner) = self.mirrors.repository_for_file(name)
            && let Some(repo) = repositories.iter().find(|repo| repo.name == owner)
        {
            debug!("{} listed in repository {}", name, repo.name);
            return vec![repo.clone()];
        }

        debug!("{} not attributed to a repository; trying all", name);
        repositories
    }
}
