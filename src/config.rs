// src/config.rs

//! Client configuration
//!
//! Paths, architecture, signature levels and the repository/mirror list that
//! feed [`SyncClient::initialize`](crate::SyncClient::initialize). The file
//! format is TOML:
//!
//! ```toml
//! root_path = "/"
//! db_path = "/var/lib/pacman/"
//! cache_dir = "/var/cache/pacman/pkg/"
//! architecture = "auto"
//! sig_level = ["Required", "DatabaseOptional"]
//!
//! [[repositories]]
//! name = "core"
//! servers = ["https://geo.mirror.pkgbuild.com/$repo/os/$arch"]
//! ```

use crate::error::{Error, Result};
use crate::transaction::TransFlags;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/shelly/shelly.toml";

/// Sentinel that resolves to the running platform's architecture
pub const AUTO_ARCHITECTURE: &str = "auto";

/// Name of the native lock file inside the database directory
pub const LOCK_FILE_NAME: &str = "db.lck";

/// Top-level client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Installation root (usually "/")
    pub root_path: PathBuf,
    /// Native database directory
    pub db_path: PathBuf,
    /// Package cache directory
    pub cache_dir: PathBuf,
    /// Additional hook directories
    pub hook_dirs: Vec<PathBuf>,
    /// Architecture, or "auto"
    pub architecture: String,
    /// Default signature level tokens
    pub sig_level: Vec<String>,
    /// Signature level tokens for local package files
    pub local_file_sig_level: Vec<String>,
    /// Signature level tokens for downloaded package files
    pub remote_file_sig_level: Vec<String>,
    /// Transaction flags applied when the caller does not override them
    pub default_flags: Vec<String>,
    /// Sync repositories in priority order
    pub repositories: Vec<RepositoryConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            root_path: PathBuf::from("/"),
            db_path: PathBuf::from("/var/lib/pacman/"),
            cache_dir: PathBuf::from("/var/cache/pacman/pkg/"),
            hook_dirs: Vec::new(),
            architecture: AUTO_ARCHITECTURE.to_string(),
            sig_level: vec!["Required".to_string(), "DatabaseOptional".to_string()],
            local_file_sig_level: vec!["Optional".to_string()],
            remote_file_sig_level: vec!["Required".to_string()],
            default_flags: vec!["NoScriptlet".to_string(), "NoHooks".to_string()],
            repositories: Vec::new(),
        }
    }
}

/// A sync repository and its mirrors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Repository name (e.g. "core")
    pub name: String,
    /// Mirror URL templates; `$repo` and `$arch` are substituted
    #[serde(default)]
    pub servers: Vec<String>,
    /// Per-repository signature level tokens (falls back to the default level)
    #[serde(default)]
    pub sig_level: Option<Vec<String>>,
    /// Usage tokens: Sync, Search, Install, Upgrade, All (empty means All)
    #[serde(default)]
    pub usage: Vec<String>,
}

impl RepositoryConfig {
    /// Create a repository with the given mirror templates
    pub fn new(name: impl Into<String>, servers: Vec<String>) -> Self {
        Self {
            name: name.into(),
            servers,
            sig_level: None,
            usage: Vec::new(),
        }
    }

    /// Mirror URLs with placeholders substituted, in registration order
    pub fn expanded_servers(&self, arch: &str) -> Vec<String> {
        self.servers
            .iter()
            .map(|server| expand_server(server, &self.name, arch))
            .collect()
    }

    /// Parsed usage flags
    pub fn usage_flags(&self) -> Result<DbUsage> {
        DbUsage::from_tokens(&self.usage)
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, or from the default location if it exists
    ///
    /// A missing default file yields built-in defaults; an explicitly
    /// requested file must exist.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Self::load(default)
                } else {
                    debug!("No configuration at {}, using defaults", DEFAULT_CONFIG_PATH);
                    Ok(Self::default())
                }
            }
        }
    }

    fn validate(&self) -> Result<()> {
        for (i, repo) in self.repositories.iter().enumerate() {
            if repo.name.trim().is_empty() {
                return Err(Error::Config(format!("repository #{} has an empty name", i + 1)));
            }
            if self.repositories[..i].iter().any(|other| other.name == repo.name) {
                return Err(Error::Config(format!("repository '{}' is listed twice", repo.name)));
            }
        }
        self.signature_levels()?;
        self.transaction_flags()?;
        Ok(())
    }

    /// Path of the native lock file
    pub fn lock_file(&self) -> PathBuf {
        self.db_path.join(LOCK_FILE_NAME)
    }

    /// Directory holding sync database files
    pub fn database_cache(&self) -> PathBuf {
        self.db_path.join("sync")
    }

    /// Architecture with the "auto" sentinel resolved
    pub fn resolved_architecture(&self) -> String {
        resolve_architecture(&self.architecture)
    }

    /// Parsed signature levels
    pub fn signature_levels(&self) -> Result<SignatureLevels> {
        let default = SigLevel::from_tokens(SigLevel::PACMAN_DEFAULT, &self.sig_level)?;
        Ok(SignatureLevels {
            default,
            local_file: SigLevel::from_tokens(default, &self.local_file_sig_level)?,
            remote_file: SigLevel::from_tokens(default, &self.remote_file_sig_level)?,
        })
    }

    /// Signature level for one repository
    pub fn repository_sig_level(&self, repo: &RepositoryConfig) -> Result<SigLevel> {
        match &repo.sig_level {
            Some(tokens) => SigLevel::from_tokens(self.signature_levels()?.default, tokens),
            None => Ok(SigLevel::USE_DEFAULT),
        }
    }

    /// Default transaction flags
    pub fn transaction_flags(&self) -> Result<TransFlags> {
        TransFlags::from_names(&self.default_flags)
    }
}

/// Substitute `$repo` and `$arch` in a mirror template
pub fn expand_server(template: &str, repo: &str, arch: &str) -> String {
    template.replace("$repo", repo).replace("$arch", arch)
}

/// Resolve the configured architecture, mapping "auto" to the host platform
pub fn resolve_architecture(configured: &str) -> String {
    let configured = configured.trim();
    if configured.is_empty() || configured.eq_ignore_ascii_case(AUTO_ARCHITECTURE) {
        canonical_architecture(std::env::consts::ARCH).to_string()
    } else {
        configured.to_string()
    }
}

/// Canonical package architecture name for a host platform name
///
/// Unrecognized platforms fall back to x86_64.
pub fn canonical_architecture(host: &str) -> &'static str {
    match host {
        "x86_64" | "amd64" | "x64" => "x86_64",
        "aarch64" | "arm64" => "aarch64",
        _ => "x86_64",
    }
}

/// Native signature verification level bitmask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SigLevel(pub i32);

impl SigLevel {
    pub const PACKAGE: i32 = 1;
    pub const PACKAGE_OPTIONAL: i32 = 1 << 1;
    pub const PACKAGE_MARGINAL_OK: i32 = 1 << 2;
    pub const PACKAGE_UNKNOWN_OK: i32 = 1 << 3;
    pub const DATABASE: i32 = 1 << 10;
    pub const DATABASE_OPTIONAL: i32 = 1 << 11;
    pub const DATABASE_MARGINAL_OK: i32 = 1 << 12;
    pub const DATABASE_UNKNOWN_OK: i32 = 1 << 13;

    /// Defer to the session default
    pub const USE_DEFAULT: SigLevel = SigLevel(1 << 30);

    /// pacman's compiled-in default: everything optional
    pub const PACMAN_DEFAULT: SigLevel = SigLevel(
        Self::PACKAGE | Self::PACKAGE_OPTIONAL | Self::DATABASE | Self::DATABASE_OPTIONAL,
    );

    /// Raw bits for the native call
    pub fn bits(self) -> i32 {
        self.0
    }

    /// True if package signatures are checked at all
    pub fn checks_packages(self) -> bool {
        self.0 & Self::PACKAGE != 0
    }

    /// Copy with every package-signature bit cleared
    pub fn without_package_checks(self) -> Self {
        SigLevel(
            self.0
                & !(Self::PACKAGE
                    | Self::PACKAGE_OPTIONAL
                    | Self::PACKAGE_MARGINAL_OK
                    | Self::PACKAGE_UNKNOWN_OK),
        )
    }

    /// Apply pacman-style tokens on top of `base`
    ///
    /// Tokens: `Never`, `Optional`, `Required`, `TrustedOnly`, `TrustAll`,
    /// each optionally prefixed with `Package` or `Database`.
    pub fn from_tokens(base: SigLevel, tokens: &[String]) -> Result<Self> {
        let mut level = base.0 & !Self::USE_DEFAULT.0;
        for token in tokens {
            let (package, database, word) = if let Some(rest) = token.strip_prefix("Package") {
                (true, false, rest)
            } else if let Some(rest) = token.strip_prefix("Database") {
                (false, true, rest)
            } else {
                (true, true, token.as_str())
            };

            let mut apply = |pkg_bits: i32, db_bits: i32, set: bool| {
                let mut bits = 0;
                if package {
                    bits |= pkg_bits;
                }
                if database {
                    bits |= db_bits;
                }
                if set {
                    level |= bits;
                } else {
                    level &= !bits;
                }
            };

            match word {
                "Never" => apply(Self::PACKAGE, Self::DATABASE, false),
                "Optional" => apply(
                    Self::PACKAGE | Self::PACKAGE_OPTIONAL,
                    Self::DATABASE | Self::DATABASE_OPTIONAL,
                    true,
                ),
                "Required" => {
                    apply(Self::PACKAGE, Self::DATABASE, true);
                    apply(Self::PACKAGE_OPTIONAL, Self::DATABASE_OPTIONAL, false);
                }
                "TrustedOnly" => apply(
                    Self::PACKAGE_MARGINAL_OK | Self::PACKAGE_UNKNOWN_OK,
                    Self::DATABASE_MARGINAL_OK | Self::DATABASE_UNKNOWN_OK,
                    false,
                ),
                "TrustAll" => apply(
                    Self::PACKAGE_MARGINAL_OK | Self::PACKAGE_UNKNOWN_OK,
                    Self::DATABASE_MARGINAL_OK | Self::DATABASE_UNKNOWN_OK,
                    true,
                ),
                _ => {
                    return Err(Error::Config(format!("unknown signature level '{token}'")));
                }
            }
        }
        Ok(SigLevel(level))
    }
}

/// The three session-wide signature levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureLevels {
    pub default: SigLevel,
    pub local_file: SigLevel,
    pub remote_file: SigLevel,
}

/// Repository usage flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DbUsage(pub i32);

impl DbUsage {
    pub const SYNC: i32 = 1;
    pub const SEARCH: i32 = 1 << 1;
    pub const INSTALL: i32 = 1 << 2;
    pub const UPGRADE: i32 = 1 << 3;
    pub const ALL: DbUsage = DbUsage((1 << 4) - 1);

    /// Parse usage tokens; an empty list means `All`
    pub fn from_tokens(tokens: &[String]) -> Result<Self> {
        if tokens.is_empty() {
            return Ok(Self::ALL);
        }
        let mut bits = 0;
        for token in tokens {
            bits |= match token.as_str() {
                "Sync" => Self::SYNC,
                "Search" => Self::SEARCH,
                "Install" => Self::INSTALL,
                "Upgrade" => Self::UPGRADE,
                "All" => Self::ALL.0,
                other => {
                    return Err(Error::Config(format!("unknown repository usage '{other}'")));
                }
            };
        }
        Ok(DbUsage(bits))
    }

    /// Raw bits for the native call
    pub fn bits(self) -> i32 {
        self.0
    }
}
