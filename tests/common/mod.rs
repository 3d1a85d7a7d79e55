// tests/common/mod.rs

//! Shared test utilities: an in-memory package library behind the
//! public session seam.

#![allow(dead_code)]

use shelly::callback::{
    CallbackRelay, EventKind, OperationEvent, PackageOperation, PackageRef, ProgressEvent,
    ProgressKind,
};
use shelly::config::{DbUsage, SigLevel, SignatureLevels};
use shelly::repository::CachePaths;
use shelly::transaction::TransactionBackend;
use shelly::{ClientConfig, Connector, PackageView, RepositoryConfig, Result, Session, TransFlags};
use std::cmp::Ordering;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// A package in the in-memory library
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryPackage {
    pub name: String,
    pub version: String,
    pub repository: String,
}

impl MemoryPackage {
    pub fn new(name: &str, version: &str, repository: &str) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            repository: repository.into(),
        }
    }

    fn as_ref(&self) -> PackageRef {
        PackageRef {
            name: self.name.clone(),
            version: self.version.clone(),
        }
    }
}

impl PackageView for MemoryPackage {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn version(&self) -> String {
        self.version.clone()
    }

    fn size(&self) -> i64 {
        1024
    }

    fn description(&self) -> Option<String> {
        Some(format!("the {} package", self.name))
    }

    fn url(&self) -> Option<String> {
        None
    }

    fn replaces(&self) -> Vec<String> {
        Vec::new()
    }

    fn repository(&self) -> String {
        self.repository.clone()
    }
}

/// Installed and available packages shared by every session
#[derive(Debug, Default)]
pub struct Library {
    pub sync: Vec<MemoryPackage>,
    pub local: Vec<MemoryPackage>,
    pub synced: usize,
}

/// Opens sessions on a shared [`Library`]
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    pub library: Arc<Mutex<Library>>,
}

impl MemoryConnector {
    pub fn new(sync: Vec<MemoryPackage>, local: Vec<MemoryPackage>) -> Self {
        Self {
            library: Arc::new(Mutex::new(Library {
                sync,
                local,
                synced: 0,
            })),
        }
    }

    pub fn installed(&self) -> Vec<String> {
        let library = self.library.lock().unwrap();
        library
            .local
            .iter()
            .map(|p| format!("{} {}", p.name, p.version))
            .collect()
    }
}

impl Connector for MemoryConnector {
    type Session = MemorySession;

    fn connect(&self, _root: &Path, _db_path: &Path) -> Result<MemorySession> {
        Ok(MemorySession {
            library: Arc::clone(&self.library),
            relay: None,
            adds: Vec::new(),
            removes: Vec::new(),
        })
    }
}

/// Numeric-aware comparison good enough for dotted test versions
pub fn compare(a: &str, b: &str) -> Ordering {
    let parts = |v: &str| -> Vec<u64> {
        v.split(['.', '-', ':'])
            .map(|p| p.parse().unwrap_or(0))
            .collect()
    };
    parts(a).cmp(&parts(b))
}

pub struct MemorySession {
    library: Arc<Mutex<Library>>,
    relay: Option<Arc<CallbackRelay>>,
    adds: Vec<MemoryPackage>,
    removes: Vec<MemoryPackage>,
}

impl MemorySession {
    fn emit(&self, event: OperationEvent) {
        if let Some(relay) = &self.relay {
            relay.event(&event);
        }
    }

    fn progress(&self, kind: ProgressKind, name: &str, percent: i32, current: usize, total: usize) {
        if let Some(relay) = &self.relay {
            relay.progress(&ProgressEvent::new(kind, Some(name.into()), percent, current, total));
        }
    }
}

impl TransactionBackend for MemorySession {
    type Package = MemoryPackage;

    fn trans_init(&mut self, _flags: TransFlags) -> i32 {
        self.adds.clear();
        self.removes.clear();
        0
    }

    fn trans_add_package(&mut self, package: &MemoryPackage) -> i32 {
        self.adds.push(package.clone());
        0
    }

    fn trans_remove_package(&mut self, package: &MemoryPackage) -> i32 {
        self.removes.push(package.clone());
        0
    }

    fn trans_sysupgrade(&mut self, _enable_downgrade: bool) -> i32 {
        let local = self.library.lock().unwrap().local.clone();
        for installed in &local {
            if let Some(newer) = self.newer_version(installed) {
                self.adds.push(newer);
            }
        }
        0
    }

    fn trans_has_targets(&self) -> bool {
        !self.adds.is_empty() || !self.removes.is_empty()
    }

    fn trans_prepare(&mut self) -> i32 {
        0
    }

    fn trans_commit(&mut self) -> i32 {
        self.emit(OperationEvent::Phase {
            kind: EventKind::TransactionStart,
        });
        let total = self.adds.len() + self.removes.len();
        let mut library = self.library.lock().unwrap();

        for (i, package) in self.removes.iter().enumerate() {
            library.local.retain(|p| p.name != package.name);
            self.progress(ProgressKind::RemoveStart, &package.name, 100, i + 1, total);
        }
        for (i, package) in self.adds.iter().enumerate() {
            let current = self.removes.len() + i + 1;
            let old = library.local.iter().position(|p| p.name == package.name);
            let operation = if old.is_some() {
                PackageOperation::Upgrade
            } else {
                PackageOperation::Install
            };
            let old_package = old.map(|index| library.local.remove(index));
            self.emit(OperationEvent::PackageOperation {
                kind: EventKind::PackageOperationStart,
                operation,
                old_package: old_package.as_ref().map(MemoryPackage::as_ref),
                new_package: Some(package.as_ref()),
            });
            let kind = match operation {
                PackageOperation::Upgrade => ProgressKind::UpgradeStart,
                _ => ProgressKind::AddStart,
            };
            self.progress(kind, &package.name, 0, current, total);
            self.progress(kind, &package.name, 100, current, total);
            library.local.push(MemoryPackage {
                repository: "local".into(),
                ..package.clone()
            });
        }
        0
    }

    fn trans_release(&mut self) -> i32 {
        self.adds.clear();
        self.removes.clear();
        0
    }

    fn errno(&self) -> i32 {
        0
    }

    fn strerror(&self, _code: i32) -> Option<String> {
        None
    }
}

impl Session for MemorySession {
    fn set_architecture(&mut self, _arch: &str) -> Result<()> {
        Ok(())
    }

    fn add_cache_dir(&mut self, _dir: &Path) -> Result<()> {
        Ok(())
    }

    fn add_hook_dir(&mut self, _dir: &Path) -> Result<()> {
        Ok(())
    }

    fn set_signature_levels(&mut self, _levels: SignatureLevels) -> Result<()> {
        Ok(())
    }

    fn install_callbacks(&mut self, relay: Arc<CallbackRelay>, _caches: CachePaths) -> Result<()> {
        self.relay = Some(relay);
        Ok(())
    }

    fn register_repository(&mut self, _name: &str, _sig: SigLevel, _usage: DbUsage) -> Result<()> {
        Ok(())
    }

    fn add_server(&mut self, _repository: &str, _url: &str) -> Result<()> {
        Ok(())
    }

    fn update_databases(&mut self, _force: bool) -> Result<()> {
        self.library.lock().unwrap().synced += 1;
        Ok(())
    }

    fn find_sync_package(&self, name: &str) -> Option<MemoryPackage> {
        let library = self.library.lock().unwrap();
        library.sync.iter().find(|p| p.name == name).cloned()
    }

    fn find_local_package(&self, name: &str) -> Option<MemoryPackage> {
        let library = self.library.lock().unwrap();
        library.local.iter().find(|p| p.name == name).cloned()
    }

    fn installed_packages(&self) -> Vec<MemoryPackage> {
        self.library.lock().unwrap().local.clone()
    }

    fn newer_version(&self, installed: &MemoryPackage) -> Option<MemoryPackage> {
        self.find_sync_package(&installed.name)
            .filter(|sync| compare(&sync.version, &installed.version) == Ordering::Greater)
    }

    fn compare_versions(&self, a: &str, b: &str) -> Ordering {
        compare(a, b)
    }
}

/// Configuration rooted in a temporary directory
pub fn test_config(dir: &Path) -> ClientConfig {
    ClientConfig {
        root_path: dir.join("root"),
        db_path: dir.join("db"),
        cache_dir: dir.join("cache"),
        architecture: "x86_64".into(),
        repositories: vec![RepositoryConfig::new(
            "core",
            vec!["https://mirror.example/$repo/os/$arch".into()],
        )],
        ..ClientConfig::default()
    }
}

/// A small library: bash is outdated, htop is available
pub fn sample_connector() -> MemoryConnector {
    MemoryConnector::new(
        vec![
            MemoryPackage::new("bash", "5.2-2", "core"),
            MemoryPackage::new("htop", "3.3.0-1", "extra"),
            MemoryPackage::new("vim", "9.1-1", "extra"),
        ],
        vec![
            MemoryPackage::new("bash", "5.2-1", "local"),
            MemoryPackage::new("vim", "9.1-1", "local"),
        ],
    )
}
