// tests/client_flow.rs

//! Sync client operations over the in-memory library, driven the way the
//! CLI drives them.

mod common;

use common::{MemoryPackage, sample_connector, test_config};
use shelly::callback::{CallbackRelay, ProgressEvent};
use shelly::progress::{self, ProgressReporter};
use shelly::{ClientConfig, Error, OperationEvent, SyncClient, TransactionOutcome};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

#[derive(Default)]
struct Recorder {
    progress: Mutex<Vec<(String, u8)>>,
    events: Mutex<Vec<OperationEvent>>,
}

impl ProgressReporter for Recorder {
    fn progress(&self, event: &ProgressEvent) {
        let name = event.package.clone().unwrap_or_default();
        self.progress.lock().unwrap().push((name, event.percent));
    }

    fn event(&self, event: &OperationEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

#[test]
fn test_install_remove_and_upgrade() {
    let dir = TempDir::new().unwrap();
    let connector = sample_connector();
    let recorder = Arc::new(Recorder::default());
    let relay = progress::attach(CallbackRelay::new(), recorder.clone());
    let mut client = SyncClient::new(connector.clone(), test_config(dir.path()), relay);

    client.initialize().unwrap();
    client.sync(false).unwrap();
    assert_eq!(connector.library.lock().unwrap().synced, 1);

    assert_eq!(client.install("htop").unwrap(), TransactionOutcome::Committed);
    assert_eq!(client.remove("vim").unwrap(), TransactionOutcome::Committed);
    assert_eq!(client.update_all().unwrap(), TransactionOutcome::Committed);
    assert_eq!(client.update_all().unwrap(), TransactionOutcome::NothingToDo);

    let mut installed = connector.installed();
    installed.sort();
    assert_eq!(installed, vec!["bash 5.2-2", "htop 3.3.0-1"]);

    assert_eq!(
        *recorder.progress.lock().unwrap(),
        vec![
            ("htop".to_string(), 0),
            ("htop".to_string(), 100),
            ("vim".to_string(), 100),
            ("bash".to_string(), 0),
            ("bash".to_string(), 100),
        ]
    );
    assert!(!recorder.events.lock().unwrap().is_empty());
}

#[test]
fn test_missing_package_reports_action() {
    let dir = TempDir::new().unwrap();
    let mut client = SyncClient::new(
        sample_connector(),
        test_config(dir.path()),
        CallbackRelay::new(),
    );

    let err = client.install("does-not-exist").unwrap_err();
    assert!(err.to_string().starts_with("failed to install 'does-not-exist'"));
    assert!(matches!(err.root_cause(), Error::NotFound(_)));

    // The failed lookup did not leave the client unusable
    assert_eq!(client.find_package("htop").unwrap().repository, "extra");
}

#[test]
fn test_equal_versions_are_not_updates() {
    let dir = TempDir::new().unwrap();
    let connector = common::MemoryConnector::new(
        vec![MemoryPackage::new("zlib", "1:1.3.1-1", "core")],
        vec![MemoryPackage::new("zlib", "1:1.3.1-1", "local")],
    );
    let mut client = SyncClient::new(connector, test_config(dir.path()), CallbackRelay::new());
    assert!(client.packages_needing_update().unwrap().is_empty());
    assert_eq!(client.installed_packages().unwrap().len(), 1);
}

#[test]
fn test_stale_lock_is_removed_on_initialize() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    std::fs::create_dir_all(&config.db_path).unwrap();
    std::fs::write(config.lock_file(), b"").unwrap();

    let mut client = SyncClient::new(sample_connector(), config.clone(), CallbackRelay::new());
    client.initialize().unwrap();
    assert!(!config.lock_file().exists());
}

#[test]
fn test_config_file_drives_client() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("shelly.toml");
    std::fs::write(
        &path,
        format!(
            r#"
root_path = "{root}"
db_path = "{root}/db"
cache_dir = "{root}/cache"
architecture = "x86_64"
default_flags = ["NoScriptlet"]

[[repositories]]
name = "core"
servers = ["https://mirror.example/$repo/os/$arch"]

[[repositories]]
name = "extra"
servers = ["https://mirror.example/$repo/os/$arch"]
usage = ["Sync", "Install"]
"#,
            root = dir.path().display()
        ),
    )
    .unwrap();

    let config = ClientConfig::load_or_default(Some(&path)).unwrap();
    assert_eq!(config.repositories.len(), 2);
    assert_eq!(
        config.repositories[1].expanded_servers("x86_64"),
        vec!["https://mirror.example/extra/os/x86_64"]
    );

    let mut client = SyncClient::new(sample_connector(), config, CallbackRelay::new());
    assert_eq!(client.install("htop").unwrap(), TransactionOutcome::Committed);
}
