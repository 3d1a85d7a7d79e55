// src/callback/event.rs

//! Decoded callback payloads
//!
//! Closed sum types for the four native callback classes. Discriminator
//! values match libalpm's `alpm_progress_t`, `alpm_event_type_t`,
//! `alpm_package_operation_t` and `alpm_question_type_t`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Any decoded callback
///
/// Also the decoded form of events relayed from a worker process, which
/// only ever carry progress and lifecycle events.
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackEvent {
    Progress(ProgressEvent),
    Operation(OperationEvent),
    Question(Question),
    Fetch(FetchRequest),
}

/// Kind of a progress notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProgressKind {
    AddStart,
    UpgradeStart,
    DowngradeStart,
    ReinstallStart,
    RemoveStart,
    ConflictsStart,
    DiskspaceStart,
    IntegrityStart,
    LoadStart,
    KeyringStart,
}

impl ProgressKind {
    /// Map the native discriminator; unknown values yield `None`
    pub fn from_raw(raw: i32) -> Option<Self> {
        Some(match raw {
            0 => Self::AddStart,
            1 => Self::UpgradeStart,
            2 => Self::DowngradeStart,
            3 => Self::ReinstallStart,
            4 => Self::RemoveStart,
            5 => Self::ConflictsStart,
            6 => Self::DiskspaceStart,
            7 => Self::IntegrityStart,
            8 => Self::LoadStart,
            9 => Self::KeyringStart,
            _ => return None,
        })
    }

    /// Short description for progress displays
    pub fn label(self) -> &'static str {
        match self {
            Self::AddStart => "installing",
            Self::UpgradeStart => "upgrading",
            Self::DowngradeStart => "downgrading",
            Self::ReinstallStart => "reinstalling",
            Self::RemoveStart => "removing",
            Self::ConflictsStart => "checking for file conflicts",
            Self::DiskspaceStart => "checking available disk space",
            Self::IntegrityStart => "checking package integrity",
            Self::LoadStart => "loading package files",
            Self::KeyringStart => "checking keys in keyring",
        }
    }
}

/// Per-package progress
///
/// `percent` refers to the current package only and restarts at 0 when
/// the package changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub kind: ProgressKind,
    pub package: Option<String>,
    pub percent: u8,
    pub current: usize,
    pub total: usize,
}

impl ProgressEvent {
    /// Build an event, clamping percent to 0..=100 and current to total
    pub fn new(
        kind: ProgressKind,
        package: Option<String>,
        percent: i32,
        current: usize,
        total: usize,
    ) -> Self {
        Self {
            kind,
            package: package.filter(|name| !name.is_empty()),
            percent: percent.clamp(0, 100) as u8,
            current: current.min(total),
            total,
        }
    }
}

/// Native event discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    CheckDepsStart,
    CheckDepsDone,
    FileConflictsStart,
    FileConflictsDone,
    ResolveDepsStart,
    ResolveDepsDone,
    InterConflictsStart,
    InterConflictsDone,
    TransactionStart,
    TransactionDone,
    PackageOperationStart,
    PackageOperationDone,
    IntegrityStart,
    IntegrityDone,
    LoadStart,
    LoadDone,
    ScriptletInfo,
    DbRetrieveStart,
    DbRetrieveDone,
    DbRetrieveFailed,
    PkgRetrieveStart,
    PkgRetrieveDone,
    PkgRetrieveFailed,
    DiskspaceStart,
    DiskspaceDone,
    OptdepRemoval,
    DatabaseMissing,
    KeyringStart,
    KeyringDone,
    KeyDownloadStart,
    KeyDownloadDone,
    PacnewCreated,
    PacsaveCreated,
    HookStart,
    HookDone,
    HookRunStart,
    HookRunDone,
}

impl EventKind {
    const ORDER: [EventKind; 37] = [
        Self::CheckDepsStart,
        Self::CheckDepsDone,
        Self::FileConflictsStart,
        Self::FileConflictsDone,
        Self::ResolveDepsStart,
        Self::ResolveDepsDone,
        Self::InterConflictsStart,
        Self::InterConflictsDone,
        Self::TransactionStart,
        Self::TransactionDone,
        Self::PackageOperationStart,
        Self::PackageOperationDone,
        Self::IntegrityStart,
        Self::IntegrityDone,
        Self::LoadStart,
        Self::LoadDone,
        Self::ScriptletInfo,
        Self::DbRetrieveStart,
        Self::DbRetrieveDone,
        Self::DbRetrieveFailed,
        Self::PkgRetrieveStart,
        Self::PkgRetrieveDone,
        Self::PkgRetrieveFailed,
        Self::DiskspaceStart,
        Self::DiskspaceDone,
        Self::OptdepRemoval,
        Self::DatabaseMissing,
        Self::KeyringStart,
        Self::KeyringDone,
        Self::KeyDownloadStart,
        Self::KeyDownloadDone,
        Self::PacnewCreated,
        Self::PacsaveCreated,
        Self::HookStart,
        Self::HookDone,
        Self::HookRunStart,
        Self::HookRunDone,
    ];

    /// Map the native discriminator (starting at 1); unknown values yield `None`
    pub fn from_raw(raw: i32) -> Option<Self> {
        let index = usize::try_from(raw).ok()?.checked_sub(1)?;
        Self::ORDER.get(index).copied()
    }

    /// Native discriminator value
    pub fn raw(self) -> i32 {
        Self::ORDER
            .iter()
            .position(|kind| *kind == self)
            .map(|i| i as i32 + 1)
            .unwrap_or(0)
    }
}

/// Kind of package operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PackageOperation {
    Install,
    Upgrade,
    Reinstall,
    Downgrade,
    Remove,
}

impl PackageOperation {
    /// Map the native discriminator; unknown values yield `None`
    pub fn from_raw(raw: i32) -> Option<Self> {
        Some(match raw {
            1 => Self::Install,
            2 => Self::Upgrade,
            3 => Self::Reinstall,
            4 => Self::Downgrade,
            5 => Self::Remove,
            _ => return None,
        })
    }
}

/// Name and version of a package mentioned in an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRef {
    pub name: String,
    pub version: String,
}

/// Lifecycle notification from the native library
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OperationEvent {
    /// A package is about to be, or has been, installed/upgraded/removed
    PackageOperation {
        kind: EventKind,
        operation: PackageOperation,
        old_package: Option<PackageRef>,
        new_package: Option<PackageRef>,
    },
    /// A line of scriptlet output
    ScriptletInfo { line: String },
    /// A registered database has no local copy
    DatabaseMissing { database: String },
    /// Package download batch start/done/failed
    Retrieve {
        kind: EventKind,
        count: usize,
        total_size: i64,
    },
    /// A hook started or finished running
    HookRun {
        kind: EventKind,
        name: String,
        description: Option<String>,
        position: usize,
        total: usize,
    },
    /// A .pacnew or .pacsave file was written
    ConfigSaved {
        kind: EventKind,
        package: Option<String>,
        file: String,
    },
    /// An installed package loses an optional dependency
    OptionalDependencyRemoval {
        package: Option<String>,
        dependency: Option<String>,
    },
    /// Start/done marker without extra fields
    Phase { kind: EventKind },
}

impl OperationEvent {
    /// Native discriminator of this event
    pub fn kind(&self) -> EventKind {
        match self {
            Self::PackageOperation { kind, .. }
            | Self::Retrieve { kind, .. }
            | Self::HookRun { kind, .. }
            | Self::ConfigSaved { kind, .. }
            | Self::Phase { kind } => *kind,
            Self::ScriptletInfo { .. } => EventKind::ScriptletInfo,
            Self::DatabaseMissing { .. } => EventKind::DatabaseMissing,
            Self::OptionalDependencyRemoval { .. } => EventKind::OptdepRemoval,
        }
    }
}

/// Kind of an interactive question
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuestionKind {
    InstallIgnorePkg,
    ReplacePkg,
    ConflictPkg,
    CorruptedPkg,
    RemovePkgs,
    SelectProvider,
    ImportKey,
}

impl QuestionKind {
    /// Map the native bit discriminator; unknown values yield `None`
    pub fn from_raw(raw: i32) -> Option<Self> {
        Some(match raw {
            1 => Self::InstallIgnorePkg,
            2 => Self::ReplacePkg,
            4 => Self::ConflictPkg,
            8 => Self::CorruptedPkg,
            16 => Self::RemovePkgs,
            32 => Self::SelectProvider,
            64 => Self::ImportKey,
            _ => return None,
        })
    }

    /// Native discriminator value
    pub fn raw(self) -> i32 {
        match self {
            Self::InstallIgnorePkg => 1,
            Self::ReplacePkg => 2,
            Self::ConflictPkg => 4,
            Self::CorruptedPkg => 8,
            Self::RemovePkgs => 16,
            Self::SelectProvider => 32,
            Self::ImportKey => 64,
        }
    }
}

/// A question that blocks the native call until answered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub kind: QuestionKind,
    pub prompt: String,
    /// Native default: 0/1 for yes/no, an index for provider selection
    pub default_answer: i32,
    /// Provider labels for [`QuestionKind::SelectProvider`]
    #[serde(default)]
    pub providers: Vec<String>,
}

impl Question {
    /// True for N-option provider selection
    pub fn is_selection(&self) -> bool {
        self.kind == QuestionKind::SelectProvider
    }

    /// True if `answer` is a legal answer to this question
    pub fn accepts(&self, answer: i32) -> bool {
        if self.is_selection() {
            usize::try_from(answer).is_ok_and(|index| index < self.providers.len())
        } else {
            answer == 0 || answer == 1
        }
    }
}

/// A native request to place a file at a destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Relative file name or absolute URL
    pub identifier: String,
    /// Suggested destination file or directory
    pub destination: Option<PathBuf>,
    /// Download even if the destination exists
    pub force: bool,
}

/// How a fetch request was satisfied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The file was downloaded or copied to this path
    Fetched(PathBuf),
    /// An existing file was kept and no transfer happened
    UpToDate(PathBuf),
}

impl FetchOutcome {
    /// Final location of the file
    pub fn path(&self) -> &Path {
        match self {
            Self::Fetched(path) | Self::UpToDate(path) => path,
        }
    }

    /// libalpm fetch status: 0 for a transfer, 1 for a file already up to date
    pub fn status(&self) -> i32 {
        match self {
            Self::Fetched(_) => 0,
            Self::UpToDate(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_raw_values() {
        assert_eq!(EventKind::from_raw(1), Some(EventKind::CheckDepsStart));
        assert_eq!(EventKind::from_raw(11), Some(EventKind::PackageOperationStart));
        assert_eq!(EventKind::from_raw(37), Some(EventKind::HookRunDone));
        assert_eq!(EventKind::from_raw(0), None);
        assert_eq!(EventKind::from_raw(38), None);
        assert_eq!(EventKind::ScriptletInfo.raw(), 17);
    }

    #[test]
    fn test_progress_clamping() {
        let event = ProgressEvent::new(ProgressKind::AddStart, Some(String::new()), 140, 9, 3);
        assert_eq!(event.percent, 100);
        assert_eq!(event.current, 3);
        assert_eq!(event.package, None);
    }

    #[test]
    fn test_question_accepts() {
        let yes_no = Question {
            kind: QuestionKind::ReplacePkg,
            prompt: "Replace?".into(),
            default_answer: 1,
            providers: Vec::new(),
        };
        assert!(yes_no.accepts(0));
        assert!(!yes_no.accepts(2));

        let select = Question {
            kind: QuestionKind::SelectProvider,
            prompt: "Pick".into(),
            default_answer: 0,
            providers: vec!["a".into(), "b".into()],
        };
        assert!(select.accepts(1));
        assert!(!select.accepts(2));
        assert!(!select.accepts(-1));
    }

    #[test]
    fn test_operation_event_json_shape() {
        let event = OperationEvent::ScriptletInfo { line: "hello".into() };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"event":"scriptlet_info","line":"hello"}"#);
    }
}
