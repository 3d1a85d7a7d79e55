// src/progress.rs

//! Rendering of progress and lifecycle events
//!
//! The `ProgressReporter` trait receives decoded callback events, whether
//! they come straight from the native library or over the worker channel.
//! Implementations:
//! - `CliProgress`: one indicatif bar per package operation
//! - `LogProgress`: logs through tracing in 10% steps per package
//!
//! Native percentages are per package and drop back to 0 when the package
//! changes; reporters follow that instead of smoothing across packages.

use crate::callback::{
    CallbackRelay, EventKind, OperationEvent, PackageOperation, PackageRef, ProgressEvent,
    ProgressKind,
};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Consumer of decoded progress and lifecycle events
///
/// Implementations must be thread-safe: events arrive on the thread running
/// the native call.
pub trait ProgressReporter: Send + Sync {
    /// Per-package progress update
    fn progress(&self, event: &ProgressEvent);

    /// Lifecycle event
    fn event(&self, event: &OperationEvent);

    /// Operation finished; clear any live display
    fn finish(&self) {}
}

/// Attach a reporter's handlers to a relay
pub fn attach(relay: CallbackRelay, reporter: Arc<dyn ProgressReporter>) -> CallbackRelay {
    let events = Arc::clone(&reporter);
    relay
        .on_progress(move |event| reporter.progress(event))
        .on_event(move |event| events.event(event))
}

fn package_label(package: &PackageRef) -> String {
    format!("{} ({})", package.name, package.version)
}

/// Human readable line for an event, if it deserves one
pub fn describe(event: &OperationEvent) -> Option<String> {
    match event {
        OperationEvent::PackageOperation {
            kind: EventKind::PackageOperationStart,
            operation,
            old_package,
            new_package,
        } => {
            let verb = match operation {
                PackageOperation::Install => "installing",
                PackageOperation::Upgrade => "upgrading",
                PackageOperation::Reinstall => "reinstalling",
                PackageOperation::Downgrade => "downgrading",
                PackageOperation::Remove => "removing",
            };
            match (old_package, new_package) {
                (Some(old), Some(new)) if old.version != new.version => Some(format!(
                    "{verb} {} ({} -> {})",
                    new.name, old.version, new.version
                )),
                (_, Some(package)) | (Some(package), None) => {
                    Some(format!("{verb} {}", package_label(package)))
                }
                (None, None) => None,
            }
        }
        OperationEvent::PackageOperation { .. } => None,
        OperationEvent::ScriptletInfo { line } => Some(line.clone()),
        OperationEvent::DatabaseMissing { database } => Some(format!(
            "database file for '{database}' does not exist (run 'shelly sync')"
        )),
        OperationEvent::Retrieve {
            kind: EventKind::PkgRetrieveStart,
            count,
            total_size,
        } => Some(format!(
            "Retrieving {count} package(s) ({:.1} MiB)",
            *total_size as f64 / (1024.0 * 1024.0)
        )),
        OperationEvent::Retrieve {
            kind: EventKind::PkgRetrieveFailed,
            ..
        } => Some("failed to retrieve some files".to_string()),
        OperationEvent::Retrieve { .. } => None,
        OperationEvent::HookRun {
            kind: EventKind::HookRunStart,
            name,
            description,
            position,
            total,
        } => Some(format!(
            "({position}/{total}) {}",
            description.as_deref().unwrap_or(name)
        )),
        OperationEvent::HookRun { .. } => None,
        OperationEvent::ConfigSaved {
            kind: EventKind::PacnewCreated,
            file,
            ..
        } => Some(format!("{file} installed as {file}.pacnew")),
        OperationEvent::ConfigSaved { file, .. } => Some(format!("{file} saved as {file}.pacsave")),
        OperationEvent::OptionalDependencyRemoval {
            package,
            dependency,
        } => Some(format!(
            "{} optionally requires {}",
            package.as_deref().unwrap_or("a package"),
            dependency.as_deref().unwrap_or("a removed package")
        )),
        OperationEvent::Phase { kind } => phase_message(*kind).map(str::to_string),
    }
}

fn phase_message(kind: EventKind) -> Option<&'static str> {
    Some(match kind {
        EventKind::CheckDepsStart => "checking dependencies...",
        EventKind::FileConflictsStart => "checking for file conflicts...",
        EventKind::ResolveDepsStart => "resolving dependencies...",
        EventKind::InterConflictsStart => "looking for conflicting packages...",
        EventKind::TransactionStart => ":: Processing package changes...",
        EventKind::IntegrityStart => "checking package integrity...",
        EventKind::LoadStart => "loading package files...",
        EventKind::DbRetrieveStart => ":: Synchronizing package databases...",
        EventKind::DbRetrieveFailed => "failed to synchronize all databases",
        EventKind::DiskspaceStart => "checking available disk space...",
        EventKind::KeyringStart => "checking keyring...",
        EventKind::KeyDownloadStart => "downloading required keys...",
        EventKind::HookStart => ":: Running hooks...",
        _ => return None,
    })
}

fn bar_message(event: &ProgressEvent) -> String {
    match &event.package {
        Some(package) => format!(
            "({}/{}) {} {}",
            event.current,
            event.total,
            event.kind.label(),
            package
        ),
        None => format!("({}/{}) {}", event.current, event.total, event.kind.label()),
    }
}

type OperationKey = (ProgressKind, Option<String>);

fn key_of(event: &ProgressEvent) -> OperationKey {
    (event.kind, event.package.clone())
}

// =============================================================================
// CLI
// =============================================================================

#[derive(Default)]
struct CliState {
    key: Option<OperationKey>,
    bar: Option<ProgressBar>,
}

/// Progress bars on the terminal
pub struct CliProgress {
    state: Mutex<CliState>,
    hidden: bool,
}

impl CliProgress {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CliState::default()),
            hidden: false,
        }
    }

    /// Tracker that draws nothing (for tests and non-terminal output)
    pub fn hidden() -> Self {
        Self {
            state: Mutex::new(CliState::default()),
            hidden: true,
        }
    }

    fn new_bar(&self, event: &ProgressEvent) -> ProgressBar {
        let bar = if self.hidden {
            ProgressBar::with_draw_target(Some(100), ProgressDrawTarget::hidden())
        } else {
            ProgressBar::new(100)
        };
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{msg:50} [{bar:30.green/dim}] {percent:>3}%")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("##-"),
        );
        bar.set_message(bar_message(event));
        bar
    }

    /// Run `f` with the live bar hidden, e.g. around an interactive prompt
    pub fn suspend<R>(&self, f: impl FnOnce() -> R) -> R {
        let bar = self.state.lock().ok().and_then(|s| s.bar.clone());
        match bar {
            Some(bar) if !bar.is_finished() => bar.suspend(f),
            _ => f(),
        }
    }

    /// Position of the live bar
    pub fn position(&self) -> Option<u64> {
        let state = self.state.lock().ok()?;
        state.bar.as_ref().map(ProgressBar::position)
    }
}

impl Default for CliProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for CliProgress {
    fn progress(&self, event: &ProgressEvent) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let key = key_of(event);
        if state.key.as_ref() != Some(&key) {
            if let Some(previous) = state.bar.take() {
                previous.finish();
            }
            state.bar = Some(self.new_bar(event));
            state.key = Some(key);
        }
        if let Some(bar) = &state.bar {
            bar.set_position(u64::from(event.percent));
            if event.percent >= 100 {
                bar.finish();
            }
        }
    }

    fn event(&self, event: &OperationEvent) {
        let Some(line) = describe(event) else {
            return;
        };
        if self.hidden {
            return;
        }
        match self.state.lock().ok().and_then(|s| s.bar.clone()) {
            Some(bar) if !bar.is_finished() => bar.println(line),
            _ => eprintln!("{line}"),
        }
    }

    fn finish(&self) {
        if let Ok(mut state) = self.state.lock() {
            if let Some(bar) = state.bar.take() {
                bar.finish();
            }
            state.key = None;
        }
    }
}

// =============================================================================
// Logging
// =============================================================================

/// Logs progress through tracing
#[derive(Debug, Default)]
pub struct LogProgress {
    last_bucket: Mutex<HashMap<OperationKey, u8>>,
}

impl LogProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if the event enters a new 10% step for its package
    fn crosses_step(&self, event: &ProgressEvent) -> bool {
        let Ok(mut buckets) = self.last_bucket.lock() else {
            return false;
        };
        let bucket = event.percent / 10;
        let key = key_of(event);
        if buckets.get(&key) == Some(&bucket) {
            return false;
        }
        buckets.insert(key, bucket);
        true
    }
}

impl ProgressReporter for LogProgress {
    fn progress(&self, event: &ProgressEvent) {
        if self.crosses_step(event) {
            info!("{} {}%", bar_message(event), event.percent);
        }
    }

    fn event(&self, event: &OperationEvent) {
        if let Some(line) = describe(event) {
            info!("{}", line);
        }
    }

    fn finish(&self) {
        if let Ok(mut buckets) = self.last_bucket.lock() {
            buckets.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(package: &str, percent: i32, current: usize) -> ProgressEvent {
        ProgressEvent::new(ProgressKind::AddStart, Some(package.into()), percent, current, 2)
    }

    #[test]
    fn test_cli_bar_restarts_per_package() {
        let progress = CliProgress::hidden();
        progress.progress(&add("foo", 80, 1));
        assert_eq!(progress.position(), Some(80));
        progress.progress(&add("bar", 5, 2));
        assert_eq!(progress.position(), Some(5));
        progress.finish();
        assert_eq!(progress.position(), None);
    }

    #[test]
    fn test_log_steps_reset_per_package() {
        let progress = LogProgress::new();
        assert!(progress.crosses_step(&add("foo", 0, 1)));
        assert!(!progress.crosses_step(&add("foo", 5, 1)));
        assert!(progress.crosses_step(&add("foo", 100, 1)));
        assert!(progress.crosses_step(&add("bar", 0, 2)));
    }

    #[test]
    fn test_describe_upgrade() {
        let event = OperationEvent::PackageOperation {
            kind: EventKind::PackageOperationStart,
            operation: PackageOperation::Upgrade,
            old_package: Some(PackageRef {
                name: "bash".into(),
                version: "5.2-1".into(),
            }),
            new_package: Some(PackageRef {
                name: "bash".into(),
                version: "5.2-2".into(),
            }),
        };
        assert_eq!(describe(&event).as_deref(), Some("upgrading bash (5.2-1 -> 5.2-2)"));
        assert_eq!(describe(&OperationEvent::Phase { kind: EventKind::CheckDepsDone }), None);
    }

    #[test]
    fn test_attach_routes_to_reporter() {
        let reporter = Arc::new(LogProgress::new());
        let relay = attach(CallbackRelay::new(), reporter.clone());
        relay.progress(&add("foo", 50, 1));
        assert!(!reporter.crosses_step(&add("foo", 55, 1)));
    }
}
