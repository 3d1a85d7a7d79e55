// src/transaction/mod.rs

//! Transaction coordinator for native package transactions
//!
//! Drives the native transaction state machine and guarantees that every
//! opened transaction is released exactly once, on success and on every
//! failure path.
//!
//! # Transaction Lifecycle
//!
//! ```text
//! Idle -init-> Open -(add|remove|sysupgrade)*-> Open -prepare-> Prepared -commit-> Committed -release-> Idle
//!                \                                  \                       \
//!                 `------------- failure -----------`---------> Failed -release-> Idle
//! ```
//!
//! The native library only allows one transaction per session; the
//! coordinator enforces that by holding a mutable borrow of the backend for
//! the lifetime of a [`Transaction`].

mod flags;

pub use flags::TransFlags;

use crate::error::{Error, Result};
use tracing::{debug, warn};

/// Native transaction primitives
///
/// Methods return the raw native status code (0 on success), so the
/// coordinator can translate failures with [`errno`](Self::errno) and
/// [`strerror`](Self::strerror) before anything else touches the session.
pub trait TransactionBackend {
    /// Package reference accepted by add/remove
    type Package: Clone;

    /// Begin a transaction with the given (already expanded) flags
    fn trans_init(&mut self, flags: TransFlags) -> i32;

    /// Queue a package for installation
    fn trans_add_package(&mut self, package: &Self::Package) -> i32;

    /// Queue a package for removal
    fn trans_remove_package(&mut self, package: &Self::Package) -> i32;

    /// Queue a full system upgrade
    fn trans_sysupgrade(&mut self, enable_downgrade: bool) -> i32;

    /// True if anything is queued to add or remove
    fn trans_has_targets(&self) -> bool;

    /// Resolve and check the queued targets
    fn trans_prepare(&mut self) -> i32;

    /// Apply the transaction
    fn trans_commit(&mut self) -> i32;

    /// Release the transaction
    fn trans_release(&mut self) -> i32;

    /// Current native error code
    fn errno(&self) -> i32;

    /// Native description of an error code
    fn strerror(&self, code: i32) -> Option<String>;
}

/// Coordinator-side transaction state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// No native transaction (initial, and after release)
    Idle,
    /// Initialized, accepting targets
    Open,
    /// Prepared, ready to commit
    Prepared,
    /// Committed, awaiting release
    Committed,
    /// A native step failed; only release is legal
    Failed,
}

/// Result of running a transaction to completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    /// Prepared and committed
    Committed,
    /// Nothing was queued; released without preparing
    NothingToDo,
}

/// Scoped native transaction
///
/// Created by [`Transaction::begin`]; released by [`Transaction::release`]
/// or, if the value is dropped on an error path, by its `Drop` impl.
pub struct Transaction<'a, B: TransactionBackend> {
    backend: &'a mut B,
    state: TransactionState,
    flags: TransFlags,
    released: bool,
}

impl<'a, B: TransactionBackend> Transaction<'a, B> {
    /// Initialize a native transaction
    ///
    /// On failure the transaction is still released before the error is
    /// returned.
    pub fn begin(backend: &'a mut B, flags: TransFlags) -> Result<Self> {
        let flags = flags.effective();
        debug!("Initializing transaction with {:?}", flags);

        let mut txn = Self {
            backend,
            state: TransactionState::Idle,
            flags,
            released: false,
        };

        let code = txn.backend.trans_init(flags);
        txn.check(code, "initialize transaction")?;
        txn.state = TransactionState::Open;
        Ok(txn)
    }

    /// Current state
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Effective flags (implications applied)
    pub fn flags(&self) -> TransFlags {
        self.flags
    }

    /// Queue a package for installation
    pub fn add_package(&mut self, package: &B::Package) -> Result<()> {
        self.expect_state(TransactionState::Open, "add package")?;
        let code = self.backend.trans_add_package(package);
        self.check(code, "add package to transaction")
    }

    /// Queue a package for removal
    pub fn remove_package(&mut self, package: &B::Package) -> Result<()> {
        self.expect_state(TransactionState::Open, "remove package")?;
        let code = self.backend.trans_remove_package(package);
        self.check(code, "remove package from transaction")
    }

    /// Queue a full system upgrade
    pub fn sysupgrade(&mut self, enable_downgrade: bool) -> Result<()> {
        self.expect_state(TransactionState::Open, "mark system upgrade")?;
        let code = self.backend.trans_sysupgrade(enable_downgrade);
        self.check(code, "mark system upgrade")
    }

    /// True if anything is queued
    pub fn has_targets(&self) -> bool {
        self.backend.trans_has_targets()
    }

    /// Prepare the queued targets
    pub fn prepare(&mut self) -> Result<()> {
        self.expect_state(TransactionState::Open, "prepare")?;
        let code = self.backend.trans_prepare();
        self.check(code, "prepare transaction")?;
        self.state = TransactionState::Prepared;
        Ok(())
    }

    /// Commit a prepared transaction
    pub fn commit(&mut self) -> Result<()> {
        self.expect_state(TransactionState::Prepared, "commit")?;
        let code = self.backend.trans_commit();
        self.check(code, "commit transaction")?;
        self.state = TransactionState::Committed;
        Ok(())
    }

    /// Release the transaction, reporting a release failure
    pub fn release(mut self) -> Result<()> {
        match self.release_inner() {
            0 => Ok(()),
            code => Err(self.native_failure(code, "release transaction")),
        }
    }

    fn release_inner(&mut self) -> i32 {
        if self.released {
            return 0;
        }
        self.released = true;
        let code = self.backend.trans_release();
        self.state = TransactionState::Idle;
        code
    }

    fn expect_state(&mut self, expected: TransactionState, action: &str) -> Result<()> {
        if self.state == expected {
            return Ok(());
        }
        Err(Error::InvalidState(format!(
            "cannot {} while transaction is {:?}",
            action, self.state
        )))
    }

    fn check(&mut self, code: i32, operation: &str) -> Result<()> {
        if code == 0 {
            return Ok(());
        }
        self.state = TransactionState::Failed;
        let err = self.native_failure(code, operation);
        warn!("{}", err);
        Err(err)
    }

    fn native_failure(&self, code: i32, operation: &str) -> Error {
        let errno = self.backend.errno();
        let errno = if errno != 0 { errno } else { code };
        let message = self
            .backend
            .strerror(errno)
            .filter(|message| !message.trim().is_empty())
            .unwrap_or_else(|| format!("unknown error({errno})"));
        Error::native(operation, message)
    }
}

impl<B: TransactionBackend> Drop for Transaction<'_, B> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        debug!("Releasing transaction in state {:?}", self.state);
        let code = self.release_inner();
        if code != 0 {
            warn!(
                "{}",
                self.native_failure(code, "release transaction")
            );
        }
    }
}

/// Run a transaction to completion
///
/// `stage` queues targets on the open transaction. If nothing ends up
/// queued the transaction is released without preparing; otherwise it is
/// prepared, committed and released. Release happens exactly once on every
/// path.
pub fn execute<B, F>(backend: &mut B, flags: TransFlags, stage: F) -> Result<TransactionOutcome>
where
    B: TransactionBackend,
    F: FnOnce(&mut Transaction<'_, B>) -> Result<()>,
{
    let mut txn = Transaction::begin(backend, flags)?;
    stage(&mut txn)?;

    if !txn.has_targets() {
        debug!("Transaction has nothing to do");
        txn.release()?;
        return Ok(TransactionOutcome::NothingToDo);
    }

    txn.prepare()?;
    txn.commit()?;
    txn.release()?;
    Ok(TransactionOutcome::Committed)
}
