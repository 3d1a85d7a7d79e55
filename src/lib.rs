// src/lib.rs

//! Shelly package client
//!
//! Orchestration layer over libalpm for an Arch-style package manager
//! front end, plus a process relay that runs the privileged half in a
//! separate elevated process.
//!
//! # Architecture
//!
//! - `alpm`: runtime-loaded libalpm bindings behind the `Session` seam
//! - `callback`: decoding of native callbacks and dispatch to handlers
//! - `transaction`: init/stage/prepare/commit/release lifecycle
//! - `repository`: download resolver for native fetch requests
//! - `client`: `SyncClient`, the high-level operations
//! - `relay`: structured JSON worker channel and the sideband protocol

pub mod alpm;
pub mod callback;
pub mod client;
pub mod config;
mod error;
pub mod package;
pub mod progress;
pub mod relay;
pub mod repository;
pub mod session;
pub mod transaction;

pub use callback::{
    CallbackRelay, OperationEvent, PendingQuestion, ProgressEvent, Question, question_bridge,
};
pub use client::SyncClient;
pub use config::{ClientConfig, DbUsage, RepositoryConfig, SigLevel};
pub use error::{Error, Result};
pub use package::{PackageInfo, PackageView, UpdateInfo};
pub use progress::{CliProgress, LogProgress, ProgressReporter};
pub use session::{Connector, Session};
pub use transaction::{TransFlags, Transaction, TransactionOutcome};
