// src/relay/mod.rs

//! Process relay for privilege separation
//!
//! Two mechanisms relay sync client operations and callbacks across a
//! process boundary:
//!
//! - **Structured RPC** ([`protocol`], [`worker`], [`client`]): a long-lived
//!   privileged `shelly worker` reads JSON requests on standard input and
//!   writes one response per request on standard output, with progress and
//!   lifecycle events interleaved.
//! - **Sideband** ([`sideband`]): a privileged `shelly --sideband ...`
//!   command writes reserved-prefix question lines to standard error and
//!   reads one answer line per question from standard input.
//!
//! Both start the child through [`auth`], which validates the elevation
//! secret in a separate step so protocol traffic never reaches the
//! password reader.

pub mod auth;
pub mod client;
pub mod protocol;
pub mod sideband;
pub mod worker;

pub use auth::Elevation;
pub use client::{ElevatedWorker, WorkerClient};
pub use protocol::{Command, EventRecord, EventType, Request, Response, WorkerMessage};
pub use worker::{Worker, relay_for};
