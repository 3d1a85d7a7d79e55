// src/relay/worker.rs

//! Privileged worker loop
//!
//! Holds one [`SyncClient`] for its whole lifetime, reads one request per
//! line and writes exactly one response per request. Progress and
//! lifecycle events produced while a command runs are written to the same
//! channel as event records. Questions are not relayed; the worker keeps
//! the native default answers.

use super::protocol::{self, Command, EventRecord, Request, Response, WorkerMessage};
use crate::callback::CallbackRelay;
use crate::client::SyncClient;
use crate::error::{Error, Result};
use crate::session::Connector;
use crate::transaction::TransactionOutcome;
use serde::Serialize;
use std::io::{BufRead, Write};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Shared, line-oriented output channel
pub type SharedWriter<W> = Arc<Mutex<W>>;

fn send<W: Write, T: Serialize>(writer: &SharedWriter<W>, message: &T) -> Result<()> {
    let mut guard = writer
        .lock()
        .map_err(|_| Error::Protocol("output channel lock poisoned".to_string()))?;
    protocol::write_line(&mut *guard, message)
}

/// Callback relay that forwards progress and events to `writer`
pub fn relay_for<W: Write + Send + 'static>(writer: SharedWriter<W>) -> CallbackRelay {
    let events = Arc::clone(&writer);
    CallbackRelay::new()
        .on_progress(move |event| {
            if let Err(e) = EventRecord::progress(event).and_then(|r| send(&writer, &r)) {
                warn!("Dropping progress event: {}", e);
            }
        })
        .on_event(move |event| {
            if let Err(e) = EventRecord::operation(event).and_then(|r| send(&events, &r)) {
                warn!("Dropping operation event: {}", e);
            }
        })
}

/// Request loop around one sync client
pub struct Worker<C: Connector> {
    client: SyncClient<C>,
}

impl<C: Connector> Worker<C> {
    pub fn new(client: SyncClient<C>) -> Self {
        Self { client }
    }

    /// Serve requests until `Exit` or end of input
    ///
    /// Malformed lines are answered with a failure response; only channel
    /// write failures end the loop with an error.
    pub fn serve<R: BufRead, W: Write>(&mut self, mut reader: R, writer: &SharedWriter<W>) -> Result<()> {
        info!("Worker ready");
        loop {
            let request = match protocol::read_message(&mut reader) {
                Ok(None) => {
                    debug!("Input closed; worker exiting");
                    return Ok(());
                }
                Ok(Some(WorkerMessage::Request(request))) => request,
                Ok(Some(other)) => {
                    send(writer, &Response::failure(format!("expected a request, got {other:?}")))?;
                    continue;
                }
                Err(e) => {
                    warn!("{}", e);
                    send(writer, &Response::failure(e.to_string()))?;
                    continue;
                }
            };

            let (response, exit) = self.handle(&request);
            send(writer, &response)?;
            if exit {
                info!("Worker exiting on request");
                return Ok(());
            }
        }
    }

    /// Execute one request; the flag is true for `Exit`
    pub fn handle(&mut self, request: &Request) -> (Response, bool) {
        let command = match request.command() {
            Ok(command) => command,
            Err(e) => return (Response::failure(e.to_string()), false),
        };
        debug!("Executing {} {:?}", command, request.payload);

        let result = self.execute(command, request.payload.as_deref());
        let response = match result {
            Ok(data) => Response::ok(data),
            Err(e) => {
                warn!("{} failed: {}", command, e);
                Response::failure(e.to_string())
            }
        };
        (response, command == Command::Exit)
    }

    fn execute(&mut self, command: Command, payload: Option<&str>) -> Result<Option<String>> {
        match command {
            Command::Ping => Ok(Some("pong".to_string())),
            Command::Initialize => self.client.initialize().map(|()| None),
            Command::Sync => self.client.sync(payload == Some("force")).map(|()| None),
            Command::Install => {
                let name = required(command, payload)?;
                self.client.install(name).map(outcome_data)
            }
            Command::Remove => {
                let name = required(command, payload)?;
                self.client.remove(name).map(outcome_data)
            }
            Command::UpdateAll => self.client.update_all().map(outcome_data),
            Command::GetPackagesNeedingUpdate => {
                let updates = self.client.packages_needing_update()?;
                Ok(Some(serde_json::to_string(&updates)?))
            }
            Command::GetInstalledPackages => {
                let packages = self.client.installed_packages()?;
                Ok(Some(serde_json::to_string(&packages)?))
            }
            Command::Exit => {
                self.client.shutdown();
                Ok(None)
            }
        }
    }
}

fn required(command: Command, payload: Option<&str>) -> Result<&str> {
    payload
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| Error::Protocol(format!("{command} requires a package name")))
}

fn outcome_data(outcome: TransactionOutcome) -> Option<String> {
    match outcome {
        TransactionOutcome::Committed => None,
        TransactionOutcome::NothingToDo => Some("nothing to do".to_string()),
    }
}
