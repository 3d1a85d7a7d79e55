// src/relay/client.rs

//! Caller side of the structured worker channel
//!
//! The channel is half-duplex: one request is outstanding at a time. While
//! waiting for its response the client consumes any number of interleaved
//! event records and hands them to the event callback.

use super::auth::{self, Elevation};
use super::protocol::{self, Command, EventRecord, Request, Response, WorkerMessage};
use crate::error::{Error, Result};
use crate::package::{PackageInfo, UpdateInfo};
use std::ffi::OsString;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Stdio};
use tracing::{debug, warn};
use zeroize::Zeroizing;

type EventCallback = Box<dyn FnMut(&EventRecord)>;

/// Request/response client over a line-oriented channel
pub struct WorkerClient<R, W> {
    reader: R,
    writer: W,
    on_event: Option<EventCallback>,
}

impl<R: BufRead, W: Write> WorkerClient<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            on_event: None,
        }
    }

    /// Register a callback for interleaved event records
    pub fn on_event<F: FnMut(&EventRecord) + 'static>(mut self, callback: F) -> Self {
        self.on_event = Some(Box::new(callback));
        self
    }

    /// Send a request and wait for its response
    ///
    /// Events read before the response are dispatched in order. End of input
    /// before the response is a protocol failure.
    pub fn request(&mut self, command: Command, payload: Option<&str>) -> Result<Response> {
        debug!("Sending {} {:?}", command, payload);
        protocol::write_line(&mut self.writer, &Request::new(command, payload))?;

        loop {
            match protocol::read_message(&mut self.reader)? {
                Some(WorkerMessage::Response(response)) => return Ok(response),
                Some(WorkerMessage::Event(event)) => {
                    if let Some(callback) = self.on_event.as_mut() {
                        callback(&event);
                    }
                }
                Some(WorkerMessage::Request(request)) => {
                    return Err(Error::Protocol(format!(
                        "worker sent a request: {}",
                        request.command
                    )));
                }
                None => {
                    return Err(Error::Protocol(format!(
                        "worker closed the channel before answering {command}"
                    )));
                }
            }
        }
    }

    /// Send a request; a failure response becomes [`Error::Remote`]
    pub fn call(&mut self, command: Command, payload: Option<&str>) -> Result<Option<String>> {
        let response = self.request(command, payload)?;
        if response.success {
            Ok(response.data)
        } else {
            Err(Error::Remote(
                response
                    .error
                    .unwrap_or_else(|| format!("{command} failed")),
            ))
        }
    }

    pub fn ping(&mut self) -> Result<()> {
        self.call(Command::Ping, None).map(|_| ())
    }

    pub fn initialize(&mut self) -> Result<()> {
        self.call(Command::Initialize, None).map(|_| ())
    }

    pub fn sync(&mut self, force: bool) -> Result<()> {
        self.call(Command::Sync, force.then_some("force")).map(|_| ())
    }

    pub fn install(&mut self, name: &str) -> Result<()> {
        self.call(Command::Install, Some(name)).map(|_| ())
    }

    pub fn remove(&mut self, name: &str) -> Result<()> {
        self.call(Command::Remove, Some(name)).map(|_| ())
    }

    pub fn update_all(&mut self) -> Result<()> {
        self.call(Command::UpdateAll, None).map(|_| ())
    }

    pub fn packages_needing_update(&mut self) -> Result<Vec<UpdateInfo>> {
        self.call_json(Command::GetPackagesNeedingUpdate)
    }

    pub fn installed_packages(&mut self) -> Result<Vec<PackageInfo>> {
        self.call_json(Command::GetInstalledPackages)
    }

    /// Ask the worker to exit
    pub fn exit(&mut self) -> Result<()> {
        self.call(Command::Exit, None).map(|_| ())
    }

    fn call_json<T: serde::de::DeserializeOwned>(&mut self, command: Command) -> Result<T> {
        let data = self
            .call(command, None)?
            .ok_or_else(|| Error::Protocol(format!("{command} returned no data")))?;
        serde_json::from_str(&data)
            .map_err(|e| Error::Protocol(format!("{command} returned malformed data: {e}")))
    }
}

/// A privileged worker child process
pub struct ElevatedWorker {
    child: Child,
    client: WorkerClient<BufReader<ChildStdout>, ChildStdin>,
}

impl ElevatedWorker {
    /// Start `program worker_args...` with elevated privileges and check it answers
    ///
    /// A child that exits before answering the initial ping is reported as
    /// an authentication failure.
    pub fn spawn(
        elevation: &Elevation,
        program: &Path,
        worker_args: &[OsString],
        secret: Option<&Zeroizing<String>>,
    ) -> Result<Self> {
        let mut child = auth::spawn_elevated(
            elevation,
            program,
            worker_args,
            Stdio::piped(),
            Stdio::inherit(),
            secret,
        )?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            reap(&mut child);
            return Err(Error::Protocol("worker pipes are missing".to_string()));
        };

        let mut worker = Self {
            child,
            client: WorkerClient::new(BufReader::new(stdout), stdin),
        };

        match worker.client.ping() {
            Ok(()) => Ok(worker),
            Err(e) => {
                let status = reap(&mut worker.child);
                Err(Error::Authentication(format!(
                    "privileged worker did not start ({e}; {status})"
                )))
            }
        }
    }

    /// Register a callback for worker events
    pub fn on_event<F: FnMut(&EventRecord) + 'static>(mut self, callback: F) -> Self {
        self.client.on_event = Some(Box::new(callback));
        self
    }

    pub fn client(&mut self) -> &mut WorkerClient<BufReader<ChildStdout>, ChildStdin> {
        &mut self.client
    }

    /// Send `Exit` and wait for the child
    pub fn shutdown(mut self) -> Result<()> {
        if let Err(e) = self.client.exit() {
            warn!("Worker did not acknowledge exit: {}", e);
        }
        let status = self.child.wait()?;
        debug!("Worker exited with {}", status);
        Ok(())
    }
}

/// Kill `child` if it is still running and collect its exit status
pub fn reap(child: &mut Child) -> String {
    if let Err(e) = child.kill() {
        warn!("Failed to kill child {}: {}", child.id(), e);
    }
    match child.wait() {
        Ok(status) => status.to_string(),
        Err(e) => {
            warn!("Failed to wait for child {}: {}", child.id(), e);
            "unknown status".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::auth::tests::{PASSWORD, fake_sudo};
    use crate::relay::protocol::EventType;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;
    use std::cell::RefCell;
    use std::io::Cursor;
    use std::rc::Rc;

    const EVENT: &str = r#"{"type":"PackageOperation","payload":"{\"event\":\"scriptlet_info\",\"line\":\"hi\"}"}"#;

    #[test]
    fn test_events_before_response_are_dispatched() {
        let script = format!(
            "{EVENT}\n{EVENT}\n{{\"success\":true,\"data\":\"pong\",\"error\":null}}\n{EVENT}\n{{\"success\":true}}\n"
        );
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let mut sent = Vec::new();
        {
            let mut client = WorkerClient::new(Cursor::new(script), &mut sent)
                .on_event(move |event| sink.borrow_mut().push(event.kind));

            assert_eq!(client.call(Command::Ping, None).unwrap().as_deref(), Some("pong"));
            assert_eq!(seen.borrow().len(), 2);

            client.install("htop").unwrap();
            assert_eq!(seen.borrow().len(), 3);
        }
        assert!(seen.borrow().iter().all(|k| *k == EventType::PackageOperation));

        let sent = String::from_utf8(sent).unwrap();
        assert_eq!(
            sent.lines().collect::<Vec<_>>(),
            vec![
                r#"{"command":"Ping","payload":null}"#,
                r#"{"command":"Install","payload":"htop"}"#,
            ]
        );
    }

    #[test]
    fn test_eof_is_protocol_failure() {
        let mut client = WorkerClient::new(Cursor::new(format!("{EVENT}\n")), Vec::new());
        assert!(matches!(client.ping(), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_failure_response_is_remote_error() {
        let mut client = WorkerClient::new(
            Cursor::new("{\"success\":false,\"error\":\"failed to remove 'vim'\"}\n"),
            Vec::new(),
        );
        let err = client.remove("vim").unwrap_err();
        assert!(matches!(err, Error::Remote(ref message) if message == "failed to remove 'vim'"));
    }

    /// Start a worker and shut it down on another thread, failing the test
    /// if that never returns
    fn start_and_stop(elevation: Elevation, script: &str, secret: Option<&str>) -> Result<()> {
        let args: Vec<OsString> = vec!["-c".into(), script.into()];
        let secret = secret.map(|s| Zeroizing::new(s.to_string()));
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let result =
                ElevatedWorker::spawn(&elevation, Path::new("/bin/sh"), &args, secret.as_ref())
                    .and_then(ElevatedWorker::shutdown);
            let _ = tx.send(result);
        });
        rx.recv_timeout(Duration::from_secs(10))
            .expect("worker start did not return")
    }

    #[test]
    fn test_wrong_password_fails_without_hanging() {
        let dir = TempDir::new().unwrap();
        let result = start_and_stop(fake_sudo(&dir), "cat", Some("hunter2"));
        assert!(matches!(result, Err(Error::Authentication(_))));
    }

    #[test]
    fn test_worker_exiting_before_ping_is_authentication_failure() {
        let result = start_and_stop(Elevation::AlreadyRoot, "exit 3", None);
        let Err(Error::Authentication(message)) = result else {
            panic!("expected an authentication failure");
        };
        assert!(message.contains('3'), "{message}");
    }

    #[test]
    fn test_authenticated_worker_answers_ping_and_exits() {
        let dir = TempDir::new().unwrap();
        let script = r#"read ping; echo '{"success":true,"data":"pong"}'; read exit; echo '{"success":true}'"#;
        start_and_stop(fake_sudo(&dir), script, Some(PASSWORD)).unwrap();
    }

    #[test]
    fn test_list_results_decode() {
        let updates = r#"[{"name":"bash","current_version":"5.2-1","new_version":"5.2-2","repository":"core","download_size":10}]"#;
        let line = serde_json::to_string(&Response::ok(Some(updates.to_string()))).unwrap();
        let mut client = WorkerClient::new(Cursor::new(format!("{line}\n")), Vec::new());
        let updates = client.packages_needing_update().unwrap();
        assert_eq!(updates[0].new_version, "5.2-2");
    }
}
