// tests/worker_protocol.rs

//! End-to-end tests of the structured relay: a worker serving an
//! in-memory library, and a client reading what the worker wrote.

mod common;

use common::{sample_connector, test_config};
use shelly::relay::protocol::{self, Command, Request, WorkerMessage};
use shelly::callback::CallbackEvent;
use shelly::relay::{EventType, Worker, WorkerClient, relay_for};
use shelly::{OperationEvent, SyncClient};
use std::cell::RefCell;
use std::io::Cursor;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

fn requests(commands: &[(Command, Option<&str>)]) -> String {
    let mut out = Vec::new();
    for (command, payload) in commands {
        protocol::write_line(&mut out, &Request::new(*command, *payload)).unwrap();
    }
    String::from_utf8(out).unwrap()
}

/// Run a worker over `input` and return everything it wrote
fn serve(connector: common::MemoryConnector, dir: &TempDir, input: String) -> String {
    let writer = Arc::new(Mutex::new(Vec::new()));
    let client = SyncClient::new(connector, test_config(dir.path()), relay_for(Arc::clone(&writer)));
    Worker::new(client)
        .serve(Cursor::new(input), &writer)
        .unwrap();
    let bytes = writer.lock().unwrap().clone();
    String::from_utf8(bytes).unwrap()
}

#[test]
fn test_install_streams_events_before_response() {
    let dir = TempDir::new().unwrap();
    let connector = sample_connector();
    let output = serve(
        connector.clone(),
        &dir,
        requests(&[
            (Command::Initialize, None),
            (Command::Install, Some("htop")),
            (Command::Exit, None),
        ]),
    );

    let messages: Vec<WorkerMessage> = output
        .lines()
        .map(|line| protocol::parse_message(line).unwrap())
        .collect();

    // Initialize response, then events, then the install response
    assert!(matches!(&messages[0], WorkerMessage::Response(r) if r.success));
    let install_response = messages
        .iter()
        .skip(1)
        .position(|m| matches!(m, WorkerMessage::Response(_)))
        .unwrap()
        + 1;
    assert!(install_response > 1, "events precede the install response");
    assert!(
        messages[1..install_response]
            .iter()
            .all(|m| matches!(m, WorkerMessage::Event(_)))
    );
    assert!(connector.installed().contains(&"htop 3.3.0-1".to_string()));

    // Exit is acknowledged and nothing follows it
    assert!(matches!(messages.last(), Some(WorkerMessage::Response(r)) if r.success));
    assert_eq!(messages.len(), install_response + 2);
}

#[test]
fn test_client_reads_worker_transcript() {
    let dir = TempDir::new().unwrap();
    let connector = sample_connector();
    let output = serve(
        connector,
        &dir,
        requests(&[
            (Command::Initialize, None),
            (Command::GetPackagesNeedingUpdate, None),
            (Command::UpdateAll, None),
            (Command::GetInstalledPackages, None),
            (Command::Remove, Some("nano")),
            (Command::Exit, None),
        ]),
    );

    let progress = Rc::new(RefCell::new(Vec::new()));
    let operations = Rc::new(RefCell::new(Vec::new()));
    let (p, o) = (Rc::clone(&progress), Rc::clone(&operations));
    let mut sent = Vec::new();
    let mut client = WorkerClient::new(Cursor::new(output), &mut sent).on_event(move |record| {
        match record.decode().unwrap() {
            CallbackEvent::Progress(event) => {
                assert_eq!(record.kind, EventType::Progress);
                p.borrow_mut().push((event.package, event.percent));
            }
            CallbackEvent::Operation(event) => o.borrow_mut().push(event),
            other => panic!("workers never relay {other:?}"),
        }
    });

    client.initialize().unwrap();

    let updates = client.packages_needing_update().unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].name, "bash");
    assert_eq!(updates[0].current_version, "5.2-1");
    assert_eq!(updates[0].new_version, "5.2-2");

    client.update_all().unwrap();

    let installed = client.installed_packages().unwrap();
    let bash = installed.iter().find(|p| p.name == "bash").unwrap();
    assert_eq!(bash.version, "5.2-2");

    let err = client.remove("nano").unwrap_err();
    assert!(matches!(err, shelly::Error::Remote(ref message) if message.contains("nano")));

    client.exit().unwrap();
    drop(client);

    // Per-package percentages are relayed as reported
    assert_eq!(
        *progress.borrow(),
        vec![(Some("bash".to_string()), 0), (Some("bash".to_string()), 100)]
    );
    assert!(operations.borrow().iter().any(|e| matches!(
        e,
        OperationEvent::PackageOperation { new_package: Some(p), .. } if p.version == "5.2-2"
    )));
    assert_eq!(String::from_utf8(sent).unwrap().lines().count(), 6);
}

#[test]
fn test_malformed_request_gets_failure_and_worker_continues() {
    let dir = TempDir::new().unwrap();
    let input = format!(
        "not json\n{{\"command\":\"Frobnicate\",\"payload\":null}}\n{}",
        requests(&[(Command::Ping, None)])
    );
    let output = serve(sample_connector(), &dir, input);
    let responses: Vec<_> = output
        .lines()
        .map(|line| match protocol::parse_message(line).unwrap() {
            WorkerMessage::Response(response) => response,
            other => panic!("unexpected {other:?}"),
        })
        .collect();

    assert_eq!(responses.len(), 3);
    assert!(!responses[0].success);
    assert!(!responses[1].success);
    assert!(responses[2].success);
    assert_eq!(responses[2].data.as_deref(), Some("pong"));
}

#[test]
fn test_install_without_payload_fails() {
    let dir = TempDir::new().unwrap();
    let output = serve(
        sample_connector(),
        &dir,
        requests(&[(Command::Install, None)]),
    );
    let WorkerMessage::Response(response) = protocol::parse_message(output.trim()).unwrap() else {
        panic!("expected a response");
    };
    assert!(!response.success);
    assert!(response.error.is_some());
}
