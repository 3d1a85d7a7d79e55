// src/relay/protocol.rs

//! Wire format of the structured worker channel
//!
//! One UTF-8 JSON object per line, no embedded newlines:
//!
//! ```text
//! {"command":"Install","payload":"firefox"}                      caller -> worker
//! {"type":"Progress","payload":"{\"kind\":\"AddStart\",...}"}    worker -> caller (any time)
//! {"success":true,"data":null,"error":null}                       worker -> caller (one per request)
//! ```

use crate::callback::{CallbackEvent, OperationEvent, ProgressEvent};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{BufRead, Write};
use std::str::FromStr;
use tracing::trace;

/// Commands understood by the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Health check; answered with success
    Ping,
    Initialize,
    /// Payload `"force"` forces a full refresh
    Sync,
    /// Payload: package name
    Install,
    /// Payload: package name
    Remove,
    UpdateAll,
    /// Data: JSON array of updates
    GetPackagesNeedingUpdate,
    /// Data: JSON array of packages
    GetInstalledPackages,
    /// Ends the worker's read loop
    Exit,
}

impl Command {
    const ALL: [Command; 9] = [
        Self::Ping,
        Self::Initialize,
        Self::Sync,
        Self::Install,
        Self::Remove,
        Self::UpdateAll,
        Self::GetPackagesNeedingUpdate,
        Self::GetInstalledPackages,
        Self::Exit,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ping => "Ping",
            Self::Initialize => "Initialize",
            Self::Sync => "Sync",
            Self::Install => "Install",
            Self::Remove => "Remove",
            Self::UpdateAll => "UpdateAll",
            Self::GetPackagesNeedingUpdate => "GetPackagesNeedingUpdate",
            Self::GetInstalledPackages => "GetInstalledPackages",
            Self::Exit => "Exit",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|command| command.as_str() == s)
            .ok_or_else(|| Error::Protocol(format!("unknown command '{s}'")))
    }
}

/// Caller to worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub command: String,
    #[serde(default)]
    pub payload: Option<String>,
}

impl Request {
    pub fn new(command: Command, payload: Option<&str>) -> Self {
        Self {
            command: command.as_str().to_string(),
            payload: payload.map(str::to_string),
        }
    }

    /// Parsed command name
    pub fn command(&self) -> Result<Command> {
        self.command.parse()
    }
}

/// Worker to caller, exactly one per request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(data: Option<String>) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Kind of an asynchronous event record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Progress,
    PackageOperation,
}

/// Worker to caller, interleaved at any time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(rename = "type")]
    pub kind: EventType,
    /// JSON-encoded event body
    pub payload: String,
}

impl EventRecord {
    pub fn progress(event: &ProgressEvent) -> Result<Self> {
        Ok(Self {
            kind: EventType::Progress,
            payload: serde_json::to_string(event)?,
        })
    }

    pub fn operation(event: &OperationEvent) -> Result<Self> {
        Ok(Self {
            kind: EventType::PackageOperation,
            payload: serde_json::to_string(event)?,
        })
    }

    /// Decoded body
    pub fn decode(&self) -> Result<CallbackEvent> {
        Ok(match self.kind {
            EventType::Progress => CallbackEvent::Progress(serde_json::from_str(&self.payload)?),
            EventType::PackageOperation => {
                CallbackEvent::Operation(serde_json::from_str(&self.payload)?)
            }
        })
    }
}

/// Any line on the channel
///
/// Variants are distinguished by their fields: events carry `type`,
/// responses carry `success`, requests carry `command`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkerMessage {
    Event(EventRecord),
    Response(Response),
    Request(Request),
}

/// Write one record as a single line and flush
pub fn write_line<W: Write, T: Serialize>(writer: &mut W, message: &T) -> Result<()> {
    let line = serde_json::to_string(message)?;
    trace!("-> {}", line);
    writer
        .write_all(line.as_bytes())
        .and_then(|()| writer.write_all(b"\n"))
        .and_then(|()| writer.flush())
        .map_err(|e| Error::Protocol(format!("failed to write to channel: {e}")))
}

/// Read the next record
///
/// Blank lines are skipped. End of input yields `Ok(None)`; a line that is
/// not a valid record is a protocol failure.
pub fn read_message<R: BufRead>(reader: &mut R) -> Result<Option<WorkerMessage>> {
    loop {
        let mut line = String::new();
        let read = reader
            .read_line(&mut line)
            .map_err(|e| Error::Protocol(format!("failed to read from channel: {e}")))?;
        if read == 0 {
            return Ok(None);
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        trace!("<- {}", line);
        return parse_message(line).map(Some);
    }
}

/// Parse a single record
pub fn parse_message(line: &str) -> Result<WorkerMessage> {
    serde_json::from_str(line)
        .map_err(|e| Error::Protocol(format!("malformed record '{line}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::ProgressKind;
    use std::io::Cursor;

    #[test]
    fn test_request_wire_shape() {
        let json = serde_json::to_string(&Request::new(Command::Install, Some("firefox"))).unwrap();
        assert_eq!(json, r#"{"command":"Install","payload":"firefox"}"#);
        let json = serde_json::to_string(&Request::new(Command::Exit, None)).unwrap();
        assert_eq!(json, r#"{"command":"Exit","payload":null}"#);
    }

    #[test]
    fn test_messages_are_told_apart() {
        let event = EventRecord::progress(&ProgressEvent::new(
            ProgressKind::AddStart,
            Some("foo".into()),
            10,
            1,
            2,
        ))
        .unwrap();
        let line = serde_json::to_string(&event).unwrap();
        assert!(line.starts_with(r#"{"type":"Progress","payload":"#));
        assert!(matches!(parse_message(&line).unwrap(), WorkerMessage::Event(_)));

        let response = parse_message(r#"{"success":false,"data":null,"error":"boom"}"#).unwrap();
        assert_eq!(response, WorkerMessage::Response(Response::failure("boom")));

        let request = parse_message(r#"{"command":"Ping","payload":null}"#).unwrap();
        assert!(matches!(request, WorkerMessage::Request(_)));

        assert!(matches!(parse_message("not json"), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_read_skips_blank_lines_and_reports_eof() {
        let mut input = Cursor::new("\n{\"success\":true}\n");
        assert!(matches!(
            read_message(&mut input).unwrap(),
            Some(WorkerMessage::Response(Response { success: true, .. }))
        ));
        assert!(read_message(&mut input).unwrap().is_none());
    }

    #[test]
    fn test_event_payload_decodes() {
        let event = OperationEvent::ScriptletInfo { line: "done".into() };
        let record = EventRecord::operation(&event).unwrap();
        assert_eq!(record.decode().unwrap(), CallbackEvent::Operation(event));
    }

    #[test]
    fn test_command_parsing() {
        assert_eq!("UpdateAll".parse::<Command>().unwrap(), Command::UpdateAll);
        assert!("Reboot".parse::<Command>().is_err());
    }
}
