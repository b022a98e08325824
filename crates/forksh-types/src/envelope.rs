//! Control-channel envelope.
//!
//! Every frame on the control channel is a single JSON object. Both
//! directions share the shape, differing only in the correlation key:
//!
//! ```text
//!   host → worker   { "id": "7",    "@type": "read",  "jrql": {...} }
//!   worker → host   { "cmdId": "7", "@type": "next",  "subject": {...} }
//!                   { "cmdId": "7", "@type": "complete" }
//! ```
//!
//! The payload carried by `jrql`, `subject` and `status` replies is opaque to
//! the envelope; it belongs to whatever engine runs inside the worker.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Environment variable naming the control socket a spawned worker connects to.
pub const CONTROL_SOCKET_ENV: &str = "FORKSH_CONTROL_SOCKET";

/// Correlation id used for startup reports, before any host request exists.
pub const START_CMD_ID: &str = "start";

/// Correlation id used for the stop request sent when a worker is stopped.
pub const STOP_CMD_ID: &str = "stop";

/// Identifier threading one request to its reply frames.
pub type CorrelationId = String;

/// Kind of a host → worker request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RequestKind {
    Status,
    Read,
    Write,
    Stop,
    /// A kind this build does not know about (the envelope is extensible).
    Other(String),
}

impl RequestKind {
    pub fn as_str(&self) -> &str {
        match self {
            RequestKind::Status => "status",
            RequestKind::Read => "read",
            RequestKind::Write => "write",
            RequestKind::Stop => "stop",
            RequestKind::Other(kind) => kind,
        }
    }

    /// True if replies to this kind may stream several `next` frames.
    pub fn is_streaming(&self) -> bool {
        matches!(self, RequestKind::Read)
    }
}

impl From<String> for RequestKind {
    fn from(kind: String) -> Self {
        match kind.as_str() {
            "status" => RequestKind::Status,
            "read" => RequestKind::Read,
            "write" => RequestKind::Write,
            "stop" => RequestKind::Stop,
            _ => RequestKind::Other(kind),
        }
    }
}

impl From<RequestKind> for String {
    fn from(kind: RequestKind) -> Self {
        match kind {
            RequestKind::Other(kind) => kind,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a worker → host reply frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ReplyKind {
    Started,
    Status,
    Next,
    Complete,
    Error,
    Stopped,
    /// Resolved startup options from a dry run, sent instead of `started`.
    Config,
    Other(String),
}

impl ReplyKind {
    pub fn as_str(&self) -> &str {
        match self {
            ReplyKind::Started => "started",
            ReplyKind::Status => "status",
            ReplyKind::Next => "next",
            ReplyKind::Complete => "complete",
            ReplyKind::Error => "error",
            ReplyKind::Stopped => "stopped",
            ReplyKind::Config => "config",
            ReplyKind::Other(kind) => kind,
        }
    }
}

impl From<String> for ReplyKind {
    fn from(kind: String) -> Self {
        match kind.as_str() {
            "started" => ReplyKind::Started,
            "status" => ReplyKind::Status,
            "next" => ReplyKind::Next,
            "complete" => ReplyKind::Complete,
            "error" => ReplyKind::Error,
            "stopped" => ReplyKind::Stopped,
            "config" => ReplyKind::Config,
            _ => ReplyKind::Other(kind),
        }
    }
}

impl From<ReplyKind> for String {
    fn from(kind: ReplyKind) -> Self {
        match kind {
            ReplyKind::Other(kind) => kind,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for ReplyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A host → worker request frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation id, echoed back as `cmdId` on every reply.
    pub id: CorrelationId,
    #[serde(rename = "@type")]
    pub kind: RequestKind,
    /// Engine payload for `read` and `write`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jrql: Option<Value>,
}

impl Request {
    pub fn new(id: impl Into<CorrelationId>, kind: RequestKind) -> Self {
        Self {
            id: id.into(),
            kind,
            jrql: None,
        }
    }

    pub fn with_jrql(mut self, jrql: Value) -> Self {
        self.jrql = Some(jrql);
        self
    }
}

/// A worker → host reply frame.
///
/// Fields other than `cmdId` and `@type` are kept verbatim in `body`, so a
/// reply can be re-emitted to the user exactly as the worker sent it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    #[serde(rename = "cmdId", default)]
    pub cmd_id: CorrelationId,
    #[serde(rename = "@type")]
    pub kind: ReplyKind,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl Reply {
    pub fn new(cmd_id: impl Into<CorrelationId>, kind: ReplyKind) -> Self {
        Self {
            cmd_id: cmd_id.into(),
            kind,
            body: Map::new(),
        }
    }

    /// Add a body field.
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.body.insert(key.into(), value);
        self
    }

    /// Merge the fields of a JSON object into the body. Non-objects are ignored.
    pub fn with_fields(mut self, fields: Value) -> Self {
        if let Value::Object(fields) = fields {
            self.body.extend(fields);
        }
        self
    }

    /// `started` frame announcing the worker's self-assigned id.
    pub fn started(cmd_id: impl Into<CorrelationId>, worker_id: impl Into<String>) -> Self {
        Self::new(cmd_id, ReplyKind::Started).with("@id", Value::String(worker_id.into()))
    }

    /// `error` frame carrying a description of the failure.
    pub fn error(cmd_id: impl Into<CorrelationId>, err: impl fmt::Display) -> Self {
        Self::new(cmd_id, ReplyKind::Error).with("err", Value::String(err.to_string()))
    }

    /// `next` frame carrying one streamed subject.
    pub fn next(cmd_id: impl Into<CorrelationId>, subject: Value) -> Self {
        Self::new(cmd_id, ReplyKind::Next).with("subject", subject)
    }

    /// The worker's self-assigned id (`@id`), if present.
    pub fn worker_id(&self) -> Option<&str> {
        self.body.get("@id").and_then(Value::as_str)
    }

    /// The streamed subject of a `next` frame.
    pub fn subject(&self) -> Option<&Value> {
        self.body.get("subject")
    }

    /// The error description of an `error` frame.
    pub fn err(&self) -> Option<String> {
        self.body.get("err").map(|err| match err {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// Environment entries a `started` frame asks the host to adopt.
    ///
    /// Non-string values are rendered as JSON text.
    pub fn env(&self) -> Option<HashMap<String, String>> {
        let env = self.body.get("env")?.as_object()?;
        Some(
            env.iter()
                .map(|(key, value)| {
                    let value = match value {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (key.clone(), value)
                })
                .collect(),
        )
    }

    /// The whole frame as a JSON value.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
