use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

use crate::debug_adapter::{AdapterEvent, StackFrame};

#[derive(Debug, Clone, Serialize)]
pub struct Request {
    pub seq: i64,
    #[serde(rename = "type")]
    pub type_: &'static str,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

impl Request {
    pub fn new(seq: i64, command: impl Into<String>, arguments: Option<Value>) -> Self {
        Self {
            seq,
            type_: "request",
            command: command.into(),
            arguments,
        }
    }
}

/// Reply to a request the adapter sent to us (e.g. `runInTerminal`)
#[derive(Debug, Clone, Serialize)]
pub struct OutgoingResponse {
    pub seq: i64,
    #[serde(rename = "type")]
    pub type_: &'static str,
    pub request_seq: i64,
    pub success: bool,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl OutgoingResponse {
    pub fn unsupported(seq: i64, request: &ReverseRequest) -> Self {
        Self {
            seq,
            type_: "response",
            request_seq: request.seq,
            success: false,
            command: request.command.clone(),
            message: Some(format!("{} is not supported", request.command)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    pub seq: i64,
    pub request_seq: i64,
    pub success: bool,
    pub command: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub body: Option<Value>,
}

impl Response {
    /// Human readable failure text, preferring the adapter's formatted error
    pub fn error_text(&self) -> String {
        if let Some(format) = self
            .body
            .as_ref()
            .and_then(|body| body.pointer("/error/format"))
            .and_then(Value::as_str)
        {
            return format.to_string();
        }
        self.message
            .clone()
            .unwrap_or_else(|| format!("{} failed", self.command))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Event {
    pub seq: i64,
    pub event: String,
    #[serde(default)]
    pub body: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReverseRequest {
    pub seq: i64,
    pub command: String,
    #[serde(default)]
    pub arguments: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum IncomingMessage {
    Response(Response),
    Event(Event),
    Request(ReverseRequest),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DapStackFrame {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub source: Option<Source>,
    pub line: i64,
}

impl From<DapStackFrame> for StackFrame {
    fn from(frame: DapStackFrame) -> Self {
        StackFrame {
            id: frame.id,
            name: frame.name,
            source_path: frame
                .source
                .and_then(|source| source.path)
                .map(PathBuf::from),
            line: u32::try_from(frame.line).unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTraceBody {
    #[serde(default)]
    pub stack_frames: Vec<DapStackFrame>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateBody {
    pub result: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Thread {
    pub id: i64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThreadsBody {
    #[serde(default)]
    pub threads: Vec<Thread>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoppedBody {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    thread_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContinuedBody {
    #[serde(default)]
    thread_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct OutputBody {
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    output: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExitedBody {
    #[serde(default)]
    exit_code: Option<i64>,
}

fn body_as<T: for<'de> Deserialize<'de> + Default>(body: &Option<Value>) -> T {
    body.clone()
        .and_then(|value| serde_json::from_value(value).ok())
        .unwrap_or_default()
}

impl Event {
    /// Map a DAP event onto the bridge's notification set.
    /// Events the bridge does not track yield `None`.
    pub fn to_adapter_event(&self) -> Option<AdapterEvent> {
        match self.event.as_str() {
            "stopped" => {
                let body: StoppedBody = body_as(&self.body);
                Some(AdapterEvent::Stopped {
                    thread_id: body.thread_id,
                    reason: body.reason,
                })
            }
            "continued" => {
                let body: ContinuedBody = body_as(&self.body);
                Some(AdapterEvent::Continued {
                    thread_id: body.thread_id,
                })
            }
            "output" => {
                let body: OutputBody = body_as(&self.body);
                // telemetry is adapter chatter, not debuggee output
                if body.category.as_deref() == Some("telemetry") {
                    return None;
                }
                Some(AdapterEvent::Output {
                    category: body.category,
                    text: body.output,
                })
            }
            "exited" => {
                let body: ExitedBody = body_as(&self.body);
                Some(AdapterEvent::Exited {
                    exit_code: body.exit_code,
                })
            }
            "terminated" => Some(AdapterEvent::Terminated),
            _ => None,
        }
    }
}
