//! Line-delimited JSON protocol spoken with the Node.js bridge

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::PageId;
use crate::error::{E2eError, E2eResult};

/// Bridge operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    NewPage,
    ClosePage,
    Goto,
    WaitForLoad,
    Back,
    Forward,
    Reload,
    Click,
    Hover,
    SetViewport,
    Url,
    Title,
    Content,
    Query,
    Evaluate,
    Console,
    Cookies,
    Screenshot,
    Close,
}

#[derive(Debug, Serialize)]
pub struct Request {
    pub id: u64,
    pub op: Op,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<PageId>,
    pub params: Value,
}

impl Request {
    /// Encode as a single newline-terminated line
    pub fn to_line(&self) -> E2eResult<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Anything the bridge writes on stdout
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Incoming {
    Response(Response),
    Event(Event),
}

impl Incoming {
    pub fn parse(line: &str) -> E2eResult<Self> {
        serde_json::from_str(line)
            .map_err(|e| E2eError::Protocol(format!("unreadable bridge line '{}': {}", line, e)))
    }
}

#[derive(Debug, Deserialize)]
pub struct Response {
    pub id: u64,
    pub ok: bool,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error: Option<BridgeError>,
}

#[derive(Debug, Deserialize)]
pub struct BridgeError {
    pub kind: BridgeErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeErrorKind {
    Timeout,
    Closed,
    #[serde(other)]
    Error,
}

impl Response {
    pub fn into_result(self) -> E2eResult<Value> {
        if self.ok {
            return Ok(self.result);
        }
        match self.error {
            Some(BridgeError {
                kind: BridgeErrorKind::Timeout,
                message,
            }) => Err(E2eError::Timeout(message)),
            Some(BridgeError {
                kind: BridgeErrorKind::Closed,
                ..
            }) => Err(E2eError::SessionClosed),
            Some(BridgeError { message, .. }) => Err(E2eError::Playwright(message)),
            None => Err(E2eError::Protocol(format!(
                "request {} failed without an error payload",
                self.id
            ))),
        }
    }
}

/// Unsolicited bridge notification
#[derive(Debug, Deserialize)]
pub struct Event {
    pub event: EventKind,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Browser launched; `data.page` is the main page id
    Ready,
    /// Startup failed; `data.message` explains why
    Fatal,
    ProtocolError,
    #[serde(other)]
    Unknown,
}

impl Event {
    pub fn message(&self) -> String {
        self.data
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("no message")
            .to_string()
    }
}
