//! Stdio wire protocol
//!
//! One JSON object per line in both directions, internally tagged on `type`.

use serde::{Deserialize, Serialize};

use crate::events::StreamEvent;
use crate::supervisor::ProcessInfo;
use crate::types::{Result, RunRequest, SupervisorError};

/// Message read from stdin
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum InboundMessage {
    /// Run a CLI command
    Command(RunRequest),
    /// Abort the run bound to a session
    #[serde(rename_all = "camelCase")]
    AbortSession { session_id: String },
    /// List live sessions
    ListSessions,
}

impl InboundMessage {
    /// Parse one input line
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        if line.is_empty() {
            return Err(SupervisorError::invalid_request("empty message"));
        }
        Ok(serde_json::from_str(line)?)
    }
}

/// Control responses that are not run events
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlMessage {
    #[serde(rename_all = "camelCase")]
    SessionAborted { session_id: String, success: bool },
    #[serde(rename_all = "camelCase")]
    ActiveSessions {
        session_ids: Vec<String>,
        sessions: Vec<ProcessInfo>,
    },
    #[serde(rename_all = "camelCase")]
    ProtocolError { error: String, code: i32 },
}

impl ControlMessage {
    pub fn protocol_error(error: &SupervisorError) -> Self {
        ControlMessage::ProtocolError {
            error: error.to_string(),
            code: error.error_code().code(),
        }
    }
}

/// Anything written to stdout
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    Event(StreamEvent),
    Control(ControlMessage),
}

impl From<StreamEvent> for OutboundMessage {
    fn from(event: StreamEvent) -> Self {
        OutboundMessage::Event(event)
    }
}

impl From<ControlMessage> for OutboundMessage {
    fn from(message: ControlMessage) -> Self {
        OutboundMessage::Control(message)
    }
}

impl OutboundMessage {
    /// Serialize as a single line without the trailing newline
    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
