//! Streamed run events
//!
//! The closed set of messages a run emits toward its consumer. Each event is a
//! flat JSON object tagged by `type`:
//!
//! ```json
//! {"type":"session-started","sessionId":"…","timestamp":"2026-01-01T00:00:00.000Z"}
//! {"type":"output-chunk","sessionId":"…","timestamp":"…","data":"…"}
//! {"type":"error-chunk","sessionId":"…","timestamp":"…","error":"…"}
//! {"type":"completed","sessionId":"…","timestamp":"…","exitCode":0}
//! ```

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Current time in the wire format (RFC 3339, milliseconds, UTC)
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// One event emitted by a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamEvent {
    /// The process exists and is registered
    #[serde(rename_all = "camelCase")]
    SessionStarted { session_id: String, timestamp: String },
    /// Text read from the child's stdout
    #[serde(rename_all = "camelCase")]
    OutputChunk {
        session_id: String,
        timestamp: String,
        data: String,
    },
    /// Text read from the child's stderr, or a launch failure description
    #[serde(rename_all = "camelCase")]
    ErrorChunk {
        session_id: String,
        timestamp: String,
        error: String,
    },
    /// The process exited
    #[serde(rename_all = "camelCase")]
    Completed {
        session_id: String,
        timestamp: String,
        exit_code: i32,
    },
}

impl StreamEvent {
    pub fn session_started(session_id: impl Into<String>) -> Self {
        Self::SessionStarted {
            session_id: session_id.into(),
            timestamp: now_timestamp(),
        }
    }

    pub fn output(session_id: impl Into<String>, data: impl Into<String>) -> Self {
        Self::OutputChunk {
            session_id: session_id.into(),
            timestamp: now_timestamp(),
            data: data.into(),
        }
    }

    pub fn error(session_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self::ErrorChunk {
            session_id: session_id.into(),
            timestamp: now_timestamp(),
            error: error.into(),
        }
    }

    pub fn completed(session_id: impl Into<String>, exit_code: i32) -> Self {
        Self::Completed {
            session_id: session_id.into(),
            timestamp: now_timestamp(),
            exit_code,
        }
    }

    /// Session this event belongs to
    pub fn session_id(&self) -> &str {
        match self {
            Self::SessionStarted { session_id, .. }
            | Self::OutputChunk { session_id, .. }
            | Self::ErrorChunk { session_id, .. }
            | Self::Completed { session_id, .. } => session_id,
        }
    }

    /// Wire name of the event kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionStarted { .. } => "session-started",
            Self::OutputChunk { .. } => "output-chunk",
            Self::ErrorChunk { .. } => "error-chunk",
            Self::Completed { .. } => "completed",
        }
    }

    /// Whether this is the final event of a run
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn with_fixed_time(mut event: StreamEvent) -> StreamEvent {
        match &mut event {
            StreamEvent::SessionStarted { timestamp, .. }
            | StreamEvent::OutputChunk { timestamp, .. }
            | StreamEvent::ErrorChunk { timestamp, .. }
            | StreamEvent::Completed { timestamp, .. } => {
                *timestamp = "2026-01-01T00:00:00.000Z".to_string();
            }
        }
        event
    }

    #[test]
    fn test_wire_shape() {
        let started = serde_json::to_value(with_fixed_time(StreamEvent::session_started("s1"))).unwrap();
        assert_eq!(
            started,
            json!({
                "type": "session-started",
                "sessionId": "s1",
                "timestamp": "2026-01-01T00:00:00.000Z"
            })
        );

        let output = serde_json::to_value(with_fixed_time(StreamEvent::output("s1", "hi\n"))).unwrap();
        assert_eq!(output["type"], "output-chunk");
        assert_eq!(output["data"], "hi\n");

        let error = serde_json::to_value(with_fixed_time(StreamEvent::error("s1", "boom"))).unwrap();
        assert_eq!(error["type"], "error-chunk");
        assert_eq!(error["error"], "boom");

        let completed = serde_json::to_value(with_fixed_time(StreamEvent::completed("s1", 3))).unwrap();
        assert_eq!(
            completed,
            json!({
                "type": "completed",
                "sessionId": "s1",
                "timestamp": "2026-01-01T00:00:00.000Z",
                "exitCode": 3
            })
        );
    }

    #[test]
    fn test_parse_from_wire() {
        let event: StreamEvent = serde_json::from_value(json!({
            "type": "output-chunk",
            "sessionId": "abc",
            "timestamp": "2026-01-01T00:00:00.000Z",
            "data": "x"
        }))
        .unwrap();

        assert_eq!(event.session_id(), "abc");
        assert_eq!(event.kind(), "output-chunk");
        assert!(!event.is_terminal());
    }

    #[test]
    fn test_timestamp_format() {
        let ts = now_timestamp();
        assert!(ts.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }
}
