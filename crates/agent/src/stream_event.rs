//! Client-facing streaming events.
//!
//! Every request produces a `start` event, zero or more `response` events
//! carrying the text accumulated so far, and exactly one terminal event:
//! a `response` with `finished: true`, or an `error`.

use serde::{Deserialize, Serialize};

pub const START_MESSAGE: &str = "Your task has been received and will be processed immediately.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamEventKind {
    Start,
    Response,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub kind: StreamEventKind,
    pub request_id: String,
    pub session_id: String,
    pub message: String,
    pub finished: bool,
}

impl StreamEvent {
    fn new(
        kind: StreamEventKind,
        request_id: &str,
        session_id: &str,
        message: impl Into<String>,
        finished: bool,
    ) -> Self {
        Self {
            kind,
            request_id: request_id.to_string(),
            session_id: session_id.to_string(),
            message: message.into(),
            finished,
        }
    }

    pub fn start(request_id: &str, session_id: &str) -> Self {
        Self::new(StreamEventKind::Start, request_id, session_id, START_MESSAGE, false)
    }

    pub fn response(
        request_id: &str,
        session_id: &str,
        message: impl Into<String>,
        finished: bool,
    ) -> Self {
        Self::new(StreamEventKind::Response, request_id, session_id, message, finished)
    }

    pub fn error(request_id: &str, session_id: &str, message: impl Into<String>) -> Self {
        Self::new(StreamEventKind::Error, request_id, session_id, message, true)
    }

    /// SSE event name for this event.
    pub fn event_type(&self) -> &'static str {
        match self.kind {
            StreamEventKind::Error => "error",
            StreamEventKind::Start | StreamEventKind::Response => "message",
        }
    }
}
