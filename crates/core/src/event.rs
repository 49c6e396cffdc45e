//! Domain event system — decoupled communication between bounded contexts.
//!
//! The coordinator publishes request lifecycle events here; the gateway's
//! log stream subscribes to them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A request was accepted and its acknowledgement sent
    RequestStarted {
        request_id: String,
        session_id: String,
        model: String,
        timestamp: DateTime<Utc>,
    },

    /// A tool finished inside an agent run
    ToolExecuted {
        request_id: String,
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A completed request was recorded in session memory
    TurnCommitted {
        request_id: String,
        session_id: String,
        turn_id: String,
        session_turns: usize,
        timestamp: DateTime<Utc>,
    },

    /// A request ended with an error event
    RequestFailed {
        request_id: String,
        session_id: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    /// A session's history was discarded
    SessionReset {
        session_id: String,
        existed: bool,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Short name used as the SSE event name on the log stream.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::RequestStarted { .. } => "request_started",
            Self::ToolExecuted { .. } => "tool_executed",
            Self::TurnCommitted { .. } => "turn_committed",
            Self::RequestFailed { .. } => "request_failed",
            Self::SessionReset { .. } => "session_reset",
        }
    }
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        tracing::trace!(event = event.event_name(), "Publishing domain event");
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
