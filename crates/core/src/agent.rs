//! The agent collaborator contract.
//!
//! An [`Agent`] answers one question: it receives the prior messages plus the
//! new user message, may call named tools along the way, reports progress to
//! an [`AgentObserver`], and returns the full list of messages it produced.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::AgentError;
use crate::message::{Message, Role};
use crate::observer::AgentObserver;

/// Prior-turn values a follow-up intent tool falls back to when the model
/// calls it without explicit arguments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FollowUpDefaults {
    pub session_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sql: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub last_result_schema: Vec<String>,
}

impl FollowUpDefaults {
    pub fn is_empty(&self) -> bool {
        self.last_sql.is_none() && self.last_result_schema.is_empty()
    }
}

/// Everything one agent run needs. Dropped when the run ends, which also
/// discards its follow-up defaults.
#[derive(Debug, Clone)]
pub struct AgentInvocation {
    /// Per-session correlation key
    pub session_id: String,
    pub request_id: String,
    pub model: String,
    pub messages: Vec<Message>,

    /// Only set when the session has history.
    pub follow_up: Option<FollowUpDefaults>,
}

/// The messages produced by a finished agent run.
#[derive(Debug, Clone, Default)]
pub struct AgentOutcome {
    pub messages: Vec<Message>,
}

impl AgentOutcome {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    /// The newest assistant message, whatever its content.
    pub fn last_assistant(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::Assistant)
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// The chart configuration carried by the newest tool message that has one.
    pub fn chart_config(&self) -> Option<&serde_json::Value> {
        self.messages
            .iter()
            .rev()
            .filter(|m| m.role == Role::Tool)
            .filter_map(|m| m.data.as_ref())
            .find_map(|data| data.get("chart_config").filter(|v| !v.is_null()))
    }
}

#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    /// Run to completion. Tokens and tool activity are reported to
    /// `observer` while the run is in progress.
    async fn invoke(
        &self,
        invocation: AgentInvocation,
        observer: Arc<dyn AgentObserver>,
    ) -> std::result::Result<AgentOutcome, AgentError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_assistant_is_newest_even_when_empty() {
        let outcome = AgentOutcome::new(vec![
            Message::user("Revenue by month?"),
            Message::assistant("Revenue peaked in March."),
            Message::tool_result("call_1", "{}"),
            Message::assistant(""),
        ]);
        assert_eq!(outcome.last_assistant().unwrap().content, "");
        assert_eq!(outcome.last_message().unwrap().role, Role::Assistant);

        let no_assistant = AgentOutcome::new(vec![Message::user("Hi")]);
        assert!(no_assistant.last_assistant().is_none());
    }

    #[test]
    fn chart_config_prefers_newest_tool_message() {
        let outcome = AgentOutcome::new(vec![
            Message::tool_result("call_1", "{}")
                .with_data(serde_json::json!({"chart_config": {"type": "bar"}})),
            Message::tool_result("call_2", "{}")
                .with_data(serde_json::json!({"chart_config": {"type": "line"}})),
            Message::tool_result("call_3", "{}").with_data(serde_json::json!({"rows": []})),
        ]);
        assert_eq!(outcome.chart_config().unwrap()["type"], "line");
    }

    #[test]
    fn chart_config_absent_without_tool_data() {
        let outcome = AgentOutcome::new(vec![Message::assistant("done")]);
        assert!(outcome.chart_config().is_none());
    }

    #[test]
    fn follow_up_defaults_emptiness() {
        let mut defaults = FollowUpDefaults {
            session_id: "s1".into(),
            ..Default::default()
        };
        assert!(defaults.is_empty());
        defaults.last_result_schema = vec!["region".into()];
        assert!(!defaults.is_empty());
    }
}
