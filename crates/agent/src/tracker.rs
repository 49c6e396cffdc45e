//! Tool-output tracker — per-request observer of an agent run.
//!
//! Collects streamed text and picks the structured artifacts session memory
//! needs out of the outputs of three known tools.

use chatbi_core::observer::AgentObserver;
use serde_json::Value;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// Produces the structured analysis plan.
pub const INTENT_TOOL: &str = "analyze_nl_intent";
/// Produces `{"sqlite_query": "..."}`.
pub const QUERY_GENERATION_TOOL: &str = "text2sqlite_query";
/// Produces `{"status": ..., "result": {"columns": [...], "rows": [...]}}`.
pub const QUERY_EXECUTION_TOOL: &str = "execute_sqlite_query";

/// The artifacts tracked during one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackedToolData {
    pub intent_payload: Option<Value>,
    pub generated_query: Option<String>,
    pub execution_payload: Option<Value>,
}

impl TrackedToolData {
    pub fn is_empty(&self) -> bool {
        self.intent_payload.is_none()
            && self.generated_query.is_none()
            && self.execution_payload.is_none()
    }
}

#[derive(Default)]
struct TrackerState {
    text: String,
    started: bool,
    ended: bool,
    error: Option<String>,
    tool_stack: Vec<String>,
    tracked: TrackedToolData,
}

#[derive(Default)]
pub struct ToolOutputTracker {
    state: Mutex<TrackerState>,
    token_sink: Option<mpsc::UnboundedSender<String>>,
}

impl ToolOutputTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every non-empty token is also forwarded, in order, to `sink`.
    pub fn with_token_sink(sink: mpsc::UnboundedSender<String>) -> Self {
        Self {
            state: Mutex::default(),
            token_sink: Some(sink),
        }
    }

    fn state(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Everything streamed so far.
    pub fn text(&self) -> String {
        self.state().text.clone()
    }

    pub fn has_started(&self) -> bool {
        self.state().started
    }

    pub fn has_ended(&self) -> bool {
        self.state().ended
    }

    /// The synthetic message recorded for an upstream failure, if any.
    pub fn error(&self) -> Option<String> {
        self.state().error.clone()
    }

    /// Take the tracked artifacts, leaving the tracker empty.
    pub fn drain(&self) -> TrackedToolData {
        let mut state = self.state();
        state.tool_stack.clear();
        std::mem::take(&mut state.tracked)
    }
}

impl AgentObserver for ToolOutputTracker {
    fn on_token(&self, token: &str) {
        if token.is_empty() {
            return;
        }
        {
            let mut state = self.state();
            state.started = true;
            state.text.push_str(token);
        }
        if let Some(sink) = &self.token_sink {
            let _ = sink.send(token.to_string());
        }
    }

    fn on_generation_end(&self) {
        let mut state = self.state();
        state.ended = true;
        state.started = false;
    }

    fn on_tool_start(&self, tool_name: &str, _input: &Value) {
        self.state().tool_stack.push(tool_name.to_string());
    }

    fn on_tool_end(&self, tool_name: Option<&str>, output: &Value) {
        let mut state = self.state();
        let name = match tool_name {
            Some(name) => {
                if state.tool_stack.last().is_some_and(|top| top == name) {
                    state.tool_stack.pop();
                }
                name.to_string()
            }
            None => match state.tool_stack.pop() {
                Some(name) => name,
                None => return,
            },
        };

        if !output.is_object() {
            return;
        }
        match name.as_str() {
            INTENT_TOOL => state.tracked.intent_payload = Some(output.clone()),
            QUERY_GENERATION_TOOL => {
                if let Some(query) = output.get("sqlite_query").and_then(Value::as_str) {
                    state.tracked.generated_query = Some(query.trim().to_string());
                }
            }
            QUERY_EXECUTION_TOOL => state.tracked.execution_payload = Some(output.clone()),
            _ => {}
        }
    }

    fn on_error(&self, message: &str) {
        let mut state = self.state();
        state.error = Some(format!("Upstream model error: {message}"));
        state.ended = true;
    }
}
