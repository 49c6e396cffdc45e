//! Observer capability — how a running agent reports progress.
//!
//! The agent pushes incremental text and tool start/end notifications into an
//! [`AgentObserver`] as they happen. Implementations must be cheap and
//! non-blocking: they are called from inside the agent's execution path.

use serde_json::Value;

pub trait AgentObserver: Send + Sync {
    /// A new text token was generated.
    fn on_token(&self, token: &str);

    /// One model generation finished (the agent may start another).
    fn on_generation_end(&self) {}

    /// A tool is about to run.
    fn on_tool_start(&self, _tool_name: &str, _input: &Value) {}

    /// A tool finished. `tool_name` may be absent, in which case the most
    /// recently started tool is assumed.
    fn on_tool_end(&self, tool_name: Option<&str>, output: &Value);

    /// The upstream model call failed.
    fn on_error(&self, _message: &str) {}
}
