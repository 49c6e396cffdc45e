//! Request coordination for ChatBI.
//!
//! A request flows through three pieces:
//!
//! 1. **[`StreamingCoordinator`]** acknowledges the request, prepends the
//!    session's recent history, and runs the agent on its own task
//! 2. **[`ToolOutputTracker`]** observes that run, relaying tokens and
//!    picking the plan, query and result out of tool outputs
//! 3. The coordinator resolves the final answer, commits the turn to
//!    session memory, and emits the terminal [`StreamEvent`]
//!
//! [`ToolCallingAgent`] is the default [`chatbi_core::Agent`]: a
//! provider-backed loop that calls tools until the model answers in text.

pub mod coordinator;
pub mod stream_event;
pub mod tool_agent;
pub mod tracker;

#[cfg(test)]
mod test_helpers;

pub use coordinator::{
    ChatRequest, FALLBACK_MESSAGE, RequestState, RequestSummary, StreamingCoordinator,
};
pub use stream_event::{START_MESSAGE, StreamEvent, StreamEventKind};
pub use tool_agent::ToolCallingAgent;
pub use tracker::{
    INTENT_TOOL, QUERY_EXECUTION_TOOL, QUERY_GENERATION_TOOL, ToolOutputTracker, TrackedToolData,
};
