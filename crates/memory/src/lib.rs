//! Session-scoped conversation memory for ChatBI.
//!
//! Every completed request becomes a [`TurnRecord`] holding the question,
//! the final answer, and whatever structured artifacts the agent's tools
//! produced along the way. Turns are kept per session in a capped history
//! ([`SessionMemory`]) and all sessions live in one [`MemoryStore`].
//!
//! The only view of prior turns a new request gets is the compact text
//! rendered by [`SessionMemory::build_context_text`].

pub mod plan;
pub mod session;
pub mod snapshot;
pub mod store;
pub mod turn;

pub use plan::{
    AggregationSpec, AnalysisPlan, FilterCondition, FollowUpDirective, HavingCondition,
    OrderBySpec, SelectItem, TimeRange,
};
pub use session::{SessionMemory, SessionSnapshot, TurnSnapshot};
pub use snapshot::ResultSnapshot;
pub use store::{MemoryStore, SharedSession};
pub use turn::TurnRecord;
