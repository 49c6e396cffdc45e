//! # ChatBI Core
//!
//! Domain types, traits, and error definitions for the ChatBI conversational
//! analytics runtime. This crate has **no framework dependencies**: it defines
//! the contracts that the memory store, the streaming coordinator, and the
//! HTTP gateway are written against.
//!
//! ## Seams
//!
//! - [`Agent`] — the opaque language-model collaborator that answers a question
//!   and may call named tools along the way.
//! - [`AgentObserver`] — the narrow listener capability through which the
//!   agent reports tokens and tool activity while it runs.
//! - [`Provider`] / [`Tool`] — the building blocks of the default tool-calling
//!   agent.

pub mod agent;
pub mod error;
pub mod event;
pub mod message;
pub mod observer;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use agent::{Agent, AgentInvocation, AgentOutcome, FollowUpDefaults};
pub use error::{AgentError, Error, ProviderError, Result, ToolError};
pub use event::{DomainEvent, EventBus};
pub use message::{Message, MessageToolCall, Role};
pub use observer::AgentObserver;
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolDefinition};
pub use tool::{Tool, ToolCall, ToolRegistry, ToolResult};
