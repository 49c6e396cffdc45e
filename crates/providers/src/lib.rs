//! LLM provider implementations for ChatBI.
//!
//! All providers implement the `chatbi_core::Provider` trait. ChatBI talks
//! to its models through a single OpenAI-compatible endpoint.

pub mod openai_compat;

pub use openai_compat::{DASHSCOPE_BASE_URL, OpenAiCompatProvider};
