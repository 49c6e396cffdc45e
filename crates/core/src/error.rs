//! Error types for the ChatBI domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum.

use thiserror::Error;

/// The top-level error type for building and serving the ChatBI runtime.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

/// Failures of one agent invocation. These never cross the external
/// interface raw: the coordinator turns them into a single `error` event.
#[derive(Debug, Clone, Error)]
pub enum AgentError {
    #[error("{0}")]
    Provider(#[from] ProviderError),

    #[error("Unsupported model name: {0}")]
    UnsupportedModel(String),

    #[error("recursion_limit of {0} steps reached without a final answer")]
    IterationLimit(u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn agent_error_wraps_provider_error() {
        let err: AgentError = ProviderError::Network("connection reset".into()).into();
        assert!(matches!(err, AgentError::Provider(_)));
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn iteration_limit_mentions_step_count() {
        let err = AgentError::IterationLimit(100);
        assert!(err.to_string().contains("100"));
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "port 8000 taken");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("port 8000 taken"));
    }

    #[test]
    fn execution_failure_names_the_tool() {
        let err = ToolError::ExecutionFailed {
            tool_name: "execute_sqlite_query".into(),
            reason: "no such table: sales".into(),
        };
        assert_eq!(
            err.to_string(),
            "Tool execution failed: execute_sqlite_query: no such table: sales"
        );
    }
}
