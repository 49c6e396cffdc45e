//! HTTP API gateway for ChatBI.
//!
//! Exposes the streaming query endpoint plus health, model listing,
//! session inspection and a domain-event log stream, all under `/api`.
//!
//! Built on Axum.

pub mod api;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use chatbi_agent::{StreamingCoordinator, ToolCallingAgent};
use chatbi_config::AppConfig;
use chatbi_core::agent::Agent;
use chatbi_core::event::EventBus;
use chatbi_core::tool::ToolRegistry;
use chatbi_memory::MemoryStore;
use chatbi_providers::OpenAiCompatProvider;

/// Shared application state for the gateway.
pub struct AppState {
    pub coordinator: Arc<StreamingCoordinator>,
    pub memory: Arc<MemoryStore>,
    pub event_bus: Arc<EventBus>,
    pub config: AppConfig,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Wire a memory store, event bus and coordinator around `agent`.
    pub fn new(config: AppConfig, agent: Arc<dyn Agent>) -> Self {
        let memory = Arc::new(MemoryStore::new(config.memory.max_turns_per_session));
        let event_bus = Arc::new(EventBus::default());
        let coordinator = Arc::new(
            StreamingCoordinator::new(agent, Arc::clone(&memory), Arc::clone(&event_bus))
                .with_memory_config(&config.memory),
        );
        Self {
            coordinator,
            memory,
            event_bus,
            config,
        }
    }
}

/// Build the full router.
///
/// Layers applied:
/// - CORS open to any origin
/// - Request body size limit (`gateway.max_body_bytes`)
/// - HTTP trace logging
pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let body_limit = state.config.gateway.max_body_bytes;

    Router::new()
        .nest("/api", api::api_router(state))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Build the default agent: the configured OpenAI-compatible provider
/// driving `tools`.
pub fn build_agent(config: &AppConfig, tools: ToolRegistry) -> chatbi_core::Result<Arc<dyn Agent>> {
    let provider = Arc::new(OpenAiCompatProvider::from_config(config)?);
    Ok(Arc::new(ToolCallingAgent::from_config(
        provider,
        Arc::new(tools),
        config,
    )))
}

/// Start the gateway HTTP server with the tools in `tools`.
pub async fn start(config: AppConfig, tools: ToolRegistry) -> chatbi_core::Result<()> {
    let addr = config.bind_address();
    let tool_count = tools.len();
    let agent = build_agent(&config, tools)?;
    let state = Arc::new(AppState::new(config, agent));
    let app = build_router(state);

    info!(addr = %addr, tools = tool_count, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
