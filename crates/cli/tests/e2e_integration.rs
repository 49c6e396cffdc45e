//! End-to-end integration tests for ChatBI.
//!
//! These tests run the full pipeline: a scripted model behind the
//! tool-calling agent, the streaming coordinator, session memory, and the
//! HTTP gateway on top.

use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use chatbi_agent::{
    ChatRequest, INTENT_TOOL, QUERY_EXECUTION_TOOL, QUERY_GENERATION_TOOL, StreamEvent,
    StreamEventKind, StreamingCoordinator, ToolCallingAgent,
};
use chatbi_config::AppConfig;
use chatbi_core::error::{ProviderError, ToolError};
use chatbi_core::event::EventBus;
use chatbi_core::message::{Message, MessageToolCall, Role};
use chatbi_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use chatbi_core::tool::{Tool, ToolCall, ToolRegistry, ToolResult};
use chatbi_gateway::{AppState, build_router};
use chatbi_memory::MemoryStore;

// ── Mock Provider ────────────────────────────────────────────────────────

/// A mock provider that returns scripted responses in sequence and keeps
/// every request it was sent.
struct ScriptedProvider {
    responses: Mutex<Vec<ProviderResponse>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().rev().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| ProviderError::Network("script exhausted".into()))
    }
}

fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "qwen-plus".into(),
    }
}

fn tool_response(id: &str, name: &str, arguments: Value) -> ProviderResponse {
    let mut message = Message::assistant("");
    message.tool_calls = vec![MessageToolCall {
        id: id.into(),
        name: name.into(),
        arguments: arguments.to_string(),
    }];
    ProviderResponse {
        message,
        usage: None,
        model: "qwen-plus".into(),
    }
}

// ── Mock Tools ───────────────────────────────────────────────────────────

/// Returns a fixed structured output and records the arguments it got.
struct CannedTool {
    name: &'static str,
    output: Value,
    calls: Mutex<Vec<Value>>,
}

impl CannedTool {
    fn new(name: &'static str, output: Value) -> Arc<Self> {
        Arc::new(Self {
            name,
            output,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<Value> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Tool for CannedTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "canned analytics tool"
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object"})
    }

    async fn execute(&self, call: &ToolCall) -> Result<ToolResult, ToolError> {
        self.calls.lock().unwrap().push(call.arguments.clone());
        Ok(ToolResult::structured(&call.id, self.output.clone()))
    }
}

struct Fixture {
    provider: Arc<ScriptedProvider>,
    intent: Arc<CannedTool>,
    coordinator: Arc<StreamingCoordinator>,
    memory: Arc<MemoryStore>,
}

const REGION_SQL: &str = "SELECT region, SUM(amount) AS total FROM sales GROUP BY region";

fn fixture(responses: Vec<ProviderResponse>) -> Fixture {
    let provider = Arc::new(ScriptedProvider::new(responses));
    let intent = CannedTool::new(
        INTENT_TOOL,
        json!({"task": "ranking", "entities": ["sales"], "group_by": ["region"]}),
    );
    let mut tools = ToolRegistry::new();
    tools.register(intent.clone());
    tools.register(CannedTool::new(
        QUERY_GENERATION_TOOL,
        json!({"sqlite_query": REGION_SQL}),
    ));
    tools.register(CannedTool::new(
        QUERY_EXECUTION_TOOL,
        json!({
            "status": "success",
            "result": {
                "columns": ["region", "total"],
                "rows": [["East", 10], ["West", 7], ["North", 3], ["South", 2], ["Central", 1], ["Islands", 0]]
            }
        }),
    ));

    let config = AppConfig::default();
    let agent = Arc::new(ToolCallingAgent::from_config(
        provider.clone(),
        Arc::new(tools),
        &config,
    ));
    let memory = Arc::new(MemoryStore::new(config.memory.max_turns_per_session));
    let coordinator = Arc::new(
        StreamingCoordinator::new(agent, memory.clone(), Arc::new(EventBus::default()))
            .with_memory_config(&config.memory),
    );

    Fixture {
        provider,
        intent,
        coordinator,
        memory,
    }
}

fn first_turn_script() -> Vec<ProviderResponse> {
    vec![
        tool_response("c1", INTENT_TOOL, json!({"text": "sales by region"})),
        tool_response("c2", QUERY_GENERATION_TOOL, json!({"text": "sales by region"})),
        tool_response("c3", QUERY_EXECUTION_TOOL, json!({"query": REGION_SQL})),
        text_response("East leads with 10."),
    ]
}

fn request(session_id: &str, query: &str) -> ChatRequest {
    ChatRequest {
        session_id: session_id.into(),
        request_id: format!("{session_id}-{}", query.len()),
        query: query.into(),
        model: "qwen-plus".into(),
    }
}

async fn collect(coordinator: &Arc<StreamingCoordinator>, request: ChatRequest) -> Vec<StreamEvent> {
    let mut rx = coordinator.stream(request);
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

// ── Tests ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn analytics_turn_is_streamed_and_remembered() {
    let f = fixture(first_turn_script());

    let events = collect(&f.coordinator, request("s1", "Sales by region?")).await;

    assert_eq!(events.first().unwrap().kind, StreamEventKind::Start);
    let last = events.last().unwrap();
    assert_eq!(last.kind, StreamEventKind::Response);
    assert!(last.finished);
    assert_eq!(last.message, "East leads with 10.");

    let snapshot = f.memory.snapshot("s1").await.unwrap();
    assert_eq!(snapshot.turns.len(), 1);
    let turn = &snapshot.turns[0];
    assert_eq!(turn.generated_query.as_deref(), Some(REGION_SQL));
    assert_eq!(turn.intent_plan.as_ref().unwrap()["group_by"], json!(["region"]));
    let result = turn.result_snapshot.as_ref().unwrap();
    assert_eq!(result.row_count, 6);
    assert_eq!(result.sample_rows.len(), 5);
    assert!(result.has_more);
}

#[tokio::test]
async fn follow_up_question_sees_previous_turn() {
    let mut script = first_turn_script();
    script.extend([
        tool_response("c4", INTENT_TOOL, json!({"text": "only the east"})),
        text_response("East alone totals 10."),
    ]);
    let f = fixture(script);

    collect(&f.coordinator, request("s1", "Sales by region?")).await;
    let events = collect(&f.coordinator, request("s1", "Only the east?")).await;
    assert_eq!(events.last().unwrap().message, "East alone totals 10.");

    // The second run's first model call carries the history preamble.
    let requests = f.provider.requests();
    let follow_up = &requests[4];
    assert_eq!(follow_up.messages[0].role, Role::System);
    let preamble = &follow_up.messages[0].content;
    assert!(preamble.contains("[History #1]"));
    assert!(preamble.contains("Q: Sales by region?"));
    assert!(preamble.contains(&format!("Previous round SQL: {REGION_SQL}")));
    assert!(preamble.contains("Previous round results list: region, total"));
    assert_eq!(follow_up.messages[1].content, "Only the east?");

    // The intent tool got the previous round's query and columns.
    let calls = f.intent.calls();
    assert!(calls[0].get("last_sql").is_none());
    assert_eq!(calls[1]["last_sql"], REGION_SQL);
    assert_eq!(calls[1]["last_result_schema"], "region, total");

    assert_eq!(f.memory.turn_count("s1").await, 2);
}

#[tokio::test]
async fn runaway_tool_loop_fails_without_recording() {
    let script = (0..200)
        .map(|i| tool_response(&format!("c{i}"), QUERY_GENERATION_TOOL, json!({})))
        .collect();
    let f = fixture(script);

    let events = collect(&f.coordinator, request("s1", "Loop")).await;

    assert_eq!(events.len(), 2);
    let last = &events[1];
    assert_eq!(last.kind, StreamEventKind::Error);
    assert!(last.message.starts_with("Error occurred while processing request: "));
    assert!(last.message.contains("more than 100 steps"));
    assert_eq!(f.memory.turn_count("s1").await, 0);
}

#[tokio::test]
async fn unsupported_model_reports_error() {
    let f = fixture(vec![text_response("never sent")]);
    let mut req = request("s1", "Hello");
    req.model = "gpt-unknown".into();

    let events = collect(&f.coordinator, req).await;

    assert_eq!(events[1].kind, StreamEventKind::Error);
    assert!(events[1].message.contains("Unsupported model name: gpt-unknown"));
    assert!(f.provider.requests().is_empty());
}

#[tokio::test]
async fn gateway_round_trip_with_session_lifecycle() {
    let f = fixture(first_turn_script());
    let state = Arc::new(AppState {
        coordinator: f.coordinator.clone(),
        memory: f.memory.clone(),
        event_bus: Arc::new(EventBus::default()),
        config: AppConfig::default(),
    });

    let req = Request::builder()
        .method("POST")
        .uri("/api/query")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"query": "Sales by region?", "session_id": "web"}).to_string(),
        ))
        .unwrap();
    let response = build_router(state.clone()).oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let body = String::from_utf8(body.to_vec()).unwrap();
    assert!(body.contains("\"type\":\"start\""));
    assert!(body.contains("East leads with 10."));

    let req = Request::builder()
        .uri("/api/sessions/web")
        .body(Body::empty())
        .unwrap();
    let response = build_router(state.clone()).oneshot(req).await.unwrap();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let snapshot: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(snapshot["turns"][0]["generated_query"], REGION_SQL);
    assert_eq!(snapshot["turns"][0]["result_snapshot"]["columns"], json!(["region", "total"]));

    let req = Request::builder()
        .method("DELETE")
        .uri("/api/sessions/web")
        .body(Body::empty())
        .unwrap();
    let response = build_router(state.clone()).oneshot(req).await.unwrap();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(serde_json::from_slice::<Value>(&body).unwrap(), json!({"reset": true}));
    assert!(f.memory.snapshot("web").await.is_none());
}
