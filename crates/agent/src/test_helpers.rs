//! Shared test doubles for agent and coordinator tests.

use async_trait::async_trait;
use chatbi_core::agent::{Agent, AgentInvocation, AgentOutcome};
use chatbi_core::error::{AgentError, ProviderError, ToolError};
use chatbi_core::message::{Message, MessageToolCall};
use chatbi_core::observer::AgentObserver;
use chatbi_core::provider::{Provider, ProviderRequest, ProviderResponse};
use chatbi_core::tool::{Tool, ToolCall, ToolResult};
use serde_json::Value;
use std::sync::{Arc, Mutex};

type AgentFn =
    dyn Fn(AgentInvocation, Arc<dyn AgentObserver>) -> Result<AgentOutcome, AgentError> + Send + Sync;

/// An agent whose behavior is a plain closure. The closure drives the
/// observer directly, standing in for a model run.
pub struct FnAgent {
    run: Box<AgentFn>,
    invocations: Mutex<Vec<AgentInvocation>>,
}

impl FnAgent {
    pub fn new<F>(run: F) -> Self
    where
        F: Fn(AgentInvocation, Arc<dyn AgentObserver>) -> Result<AgentOutcome, AgentError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            run: Box::new(run),
            invocations: Mutex::new(Vec::new()),
        }
    }

    /// Streams `tokens` and returns an empty message list.
    pub fn streaming(tokens: &[&str]) -> Self {
        let tokens: Vec<String> = tokens.iter().map(|t| t.to_string()).collect();
        Self::new(move |_, observer| {
            for token in &tokens {
                observer.on_token(token);
            }
            observer.on_generation_end();
            Ok(AgentOutcome::default())
        })
    }

    /// Streams nothing and returns `messages`.
    pub fn silent(messages: Vec<Message>) -> Self {
        Self::new(move |_, _| Ok(AgentOutcome::new(messages.clone())))
    }

    pub fn failing(error: AgentError) -> Self {
        Self::new(move |_, _| Err(error.clone()))
    }

    pub fn invocations(&self) -> Vec<AgentInvocation> {
        self.invocations.lock().unwrap().clone()
    }
}

#[async_trait]
impl Agent for FnAgent {
    fn name(&self) -> &str {
        "fn_agent"
    }

    async fn invoke(
        &self,
        invocation: AgentInvocation,
        observer: Arc<dyn AgentObserver>,
    ) -> Result<AgentOutcome, AgentError> {
        self.invocations.lock().unwrap().push(invocation.clone());
        (self.run)(invocation, observer)
    }
}

/// Returns scripted responses in order; errors once the script runs out.
pub struct ScriptedProvider {
    responses: Mutex<Vec<Result<ProviderResponse, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().rev().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| Err(ProviderError::Network("script exhausted".into())))
    }
}

pub fn text_response(text: &str) -> Result<ProviderResponse, ProviderError> {
    Ok(ProviderResponse {
        message: Message::assistant(text),
        usage: None,
        model: "qwen-plus".into(),
    })
}

pub fn tool_call_response(calls: &[(&str, &str, Value)]) -> Result<ProviderResponse, ProviderError> {
    let mut message = Message::assistant("");
    message.tool_calls = calls
        .iter()
        .map(|(id, name, args)| MessageToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments: args.to_string(),
        })
        .collect();
    Ok(ProviderResponse {
        message,
        usage: None,
        model: "qwen-plus".into(),
    })
}

/// A tool that records its arguments and returns a fixed structured output.
pub struct FixedTool {
    name: String,
    output: Value,
    calls: Mutex<Vec<Value>>,
}

impl FixedTool {
    pub fn new(name: &str, output: Value) -> Self {
        Self {
            name: name.to_string(),
            output,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Value> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Tool for FixedTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "test tool"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({"type": "object"})
    }

    async fn execute(&self, call: &ToolCall) -> Result<ToolResult, ToolError> {
        self.calls.lock().unwrap().push(call.arguments.clone());
        Ok(ToolResult::structured(&call.id, self.output.clone()))
    }
}

/// A tool whose every execution fails with the given reason.
pub struct FailingTool {
    name: String,
    reason: String,
}

impl FailingTool {
    pub fn new(name: &str, reason: &str) -> Self {
        Self {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "always fails"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({"type": "object"})
    }

    async fn execute(&self, _call: &ToolCall) -> Result<ToolResult, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: self.name.clone(),
            reason: self.reason.clone(),
        })
    }
}

/// Records every observer callback as a short string.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl AgentObserver for RecordingObserver {
    fn on_token(&self, token: &str) {
        self.record(format!("token:{token}"));
    }

    fn on_generation_end(&self) {
        self.record("generation_end".into());
    }

    fn on_tool_start(&self, tool_name: &str, _input: &Value) {
        self.record(format!("tool_start:{tool_name}"));
    }

    fn on_tool_end(&self, tool_name: Option<&str>, _output: &Value) {
        self.record(format!("tool_end:{}", tool_name.unwrap_or("?")));
    }

    fn on_error(&self, message: &str) {
        self.record(format!("error:{message}"));
    }
}
