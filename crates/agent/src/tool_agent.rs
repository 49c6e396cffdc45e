//! Provider-backed tool-calling agent.
//!
//! Streams a model response, runs any tools it asks for, feeds the results
//! back, and repeats until the model answers without tool calls.

use async_trait::async_trait;
use chatbi_config::AppConfig;
use chatbi_core::agent::{Agent, AgentInvocation, AgentOutcome, FollowUpDefaults};
use chatbi_core::error::AgentError;
use chatbi_core::event::{DomainEvent, EventBus};
use chatbi_core::message::{Message, MessageToolCall};
use chatbi_core::observer::AgentObserver;
use chatbi_core::provider::{Provider, ProviderRequest};
use chatbi_core::tool::{ToolCall, ToolRegistry};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::tracker::INTENT_TOOL;

pub struct ToolCallingAgent {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    /// Models requests may name; empty accepts any
    models: Vec<String>,
    temperature: f32,
    max_tokens: Option<u32>,
    max_iterations: u32,
    system_prompt: Option<String>,
    event_bus: Option<Arc<EventBus>>,
}

impl ToolCallingAgent {
    pub fn new(provider: Arc<dyn Provider>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            provider,
            tools,
            models: Vec::new(),
            temperature: 0.1,
            max_tokens: None,
            max_iterations: 100,
            system_prompt: None,
            event_bus: None,
        }
    }

    pub fn from_config(
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        config: &AppConfig,
    ) -> Self {
        let mut agent = Self::new(provider, tools)
            .with_models(config.models.clone())
            .with_temperature(config.temperature)
            .with_max_iterations(config.agent.max_tool_iterations);
        agent.max_tokens = config.max_tokens;
        agent.system_prompt = config.agent.system_prompt.clone();
        agent
    }

    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.models = models;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// One streamed model call. Returns the assistant message it produced.
    async fn generate(
        &self,
        model: &str,
        messages: &[Message],
        observer: &dyn AgentObserver,
    ) -> Result<Message, AgentError> {
        let request = ProviderRequest {
            model: model.to_string(),
            messages: messages.to_vec(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            tools: self.tools.definitions(),
            stream: true,
        };

        let mut stream = match self.provider.stream(request).await {
            Ok(rx) => rx,
            Err(e) => {
                observer.on_error(&e.to_string());
                return Err(e.into());
            }
        };

        let mut content = String::new();
        let mut tool_calls: Vec<MessageToolCall> = Vec::new();
        while let Some(chunk) = stream.recv().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    observer.on_error(&e.to_string());
                    return Err(e.into());
                }
            };
            if let Some(text) = chunk.content.as_deref()
                && !text.is_empty()
            {
                content.push_str(text);
                observer.on_token(text);
            }
            tool_calls.extend(chunk.tool_calls);
            if chunk.done {
                break;
            }
        }
        observer.on_generation_end();

        let mut message = Message::assistant(content);
        message.tool_calls = tool_calls;
        Ok(message)
    }

    /// Run one tool call and return its result message.
    async fn run_tool(
        &self,
        call: &MessageToolCall,
        invocation: &AgentInvocation,
        observer: &dyn AgentObserver,
    ) -> Message {
        let mut arguments: Value =
            serde_json::from_str(&call.arguments).unwrap_or_else(|_| json!({}));
        if call.name == INTENT_TOOL
            && let Some(defaults) = &invocation.follow_up
        {
            apply_follow_up_defaults(&mut arguments, defaults);
        }

        observer.on_tool_start(&call.name, &arguments);
        let started = std::time::Instant::now();
        let result = self
            .tools
            .execute(&ToolCall {
                id: call.id.clone(),
                name: call.name.clone(),
                arguments,
            })
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (success, message) = match result {
            Ok(result) => {
                let output = result.data.clone().unwrap_or(Value::String(result.output.clone()));
                observer.on_tool_end(Some(&call.name), &output);
                let mut message = Message::tool_result(&call.id, result.output);
                message.data = result.data;
                (result.success, message)
            }
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool execution failed");
                let text = format!("Error: {e}");
                observer.on_tool_end(Some(&call.name), &Value::String(text.clone()));
                (false, Message::tool_result(&call.id, text))
            }
        };

        if let Some(bus) = &self.event_bus {
            bus.publish(DomainEvent::ToolExecuted {
                request_id: invocation.request_id.clone(),
                tool_name: call.name.clone(),
                success,
                duration_ms,
                timestamp: chrono::Utc::now(),
            });
        }
        message
    }
}

/// Fill prior-turn arguments the model left out of an intent-analysis call.
fn apply_follow_up_defaults(arguments: &mut Value, defaults: &FollowUpDefaults) {
    let Some(args) = arguments.as_object_mut() else {
        return;
    };
    let is_blank = |v: Option<&Value>| match v {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        Some(_) => false,
    };

    if is_blank(args.get("last_sql"))
        && let Some(sql) = &defaults.last_sql
    {
        args.insert("last_sql".into(), Value::String(sql.clone()));
    }
    if is_blank(args.get("last_result_schema")) && !defaults.last_result_schema.is_empty() {
        args.insert(
            "last_result_schema".into(),
            Value::String(defaults.last_result_schema.join(", ")),
        );
    }
}

#[async_trait]
impl Agent for ToolCallingAgent {
    fn name(&self) -> &str {
        "tool_calling"
    }

    async fn invoke(
        &self,
        invocation: AgentInvocation,
        observer: Arc<dyn AgentObserver>,
    ) -> Result<AgentOutcome, AgentError> {
        if !self.models.is_empty() && !self.models.contains(&invocation.model) {
            return Err(AgentError::UnsupportedModel(invocation.model.clone()));
        }

        let mut messages = Vec::with_capacity(invocation.messages.len() + 1);
        if let Some(prompt) = &self.system_prompt {
            messages.push(Message::system(prompt));
        }
        messages.extend(invocation.messages.iter().cloned());

        for iteration in 1..=self.max_iterations {
            debug!(
                request_id = %invocation.request_id,
                iteration,
                "Agent loop iteration"
            );

            let assistant = self
                .generate(&invocation.model, &messages, observer.as_ref())
                .await?;
            let tool_calls = assistant.tool_calls.clone();
            messages.push(assistant);

            if tool_calls.is_empty() {
                return Ok(AgentOutcome::new(messages));
            }

            debug!(tool_count = tool_calls.len(), "Executing tool calls");
            for call in &tool_calls {
                let result = self.run_tool(call, &invocation, observer.as_ref()).await;
                messages.push(result);
            }
        }

        warn!(
            request_id = %invocation.request_id,
            max_iterations = self.max_iterations,
            "Max tool iterations reached"
        );
        Err(AgentError::IterationLimit(self.max_iterations))
    }
}
