//! Streaming response coordinator.
//!
//! Drives one request end to end: acknowledges it, injects session context,
//! runs the agent on a spawned task while relaying its tokens, resolves the
//! final answer, and commits the turn to session memory before the final
//! event goes out.

use chatbi_config::MemoryConfig;
use chatbi_core::agent::{Agent, AgentInvocation, AgentOutcome, FollowUpDefaults};
use chatbi_core::error::AgentError;
use chatbi_core::event::{DomainEvent, EventBus};
use chatbi_core::message::Message;
use chatbi_core::observer::AgentObserver;
use chatbi_memory::MemoryStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};

use crate::stream_event::StreamEvent;
use crate::tracker::ToolOutputTracker;

pub const FALLBACK_MESSAGE: &str =
    "The processing is completed, but no response content has been received.";

const CONTEXT_HEADER: &str = "The following is a summary of the historical dialogue related to the current conversation. Please reuse the context and maintain consistency in the language during this round of reasoning:";

/// Capacity of the per-request outbound event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// One inbound question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub session_id: String,
    pub request_id: String,
    pub query: String,
    pub model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Started,
    Streaming,
    Completing,
    Done,
    Failed,
}

/// What happened to one request, returned by [`StreamingCoordinator::run`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSummary {
    pub request_id: String,
    pub session_id: String,
    pub state: RequestState,
    /// The final answer, or the error message on failure
    pub final_message: String,
    /// Set when a turn was committed
    pub turn_id: Option<String>,
    /// Incremental `response` events relayed before the terminal one
    pub response_events: usize,
}

impl RequestSummary {
    fn new(request: &ChatRequest) -> Self {
        Self {
            request_id: request.request_id.clone(),
            session_id: request.session_id.clone(),
            state: RequestState::Started,
            final_message: String::new(),
            turn_id: None,
            response_events: 0,
        }
    }

    fn transition(&mut self, state: RequestState) {
        debug!(
            request_id = %self.request_id,
            from = ?self.state,
            to = ?state,
            "Request state transition"
        );
        self.state = state;
    }
}

pub struct StreamingCoordinator {
    agent: Arc<dyn Agent>,
    memory: Arc<MemoryStore>,
    event_bus: Arc<EventBus>,
    context_turns: usize,
    commit_abandoned_requests: bool,
}

impl StreamingCoordinator {
    pub fn new(agent: Arc<dyn Agent>, memory: Arc<MemoryStore>, event_bus: Arc<EventBus>) -> Self {
        Self {
            agent,
            memory,
            event_bus,
            context_turns: 3,
            commit_abandoned_requests: true,
        }
    }

    pub fn with_context_turns(mut self, turns: usize) -> Self {
        self.context_turns = turns;
        self
    }

    /// Whether a request whose event receiver is gone at completion time
    /// still records its turn.
    pub fn with_commit_abandoned_requests(mut self, commit: bool) -> Self {
        self.commit_abandoned_requests = commit;
        self
    }

    pub fn with_memory_config(self, config: &MemoryConfig) -> Self {
        self.with_context_turns(config.context_turns)
            .with_commit_abandoned_requests(config.commit_abandoned_requests)
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    /// Run `request` on a background task and return its event stream.
    pub fn stream(self: &Arc<Self>, request: ChatRequest) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            coordinator.run(request, tx).await;
        });
        rx
    }

    /// Drive one request to its terminal event.
    pub async fn run(&self, request: ChatRequest, events: mpsc::Sender<StreamEvent>) -> RequestSummary {
        let mut summary = RequestSummary::new(&request);
        info!(
            request_id = %request.request_id,
            session_id = %request.session_id,
            model = %request.model,
            "Request started"
        );
        self.event_bus.publish(DomainEvent::RequestStarted {
            request_id: request.request_id.clone(),
            session_id: request.session_id.clone(),
            model: request.model.clone(),
            timestamp: chrono::Utc::now(),
        });
        let _ = events
            .send(StreamEvent::start(&request.request_id, &request.session_id))
            .await;

        let invocation = self.build_invocation(&request).await;

        let (token_tx, mut token_rx) = mpsc::unbounded_channel::<String>();
        let tracker = Arc::new(ToolOutputTracker::with_token_sink(token_tx));
        let observer: Arc<dyn AgentObserver> = tracker.clone();
        let agent = Arc::clone(&self.agent);
        let mut handle = tokio::spawn(async move { agent.invoke(invocation, observer).await });

        summary.transition(RequestState::Streaming);
        let mut accumulated = String::new();
        let joined = loop {
            tokio::select! {
                biased;
                Some(token) = token_rx.recv() => {
                    self.relay_token(&request, &events, &mut summary, &mut accumulated, &token).await;
                }
                result = &mut handle => break result,
            }
        };

        let outcome = match resolve_outcome(joined, &tracker) {
            Ok(outcome) => outcome,
            Err(message) => return self.fail(&request, &events, summary, &message).await,
        };

        summary.transition(RequestState::Completing);
        while let Ok(token) = token_rx.try_recv() {
            self.relay_token(&request, &events, &mut summary, &mut accumulated, &token).await;
        }

        let streamed = tracker.text();
        let final_message = if !streamed.is_empty() {
            streamed
        } else {
            final_text_from_outcome(&outcome)
        };

        let tracked = tracker.drain();
        if !self.commit_abandoned_requests && events.is_closed() {
            warn!(
                request_id = %request.request_id,
                session_id = %request.session_id,
                "Client went away before completion; turn not recorded"
            );
        } else {
            let turn = self
                .memory
                .commit_turn(
                    &request.session_id,
                    &request.query,
                    &final_message,
                    tracked.intent_payload.as_ref(),
                    tracked.generated_query.as_deref(),
                    tracked.execution_payload.as_ref(),
                )
                .await;
            let session_turns = self.memory.turn_count(&request.session_id).await;
            self.event_bus.publish(DomainEvent::TurnCommitted {
                request_id: request.request_id.clone(),
                session_id: request.session_id.clone(),
                turn_id: turn.turn_id().to_string(),
                session_turns,
                timestamp: chrono::Utc::now(),
            });
            summary.turn_id = Some(turn.turn_id().to_string());
        }

        summary.transition(RequestState::Done);
        let _ = events
            .send(StreamEvent::response(
                &request.request_id,
                &request.session_id,
                final_message.clone(),
                true,
            ))
            .await;
        info!(
            request_id = %request.request_id,
            chars = final_message.len(),
            response_events = summary.response_events,
            "Request completed"
        );
        summary.final_message = final_message;
        summary
    }

    async fn build_invocation(&self, request: &ChatRequest) -> AgentInvocation {
        let context = self
            .memory
            .build_context_text(&request.session_id, self.context_turns)
            .await;

        let mut messages = Vec::with_capacity(2);
        let mut follow_up = None;
        if !context.is_empty() {
            let last_sql = self.memory.last_generated_query(&request.session_id).await;
            let last_schema = self
                .memory
                .last_result_schema(&request.session_id)
                .await
                .unwrap_or_default();
            messages.push(Message::system(context_preamble(
                &context,
                last_sql.as_deref(),
                &last_schema,
            )));
            debug!(
                request_id = %request.request_id,
                has_last_sql = last_sql.is_some(),
                schema_columns = last_schema.len(),
                "Injected session context"
            );
            follow_up = Some(FollowUpDefaults {
                session_id: request.session_id.clone(),
                last_sql,
                last_result_schema: last_schema,
            });
        }
        messages.push(Message::user(&request.query));

        AgentInvocation {
            session_id: request.session_id.clone(),
            request_id: request.request_id.clone(),
            model: request.model.clone(),
            messages,
            follow_up,
        }
    }

    async fn relay_token(
        &self,
        request: &ChatRequest,
        events: &mpsc::Sender<StreamEvent>,
        summary: &mut RequestSummary,
        accumulated: &mut String,
        token: &str,
    ) {
        if token.is_empty() {
            return;
        }
        accumulated.push_str(token);
        summary.response_events += 1;
        let _ = events
            .send(StreamEvent::response(
                &request.request_id,
                &request.session_id,
                accumulated.clone(),
                false,
            ))
            .await;
    }

    async fn fail(
        &self,
        request: &ChatRequest,
        events: &mpsc::Sender<StreamEvent>,
        mut summary: RequestSummary,
        message: &str,
    ) -> RequestSummary {
        let error_message = format!("Error occurred while processing request: {message}");
        error!(
            request_id = %request.request_id,
            session_id = %request.session_id,
            error = %message,
            "Request failed"
        );
        self.event_bus.publish(DomainEvent::RequestFailed {
            request_id: request.request_id.clone(),
            session_id: request.session_id.clone(),
            error_message: error_message.clone(),
            timestamp: chrono::Utc::now(),
        });
        let _ = events
            .send(StreamEvent::error(
                &request.request_id,
                &request.session_id,
                error_message.clone(),
            ))
            .await;
        summary.transition(RequestState::Failed);
        summary.final_message = error_message;
        summary
    }
}

fn resolve_outcome(
    joined: Result<Result<AgentOutcome, AgentError>, JoinError>,
    tracker: &ToolOutputTracker,
) -> Result<AgentOutcome, String> {
    match joined {
        Ok(Ok(outcome)) => match tracker.error() {
            Some(message) => Err(message),
            None => Ok(outcome),
        },
        Ok(Err(AgentError::IterationLimit(steps))) => Err(iteration_limit_message(steps)),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) if e.is_panic() => Err("agent task panicked".into()),
        Err(_) => Err("agent task was cancelled".into()),
    }
}

pub fn iteration_limit_message(steps: u32) -> String {
    format!(
        "There are too many steps in the task execution (more than {steps} steps). This might be because the task is too complex or has entered a loop. Please try to simplify your problem or rephrase it."
    )
}

/// The system message that carries prior turns into a new request.
pub fn context_preamble(context: &str, last_sql: Option<&str>, last_schema: &[String]) -> String {
    let mut text = format!("{CONTEXT_HEADER}\n{context}");
    let mut supplemental = Vec::new();
    if let Some(sql) = last_sql.filter(|s| !s.is_empty()) {
        supplemental.push(format!("Previous round SQL: {sql}"));
    }
    if !last_schema.is_empty() {
        supplemental.push(format!(
            "Previous round results list: {}",
            last_schema.join(", ")
        ));
    }
    if !supplemental.is_empty() {
        text.push('\n');
        text.push_str(&supplemental.join("\n"));
    }
    text
}

/// Final text when nothing was streamed.
fn final_text_from_outcome(outcome: &AgentOutcome) -> String {
    if let Some(assistant) = outcome.last_assistant() {
        let text = match outcome.chart_config() {
            Some(chart) => {
                let pretty = serde_json::to_string_pretty(chart).unwrap_or_else(|_| chart.to_string());
                format!("{}\n\n```json\n{pretty}\n```", assistant.content)
            }
            None => assistant.content.clone(),
        };
        if !text.is_empty() {
            return text;
        }
    }
    match outcome.last_message() {
        Some(message) if !message.content.is_empty() => message.content.clone(),
        _ => FALLBACK_MESSAGE.to_string(),
    }
}
