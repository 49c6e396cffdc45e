//! Memory store — the process-wide registry of session memories.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::plan::AnalysisPlan;
use crate::session::{SessionMemory, SessionSnapshot};
use crate::snapshot::ResultSnapshot;
use crate::turn::TurnRecord;

pub type SharedSession = Arc<RwLock<SessionMemory>>;

/// Turn cap used by [`MemoryStore::default`].
pub const DEFAULT_MAX_TURNS_PER_SESSION: usize = 15;

/// Owns every [`SessionMemory`]. Sessions are created on first access and
/// live until reset.
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, SharedSession>>,
    max_turns_per_session: usize,
}

impl MemoryStore {
    pub fn new(max_turns_per_session: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_turns_per_session: max_turns_per_session.max(1),
        }
    }

    pub fn max_turns_per_session(&self) -> usize {
        self.max_turns_per_session
    }

    /// The session for `session_id`, created if absent. Concurrent callers
    /// with the same unseen id get the same instance.
    pub async fn get_or_create(&self, session_id: &str) -> SharedSession {
        if let Some(session) = self.sessions.read().await.get(session_id) {
            return Arc::clone(session);
        }

        let mut sessions = self.sessions.write().await;
        let session = sessions.entry(session_id.to_string()).or_insert_with(|| {
            tracing::debug!(session_id, "Creating session memory");
            Arc::new(RwLock::new(SessionMemory::with_max_turns(
                session_id,
                self.max_turns_per_session,
            )))
        });
        Arc::clone(session)
    }

    async fn get(&self, session_id: &str) -> Option<SharedSession> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Discard a session. Returns whether one existed.
    pub async fn reset(&self, session_id: &str) -> bool {
        let existed = self.sessions.write().await.remove(session_id).is_some();
        tracing::debug!(session_id, existed, "Session reset");
        existed
    }

    /// Detached copy of a session's state; never creates a session.
    pub async fn snapshot(&self, session_id: &str) -> Option<SessionSnapshot> {
        let session = self.get(session_id).await?;
        let snapshot = session.read().await.to_snapshot();
        Some(snapshot)
    }

    /// Record a completed request. Null or empty payloads count as absent;
    /// malformed ones degrade to partially populated records.
    pub async fn commit_turn(
        &self,
        session_id: &str,
        user_query: &str,
        assistant_response: &str,
        intent_payload: Option<&Value>,
        generated_query: Option<&str>,
        execution_payload: Option<&Value>,
    ) -> TurnRecord {
        let intent_plan = intent_payload
            .filter(|p| is_present(p))
            .map(AnalysisPlan::from_payload);
        let result_snapshot = execution_payload
            .filter(|p| is_present(p))
            .map(ResultSnapshot::from_execution_payload);
        let generated_query = generated_query
            .filter(|q| !q.is_empty())
            .map(str::to_string);

        let turn = TurnRecord::new(
            user_query,
            assistant_response,
            intent_plan,
            generated_query,
            result_snapshot,
        );

        let session = self.get_or_create(session_id).await;
        let mut session = session.write().await;
        session.append(turn.clone());
        tracing::debug!(
            session_id,
            turn_id = turn.turn_id(),
            turns = session.len(),
            "Committed turn"
        );
        turn
    }

    pub async fn last_generated_query(&self, session_id: &str) -> Option<String> {
        let session = self.get_or_create(session_id).await;
        let session = session.read().await;
        session.last_generated_query().map(str::to_string)
    }

    pub async fn last_result_schema(&self, session_id: &str) -> Option<Vec<String>> {
        let session = self.get_or_create(session_id).await;
        let session = session.read().await;
        session.last_result_schema()
    }

    pub async fn build_context_text(&self, session_id: &str, limit: usize) -> String {
        let session = self.get_or_create(session_id).await;
        let session = session.read().await;
        session.build_context_text(limit)
    }

    /// Number of turns held for a session; zero if unknown.
    pub async fn turn_count(&self, session_id: &str) -> usize {
        match self.get(session_id).await {
            Some(session) => session.read().await.len(),
            None => 0,
        }
    }

    pub async fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TURNS_PER_SESSION)
    }
}

fn is_present(payload: &Value) -> bool {
    match payload {
        Value::Null => false,
        Value::Object(obj) => !obj.is_empty(),
        _ => true,
    }
}
