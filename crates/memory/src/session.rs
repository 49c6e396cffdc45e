//! Session memory — the capped turn history of one conversation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;

use crate::snapshot::ResultSnapshot;
use crate::turn::TurnRecord;

/// Cap used when a session is built directly rather than through a store.
pub const DEFAULT_MAX_TURNS: usize = 20;

#[derive(Debug, Clone)]
pub struct SessionMemory {
    session_id: String,
    max_turns: usize,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    turns: VecDeque<TurnRecord>,
}

impl SessionMemory {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self::with_max_turns(session_id, DEFAULT_MAX_TURNS)
    }

    /// A cap of zero is treated as one.
    pub fn with_max_turns(session_id: impl Into<String>, max_turns: usize) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            max_turns: max_turns.max(1),
            created_at: now,
            updated_at: now,
            turns: VecDeque::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Add a turn, evicting the oldest ones past the cap.
    pub fn append(&mut self, turn: TurnRecord) {
        self.turns.push_back(turn);
        self.updated_at = Utc::now();
        while self.turns.len() > self.max_turns {
            self.turns.pop_front();
        }
    }

    pub fn last_turn(&self) -> Option<&TurnRecord> {
        self.turns.back()
    }

    /// Newest non-empty generated query.
    pub fn last_generated_query(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .filter_map(TurnRecord::generated_query)
            .find(|q| !q.is_empty())
    }

    /// Columns of the newest result snapshot that has any.
    pub fn last_result_schema(&self) -> Option<Vec<String>> {
        self.turns
            .iter()
            .rev()
            .filter_map(TurnRecord::result_snapshot)
            .find(|s| !s.columns.is_empty())
            .map(|s| s.columns.clone())
    }

    /// The last `limit` turns, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<&TurnRecord> {
        let skip = self.turns.len().saturating_sub(limit);
        self.turns.iter().skip(skip).collect()
    }

    /// Numbered summary of the last `limit` turns; empty without history.
    pub fn build_context_text(&self, limit: usize) -> String {
        self.recent(limit)
            .iter()
            .enumerate()
            .map(|(idx, turn)| format!("[History #{}]\n{}", idx + 1, turn.short_summary()))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Deep, serializable copy of the session for diagnostics.
    pub fn to_snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            max_turns: self.max_turns,
            turns: self.turns.iter().map(TurnSnapshot::from).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub max_turns: usize,
    pub turns: Vec<TurnSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnSnapshot {
    pub turn_id: String,
    pub user_query: String,
    pub assistant_response: String,
    pub created_at: DateTime<Utc>,
    pub intent_plan: Option<Value>,
    pub generated_query: Option<String>,
    pub result_snapshot: Option<ResultSnapshot>,
}

impl From<&TurnRecord> for TurnSnapshot {
    fn from(turn: &TurnRecord) -> Self {
        Self {
            turn_id: turn.turn_id().to_string(),
            user_query: turn.user_query().to_string(),
            assistant_response: turn.assistant_response().to_string(),
            created_at: turn.created_at(),
            intent_plan: turn.intent_plan().map(|p| p.to_payload()),
            generated_query: turn.generated_query().map(str::to_string),
            result_snapshot: turn.result_snapshot().map(|s| ResultSnapshot {
                raw_result: None,
                ..s.clone()
            }),
        }
    }
}
