//! Turn record — one completed request and its structured artifacts.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::plan::AnalysisPlan;
use crate::snapshot::ResultSnapshot;

/// Immutable once built; fields are only reachable through accessors.
#[derive(Debug, Clone)]
pub struct TurnRecord {
    turn_id: String,
    user_query: String,
    assistant_response: String,
    created_at: DateTime<Utc>,
    intent_plan: Option<AnalysisPlan>,
    generated_query: Option<String>,
    result_snapshot: Option<ResultSnapshot>,
}

impl TurnRecord {
    pub fn new(
        user_query: impl Into<String>,
        assistant_response: impl Into<String>,
        intent_plan: Option<AnalysisPlan>,
        generated_query: Option<String>,
        result_snapshot: Option<ResultSnapshot>,
    ) -> Self {
        Self {
            turn_id: Uuid::new_v4().to_string(),
            user_query: user_query.into(),
            assistant_response: assistant_response.into(),
            created_at: Utc::now(),
            intent_plan,
            generated_query,
            result_snapshot,
        }
    }

    pub fn turn_id(&self) -> &str {
        &self.turn_id
    }

    pub fn user_query(&self) -> &str {
        &self.user_query
    }

    pub fn assistant_response(&self) -> &str {
        &self.assistant_response
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn intent_plan(&self) -> Option<&AnalysisPlan> {
        self.intent_plan.as_ref()
    }

    pub fn generated_query(&self) -> Option<&str> {
        self.generated_query.as_deref()
    }

    pub fn result_snapshot(&self) -> Option<&ResultSnapshot> {
        self.result_snapshot.as_ref()
    }

    /// Compact multi-line rendering for context prompts.
    pub fn short_summary(&self) -> String {
        let mut lines = vec![format!("Q: {}", self.user_query)];
        if let Some(plan) = &self.intent_plan {
            lines.push(format!("Plan: {}", plan.summarize()));
        }
        if let Some(query) = self.generated_query.as_deref().filter(|q| !q.is_empty()) {
            lines.push(format!("SQL: {query}"));
        }
        if let Some(snapshot) = &self.result_snapshot {
            lines.push(format!("Result: {}", snapshot.describe()));
        }
        lines.push(format!("A: {}", self.assistant_response));
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn short_summary_includes_present_artifacts() {
        let plan = AnalysisPlan::from_payload(&json!({"entities": ["orders"]}));
        let snapshot = ResultSnapshot::from_execution_payload(&json!({
            "status": "success",
            "result": {"columns": ["n"], "rows": [[42]]}
        }));
        let turn = TurnRecord::new(
            "How many orders?",
            "There are 42 orders.",
            Some(plan),
            Some("SELECT count(*) AS n FROM orders".into()),
            Some(snapshot),
        );
        assert_eq!(
            turn.short_summary(),
            "Q: How many orders?\n\
             Plan: Entities: orders\n\
             SQL: SELECT count(*) AS n FROM orders\n\
             Result: Returned columns [n], sample rows: 42\n\
             A: There are 42 orders."
        );
    }

    #[test]
    fn short_summary_without_artifacts() {
        let turn = TurnRecord::new("hi", "hello", None, None, None);
        assert_eq!(turn.short_summary(), "Q: hi\nA: hello");
        assert_eq!(turn.turn_id().len(), 36);
    }
}
