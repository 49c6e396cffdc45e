//! Bounded preview of a query execution result.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Rows kept in a snapshot's preview.
pub const SAMPLE_ROW_LIMIT: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSnapshot {
    pub columns: Vec<String>,
    pub sample_rows: Vec<Value>,
    pub row_count: usize,
    pub has_more: bool,
    pub execution_status: String,
    /// The execution payload as received, for audit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_result: Option<Value>,
}

impl Default for ResultSnapshot {
    fn default() -> Self {
        Self {
            columns: Vec::new(),
            sample_rows: Vec::new(),
            row_count: 0,
            has_more: false,
            execution_status: "unknown".into(),
            raw_result: None,
        }
    }
}

impl ResultSnapshot {
    /// Build from an execution tool payload of the form
    /// `{"status": "success", "result": {"columns": [...], "rows": [...]}}`.
    pub fn from_execution_payload(payload: &Value) -> Self {
        let is_empty = match payload {
            Value::Null => true,
            Value::Object(obj) => obj.is_empty(),
            _ => false,
        };
        if is_empty {
            return Self {
                execution_status: "empty".into(),
                ..Self::default()
            };
        }

        let status = payload
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        if status != "success" {
            return Self {
                execution_status: status,
                raw_result: Some(payload.clone()),
                ..Self::default()
            };
        }

        let result = payload.get("result");
        let columns: Vec<String> = result
            .and_then(|r| r.get("columns"))
            .and_then(Value::as_array)
            .map(|cols| {
                cols.iter()
                    .map(|c| c.as_str().map(str::to_string).unwrap_or_else(|| c.to_string()))
                    .collect()
            })
            .unwrap_or_default();
        let rows: &[Value] = result
            .and_then(|r| r.get("rows"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let row_count = rows.len();
        let sample_rows: Vec<Value> = rows.iter().take(SAMPLE_ROW_LIMIT).cloned().collect();

        Self {
            columns,
            has_more: row_count > sample_rows.len(),
            sample_rows,
            row_count,
            execution_status: status,
            raw_result: Some(payload.clone()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.execution_status == "success"
    }

    /// One-line description used in context prompts.
    pub fn describe(&self) -> String {
        if !self.is_success() {
            return format!("Execution failed: {}", self.execution_status);
        }
        if self.columns.is_empty() {
            return "Execution succeeded but returned no columns.".into();
        }
        let preview = if self.sample_rows.is_empty() {
            "no sample rows".to_string()
        } else {
            self.sample_rows
                .iter()
                .map(render_row)
                .collect::<Vec<_>>()
                .join(" | ")
        };
        let more = if self.has_more { ", more rows available" } else { "" };
        format!(
            "Returned columns [{}], sample rows: {preview}{more}",
            self.columns.join(", ")
        )
    }
}

fn render_row(row: &Value) -> String {
    let cells: Vec<String> = match row {
        Value::Array(items) => items.iter().map(render_cell).collect(),
        Value::Object(obj) => obj.values().map(render_cell).collect(),
        other => vec![render_cell(other)],
    };
    cells.join(", ")
}

fn render_cell(cell: &Value) -> String {
    match cell {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
