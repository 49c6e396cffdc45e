//! Analysis plan — the normalized form of an intent-analysis tool payload.
//!
//! Parsing is lenient: missing optional keys default, malformed list entries
//! are dropped, and a payload that isn't an object yields the default plan.

use serde::Serialize;
use serde_json::{Map, Value, json};

/// `field op value`, used for both WHERE filters and HAVING conditions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterCondition {
    pub field: String,
    pub op: String,
    pub value: Value,
}

pub type HavingCondition = FilterCondition;

impl FilterCondition {
    fn parse(item: &Value) -> Option<Self> {
        let obj = item.as_object()?;
        let field = scalar_text(obj.get("field")?).filter(|f| !f.is_empty())?;
        let op = scalar_text(obj.get("op")?)?;
        let value = obj.get("value").cloned().unwrap_or(Value::Null);
        Some(Self { field, op, value })
    }

    pub fn to_text(&self) -> String {
        format!("{} {} {}", self.field, self.op, self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationSpec {
    pub agg: Option<String>,
    pub field: String,
    pub alias: Option<String>,
}

impl AggregationSpec {
    fn parse(obj: &Map<String, Value>) -> Option<Self> {
        let field = obj
            .get("field")
            .and_then(scalar_text)
            .filter(|f| !f.is_empty())?;
        Some(Self {
            agg: obj.get("agg").and_then(scalar_text),
            field,
            alias: obj.get("alias").and_then(scalar_text),
        })
    }

    pub fn to_text(&self) -> String {
        let mut label = match &self.agg {
            Some(agg) if !agg.is_empty() => format!("{agg}({})", self.field),
            _ => self.field.clone(),
        };
        if let Some(alias) = self.alias.as_deref().filter(|a| !a.is_empty()) {
            label.push_str(" AS ");
            label.push_str(alias);
        }
        label
    }
}

/// One entry of the select list: a plain field name or an aggregation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SelectItem {
    Field(String),
    Aggregation(AggregationSpec),
}

impl SelectItem {
    fn parse(item: &Value) -> Option<Self> {
        match item {
            Value::Object(obj) => AggregationSpec::parse(obj).map(Self::Aggregation),
            other => scalar_text(other).map(Self::Field),
        }
    }

    pub fn to_text(&self) -> String {
        match self {
            Self::Field(name) => name.clone(),
            Self::Aggregation(spec) => spec.to_text(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderBySpec {
    pub field: String,
    pub direction: String,
}

impl OrderBySpec {
    fn parse(item: &Value) -> Option<Self> {
        let obj = item.as_object()?;
        let field = obj
            .get("field")
            .and_then(scalar_text)
            .filter(|f| !f.is_empty())?;
        let direction = obj
            .get("direction")
            .and_then(scalar_text)
            .unwrap_or_else(|| "asc".into());
        Some(Self { field, direction })
    }

    pub fn to_text(&self) -> String {
        format!("{} {}", self.field, self.direction.to_uppercase())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TimeRange {
    pub start: Option<String>,
    pub end: Option<String>,
}

impl TimeRange {
    pub fn is_valid(&self) -> bool {
        self.start.is_some() || self.end.is_some()
    }

    pub fn to_text(&self) -> String {
        if !self.is_valid() {
            return String::new();
        }
        format!(
            "{} ~ {}",
            self.start.as_deref().unwrap_or("unknown"),
            self.end.as_deref().unwrap_or("unknown")
        )
    }
}

/// How a follow-up question relates to the previous round.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FollowUpDirective {
    pub refers_previous: bool,
    pub use_last_sql: bool,
    pub modify: Option<String>,
}

impl FollowUpDirective {
    pub fn to_text(&self) -> String {
        if !self.refers_previous && self.modify.is_none() {
            return String::new();
        }
        let mut pieces = Vec::new();
        if self.refers_previous {
            pieces.push("refers to previous round".to_string());
        }
        if self.use_last_sql {
            pieces.push("reuses previous SQL".to_string());
        }
        if let Some(modify) = &self.modify {
            pieces.push(format!("change: {modify}"));
        }
        pieces.join("; ")
    }
}

/// Structured intent for one user question.
#[derive(Debug, Clone)]
pub struct AnalysisPlan {
    pub task: String,
    pub entities: Vec<String>,
    pub select: Vec<SelectItem>,
    pub filters: Vec<FilterCondition>,
    pub group_by: Vec<String>,
    pub having: Vec<HavingCondition>,
    pub order_by: Vec<OrderBySpec>,
    pub limit: Option<u64>,
    pub time_range: Option<TimeRange>,
    pub follow_up: Option<FollowUpDirective>,
    pub explanations: Option<String>,
    /// The payload this plan was parsed from, untouched
    pub raw_payload: Value,
}

impl Default for AnalysisPlan {
    fn default() -> Self {
        Self {
            task: "analysis".into(),
            entities: Vec::new(),
            select: Vec::new(),
            filters: Vec::new(),
            group_by: Vec::new(),
            having: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            time_range: None,
            follow_up: None,
            explanations: None,
            raw_payload: Value::Object(Map::new()),
        }
    }
}

// raw_payload is audit data and doesn't take part in equality.
impl PartialEq for AnalysisPlan {
    fn eq(&self, other: &Self) -> bool {
        self.task == other.task
            && self.entities == other.entities
            && self.select == other.select
            && self.filters == other.filters
            && self.group_by == other.group_by
            && self.having == other.having
            && self.order_by == other.order_by
            && self.limit == other.limit
            && self.time_range == other.time_range
            && self.follow_up == other.follow_up
            && self.explanations == other.explanations
    }
}

impl AnalysisPlan {
    pub fn from_payload(payload: &Value) -> Self {
        let Some(obj) = payload.as_object() else {
            return Self {
                raw_payload: payload.clone(),
                ..Self::default()
            };
        };

        let time_range = obj
            .get("time_range")
            .and_then(non_empty_object)
            .map(|tr| TimeRange {
                start: tr.get("start").and_then(scalar_text),
                end: tr.get("end").and_then(scalar_text),
            });

        let follow_up = obj
            .get("follow_up")
            .and_then(non_empty_object)
            .map(|fu| FollowUpDirective {
                refers_previous: fu.get("refers_previous").is_some_and(truthy),
                use_last_sql: fu.get("use_last_sql").is_some_and(truthy),
                modify: fu.get("modify").and_then(scalar_text),
            });

        Self {
            task: obj
                .get("task")
                .and_then(scalar_text)
                .unwrap_or_else(|| "analysis".into()),
            entities: parse_list(obj.get("entities"), scalar_text),
            select: parse_list(obj.get("select"), SelectItem::parse),
            filters: parse_list(obj.get("filters"), FilterCondition::parse),
            group_by: parse_list(obj.get("group_by"), scalar_text),
            having: parse_list(obj.get("having"), FilterCondition::parse),
            order_by: parse_list(obj.get("order_by"), OrderBySpec::parse),
            limit: obj.get("limit").and_then(Value::as_u64),
            time_range,
            follow_up,
            explanations: obj.get("explanations").and_then(scalar_text),
            raw_payload: payload.clone(),
        }
    }

    /// Serialize back to the payload shape. Every key is present; absent
    /// optionals are `null`.
    pub fn to_payload(&self) -> Value {
        json!({
            "task": self.task,
            "entities": self.entities,
            "select": self.select,
            "filters": self.filters,
            "group_by": self.group_by,
            "having": self.having,
            "order_by": self.order_by,
            "limit": self.limit,
            "time_range": self.time_range,
            "follow_up": self.follow_up,
            "explanations": self.explanations,
        })
    }

    /// One-line summary used in context prompts.
    pub fn summarize(&self) -> String {
        let mut parts = Vec::new();
        if !self.entities.is_empty() {
            parts.push(format!("Entities: {}", self.entities.join(", ")));
        }
        if !self.select.is_empty() {
            parts.push(format!("Fields: {}", join_text(&self.select, ", ", SelectItem::to_text)));
        }
        if !self.filters.is_empty() {
            parts.push(format!(
                "Filters: {}",
                join_text(&self.filters, "; ", FilterCondition::to_text)
            ));
        }
        if !self.group_by.is_empty() {
            parts.push(format!("Group by: {}", self.group_by.join(", ")));
        }
        if !self.having.is_empty() {
            parts.push(format!(
                "Having: {}",
                join_text(&self.having, "; ", FilterCondition::to_text)
            ));
        }
        if !self.order_by.is_empty() {
            parts.push(format!(
                "Order by: {}",
                join_text(&self.order_by, ", ", OrderBySpec::to_text)
            ));
        }
        if let Some(limit) = self.limit.filter(|l| *l > 0) {
            parts.push(format!("Limit: {limit}"));
        }
        if let Some(range) = self.time_range.as_ref().filter(|r| r.is_valid()) {
            parts.push(format!("Time range: {}", range.to_text()));
        }
        if let Some(follow) = &self.follow_up {
            let text = follow.to_text();
            if !text.is_empty() {
                parts.push(format!("Follow-up: {text}"));
            }
        }
        parts.join(" | ")
    }
}

fn join_text<T>(items: &[T], sep: &str, render: fn(&T) -> String) -> String {
    items.iter().map(render).collect::<Vec<_>>().join(sep)
}

fn parse_list<T>(value: Option<&Value>, parse: impl Fn(&Value) -> Option<T>) -> Vec<T> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(&parse).collect())
        .unwrap_or_default()
}

/// Text form of a scalar. Null, arrays and objects have none.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn non_empty_object(value: &Value) -> Option<&Map<String, Value>> {
    value.as_object().filter(|obj| !obj.is_empty())
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reparse(plan: &AnalysisPlan) -> AnalysisPlan {
        AnalysisPlan::from_payload(&plan.to_payload())
    }

    #[test]
    fn empty_payload_roundtrip() {
        let plan = AnalysisPlan::from_payload(&json!({}));
        assert_eq!(plan, AnalysisPlan::default());
        assert_eq!(reparse(&plan), plan);
        assert!(plan.summarize().is_empty());
    }

    #[test]
    fn non_object_payload_yields_default_plan() {
        let plan = AnalysisPlan::from_payload(&json!("not a plan"));
        assert_eq!(plan.task, "analysis");
        assert_eq!(plan.raw_payload, json!("not a plan"));
    }

    #[test]
    fn filters_only_roundtrip() {
        let plan = AnalysisPlan::from_payload(&json!({
            "filters": [
                {"field": "region", "op": "=", "value": "East"},
                {"field": "amount", "op": ">", "value": 100},
                {"op": "=", "value": "dropped: no field"},
                {"field": "dropped: no op", "value": 1},
                "not an object"
            ]
        }));
        assert_eq!(plan.filters.len(), 2);
        assert_eq!(plan.filters[1].to_text(), "amount > 100");
        assert_eq!(reparse(&plan), plan);
    }

    #[test]
    fn aggregation_select_roundtrip() {
        let plan = AnalysisPlan::from_payload(&json!({
            "task": "ranking",
            "entities": ["orders"],
            "select": [
                "region",
                {"agg": "sum", "field": "amount", "alias": "total"},
                {"field": "customer_id"},
                {"agg": "count"}
            ],
            "group_by": ["region"],
            "having": [{"field": "total", "op": ">=", "value": 1000}],
            "order_by": [{"field": "total", "direction": "desc"}, {"field": "region"}],
            "limit": 10
        }));
        assert_eq!(plan.select.len(), 3);
        assert_eq!(plan.select[1].to_text(), "sum(amount) AS total");
        assert_eq!(plan.order_by[1].direction, "asc");
        assert_eq!(reparse(&plan), plan);

        let payload = plan.to_payload();
        assert_eq!(payload["select"][1]["agg"], "sum");
        assert_eq!(payload["select"][0], "region");
    }

    #[test]
    fn follow_up_roundtrip() {
        let plan = AnalysisPlan::from_payload(&json!({
            "follow_up": {"refers_previous": true, "use_last_sql": true, "modify": "only 2024"},
            "time_range": {"start": "2024-01-01"},
            "explanations": "narrow previous query"
        }));
        let follow = plan.follow_up.as_ref().unwrap();
        assert!(follow.refers_previous && follow.use_last_sql);
        assert_eq!(
            follow.to_text(),
            "refers to previous round; reuses previous SQL; change: only 2024"
        );
        assert_eq!(reparse(&plan), plan);
    }

    #[test]
    fn to_payload_emits_every_key() {
        let payload = AnalysisPlan::default().to_payload();
        for key in [
            "task", "entities", "select", "filters", "group_by", "having", "order_by", "limit",
            "time_range", "follow_up", "explanations",
        ] {
            assert!(payload.get(key).is_some(), "missing {key}");
        }
        assert!(payload["time_range"].is_null());
        assert!(payload["limit"].is_null());
    }

    #[test]
    fn summarize_renders_sections_in_order() {
        let plan = AnalysisPlan::from_payload(&json!({
            "entities": ["orders", "customers"],
            "select": [{"agg": "avg", "field": "amount"}],
            "filters": [{"field": "city", "op": "=", "value": "Shanghai"}],
            "group_by": ["month"],
            "order_by": [{"field": "month", "direction": "asc"}],
            "limit": 12,
            "time_range": {"start": "2024-01", "end": null}
        }));
        assert_eq!(
            plan.summarize(),
            "Entities: orders, customers | Fields: avg(amount) | Filters: city = \"Shanghai\" \
             | Group by: month | Order by: month ASC | Limit: 12 | Time range: 2024-01 ~ unknown"
        );
    }

    #[test]
    fn equality_ignores_raw_payload() {
        let a = AnalysisPlan::from_payload(&json!({"task": "trend", "extra": 1}));
        let b = AnalysisPlan::from_payload(&json!({"task": "trend"}));
        assert_ne!(a.raw_payload, b.raw_payload);
        assert_eq!(a, b);
    }
}
