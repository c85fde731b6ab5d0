//! Canonical event schema shared by every transport.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Closed set of event types a caller can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ResearchStarted,
    ToolCall,
    ToolResult,
    SubAgentDelegated,
    SubAgentResult,
    Progress,
    ReportAvailable,
    ResearchCompleted,
    Error,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ResearchStarted => "research_started",
            EventType::ToolCall => "tool_call",
            EventType::ToolResult => "tool_result",
            EventType::SubAgentDelegated => "sub_agent_delegated",
            EventType::SubAgentResult => "sub_agent_result",
            EventType::Progress => "progress",
            EventType::ReportAvailable => "report_available",
            EventType::ResearchCompleted => "research_completed",
            EventType::Error => "error",
        }
    }

    /// `research_completed` and `error` end an execution.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventType::ResearchCompleted | EventType::Error)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchEvent {
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl ResearchEvent {
    /// Stamp a new event with the current time.
    pub fn new(event_type: EventType, data: Map<String, Value>) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            data,
        }
    }

    pub fn started(request_id: &str, query: &str, metadata: &Map<String, Value>) -> Self {
        Self::new(
            EventType::ResearchStarted,
            object(json!({
                "request_id": request_id,
                "query": query,
                "metadata": metadata,
            })),
        )
    }

    pub fn report_available(report_ref: &str) -> Self {
        Self::new(
            EventType::ReportAvailable,
            object(json!({ "report_ref": report_ref })),
        )
    }

    pub fn completed_with_report(report_ref: &str, usage: &UsageCounters) -> Self {
        Self::new(
            EventType::ResearchCompleted,
            object(json!({
                "report_ref": report_ref,
                "metadata": usage.to_metadata(),
            })),
        )
    }

    pub fn completed_with_message(final_message: &str, usage: &UsageCounters) -> Self {
        Self::new(
            EventType::ResearchCompleted,
            object(json!({
                "final_message": final_message,
                "metadata": usage.to_metadata(),
            })),
        )
    }

    pub fn error(description: &str) -> Self {
        Self::new(
            EventType::Error,
            object(json!({ "description": description })),
        )
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }
}

pub(crate) fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Tool and sub-agent usage folded from an event sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageCounters {
    pub tool_calls: u64,
    pub tool_results: u64,
    pub sub_agents_delegated: u64,
    pub sub_agent_results: u64,
}

impl UsageCounters {
    pub fn observe(&mut self, event_type: EventType) {
        match event_type {
            EventType::ToolCall => self.tool_calls += 1,
            EventType::ToolResult => self.tool_results += 1,
            EventType::SubAgentDelegated => self.sub_agents_delegated += 1,
            EventType::SubAgentResult => self.sub_agent_results += 1,
            _ => {}
        }
    }

    pub fn to_metadata(&self) -> Map<String, Value> {
        object(json!({
            "tool_calls": self.tool_calls,
            "tool_results": self.tool_results,
            "sub_agents_delegated": self.sub_agents_delegated,
            "sub_agent_results": self.sub_agent_results,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_snake_case_type() {
        let event = ResearchEvent::error("boom");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event_type"], "error");
        assert_eq!(value["data"]["description"], "boom");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn as_str_matches_serde_name() {
        for event_type in [
            EventType::ResearchStarted,
            EventType::ToolCall,
            EventType::ToolResult,
            EventType::SubAgentDelegated,
            EventType::SubAgentResult,
            EventType::Progress,
            EventType::ReportAvailable,
            EventType::ResearchCompleted,
            EventType::Error,
        ] {
            let serialized = serde_json::to_value(event_type).unwrap();
            assert_eq!(serialized, event_type.as_str());
        }
    }

    #[test]
    fn usage_counts_only_tool_and_sub_agent_events() {
        let mut usage = UsageCounters::default();
        for event_type in [
            EventType::ToolCall,
            EventType::ToolResult,
            EventType::Progress,
            EventType::SubAgentDelegated,
            EventType::ToolCall,
        ] {
            usage.observe(event_type);
        }
        assert_eq!(usage.tool_calls, 2);
        assert_eq!(usage.tool_results, 1);
        assert_eq!(usage.sub_agents_delegated, 1);
        assert_eq!(usage.sub_agent_results, 0);
        assert_eq!(usage.to_metadata()["tool_calls"], 2);
    }
}
