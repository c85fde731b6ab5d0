//! Mapping from engine lifecycle signals to canonical events.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::events::{EventType, ResearchEvent, object};

/// Longest tool output carried in a `tool_result` event, in characters.
pub const MAX_TOOL_RESULT_CHARS: usize = 1000;
/// Longest message carried in a `progress` event, in characters.
pub const MAX_PROGRESS_CHARS: usize = 500;

/// Internal lifecycle signal produced by an engine while it runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineSignal {
    ToolStarted {
        name: String,
        #[serde(default)]
        arguments: Value,
    },
    ToolFinished {
        name: String,
        output: String,
    },
    Delegated {
        delegation_id: String,
        sub_agent: String,
        task: String,
    },
    DelegationFinished {
        delegation_id: String,
        summary: String,
    },
    Progress {
        message: String,
    },
    ReportWritten {
        report_ref: String,
    },
    /// Anything the bridge has no dedicated category for.
    Other {
        category: String,
        #[serde(default)]
        payload: Value,
    },
}

/// Normalize one signal. Pure apart from reading the clock for the timestamp.
pub fn normalize(signal: EngineSignal) -> ResearchEvent {
    match signal {
        EngineSignal::ToolStarted { name, arguments } => ResearchEvent::new(
            EventType::ToolCall,
            object(json!({ "name": name, "arguments": arguments })),
        ),
        EngineSignal::ToolFinished { name, output } => {
            let (result, truncated) = truncate(&output, MAX_TOOL_RESULT_CHARS);
            let mut data = object(json!({ "name": name, "result": result }));
            if truncated {
                data.insert("truncated".into(), Value::Bool(true));
            }
            ResearchEvent::new(EventType::ToolResult, data)
        }
        EngineSignal::Delegated {
            delegation_id,
            sub_agent,
            task,
        } => ResearchEvent::new(
            EventType::SubAgentDelegated,
            object(json!({
                "delegation_id": delegation_id,
                "sub_agent": sub_agent,
                "task": task,
            })),
        ),
        EngineSignal::DelegationFinished {
            delegation_id,
            summary,
        } => ResearchEvent::new(
            EventType::SubAgentResult,
            object(json!({ "delegation_id": delegation_id, "summary": summary })),
        ),
        EngineSignal::Progress { message } => {
            let (message, _) = truncate(&message, MAX_PROGRESS_CHARS);
            ResearchEvent::new(EventType::Progress, object(json!({ "message": message })))
        }
        EngineSignal::ReportWritten { report_ref } => ResearchEvent::report_available(&report_ref),
        EngineSignal::Other { category, payload } => {
            debug!(%category, "unrecognized engine signal mapped to progress");
            ResearchEvent::new(
                EventType::Progress,
                object(json!({
                    "message": format!("unrecognized engine signal: {category}"),
                    "raw": { "category": category, "payload": payload },
                })),
            )
        }
    }
}

fn truncate(text: &str, limit: usize) -> (String, bool) {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => (text[..cut].to_string(), true),
        None => (text.to_string(), false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_and_result_stay_distinct() {
        let call = normalize(EngineSignal::ToolStarted {
            name: "web_search".into(),
            arguments: json!({ "q": "qubits" }),
        });
        let result = normalize(EngineSignal::ToolFinished {
            name: "web_search".into(),
            output: "three hits".into(),
        });

        assert_eq!(call.event_type, EventType::ToolCall);
        assert_eq!(call.data["arguments"]["q"], "qubits");
        assert_eq!(result.event_type, EventType::ToolResult);
        assert_eq!(result.str_field("result"), Some("three hits"));
        assert!(!result.data.contains_key("truncated"));
    }

    #[test]
    fn delegation_pair_shares_identifier() {
        let delegated = normalize(EngineSignal::Delegated {
            delegation_id: "d-1".into(),
            sub_agent: "news-researcher".into(),
            task: "find news".into(),
        });
        let finished = normalize(EngineSignal::DelegationFinished {
            delegation_id: "d-1".into(),
            summary: "found".into(),
        });

        assert_eq!(delegated.event_type, EventType::SubAgentDelegated);
        assert_eq!(finished.event_type, EventType::SubAgentResult);
        assert_eq!(
            delegated.str_field("delegation_id"),
            finished.str_field("delegation_id")
        );
    }

    #[test]
    fn unknown_signal_keeps_raw_payload() {
        let event = normalize(EngineSignal::Other {
            category: "on_llm_token".into(),
            payload: json!({ "token": "qu" }),
        });
        assert_eq!(event.event_type, EventType::Progress);
        assert_eq!(event.data["raw"]["category"], "on_llm_token");
        assert_eq!(event.data["raw"]["payload"]["token"], "qu");
    }

    #[test]
    fn long_payloads_are_truncated_on_char_boundaries() {
        let output = "é".repeat(MAX_TOOL_RESULT_CHARS + 10);
        let event = normalize(EngineSignal::ToolFinished {
            name: "fetch".into(),
            output,
        });
        let result = event.str_field("result").unwrap();
        assert_eq!(result.chars().count(), MAX_TOOL_RESULT_CHARS);
        assert_eq!(event.data["truncated"], true);

        let progress = normalize(EngineSignal::Progress {
            message: "x".repeat(MAX_PROGRESS_CHARS * 2),
        });
        assert_eq!(
            progress.str_field("message").unwrap().len(),
            MAX_PROGRESS_CHARS
        );
    }

    #[test]
    fn report_written_becomes_report_available() {
        let event = normalize(EngineSignal::ReportWritten {
            report_ref: "reports/r.md".into(),
        });
        assert_eq!(event.event_type, EventType::ReportAvailable);
        assert_eq!(event.str_field("report_ref"), Some("reports/r.md"));
    }
}
