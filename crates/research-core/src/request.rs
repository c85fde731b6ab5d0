//! Research request model and the validation performed before an execution exists.

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ValidationError;

/// Accepted range for both `max_concurrent_units` and `max_iterations`.
pub const LIMIT_RANGE: RangeInclusive<i64> = 1..=5;

const METADATA_SUB_AGENT_KEY: &str = "sub_agent";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_agent: Option<String>,
    #[serde(
        default,
        alias = "max_concurrent_research_units",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_concurrent_units: Option<i64>,
    #[serde(
        default,
        alias = "max_researcher_iterations",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_iterations: Option<i64>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ResearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn with_sub_agent(mut self, sub_agent: impl Into<String>) -> Self {
        self.sub_agent = Some(sub_agent.into());
        self
    }

    pub fn with_max_concurrent_units(mut self, units: i64) -> Self {
        self.max_concurrent_units = Some(units);
        self
    }

    pub fn with_max_iterations(mut self, iterations: i64) -> Self {
        self.max_iterations = Some(iterations);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// The single sub-agent this request selects, if any.
    ///
    /// Blank names count as absent. A name may be given through the field or through
    /// `metadata.sub_agent`; both are accepted only when they agree.
    pub fn selected_sub_agent(&self) -> Result<Option<&str>, ValidationError> {
        let from_field = self
            .sub_agent
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty());
        let from_metadata = self
            .metadata
            .get(METADATA_SUB_AGENT_KEY)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty());

        match (from_field, from_metadata) {
            (Some(a), Some(b)) if a != b => Err(ValidationError::ConflictingSubAgents(
                a.to_string(),
                b.to_string(),
            )),
            (Some(name), _) | (None, Some(name)) => Ok(Some(name)),
            (None, None) => Ok(None),
        }
    }

    /// Check the request against the engine's sub-agent catalogue.
    pub fn validate(&self, catalog: &[SubAgentSpec]) -> Result<(), ValidationError> {
        if self.query.trim().is_empty() {
            return Err(ValidationError::EmptyQuery);
        }
        check_limit("max_concurrent_units", self.max_concurrent_units)?;
        check_limit("max_iterations", self.max_iterations)?;

        if let Some(name) = self.selected_sub_agent()? {
            if !catalog.iter().any(|spec| spec.name == name) {
                return Err(ValidationError::UnknownSubAgent(name.to_string()));
            }
        }
        Ok(())
    }
}

fn check_limit(field: &'static str, value: Option<i64>) -> Result<(), ValidationError> {
    match value {
        Some(value) if !LIMIT_RANGE.contains(&value) => Err(ValidationError::OutOfRange {
            field,
            value,
            min: *LIMIT_RANGE.start(),
            max: *LIMIT_RANGE.end(),
        }),
        _ => Ok(()),
    }
}

/// A named computation variant an engine can run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubAgentSpec {
    pub name: String,
    pub description: String,
    pub tools: Vec<String>,
}

impl SubAgentSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            tools: Vec::new(),
        }
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn catalog() -> Vec<SubAgentSpec> {
        vec![SubAgentSpec::new("news-researcher", "news")]
    }

    #[test]
    fn rejects_blank_query() {
        let err = ResearchRequest::new("   ").validate(&catalog()).unwrap_err();
        assert_eq!(err, ValidationError::EmptyQuery);
    }

    #[test]
    fn rejects_limits_outside_range() {
        for value in [0, 6, -1] {
            let request = ResearchRequest::new("q").with_max_concurrent_units(value);
            assert!(matches!(
                request.validate(&catalog()),
                Err(ValidationError::OutOfRange {
                    field: "max_concurrent_units",
                    ..
                })
            ));

            let request = ResearchRequest::new("q").with_max_iterations(value);
            assert!(matches!(
                request.validate(&catalog()),
                Err(ValidationError::OutOfRange {
                    field: "max_iterations",
                    ..
                })
            ));
        }
    }

    #[test]
    fn accepts_bounds() {
        let request = ResearchRequest::new("q")
            .with_max_concurrent_units(1)
            .with_max_iterations(5);
        assert!(request.validate(&catalog()).is_ok());
    }

    #[test]
    fn unknown_sub_agent_is_rejected() {
        let request = ResearchRequest::new("q").with_sub_agent("poet");
        assert_eq!(
            request.validate(&catalog()),
            Err(ValidationError::UnknownSubAgent("poet".into()))
        );
    }

    #[test]
    fn conflicting_sub_agents_are_rejected() {
        let request = ResearchRequest::new("q")
            .with_sub_agent("news-researcher")
            .with_metadata("sub_agent", json!("code-analyst"));
        assert!(matches!(
            request.validate(&catalog()),
            Err(ValidationError::ConflictingSubAgents(_, _))
        ));

        let agreeing = ResearchRequest::new("q")
            .with_sub_agent("news-researcher")
            .with_metadata("sub_agent", json!("news-researcher"));
        assert!(agreeing.validate(&catalog()).is_ok());
    }

    #[test]
    fn accepts_legacy_field_names() {
        let request: ResearchRequest = serde_json::from_value(json!({
            "query": "q",
            "max_concurrent_research_units": 2,
            "max_researcher_iterations": 4
        }))
        .unwrap();
        assert_eq!(request.max_concurrent_units, Some(2));
        assert_eq!(request.max_iterations, Some(4));
    }
}
