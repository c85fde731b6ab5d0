use thiserror::Error;

/// Rejection of a request before any execution state is allocated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("query must not be empty")]
    EmptyQuery,
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },
    #[error("unknown sub-agent: {0}")]
    UnknownSubAgent(String),
    #[error("conflicting sub-agents requested: {0} and {1}")]
    ConflictingSubAgents(String, String),
}

/// Rejection produced by the auth gate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing bearer credential")]
    MissingCredential,
    #[error("invalid credential: {0}")]
    InvalidCredential(String),
    #[error("credential expired")]
    Expired,
    #[error("principal {0} is not allowed to run research")]
    Forbidden(String),
}

impl AuthError {
    pub fn is_forbidden(&self) -> bool {
        matches!(self, AuthError::Forbidden(_))
    }
}

/// Failure raised by the engine after the execution started.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{description}")]
pub struct EngineError {
    pub description: String,
}

impl EngineError {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
        }
    }
}

/// Failure while writing to a caller. Always treated as a disconnect.
#[derive(Debug, Clone, Error)]
#[error("transport closed: {0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

#[derive(Debug, Clone, Error)]
pub enum ReportError {
    #[error("report {0} not found")]
    NotFound(String),
    #[error("report reference {0} escapes the report directory")]
    InvalidRef(String),
    #[error("report I/O failure for {reference}: {reason}")]
    Io { reference: String, reason: String },
}

/// Core error type for the research bridge.
#[derive(Debug, Error)]
pub enum ResearchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("research failed: {0}")]
    Engine(#[from] EngineError),
    #[error("cancelled")]
    Cancelled,
    #[error("timed out")]
    TimedOut,
    #[error(transparent)]
    Report(#[from] ReportError),
    #[error("configuration error: {0}")]
    InvalidConfiguration(String),
    #[error("missing environment variable: {0}")]
    MissingSecret(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ResearchError {
    /// HTTP-style status a caller observes for this failure.
    pub fn http_status(&self) -> u16 {
        match self {
            ResearchError::Validation(_) => 400,
            ResearchError::Auth(err) if err.is_forbidden() => 403,
            ResearchError::Auth(_) => 401,
            ResearchError::TimedOut => 504,
            _ => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_taxonomy() {
        assert_eq!(
            ResearchError::from(ValidationError::EmptyQuery).http_status(),
            400
        );
        assert_eq!(
            ResearchError::from(AuthError::MissingCredential).http_status(),
            401
        );
        assert_eq!(
            ResearchError::from(AuthError::Forbidden("alice".into())).http_status(),
            403
        );
        assert_eq!(
            ResearchError::from(EngineError::new("boom")).http_status(),
            500
        );
        assert_eq!(ResearchError::TimedOut.http_status(), 504);
    }

    #[test]
    fn out_of_range_message_names_field() {
        let err = ValidationError::OutOfRange {
            field: "max_iterations",
            value: 6,
            min: 1,
            max: 5,
        };
        assert_eq!(
            err.to_string(),
            "max_iterations must be between 1 and 5, got 6"
        );
    }
}
