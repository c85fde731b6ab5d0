use std::env;

use crate::ResearchError;

/// Wrapper around sensitive values to reduce accidental logging.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Compare against a presented value without short-circuiting on the first mismatch.
    pub fn matches(&self, candidate: &str) -> bool {
        let expected = self.0.as_bytes();
        let candidate = candidate.as_bytes();
        if expected.len() != candidate.len() {
            return false;
        }
        expected
            .iter()
            .zip(candidate)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "***redacted***")
    }
}

/// Require that a given environment variable is set and non-empty.
pub fn require_env(var: &str) -> Result<SecretValue, ResearchError> {
    optional_env(var).ok_or_else(|| ResearchError::MissingSecret(var.to_string()))
}

/// Read a secret from the environment, treating blank values as absent.
pub fn optional_env(var: &str) -> Option<SecretValue> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => Some(SecretValue(value.trim().to_string())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_is_redacted() {
        let secret = SecretValue::new("hunter2");
        assert_eq!(format!("{secret:?}"), "***redacted***");
        assert_eq!(secret.expose(), "hunter2");
    }

    #[test]
    fn matches_requires_exact_value() {
        let secret = SecretValue::new("token-a");
        assert!(secret.matches("token-a"));
        assert!(!secret.matches("token-b"));
        assert!(!secret.matches("token"));
    }

    #[test]
    fn require_env_missing() {
        let err = require_env("RESEARCH_TEST_SECRET_THAT_IS_NEVER_SET").unwrap_err();
        assert!(matches!(err, ResearchError::MissingSecret(_)));
    }
}
