//! Auth gate contract. Credential verification lives outside the bridge; the bridge only
//! needs a principal for logging and limits.

use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::security::SecretValue;

/// Scope a credential must carry to start executions.
pub const RESEARCH_SCOPE: &str = "research";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub subject: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl Principal {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            scopes: vec![RESEARCH_SCOPE.to_string()],
        }
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|granted| granted == scope)
    }
}

pub trait AuthGate: Send + Sync {
    /// Turn a presented bearer credential into a principal, or reject the call.
    fn authenticate(&self, credential: Option<&str>) -> Result<Principal, AuthError>;
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Gate accepting one shared bearer token.
pub struct StaticTokenGate {
    token: SecretValue,
    subject: String,
}

impl StaticTokenGate {
    pub fn new(token: SecretValue) -> Self {
        Self {
            token,
            subject: "static-token".to_string(),
        }
    }
}

impl AuthGate for StaticTokenGate {
    fn authenticate(&self, credential: Option<&str>) -> Result<Principal, AuthError> {
        let credential = credential.ok_or(AuthError::MissingCredential)?;
        if self.token.matches(credential) {
            Ok(Principal::new(self.subject.clone()))
        } else {
            Err(AuthError::InvalidCredential("token mismatch".into()))
        }
    }
}
