//! Bearer verification for the HTTP surface: HS256 JWTs issued in exchange for an API key,
//! and optionally one static operator token.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use chrono::Utc;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use research_core::{AuthError, AuthGate, Principal, RESEARCH_SCOPE, SecretValue, bearer_token};
use serde::{Deserialize, Serialize};

use crate::config::JwtSettings;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Space separated scopes.
    #[serde(default)]
    pub scope: String,
}

pub struct JwtAuthGate {
    key: DecodingKey,
    validation: Validation,
}

impl JwtAuthGate {
    pub fn new(settings: &JwtSettings) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        if let Some(issuer) = settings.issuer.as_deref() {
            validation.set_issuer(&[issuer]);
        }
        Self {
            key: DecodingKey::from_secret(settings.secret.expose().as_bytes()),
            validation,
        }
    }
}

impl AuthGate for JwtAuthGate {
    fn authenticate(&self, credential: Option<&str>) -> Result<Principal, AuthError> {
        let token = credential.ok_or(AuthError::MissingCredential)?;
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|err| {
            match err.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidCredential(err.to_string()),
            }
        })?;
        Ok(Principal {
            subject: data.claims.sub,
            scopes: data
                .claims
                .scope
                .split_whitespace()
                .map(str::to_string)
                .collect(),
        })
    }
}

/// Tries each gate in order; the first one accepting the credential wins.
pub struct GateChain {
    gates: Vec<Arc<dyn AuthGate>>,
}

impl GateChain {
    pub fn new(gates: Vec<Arc<dyn AuthGate>>) -> Self {
        Self { gates }
    }
}

impl AuthGate for GateChain {
    fn authenticate(&self, credential: Option<&str>) -> Result<Principal, AuthError> {
        let mut rejection = AuthError::MissingCredential;
        for gate in &self.gates {
            match gate.authenticate(credential) {
                Ok(principal) => return Ok(principal),
                // Expired wins over any later rejection.
                Err(err) if !matches!(rejection, AuthError::Expired) => rejection = err,
                Err(_) => {}
            }
        }
        Err(rejection)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedToken {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// Exchanges configured API keys for short-lived JWTs.
pub struct TokenIssuer {
    key: EncodingKey,
    issuer: Option<String>,
    expire_minutes: i64,
    api_keys: Vec<SecretValue>,
}

impl TokenIssuer {
    pub fn new(settings: &JwtSettings, api_keys: Vec<SecretValue>) -> Self {
        Self {
            key: EncodingKey::from_secret(settings.secret.expose().as_bytes()),
            issuer: settings.issuer.clone(),
            expire_minutes: settings.expire_minutes,
            api_keys,
        }
    }

    pub fn has_api_keys(&self) -> bool {
        !self.api_keys.is_empty()
    }

    /// Issue a token for the holder of `api_key`. The subject names the key slot, never the key.
    pub fn issue_for_api_key(&self, api_key: &str) -> Result<IssuedToken, AuthError> {
        let slot = self
            .api_keys
            .iter()
            .position(|known| known.matches(api_key))
            .ok_or_else(|| AuthError::InvalidCredential("invalid API key".into()))?;
        self.issue(&format!("api-key-{}", slot + 1))
    }

    pub fn issue(&self, subject: &str) -> Result<IssuedToken, AuthError> {
        let now = Utc::now().timestamp();
        let expires_in = self.expire_minutes * 60;
        let claims = Claims {
            sub: subject.to_string(),
            iat: now,
            exp: now + expires_in,
            iss: self.issuer.clone(),
            scope: RESEARCH_SCOPE.to_string(),
        };
        let access_token = encode(&Header::default(), &claims, &self.key)
            .map_err(|err| AuthError::InvalidCredential(format!("token encoding failed: {err}")))?;
        Ok(IssuedToken {
            access_token,
            token_type: "bearer".to_string(),
            expires_in,
        })
    }
}

pub(crate) fn credential_from(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
}

/// Extractor for handlers that start executions: a verified principal holding the
/// research scope.
pub struct Authenticated(pub Principal);

#[async_trait]
impl FromRequestParts<AppState> for Authenticated {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let principal = state.auth_gate().authenticate(credential_from(parts))?;
        if !principal.has_scope(RESEARCH_SCOPE) {
            return Err(AuthError::Forbidden(principal.subject).into());
        }
        Ok(Authenticated(principal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use research_core::StaticTokenGate;

    fn settings() -> JwtSettings {
        JwtSettings {
            secret: SecretValue::new("test-secret"),
            issuer: Some("research-service".into()),
            expire_minutes: 30,
        }
    }

    #[test]
    fn issued_token_verifies_with_research_scope() {
        let issuer = TokenIssuer::new(&settings(), vec![SecretValue::new("key-a")]);
        let token = issuer.issue_for_api_key("key-a").unwrap();
        assert_eq!(token.token_type, "bearer");
        assert_eq!(token.expires_in, 1800);

        let principal = JwtAuthGate::new(&settings())
            .authenticate(Some(&token.access_token))
            .unwrap();
        assert_eq!(principal.subject, "api-key-1");
        assert!(principal.has_scope(RESEARCH_SCOPE));
    }

    #[test]
    fn unknown_api_key_is_rejected() {
        let issuer = TokenIssuer::new(&settings(), vec![SecretValue::new("key-a")]);
        assert!(matches!(
            issuer.issue_for_api_key("key-b"),
            Err(AuthError::InvalidCredential(_))
        ));
    }

    #[test]
    fn expired_token_is_reported_as_expired() {
        let claims = Claims {
            sub: "late".into(),
            iat: Utc::now().timestamp() - 7200,
            exp: Utc::now().timestamp() - 3600,
            iss: Some("research-service".into()),
            scope: RESEARCH_SCOPE.into(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();
        assert_eq!(
            JwtAuthGate::new(&settings()).authenticate(Some(&token)),
            Err(AuthError::Expired)
        );
    }

    #[test]
    fn wrong_issuer_is_invalid() {
        let other = JwtSettings {
            issuer: Some("someone-else".into()),
            ..settings()
        };
        let token = TokenIssuer::new(&other, Vec::new()).issue("x").unwrap();
        assert!(matches!(
            JwtAuthGate::new(&settings()).authenticate(Some(&token.access_token)),
            Err(AuthError::InvalidCredential(_))
        ));
    }

    #[test]
    fn chain_accepts_either_gate() {
        let chain = GateChain::new(vec![
            Arc::new(JwtAuthGate::new(&settings())) as Arc<dyn AuthGate>,
            Arc::new(StaticTokenGate::new(SecretValue::new("ops-token"))),
        ]);
        assert_eq!(
            chain.authenticate(Some("ops-token")).unwrap().subject,
            "static-token"
        );
        assert!(chain.authenticate(Some("garbage")).is_err());
        assert_eq!(chain.authenticate(None), Err(AuthError::MissingCredential));
    }
}
