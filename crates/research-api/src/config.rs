use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use research_core::{ExecutorConfig, ResearchError, SecretValue, optional_env, require_env};

#[derive(Clone, Debug)]
pub struct JwtSettings {
    pub secret: SecretValue,
    pub issuer: Option<String>,
    pub expire_minutes: i64,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub listen_addr: String,
    pub max_concurrent_executions: usize,
    pub sync_timeout: Duration,
    pub executor: ExecutorConfig,
    pub jwt: Option<JwtSettings>,
    pub api_keys: Vec<SecretValue>,
    pub auth_token: Option<SecretValue>,
    pub report_dir: Option<PathBuf>,
    pub engine_step_delay: Duration,
    /// How long an upgraded WebSocket may stay silent before its request arrives.
    pub ws_request_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: Self::DEFAULT_LISTEN_ADDR.to_string(),
            max_concurrent_executions: default_concurrency(),
            sync_timeout: Duration::from_secs(Self::DEFAULT_SYNC_TIMEOUT_SECS),
            executor: ExecutorConfig::default(),
            jwt: None,
            api_keys: Vec::new(),
            auth_token: None,
            report_dir: None,
            engine_step_delay: Duration::from_millis(Self::DEFAULT_STEP_DELAY_MS),
            ws_request_timeout: Duration::from_secs(Self::DEFAULT_WS_REQUEST_TIMEOUT_SECS),
        }
    }
}

impl AppConfig {
    const DEFAULT_LISTEN_ADDR: &'static str = "0.0.0.0:8081";
    const DEFAULT_SYNC_TIMEOUT_SECS: u64 = 300;
    const DEFAULT_JWT_EXPIRE_MINUTES: i64 = 30;
    const DEFAULT_STEP_DELAY_MS: u64 = 150;
    const DEFAULT_WS_REQUEST_TIMEOUT_SECS: u64 = 10;

    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let listen_addr = env::var("RESEARCH_SERVICE_HTTP_ADDR")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or(defaults.listen_addr);

        let max_concurrent_executions =
            parse_var::<usize>("RESEARCH_MAX_CONCURRENT_EXECUTIONS")?
                .filter(|value| *value > 0)
                .unwrap_or(defaults.max_concurrent_executions);

        let sync_timeout = parse_var::<u64>("RESEARCH_SYNC_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.sync_timeout);

        let mut executor = defaults.executor;
        if let Some(grace_ms) = parse_var::<u64>("RESEARCH_CANCEL_GRACE_MS")? {
            executor = executor.with_cancel_grace(Duration::from_millis(grace_ms));
        }
        if let Some(buffer) = parse_var::<usize>("RESEARCH_EVENT_BUFFER")? {
            executor = executor.with_event_buffer(buffer);
        }

        let api_keys = optional_env("RESEARCH_API_KEYS")
            .map(|keys| parse_api_keys(keys.expose()))
            .unwrap_or_default();

        // Keys are only useful when tokens can be signed.
        let jwt_secret = if api_keys.is_empty() {
            optional_env("RESEARCH_JWT_SECRET")
        } else {
            Some(
                require_env("RESEARCH_JWT_SECRET")
                    .context("RESEARCH_API_KEYS is set but tokens cannot be signed")?,
            )
        };

        let jwt = match jwt_secret {
            Some(secret) => Some(JwtSettings {
                secret,
                issuer: env::var("RESEARCH_JWT_ISSUER")
                    .ok()
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty()),
                expire_minutes: parse_var::<i64>("RESEARCH_JWT_EXPIRE_MINUTES")?
                    .filter(|value| *value > 0)
                    .unwrap_or(Self::DEFAULT_JWT_EXPIRE_MINUTES),
            }),
            None => None,
        };

        let report_dir = env::var("RESEARCH_REPORT_DIR")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);

        let engine_step_delay = parse_var::<u64>("RESEARCH_ENGINE_STEP_DELAY_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.engine_step_delay);

        let ws_request_timeout = parse_var::<u64>("RESEARCH_WS_REQUEST_TIMEOUT_SECS")?
            .filter(|value| *value > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.ws_request_timeout);

        let config = Self {
            listen_addr,
            max_concurrent_executions,
            sync_timeout,
            executor,
            jwt,
            api_keys,
            auth_token: optional_env("RESEARCH_AUTH_TOKEN"),
            report_dir,
            engine_step_delay,
            ws_request_timeout,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the service cannot run with.
    pub fn validate(&self) -> Result<(), ResearchError> {
        if self.jwt.is_none() && self.auth_token.is_none() {
            return Err(ResearchError::InvalidConfiguration(
                "set RESEARCH_JWT_SECRET or RESEARCH_AUTH_TOKEN; the service refuses to run unauthenticated"
                    .into(),
            ));
        }
        if self.max_concurrent_executions == 0 {
            return Err(ResearchError::InvalidConfiguration(
                "max_concurrent_executions must be at least 1".into(),
            ));
        }
        self.executor.validate()
    }
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|nz| nz.get())
        .unwrap_or(4)
}

fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("{name} has an invalid value")),
        _ => Ok(None),
    }
}

fn parse_api_keys(raw: &str) -> Vec<SecretValue> {
    raw.split(',')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(SecretValue::new)
        .collect()
}
