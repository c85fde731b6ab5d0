use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::http::StatusCode;
use research_core::{
    AuthGate, FsReportStore, InMemoryReportStore, PipelineEngine, PipelineSettings, ReportStore,
    RequestExecutor, ResearchEngine, StaticTokenGate,
};
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::info;

use crate::auth::{GateChain, JwtAuthGate, TokenIssuer};
use crate::config::AppConfig;
use crate::error::AppError;

#[derive(Clone)]
pub struct AppState {
    executor: Arc<RequestExecutor>,
    auth_gate: Arc<dyn AuthGate>,
    token_issuer: Option<Arc<TokenIssuer>>,
    reports: Arc<dyn ReportStore>,
    permits: Arc<Semaphore>,
    max_executions: usize,
    sync_timeout: Duration,
    ws_request_timeout: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct CapacityReport {
    pub max_executions: usize,
    pub available_executions: usize,
    pub active_executions: usize,
}

impl AppState {
    /// Wire the service with the built-in pipeline engine.
    pub fn try_new(config: &AppConfig) -> Result<Self> {
        let reports: Arc<dyn ReportStore> = match config.report_dir.as_ref() {
            Some(dir) => {
                let store = FsReportStore::new(dir.clone());
                info!(report_dir = %store.root().display(), "storing reports on disk");
                Arc::new(store)
            }
            None => Arc::new(InMemoryReportStore::new()),
        };
        let engine = Arc::new(PipelineEngine::new(
            reports.clone(),
            PipelineSettings::default().with_step_delay(config.engine_step_delay),
        ));
        Self::with_engine(config, engine, reports)
    }

    pub fn with_engine(
        config: &AppConfig,
        engine: Arc<dyn ResearchEngine>,
        reports: Arc<dyn ReportStore>,
    ) -> Result<Self> {
        config.validate()?;

        let mut gates: Vec<Arc<dyn AuthGate>> = Vec::new();
        if let Some(jwt) = config.jwt.as_ref() {
            gates.push(Arc::new(JwtAuthGate::new(jwt)));
        }
        if let Some(token) = config.auth_token.clone() {
            gates.push(Arc::new(StaticTokenGate::new(token)));
        }

        let token_issuer = config
            .jwt
            .as_ref()
            .map(|jwt| Arc::new(TokenIssuer::new(jwt, config.api_keys.clone())));

        let max_executions = config.max_concurrent_executions.max(1);

        Ok(Self {
            executor: Arc::new(RequestExecutor::new(engine, config.executor.clone())),
            auth_gate: Arc::new(GateChain::new(gates)),
            token_issuer,
            reports,
            permits: Arc::new(Semaphore::new(max_executions)),
            max_executions,
            sync_timeout: config.sync_timeout,
            ws_request_timeout: config.ws_request_timeout,
        })
    }

    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    pub fn auth_gate(&self) -> &dyn AuthGate {
        self.auth_gate.as_ref()
    }

    pub fn token_issuer(&self) -> Option<&TokenIssuer> {
        self.token_issuer.as_deref()
    }

    pub fn reports(&self) -> &dyn ReportStore {
        self.reports.as_ref()
    }

    pub fn sync_timeout(&self) -> Duration {
        self.sync_timeout
    }

    pub fn ws_request_timeout(&self) -> Duration {
        self.ws_request_timeout
    }

    /// Reserve an execution slot; the slot is held until the permit drops.
    pub fn acquire_permit(&self) -> Result<OwnedSemaphorePermit, AppError> {
        match self.permits.clone().try_acquire_owned() {
            Ok(permit) => Ok(permit),
            Err(TryAcquireError::NoPermits) => Err(AppError::new(
                StatusCode::TOO_MANY_REQUESTS,
                "execution capacity reached; retry once a slot frees up",
            )),
            Err(TryAcquireError::Closed) => Err(AppError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "research executor unavailable",
            )),
        }
    }

    pub fn capacity(&self) -> CapacityReport {
        let available = self.permits.available_permits();
        CapacityReport {
            max_executions: self.max_executions,
            available_executions: available,
            active_executions: self.max_executions.saturating_sub(available),
        }
    }
}
