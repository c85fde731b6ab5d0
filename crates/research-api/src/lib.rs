//! HTTP surface of the research bridge: synchronous calls, SSE and WebSocket streams,
//! token issuance and the liveness check.

pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;
pub mod routes;
pub mod state;
pub mod transport;
