use anyhow::Result;
use once_cell::sync::OnceCell;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{KeyValue, global};
use tracing::info;

use crate::events::EventType;

struct ExecutionMetrics {
    executions: Counter<u64>,
    duration_ms: Histogram<f64>,
    events: Counter<u64>,
}

static METRICS: OnceCell<ExecutionMetrics> = OnceCell::new();

fn handles() -> &'static ExecutionMetrics {
    METRICS.get_or_init(|| {
        let meter: Meter = global::meter("research.executions");
        ExecutionMetrics {
            executions: meter
                .u64_counter("research_executions_total")
                .with_description("Finished executions by terminal state")
                .init(),
            duration_ms: meter
                .f64_histogram("research_execution_duration_ms")
                .with_description("Execution wall time in milliseconds")
                .init(),
            events: meter
                .u64_counter("research_events_total")
                .with_description("Normalized events pushed to callers by type")
                .init(),
        }
    })
}

/// Hint to operators that OTEL metrics export can be configured externally.
pub fn init_metrics_from_env(service_name: &str) -> Result<()> {
    if std::env::var("RESEARCH_OTEL_METRICS_ENDPOINT").is_ok() {
        info!(
            target = "telemetry",
            "RESEARCH_OTEL_METRICS_ENDPOINT detected for {service_name}. Configure an OTLP meter provider in your deployment to export execution metrics."
        );
    }
    Ok(())
}

/// Record a finished execution (no-op if no provider installed).
pub fn record_execution(status: &str, duration_ms: u64) {
    let metrics = handles();
    let attrs = [KeyValue::new("status", status.to_string())];
    metrics.executions.add(1, &attrs);
    metrics.duration_ms.record(duration_ms as f64, &attrs);
}

pub fn record_event(event_type: EventType) {
    handles()
        .events
        .add(1, &[KeyValue::new("event_type", event_type.as_str())]);
}
