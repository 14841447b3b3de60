//! Prometheus metrics for script executions.
//!
//! Only compiled with the `metrics` feature. Attach a [`SafexecMetrics`] to
//! an executor with [`crate::SafeExecutor::with_metrics`].

use std::sync::atomic::AtomicI64;

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

use crate::audit::ExecutionMode;

/// Label set for execution metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ExecutionLabels {
    /// `restricted` or `unrestricted`.
    pub mode: String,
}

/// Label set for error metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    /// The error code, e.g. `CHECK_NODE` or `TIMEOUT`.
    pub code: String,
}

/// Counters, a duration histogram and an in-flight gauge for executions.
pub struct SafexecMetrics {
    pub executions_total: Family<ExecutionLabels, Counter>,
    pub execution_duration_seconds: Family<ExecutionLabels, Histogram>,
    pub errors_total: Family<ErrorLabels, Counter>,
    pub executions_in_flight: Gauge<i64, AtomicI64>,
}

impl SafexecMetrics {
    /// Create the metrics and register them with `registry`.
    pub fn new(registry: &mut Registry) -> Self {
        let executions_total = Family::default();
        registry.register(
            "safexec_executions_total",
            "Total script executions",
            executions_total.clone(),
        );

        let execution_duration_seconds =
            Family::<ExecutionLabels, Histogram>::new_with_constructor(|| {
                Histogram::new([0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0].into_iter())
            });
        registry.register(
            "safexec_execution_duration_seconds",
            "Script execution duration",
            execution_duration_seconds.clone(),
        );

        let errors_total = Family::default();
        registry.register(
            "safexec_errors_total",
            "Failed or rejected executions by error code",
            errors_total.clone(),
        );

        let executions_in_flight = Gauge::default();
        registry.register(
            "safexec_executions_in_flight",
            "Executions currently running",
            executions_in_flight.clone(),
        );

        Self {
            executions_total,
            execution_duration_seconds,
            errors_total,
            executions_in_flight,
        }
    }

    /// Record a finished execution, successful or not.
    pub fn record_execution(&self, mode: ExecutionMode, duration_secs: f64) {
        let labels = ExecutionLabels {
            mode: mode_label(mode).to_string(),
        };
        self.executions_total.get_or_create(&labels).inc();
        self.execution_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    pub fn record_error(&self, code: &str) {
        let labels = ErrorLabels {
            code: code.to_string(),
        };
        self.errors_total.get_or_create(&labels).inc();
    }
}

fn mode_label(mode: ExecutionMode) -> &'static str {
    match mode {
        ExecutionMode::Restricted => "restricted",
        ExecutionMode::Unrestricted => "unrestricted",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus_client::encoding::text::encode;

    #[test]
    fn execution_counter_is_labelled_by_mode() {
        let mut registry = Registry::default();
        let metrics = SafexecMetrics::new(&mut registry);
        metrics.record_execution(ExecutionMode::Restricted, 0.5);
        metrics.record_execution(ExecutionMode::Restricted, 1.0);
        metrics.record_execution(ExecutionMode::Unrestricted, 0.1);

        let labels = ExecutionLabels {
            mode: "restricted".into(),
        };
        assert_eq!(metrics.executions_total.get_or_create(&labels).get(), 2);
    }

    #[test]
    fn error_counter_is_labelled_by_code() {
        let mut registry = Registry::default();
        let metrics = SafexecMetrics::new(&mut registry);
        metrics.record_error("TIMEOUT");
        metrics.record_error("TIMEOUT");
        metrics.record_error("CHECK_NODE");

        let labels = ErrorLabels {
            code: "TIMEOUT".into(),
        };
        assert_eq!(metrics.errors_total.get_or_create(&labels).get(), 2);
    }

    #[test]
    fn metrics_encode_to_text() {
        let mut registry = Registry::default();
        let metrics = SafexecMetrics::new(&mut registry);
        metrics.record_execution(ExecutionMode::Restricted, 1.0);
        metrics.record_error("RUN_BUILTIN");
        metrics.executions_in_flight.inc();

        let mut buf = String::new();
        encode(&mut buf, &registry).unwrap();
        assert!(buf.contains("safexec_executions_total"), "{buf}");
        assert!(buf.contains("safexec_errors_total"), "{buf}");
        assert!(buf.contains("safexec_executions_in_flight"), "{buf}");
    }
}
