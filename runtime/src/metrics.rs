//! Prometheus metrics for observability and monitoring.
//!
//! The engine records through the `metrics` facade; nothing is exported until
//! a recorder is installed. [`MetricsRecorder::install`] installs the
//! Prometheus recorder and gives access to the scrape text.
//!
//! Recorded metrics:
//! - `enrollment_operations_total{operation,outcome}`
//! - `enrollment_transaction_conflicts_total{operation}`
//! - `enrollment_transaction_duration_seconds{operation}`
//! - `enrollment_entrants_drawn_total`
//! - `enrollment_backfills_total{outcome}`
//! - `enrollment_notifications_failed_total`
//!
//! # Example
//!
//! ```rust,no_run
//! use enrollment_runtime::metrics::MetricsRecorder;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let recorder = MetricsRecorder::install()?;
//!
//! // ... run the engine ...
//!
//! if let Some(text) = recorder.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use enrollment_core::error::SelectionError;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Installed Prometheus recorder.
#[derive(Clone)]
pub struct MetricsRecorder {
    handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRecorder")
            .field("installed", &self.handle.is_some())
            .finish()
    }
}

impl MetricsRecorder {
    /// Describe the enrollment metrics and install the Prometheus recorder.
    ///
    /// If another recorder is already installed (for example by an earlier
    /// test), metrics keep flowing to it and [`render`](Self::render)
    /// returns `None`.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built or installed.
    pub fn install() -> Result<Self, MetricsError> {
        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = match builder.install_recorder() {
            Ok(handle) => {
                tracing::info!("Prometheus metrics recorder installed");
                Some(handle)
            },
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") || err_msg.contains("already set") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    None
                } else {
                    return Err(MetricsError::Install(err_msg));
                }
            },
        };

        register_metrics();
        Ok(Self { handle })
    }

    /// Whether this call installed the recorder.
    #[must_use]
    pub const fn is_installed(&self) -> bool {
        self.handle.is_some()
    }

    /// Render current metrics in Prometheus format.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(
        "enrollment_operations_total",
        "Enrollment operations by operation and outcome"
    );
    describe_counter!(
        "enrollment_transaction_conflicts_total",
        "Transaction attempts aborted by a conflicting write"
    );
    describe_histogram!(
        "enrollment_transaction_duration_seconds",
        "Time from first read to final commit or rejection"
    );
    describe_counter!(
        "enrollment_entrants_drawn_total",
        "Entrants moved from waiting to selected by lotteries and backfills"
    );
    describe_counter!(
        "enrollment_backfills_total",
        "Backfills by outcome (replaced or unfilled)"
    );
    describe_counter!(
        "enrollment_notifications_failed_total",
        "Committed notifications the dispatcher failed to deliver"
    );
}

/// Selection engine metrics recorder.
pub struct SelectionMetrics;

impl SelectionMetrics {
    /// Record the outcome of one engine operation.
    pub fn record_operation(
        operation: &'static str,
        result: Result<(), &SelectionError>,
        duration: Duration,
    ) {
        let outcome = match result {
            Ok(()) => "ok",
            Err(error) => error.kind().as_str(),
        };
        counter!("enrollment_operations_total", "operation" => operation, "outcome" => outcome)
            .increment(1);
        histogram!("enrollment_transaction_duration_seconds", "operation" => operation)
            .record(duration.as_secs_f64());
    }

    /// Record a transaction attempt aborted by a conflict.
    pub fn record_conflict(operation: &'static str) {
        counter!("enrollment_transaction_conflicts_total", "operation" => operation).increment(1);
    }

    /// Record entrants drawn into `selected`.
    pub fn record_drawn(count: usize) {
        counter!("enrollment_entrants_drawn_total")
            .increment(u64::try_from(count).unwrap_or(u64::MAX));
    }

    /// Record a backfill, with or without a replacement.
    pub fn record_backfill(replaced: bool) {
        let outcome = if replaced { "replaced" } else { "unfilled" };
        counter!("enrollment_backfills_total", "outcome" => outcome).increment(1);
    }

    /// Record a failed delivery.
    pub fn record_notification_failure() {
        counter!("enrollment_notifications_failed_total").increment(1);
    }
}
