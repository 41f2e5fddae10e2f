//! Metrics for the harvester.
//!
//! Every metric name lives in [`MetricName`]; recording goes through the small
//! per-phase modules below so call sites never spell metric strings.

use std::fmt;
use std::net::SocketAddr;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Job queue
    JobsEnqueued,
    JobsCompleted,
    JobsRetryScheduled,
    JobsFailedTerminal,
    JobDuration,

    // Upstream API
    UpstreamRequestsSuccess,
    UpstreamRequestsError,
    UpstreamRequestDuration,
    UpstreamEventsReceived,

    // Normalizer and sink
    NormalizeRecordsAccepted,
    NormalizeRecordsRejected,
    SinkEventsPublished,
    SinkCategoriesPublished,
    SinkErrors,

    // Expiry sweep
    SweepEventsRemoved,
    SweepCategoriesRemoved,
    SweepErrors,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::JobsEnqueued => "harvester_jobs_enqueued_total",
            MetricName::JobsCompleted => "harvester_jobs_completed_total",
            MetricName::JobsRetryScheduled => "harvester_jobs_retry_scheduled_total",
            MetricName::JobsFailedTerminal => "harvester_jobs_failed_terminal_total",
            MetricName::JobDuration => "harvester_job_duration_seconds",

            MetricName::UpstreamRequestsSuccess => "harvester_upstream_requests_success_total",
            MetricName::UpstreamRequestsError => "harvester_upstream_requests_error_total",
            MetricName::UpstreamRequestDuration => "harvester_upstream_request_duration_seconds",
            MetricName::UpstreamEventsReceived => "harvester_upstream_events_received_total",

            MetricName::NormalizeRecordsAccepted => "harvester_normalize_records_accepted_total",
            MetricName::NormalizeRecordsRejected => "harvester_normalize_records_rejected_total",
            MetricName::SinkEventsPublished => "harvester_sink_events_published_total",
            MetricName::SinkCategoriesPublished => "harvester_sink_categories_published_total",
            MetricName::SinkErrors => "harvester_sink_errors_total",

            MetricName::SweepEventsRemoved => "harvester_sweep_events_removed_total",
            MetricName::SweepCategoriesRemoved => "harvester_sweep_categories_removed_total",
            MetricName::SweepErrors => "harvester_sweep_errors_total",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Install the Prometheus exporter when a listen address is configured.
/// Without one, the recording functions below are no-ops.
pub fn init(listen: Option<SocketAddr>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(addr) = listen else {
        info!("Metrics exporter disabled");
        return Ok(());
    };
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {}", e))?;
    info!("Metrics exporter listening on {}", addr);
    Ok(())
}

// ============================================================================
// Job queue metrics
// ============================================================================

pub mod jobs {
    use super::MetricName;

    pub fn enqueued(job_type: &'static str) {
        ::metrics::counter!(MetricName::JobsEnqueued.as_str(), "job_type" => job_type).increment(1);
    }

    pub fn completed(job_type: &'static str) {
        ::metrics::counter!(MetricName::JobsCompleted.as_str(), "job_type" => job_type).increment(1);
    }

    pub fn retry_scheduled(job_type: &'static str) {
        ::metrics::counter!(MetricName::JobsRetryScheduled.as_str(), "job_type" => job_type)
            .increment(1);
    }

    pub fn failed_terminal(job_type: &'static str) {
        ::metrics::counter!(MetricName::JobsFailedTerminal.as_str(), "job_type" => job_type)
            .increment(1);
    }

    pub fn duration(job_type: &'static str, secs: f64) {
        ::metrics::histogram!(MetricName::JobDuration.as_str(), "job_type" => job_type).record(secs);
    }
}

// ============================================================================
// Upstream API metrics
// ============================================================================

pub mod upstream {
    use super::MetricName;

    pub fn request_success(endpoint: &'static str) {
        ::metrics::counter!(MetricName::UpstreamRequestsSuccess.as_str(), "endpoint" => endpoint)
            .increment(1);
    }

    pub fn request_error(endpoint: &'static str) {
        ::metrics::counter!(MetricName::UpstreamRequestsError.as_str(), "endpoint" => endpoint)
            .increment(1);
    }

    pub fn request_duration(endpoint: &'static str, secs: f64) {
        ::metrics::histogram!(MetricName::UpstreamRequestDuration.as_str(), "endpoint" => endpoint)
            .record(secs);
    }

    pub fn events_received(count: usize) {
        ::metrics::counter!(MetricName::UpstreamEventsReceived.as_str()).increment(count as u64);
    }
}

// ============================================================================
// Normalizer and sink metrics
// ============================================================================

pub mod sink {
    use super::MetricName;

    pub fn accepted(count: usize) {
        ::metrics::counter!(MetricName::NormalizeRecordsAccepted.as_str()).increment(count as u64);
    }

    pub fn rejected(count: usize) {
        ::metrics::counter!(MetricName::NormalizeRecordsRejected.as_str()).increment(count as u64);
    }

    pub fn event_published() {
        ::metrics::counter!(MetricName::SinkEventsPublished.as_str()).increment(1);
    }

    pub fn category_published() {
        ::metrics::counter!(MetricName::SinkCategoriesPublished.as_str()).increment(1);
    }

    pub fn error() {
        ::metrics::counter!(MetricName::SinkErrors.as_str()).increment(1);
    }
}

// ============================================================================
// Expiry sweep metrics
// ============================================================================

pub mod sweep {
    use super::MetricName;

    pub fn events_removed(count: usize) {
        ::metrics::counter!(MetricName::SweepEventsRemoved.as_str()).increment(count as u64);
    }

    pub fn categories_removed(count: usize) {
        ::metrics::counter!(MetricName::SweepCategoriesRemoved.as_str()).increment(count as u64);
    }

    pub fn errors(count: usize) {
        ::metrics::counter!(MetricName::SweepErrors.as_str()).increment(count as u64);
    }
}
