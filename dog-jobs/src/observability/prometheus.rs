//! Prometheus text exposition of [`LiveMetrics`].

use prometheus::{Encoder, GaugeVec, IntGaugeVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

use super::metrics::LiveMetrics;
use crate::{QueueError, QueueResult};

const QUANTILES: [(f64, &str); 3] = [(50.0, "0.5"), (95.0, "0.95"), (99.0, "0.99")];

/// Renders live counters in the Prometheus text format
#[derive(Debug)]
pub struct PrometheusExporter {
    live_metrics: Arc<LiveMetrics>,
    registry: Registry,
    jobs: IntGaugeVec,
    in_progress: IntGaugeVec,
    processing_seconds: GaugeVec,
}

impl PrometheusExporter {
    pub fn new(live_metrics: Arc<LiveMetrics>) -> QueueResult<Self> {
        let registry = Registry::new();

        let jobs = IntGaugeVec::new(
            Opts::new("dog_jobs_jobs_total", "Job transitions observed by this process"),
            &["queue", "transition"],
        )
        .map_err(metrics_error)?;

        let in_progress = IntGaugeVec::new(
            Opts::new("dog_jobs_in_progress", "Claimed jobs without an outcome yet"),
            &["queue"],
        )
        .map_err(metrics_error)?;

        let processing_seconds = GaugeVec::new(
            Opts::new("dog_jobs_processing_seconds", "Handler processing time quantiles"),
            &["queue", "quantile"],
        )
        .map_err(metrics_error)?;

        registry.register(Box::new(jobs.clone())).map_err(metrics_error)?;
        registry.register(Box::new(in_progress.clone())).map_err(metrics_error)?;
        registry
            .register(Box::new(processing_seconds.clone()))
            .map_err(metrics_error)?;

        Ok(Self { live_metrics, registry, jobs, in_progress, processing_seconds })
    }

    /// Refresh the gauges and encode the registry
    pub fn render(&self) -> QueueResult<String> {
        for (queue, metrics) in self.live_metrics.all_queue_metrics() {
            let transitions = [
                ("added", metrics.added),
                ("claimed", metrics.claimed),
                ("completed", metrics.completed),
                ("retried", metrics.retried),
                ("failed", metrics.failed),
                ("stalled", metrics.stalled),
            ];
            for (transition, value) in transitions {
                self.jobs
                    .with_label_values(&[queue.as_str(), transition])
                    .set(value as i64);
            }
            self.in_progress
                .with_label_values(&[queue.as_str()])
                .set(metrics.in_progress() as i64);
        }

        let performance = self.live_metrics.performance_metrics();
        for queue in performance.queues() {
            for (percentile, label) in QUANTILES {
                if let Some(duration) = performance.percentile_processing_time(&queue, percentile) {
                    self.processing_seconds
                        .with_label_values(&[queue.as_str(), label])
                        .set(duration.num_milliseconds() as f64 / 1000.0);
                }
            }
        }

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| QueueError::Internal(e.to_string()))
    }
}

fn metrics_error(err: prometheus::Error) -> QueueError {
    QueueError::Internal(format!("metrics: {}", err))
}
