pub mod metrics;
#[cfg(feature = "metrics")]
pub mod prometheus;
#[cfg(feature = "tracing-basic")]
pub mod tracing;

pub use metrics::{GlobalMetrics, LiveMetrics, PerformanceMetrics, QueueMetrics};

#[cfg(feature = "metrics")]
pub use self::prometheus::PrometheusExporter;
#[cfg(feature = "tracing-basic")]
pub use self::tracing::init_tracing;
