use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Samples kept per queue for percentile queries
const MAX_SAMPLES: usize = 1000;

/// Live metrics collector for queue operations
#[derive(Debug)]
pub struct LiveMetrics {
    jobs_added: AtomicU64,
    jobs_claimed: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_retried: AtomicU64,
    jobs_stalled: AtomicU64,
    jobs_stall_failed: AtomicU64,

    // Per-queue metrics
    queue_metrics: RwLock<HashMap<String, QueueMetrics>>,

    // Performance metrics
    performance: RwLock<PerformanceMetrics>,
}

impl LiveMetrics {
    pub fn new() -> Self {
        Self {
            jobs_added: AtomicU64::new(0),
            jobs_claimed: AtomicU64::new(0),
            jobs_completed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            jobs_retried: AtomicU64::new(0),
            jobs_stalled: AtomicU64::new(0),
            jobs_stall_failed: AtomicU64::new(0),
            queue_metrics: RwLock::new(HashMap::new()),
            performance: RwLock::new(PerformanceMetrics::new()),
        }
    }

    fn bump(&self, queue: &str, update: impl FnOnce(&mut QueueMetrics)) {
        let mut metrics = self.queue_metrics.write();
        update(metrics.entry(queue.to_string()).or_default());
    }

    pub fn increment_jobs_added(&self, queue: &str) {
        self.jobs_added.fetch_add(1, Ordering::Relaxed);
        self.bump(queue, |m| m.added += 1);
    }

    pub fn increment_jobs_claimed(&self, queue: &str) {
        self.jobs_claimed.fetch_add(1, Ordering::Relaxed);
        self.bump(queue, |m| m.claimed += 1);
    }

    pub fn increment_jobs_completed(&self, queue: &str) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
        self.bump(queue, |m| m.completed += 1);
    }

    pub fn increment_jobs_failed(&self, queue: &str) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        self.bump(queue, |m| m.failed += 1);
    }

    pub fn increment_jobs_retried(&self, queue: &str) {
        self.jobs_retried.fetch_add(1, Ordering::Relaxed);
        self.bump(queue, |m| m.retried += 1);
    }

    pub fn increment_jobs_stalled(&self, queue: &str) {
        self.jobs_stalled.fetch_add(1, Ordering::Relaxed);
        self.bump(queue, |m| m.stalled += 1);
    }

    /// A stalled job ran out of stall allowance; it counts as failed too
    pub fn increment_jobs_stall_failed(&self, queue: &str) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        self.jobs_stall_failed.fetch_add(1, Ordering::Relaxed);
        self.bump(queue, |m| {
            m.failed += 1;
            m.stall_failed += 1;
        });
    }

    // Getters for global metrics
    pub fn jobs_added(&self) -> u64 {
        self.jobs_added.load(Ordering::Relaxed)
    }

    pub fn jobs_claimed(&self) -> u64 {
        self.jobs_claimed.load(Ordering::Relaxed)
    }

    pub fn jobs_completed(&self) -> u64 {
        self.jobs_completed.load(Ordering::Relaxed)
    }

    pub fn jobs_failed(&self) -> u64 {
        self.jobs_failed.load(Ordering::Relaxed)
    }

    pub fn jobs_retried(&self) -> u64 {
        self.jobs_retried.load(Ordering::Relaxed)
    }

    pub fn jobs_stalled(&self) -> u64 {
        self.jobs_stalled.load(Ordering::Relaxed)
    }

    pub fn jobs_stall_failed(&self) -> u64 {
        self.jobs_stall_failed.load(Ordering::Relaxed)
    }

    /// Get metrics for a specific queue
    pub fn queue_metrics(&self, queue: &str) -> Option<QueueMetrics> {
        self.queue_metrics.read().get(queue).cloned()
    }

    /// Get metrics of every queue seen so far
    pub fn all_queue_metrics(&self) -> HashMap<String, QueueMetrics> {
        self.queue_metrics.read().clone()
    }

    /// Record how long a handler ran
    pub fn record_processing_time(&self, queue: &str, duration: Duration) {
        self.performance.write().record_processing_time(queue, duration);
    }

    pub fn performance_metrics(&self) -> PerformanceMetrics {
        self.performance.read().clone()
    }

    pub fn global(&self) -> GlobalMetrics {
        GlobalMetrics {
            jobs_added: self.jobs_added(),
            jobs_claimed: self.jobs_claimed(),
            jobs_completed: self.jobs_completed(),
            jobs_failed: self.jobs_failed(),
            jobs_retried: self.jobs_retried(),
            jobs_stalled: self.jobs_stalled(),
            jobs_stall_failed: self.jobs_stall_failed(),
        }
    }
}

impl Default for LiveMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters of one queue
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueMetrics {
    pub added: u64,
    pub claimed: u64,
    pub completed: u64,
    pub failed: u64,
    pub retried: u64,
    pub stalled: u64,

    /// Stalls that failed the job; included in `failed`
    pub stall_failed: u64,
}

impl QueueMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calculate success rate as percentage
    pub fn success_rate(&self) -> f64 {
        let total_processed = self.completed + self.failed;
        if total_processed == 0 {
            100.0
        } else {
            (self.completed as f64 / total_processed as f64) * 100.0
        }
    }

    /// Calculate retry rate as percentage of claims
    pub fn retry_rate(&self) -> f64 {
        if self.claimed == 0 {
            0.0
        } else {
            (self.retried as f64 / self.claimed as f64) * 100.0
        }
    }

    /// Claims that have not reached an outcome yet
    pub fn in_progress(&self) -> u64 {
        in_progress(self.claimed, self.completed, self.failed, self.retried, self.stalled, self.stall_failed)
    }
}

/// Every claim closes exactly once: by the worker, or by the stall monitor
fn in_progress(claimed: u64, completed: u64, failed: u64, retried: u64, stalled: u64, stall_failed: u64) -> u64 {
    let closed = completed + failed.saturating_sub(stall_failed) + retried + stalled;
    claimed.saturating_sub(closed)
}

/// Handler processing times per queue
#[derive(Debug, Clone)]
pub struct PerformanceMetrics {
    processing_times: HashMap<String, Vec<Duration>>,
    last_updated: DateTime<Utc>,
}

impl PerformanceMetrics {
    pub fn new() -> Self {
        Self {
            processing_times: HashMap::new(),
            last_updated: Utc::now(),
        }
    }

    pub fn record_processing_time(&mut self, queue: &str, duration: Duration) {
        let times = self.processing_times.entry(queue.to_string()).or_default();
        times.push(duration);

        if times.len() > MAX_SAMPLES {
            times.remove(0);
        }

        self.last_updated = Utc::now();
    }

    pub fn average_processing_time(&self, queue: &str) -> Option<Duration> {
        let times = self.processing_times.get(queue)?;
        if times.is_empty() {
            return None;
        }

        let total_ms: i64 = times.iter().map(|d| d.num_milliseconds()).sum();
        Some(Duration::milliseconds(total_ms / times.len() as i64))
    }

    pub fn percentile_processing_time(&self, queue: &str, percentile: f64) -> Option<Duration> {
        let times = self.processing_times.get(queue)?;
        if times.is_empty() {
            return None;
        }

        let mut sorted_times = times.clone();
        sorted_times.sort_by_key(|d| d.num_milliseconds());

        let index = ((percentile / 100.0) * (sorted_times.len() - 1) as f64).round() as usize;
        sorted_times.get(index).cloned()
    }

    pub fn queues(&self) -> Vec<String> {
        self.processing_times.keys().cloned().collect()
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Totals across every queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalMetrics {
    pub jobs_added: u64,
    pub jobs_claimed: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_retried: u64,
    pub jobs_stalled: u64,
    pub jobs_stall_failed: u64,
}

impl GlobalMetrics {
    pub fn success_rate(&self) -> f64 {
        let total_processed = self.jobs_completed + self.jobs_failed;
        if total_processed == 0 {
            100.0
        } else {
            (self.jobs_completed as f64 / total_processed as f64) * 100.0
        }
    }

    /// Claims that have not reached an outcome yet
    pub fn jobs_in_progress(&self) -> u64 {
        in_progress(
            self.jobs_claimed,
            self.jobs_completed,
            self.jobs_failed,
            self.jobs_retried,
            self.jobs_stalled,
            self.jobs_stall_failed,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_metrics() {
        let metrics = LiveMetrics::new();

        metrics.increment_jobs_added("emails");
        metrics.increment_jobs_claimed("emails");
        metrics.increment_jobs_completed("emails");
        metrics.increment_jobs_added("reports");

        assert_eq!(metrics.jobs_added(), 2);
        assert_eq!(metrics.jobs_completed(), 1);

        let emails = metrics.queue_metrics("emails").unwrap();
        assert_eq!(emails.added, 1);
        assert_eq!(emails.completed, 1);
        assert_eq!(emails.success_rate(), 100.0);
        assert!(metrics.queue_metrics("unknown").is_none());
    }

    #[test]
    fn test_performance_metrics() {
        let mut perf = PerformanceMetrics::new();

        perf.record_processing_time("emails", Duration::milliseconds(100));
        perf.record_processing_time("emails", Duration::milliseconds(200));
        perf.record_processing_time("emails", Duration::milliseconds(300));

        assert_eq!(perf.average_processing_time("emails").unwrap().num_milliseconds(), 200);
        assert_eq!(perf.percentile_processing_time("emails", 50.0).unwrap().num_milliseconds(), 200);
        assert_eq!(perf.percentile_processing_time("emails", 100.0).unwrap().num_milliseconds(), 300);
        assert!(perf.average_processing_time("reports").is_none());
    }

    #[test]
    fn test_global_metrics() {
        let global = GlobalMetrics {
            jobs_added: 100,
            jobs_claimed: 95,
            jobs_completed: 80,
            jobs_failed: 10,
            jobs_retried: 2,
            jobs_stalled: 1,
            jobs_stall_failed: 0,
        };

        assert_eq!(global.success_rate(), 88.88888888888889);
        assert_eq!(global.jobs_in_progress(), 2);
    }

    #[test]
    fn test_stalled_then_failed_closes_one_claim() {
        let metrics = LiveMetrics::new();

        // One job stalls back to waiting, is claimed again, then stalls out
        metrics.increment_jobs_claimed("emails");
        metrics.increment_jobs_stalled("emails");
        metrics.increment_jobs_claimed("emails");
        metrics.increment_jobs_stalled("emails");
        metrics.increment_jobs_stall_failed("emails");

        // A second job is still running
        metrics.increment_jobs_claimed("emails");

        let global = metrics.global();
        assert_eq!(global.jobs_failed, 1);
        assert_eq!(global.jobs_in_progress(), 1);
        assert_eq!(metrics.queue_metrics("emails").unwrap().in_progress(), 1);
    }
}
