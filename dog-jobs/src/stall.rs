use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::{
    backend::{StalledJob, STALLED_REASON},
    config::StallMonitorOptions,
    queue::Queue,
    EventKind, JobEvent, JobState, QueueResult,
};

/// Reclaims active jobs whose lease lapsed.
///
/// A reclaimed job goes back to waiting, keeping its place in its priority
/// tier, until it has stalled more than `max_stalled_count` times; then it
/// fails. Stalls do not consume attempts.
pub struct StallMonitor {
    queue: Queue,
    options: StallMonitorOptions,
}

impl StallMonitor {
    pub(crate) fn new(queue: Queue, options: StallMonitorOptions) -> Self {
        Self { queue, options }
    }

    /// Run one recovery pass
    #[instrument(skip(self), fields(queue = %self.queue.name()))]
    pub async fn tick(&self) -> QueueResult<Vec<StalledJob>> {
        let engine = self.queue.engine();
        let queue = self.queue.name();
        let options = self.queue.options();
        let now = engine.now();

        let recovered = engine
            .backend()
            .recover_stalled(queue, options.max_stalled_count, &options.keep_failed, now, self.options.batch)
            .await?;

        for job in &recovered {
            engine.metrics().increment_jobs_stalled(queue);
            let stalled = JobEvent::new(queue, job.id.clone(), EventKind::Stalled, now)
                .with_payload(serde_json::json!({ "stalled_count": job.stalled_count }));
            engine.publish(stalled).await;

            if job.state == JobState::Failed {
                engine.metrics().increment_jobs_stall_failed(queue);
                let failed = JobEvent::new(queue, job.id.clone(), EventKind::Failed, now)
                    .with_payload(serde_json::json!({ "reason": STALLED_REASON }));
                engine.publish(failed).await;
                warn!(job_id = %job.id, stalled_count = job.stalled_count, "Stalled job failed");
            } else {
                engine
                    .publish(JobEvent::new(queue, job.id.clone(), EventKind::Waiting, now))
                    .await;
                debug!(job_id = %job.id, stalled_count = job.stalled_count, "Reclaimed stalled job");
            }
        }

        Ok(recovered)
    }

    /// Check every `interval` forever; errors are logged and retried next check
    pub async fn run(self) {
        let mut ticker = interval(self.options.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(queue = %self.queue.name(), "Starting stall monitor with interval: {:?}", self.options.interval);

        loop {
            ticker.tick().await;

            match self.tick().await {
                Ok(recovered) if !recovered.is_empty() => {
                    info!(queue = %self.queue.name(), "Reclaimed {} stalled jobs", recovered.len());
                }
                Ok(_) => debug!(queue = %self.queue.name(), "No stalled jobs found"),
                Err(e) => warn!(queue = %self.queue.name(), "Error during stall check: {}", e),
            }
        }
    }

    /// Run on a background task; abort the handle to stop
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

impl std::fmt::Debug for StallMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StallMonitor")
            .field("queue", &self.queue.name())
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::{
        backend::{memory::MemoryBackend, ClaimRequest},
        clock::{Clock, ManualClock},
        codec::Payload,
        config::QueueOptions,
        engine::QueueEngine,
        JobOptions,
    };
    use futures::StreamExt;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_stall_emits_stalled_then_failed() {
        let clock = Arc::new(ManualClock::starting_now());
        let engine = QueueEngine::new(MemoryBackend::new()).with_clock(clock.clone());
        let queue = engine
            .queue("tests", QueueOptions::default().with_max_stalled_count(0))
            .unwrap();
        let id = queue.add(Payload::default(), JobOptions::new()).await.unwrap();
        let mut events = queue.events().await.unwrap();

        let request = ClaimRequest { lease: Duration::from_secs(5), rate_limit: None };
        engine.backend().claim("tests", request, clock.now()).await.unwrap();

        let monitor = queue.stall_monitor(StallMonitorOptions::default());
        assert!(monitor.tick().await.unwrap().is_empty());

        clock.advance(Duration::from_secs(6));
        let recovered = monitor.tick().await.unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].state, JobState::Failed);

        assert_eq!(events.next().await.unwrap().kind, EventKind::Stalled);
        let failed = events.next().await.unwrap();
        assert_eq!(failed.kind, EventKind::Failed);
        assert_eq!(failed.job_id, id);

        let job = queue.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.failed_reason.as_deref(), Some(STALLED_REASON));
        assert_eq!(job.attempts_made, 0);
    }
}
