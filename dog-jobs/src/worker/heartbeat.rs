use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::{engine::QueueEngine, JobId, LockToken, QueueError};

/// Renews the lock of one active job until stopped.
///
/// Losing the lock ends the keeper; transient store errors are logged and
/// retried on the next tick, and the lease lapses for the stall monitor if
/// they persist.
pub(crate) struct LeaseKeeper {
    handle: JoinHandle<()>,
}

impl LeaseKeeper {
    pub fn start(
        engine: QueueEngine,
        queue: String,
        id: JobId,
        token: LockToken,
        lease: Duration,
        every: Duration,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;

                match engine
                    .backend()
                    .extend_lock(&queue, &id, &token, lease, engine.now())
                    .await
                {
                    Ok(expires_at) => debug!(job_id = %id, %expires_at, "Lease renewed"),
                    Err(QueueError::LockMismatch(_)) | Err(QueueError::JobNotFound(_)) => {
                        warn!(job_id = %id, "Lease lost, stopping renewal");
                        break;
                    }
                    Err(e) => warn!(job_id = %id, "Failed to renew lease: {}", e),
                }
            }
        });

        Self { handle }
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for LeaseKeeper {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::{
        backend::{memory::MemoryBackend, ClaimOutcome, ClaimRequest, QueueBackend},
        codec::Payload,
        JobOptions, NewJob,
    };

    #[tokio::test(start_paused = true)]
    async fn test_keeper_extends_lock() {
        let engine = QueueEngine::new(MemoryBackend::new());
        let now = engine.now();
        let job = NewJob::from_options("tests", Payload::default(), &JobOptions::new(), now).unwrap();
        engine.backend().add(job, now).await.unwrap();

        let request = ClaimRequest { lease: Duration::from_secs(10), rate_limit: None };
        let ClaimOutcome::Claimed(leased) = engine.backend().claim("tests", request, now).await.unwrap() else {
            panic!("expected a claim");
        };
        let first_expiry = leased.lock_expires_at;

        let keeper = LeaseKeeper::start(
            engine.clone(),
            "tests".to_string(),
            leased.record.id.clone(),
            leased.token.clone(),
            Duration::from_secs(60),
            Duration::from_secs(1),
        );
        tokio::time::sleep(Duration::from_millis(1500)).await;
        keeper.stop();

        let record = engine.backend().get_job("tests", &leased.record.id).await.unwrap().unwrap();
        assert!(record.lock_expires_at.unwrap() > first_expiry);
    }
}
