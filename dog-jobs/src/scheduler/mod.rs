//! Promotion of due delayed jobs and expansion of repeatable definitions.
//!
//! Every step is an atomic store operation, so any number of schedulers may
//! tick the same queue concurrently.

pub mod repeat;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::{config::SchedulerOptions, queue::Queue, EventKind, JobEvent, JobId, QueueResult};

/// What one scheduler tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerTick {
    /// Delayed and retry-wait jobs moved to waiting
    pub promoted: usize,

    /// Repeatable occurrences inserted by this tick
    pub materialized: Vec<JobId>,
}

pub struct Scheduler {
    queue: Queue,
    options: SchedulerOptions,
}

impl Scheduler {
    pub(crate) fn new(queue: Queue, options: SchedulerOptions) -> Self {
        Self { queue, options }
    }

    /// Run one promotion and expansion pass
    #[instrument(skip(self), fields(queue = %self.queue.name()))]
    pub async fn tick(&self) -> QueueResult<SchedulerTick> {
        let engine = self.queue.engine();
        let queue = self.queue.name();
        let now = engine.now();

        let promoted = engine
            .backend()
            .promote_delayed(queue, now, self.options.promote_batch)
            .await?;
        for job in &promoted {
            let event = JobEvent::new(queue, job.id.clone(), EventKind::Waiting, now)
                .with_payload(serde_json::json!({ "from": job.from }));
            engine.publish(event).await;
        }

        let mut materialized = Vec::new();
        for state in engine.backend().repeatables(queue).await? {
            if state.exhausted() {
                continue;
            }
            let definition = &state.definition;
            let due = match state.due_fire_times(now, self.options.max_catch_up) {
                Ok(due) => due,
                Err(e) => {
                    warn!(repeatable = %definition.name, "Skipping repeatable: {}", e);
                    continue;
                }
            };

            for fire_at in due {
                match engine
                    .backend()
                    .materialize_occurrence(definition, fire_at, now)
                    .await?
                {
                    Some(id) => {
                        engine.metrics().increment_jobs_added(queue);
                        let event = JobEvent::new(queue, id.clone(), EventKind::Waiting, now).with_payload(
                            serde_json::json!({ "repeat_key": definition.name, "fire_at": fire_at }),
                        );
                        engine.publish(event).await;
                        materialized.push(id);
                    }
                    None => debug!(repeatable = %definition.name, %fire_at, "Occurrence already materialized"),
                }
            }
        }

        if !promoted.is_empty() || !materialized.is_empty() {
            debug!(promoted = promoted.len(), materialized = materialized.len(), "Scheduler tick");
        }
        Ok(SchedulerTick {
            promoted: promoted.len(),
            materialized,
        })
    }

    /// Tick every `interval` forever; errors are logged and retried next tick
    pub async fn run(self) {
        let mut ticker = interval(self.options.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(queue = %self.queue.name(), "Starting scheduler with interval: {:?}", self.options.interval);

        loop {
            ticker.tick().await;

            if let Err(e) = self.tick().await {
                warn!(queue = %self.queue.name(), "Error during scheduler tick: {}", e);
            }
        }
    }

    /// Run on a background task; abort the handle to stop
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("queue", &self.queue.name())
            .field("options", &self.options)
            .finish()
    }
}
