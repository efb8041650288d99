//! Queue properties checked against a live Redis.
//!
//! Set `DOG_JOBS_REDIS_URL` (for example `redis://127.0.0.1:6379`) to run
//! them; without it every test returns early. Each test writes under its own
//! key prefix and deletes its keys when done.
#![cfg(feature = "redis")]

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use dog_jobs::{
    backend::{ClaimOutcome, ClaimRequest, QueueBackend},
    handler_fn, Backoff, Clock, JobContext, JobError, JobOptions, JobState, ManualClock, NewJob, Payload, Processed,
    Queue, QueueEngine, QueueError, QueueOptions, RedisBackend, RepeatSchedule, RepeatableDefinition,
    SchedulerOptions, StallMonitorOptions,
};
use uuid::Uuid;

const QUEUE: &str = "conformance";

fn start() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

struct Harness {
    url: String,
    prefix: String,
    backend: RedisBackend,
    clock: Arc<ManualClock>,
    queue: Queue,
}

impl Harness {
    async fn new(options: QueueOptions) -> Option<Self> {
        let Ok(url) = std::env::var("DOG_JOBS_REDIS_URL") else {
            eprintln!("DOG_JOBS_REDIS_URL not set, skipping");
            return None;
        };
        let prefix = format!("dogtest-{}", Uuid::new_v4().simple());
        let backend = RedisBackend::connect_with_prefix(&url, &prefix).await.unwrap();
        let clock = Arc::new(ManualClock::new(start()));
        let engine = QueueEngine::new(backend.clone()).with_clock(clock.clone());
        let queue = engine.queue(QUEUE, options).unwrap();
        Some(Self { url, prefix, backend, clock, queue })
    }

    async fn connection(&self) -> redis::aio::MultiplexedConnection {
        let client = redis::Client::open(self.url.as_str()).unwrap();
        client.get_multiplexed_async_connection().await.unwrap()
    }

    async fn cleanup(self) {
        let mut conn = self.connection().await;
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(format!("{}:*", self.prefix))
            .query_async(&mut conn)
            .await
            .unwrap();
        if !keys.is_empty() {
            let _: () = redis::cmd("DEL").arg(keys).query_async(&mut conn).await.unwrap();
        }
    }

    async fn claim(&self, request: ClaimRequest) -> ClaimOutcome {
        self.backend.claim(QUEUE, request, self.clock.now()).await.unwrap()
    }

    async fn claimed_id(&self) -> Option<dog_jobs::JobId> {
        match self.claim(lease(30)).await {
            ClaimOutcome::Claimed(leased) => Some(leased.record.id),
            _ => None,
        }
    }
}

fn lease(secs: u64) -> ClaimRequest {
    ClaimRequest { lease: Duration::from_secs(secs), rate_limit: None }
}

/// Concurrent claims of a single job grant exactly one lease
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_at_most_one_claim() {
    let Some(h) = Harness::new(QueueOptions::default()).await else {
        return;
    };
    let now = Utc::now();
    let job = NewJob::from_options(QUEUE, Payload::default(), &JobOptions::new(), now).unwrap();
    h.backend.add(job, now).await.unwrap();

    let claims = (0..50).map(|_| {
        let backend = h.backend.clone();
        tokio::spawn(async move { backend.claim(QUEUE, lease(30), Utc::now()).await.unwrap() })
    });

    let mut claimed = 0;
    for handle in claims {
        if let ClaimOutcome::Claimed(_) = handle.await.unwrap() {
            claimed += 1;
        }
    }
    assert_eq!(claimed, 1);

    let counts = h.backend.counts(QUEUE).await.unwrap();
    assert_eq!(counts.active, 1);
    assert_eq!(counts.waiting, 0);
    h.cleanup().await;
}

/// Lower priority value first, FIFO within a priority
#[tokio::test]
async fn test_priority_then_fifo() {
    let Some(h) = Harness::new(QueueOptions::default()).await else {
        return;
    };
    let queue = &h.queue;

    let low_a = queue.add(Payload::default(), JobOptions::new().with_priority(5)).await.unwrap();
    let high = queue.add(Payload::default(), JobOptions::new().with_priority(1)).await.unwrap();
    let low_b = queue.add(Payload::default(), JobOptions::new().with_priority(5)).await.unwrap();
    let default = queue.add(Payload::default(), JobOptions::new()).await.unwrap();

    let mut order = Vec::new();
    while let Some(id) = h.claimed_id().await {
        order.push(id);
    }
    assert_eq!(order, vec![default, high, low_a, low_b]);
    h.cleanup().await;
}

/// Exponential backoff doubles between attempts and ends in failed
#[tokio::test]
async fn test_backoff_growth() {
    let Some(h) = Harness::new(QueueOptions::default()).await else {
        return;
    };
    let (clock, queue) = (&h.clock, &h.queue);
    let id = queue
        .add(
            Payload::default(),
            JobOptions::new()
                .with_max_attempts(3)
                .with_backoff(Backoff::exponential(Duration::from_millis(1000))),
        )
        .await
        .unwrap();

    let worker = queue.worker(handler_fn(|_ctx: JobContext| async move {
        Err::<serde_json::Value, _>(JobError::retryable("always"))
    }));
    let scheduler = queue.scheduler(SchedulerOptions::default());

    let mut delays = Vec::new();
    for _ in 0..2 {
        let failed_at = clock.now();
        assert_eq!(worker.process_next().await.unwrap(), Processed::Retrying(id.clone()));

        let job = queue.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::RetryWait);
        let due = job.delay_until.unwrap();
        delays.push((due - failed_at).num_milliseconds());

        clock.set(due - chrono::Duration::milliseconds(1));
        assert_eq!(scheduler.tick().await.unwrap().promoted, 0);
        assert_eq!(worker.process_next().await.unwrap(), Processed::Empty);

        clock.set(due);
        assert_eq!(scheduler.tick().await.unwrap().promoted, 1);
    }
    assert_eq!(delays, vec![1000, 2000]);

    assert_eq!(worker.process_next().await.unwrap(), Processed::Failed(id.clone()));
    let job = queue.get_job(&id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempts_made, 3);
    assert_eq!(job.attempts_started, 3);
    h.cleanup().await;
}

/// A delayed job is never claimable before its delay elapses
#[tokio::test]
async fn test_delay_honored() {
    let Some(h) = Harness::new(QueueOptions::default()).await else {
        return;
    };
    let id = h
        .queue
        .add(Payload::default(), JobOptions::new().with_delay(Duration::from_millis(5000)))
        .await
        .unwrap();
    let scheduler = h.queue.scheduler(SchedulerOptions::default());

    h.clock.advance(Duration::from_millis(4999));
    scheduler.tick().await.unwrap();
    assert_eq!(h.claimed_id().await, None);
    assert_eq!(h.queue.get_job(&id).await.unwrap().unwrap().state, JobState::Delayed);

    h.clock.advance(Duration::from_millis(1));
    assert_eq!(scheduler.tick().await.unwrap().promoted, 1);
    assert_eq!(h.claimed_id().await, Some(id));
    h.cleanup().await;
}

/// An unrenewed claim becomes claimable again, then fails past the stall allowance
#[tokio::test]
async fn test_stall_recovery() {
    let Some(h) = Harness::new(QueueOptions::default().with_max_stalled_count(1)).await else {
        return;
    };
    let id = h.queue.add(Payload::default(), JobOptions::new()).await.unwrap();
    let monitor = h.queue.stall_monitor(StallMonitorOptions::default());

    let ClaimOutcome::Claimed(first) = h.claim(lease(1)).await else {
        panic!("expected a claim");
    };
    assert!(monitor.tick().await.unwrap().is_empty());
    assert_eq!(h.claimed_id().await, None);

    h.clock.advance(Duration::from_secs(2));
    let recovered = monitor.tick().await.unwrap();
    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[0].stalled_count, 1);
    assert_eq!(recovered[0].state, JobState::Waiting);

    let ClaimOutcome::Claimed(second) = h.claim(lease(1)).await else {
        panic!("expected a second claim");
    };
    assert_eq!(second.record.id, id);
    assert_ne!(second.token, first.token);
    assert_eq!(second.record.stalled_count, 1);

    let late = h
        .backend
        .complete(QUEUE, &id, &first.token, serde_json::Value::Null, &Default::default(), h.clock.now())
        .await;
    assert!(matches!(late, Err(QueueError::LockMismatch(_))));

    h.clock.advance(Duration::from_secs(2));
    let recovered = monitor.tick().await.unwrap();
    assert_eq!(recovered[0].state, JobState::Failed);
    let job = h.queue.get_job(&id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.failed_reason.as_deref(), Some(dog_jobs::backend::STALLED_REASON));
    h.cleanup().await;
}

/// Claims beyond the window limit are refused until the window expires.
///
/// The window lives in Redis' own clock, so this test waits in real time.
#[tokio::test]
async fn test_rate_limiting() {
    let Some(h) = Harness::new(QueueOptions::default().with_rate_limit(5, Duration::from_millis(500))).await else {
        return;
    };
    for _ in 0..10 {
        h.queue.add(Payload::default(), JobOptions::new()).await.unwrap();
    }
    let request = ClaimRequest {
        lease: Duration::from_secs(30),
        rate_limit: h.queue.options().rate_limit,
    };

    let mut first_window = 0;
    loop {
        match h.claim(request).await {
            ClaimOutcome::Claimed(_) => first_window += 1,
            ClaimOutcome::RateLimited { retry_after } => {
                assert!(retry_after > Duration::ZERO && retry_after <= Duration::from_millis(500));
                break;
            }
            ClaimOutcome::Empty => panic!("queue drained early"),
        }
    }
    assert_eq!(first_window, 5);

    tokio::time::sleep(Duration::from_millis(600)).await;
    let mut second_window = 0;
    while let ClaimOutcome::Claimed(_) = h.claim(request).await {
        second_window += 1;
    }
    assert_eq!(second_window, 5);
    assert_eq!(h.queue.counts().await.unwrap().waiting, 0);
    h.cleanup().await;
}

/// Concurrent schedulers materialize each occurrence once
#[tokio::test]
async fn test_repeatable_idempotency() {
    let Some(h) = Harness::new(QueueOptions::default()).await else {
        return;
    };
    let definition = RepeatableDefinition::new(
        "digest",
        RepeatSchedule::every(Duration::from_secs(60)),
        Payload::json(&serde_json::json!({"kind": "daily"})).unwrap(),
    )
    .with_created_at(start());

    assert!(h.queue.schedule(definition.clone()).await.unwrap());
    assert!(!h.queue.schedule(definition).await.unwrap());

    let schedulers: Vec<_> = (0..3).map(|_| h.queue.scheduler(SchedulerOptions::default())).collect();
    for _ in 0..37 {
        h.clock.advance(Duration::from_secs(5));
        let (a, b, c) = tokio::join!(schedulers[0].tick(), schedulers[1].tick(), schedulers[2].tick());
        a.unwrap();
        b.unwrap();
        c.unwrap();
    }

    let waiting = h.queue.list_jobs(JobState::Waiting, 100).await.unwrap();
    let ids: Vec<String> = waiting.iter().map(|job| job.id.to_string()).collect();
    assert_eq!(ids.len(), 3);
    for (n, id) in ids.iter().enumerate() {
        let fire_at = start() + chrono::Duration::seconds(60 * (n as i64 + 1));
        assert_eq!(id, &format!("repeat:digest:{}", fire_at.timestamp_millis()));
    }

    let stored = h.queue.repeatables().await.unwrap();
    assert_eq!(stored[0].materialized, 3);
    assert_eq!(stored[0].definition.created_at, Some(start()));
    h.cleanup().await;
}

/// Adds are refused once the insertion sequence would reach the priority bits
#[tokio::test]
async fn test_sequence_exhaustion_rejects_adds() {
    let Some(h) = Harness::new(QueueOptions::default()).await else {
        return;
    };
    let mut conn = h.connection().await;
    let seq_key = format!("{}:{{{}}}:seq", h.prefix, QUEUE);
    let _: () = redis::cmd("SET")
        .arg(&seq_key)
        .arg(u32::MAX as u64 - 1)
        .query_async(&mut conn)
        .await
        .unwrap();

    let last = h.queue.add(Payload::default(), JobOptions::new().with_priority(0)).await.unwrap();
    let refused = h.queue.add(Payload::default(), JobOptions::new()).await;
    assert!(matches!(refused, Err(QueueError::SequenceExhausted(ref queue)) if queue == QUEUE));

    // The last accepted job keeps its place; nothing spilled into another tier
    assert_eq!(h.queue.counts().await.unwrap().waiting, 1);
    assert_eq!(h.claimed_id().await, Some(last));
    h.cleanup().await;
}
