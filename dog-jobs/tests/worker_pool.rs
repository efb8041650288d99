use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dog_jobs::prelude::*;
use dog_jobs::JobCounts;
use futures::StreamExt;
use tokio::time::timeout;

fn fast_worker_options() -> WorkerOptions {
    WorkerOptions::new()
        .with_lease_duration(Duration::from_secs(5))
        .with_poll_interval(Duration::from_millis(10), Duration::from_millis(50))
}

fn queue(name: &str, options: QueueOptions) -> Queue {
    QueueEngine::new(MemoryBackend::new()).queue(name, options).unwrap()
}

async fn wait_for_counts(queue: &Queue, done: impl Fn(&JobCounts) -> bool) -> JobCounts {
    timeout(Duration::from_secs(10), async {
        loop {
            let counts = queue.counts().await.unwrap();
            if done(&counts) {
                return counts;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("queue did not settle in time")
}

/// Every job completes and running jobs never exceed the pool size
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pool_respects_concurrency() {
    let queue = queue("pool", QueueOptions::default().with_concurrency(4));
    for n in 0..20 {
        queue.add_json(&n, JobOptions::new()).await.unwrap();
    }

    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let handler = {
        let running = running.clone();
        let peak = peak.clone();
        handler_fn(move |ctx: JobContext| {
            let running = running.clone();
            let peak = peak.clone();
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                let n: u32 = ctx.decode_json()?;
                Ok::<_, JobError>(serde_json::json!(n * 2))
            }
        })
    };

    let handle = queue.worker_with(handler, fast_worker_options()).unwrap().start();
    let counts = wait_for_counts(&queue, |c| c.completed == 20).await;
    handle.shutdown().await.unwrap();

    assert_eq!(counts.waiting + counts.active + counts.failed, 0);
    let peak = peak.load(Ordering::SeqCst);
    assert!(peak <= 4, "peak concurrency {}", peak);
    assert!(peak > 1, "pool never ran jobs in parallel");
    assert_eq!(queue.engine().metrics().jobs_completed(), 20);
}

/// An idle pool picks up a job as soon as it is added
#[tokio::test]
async fn test_idle_pool_wakes_on_add() {
    let queue = queue("wake", QueueOptions::default());
    let options = WorkerOptions::new().with_poll_interval(Duration::from_secs(2), Duration::from_secs(5));
    let handle = queue
        .worker_with(handler_fn(|_ctx: JobContext| async move { Ok::<_, JobError>(serde_json::json!("done")) }), options)
        .unwrap()
        .start();

    // Let every slot go idle on an empty queue
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut events = queue.events().await.unwrap();
    let id = queue.add(Payload::default(), JobOptions::new()).await.unwrap();

    let completed = timeout(Duration::from_secs(1), async {
        while let Some(event) = events.next().await {
            if event.kind == EventKind::Completed {
                return event;
            }
        }
        panic!("event stream closed");
    })
    .await
    .expect("job was not picked up before the idle poll");

    assert_eq!(completed.job_id, id);
    assert_eq!(completed.payload, serde_json::json!("done"));
    handle.shutdown().await.unwrap();
}

/// A registry routes each job to the handler registered under its name
#[tokio::test]
async fn test_registry_dispatch_through_pool() {
    let queue = queue("mixed", QueueOptions::default().with_concurrency(2));
    let registry = JobRegistry::new()
        .with(
            "double",
            handler_fn(|ctx: JobContext| async move {
                let n: i64 = ctx.decode_json()?;
                Ok::<_, JobError>(serde_json::json!(n * 2))
            }),
        )
        .unwrap()
        .with(
            "negate",
            handler_fn(|ctx: JobContext| async move {
                let n: i64 = ctx.decode_json()?;
                Ok::<_, JobError>(serde_json::json!(-n))
            }),
        )
        .unwrap();

    let doubled = queue.add_json(&21, JobOptions::new().with_name("double")).await.unwrap();
    let negated = queue.add_json(&7, JobOptions::new().with_name("negate")).await.unwrap();
    let unknown = queue
        .add_json(&1, JobOptions::new().with_name("missing").with_max_attempts(3))
        .await
        .unwrap();

    let handle = queue.worker_with(registry, fast_worker_options()).unwrap().start();
    wait_for_counts(&queue, |c| c.completed == 2 && c.failed == 1).await;
    handle.shutdown().await.unwrap();

    let doubled = queue.get_job(&doubled).await.unwrap().unwrap();
    assert_eq!(doubled.return_value, Some(serde_json::json!(42)));
    let negated = queue.get_job(&negated).await.unwrap().unwrap();
    assert_eq!(negated.return_value, Some(serde_json::json!(-7)));

    // An unregistered name can never succeed, so no retries are spent
    let unknown = queue.get_job(&unknown).await.unwrap().unwrap();
    assert_eq!(unknown.state, JobState::Failed);
    assert_eq!(unknown.attempts_made, 1);
}

/// Shutdown signals running jobs and waits for them to settle
#[tokio::test]
async fn test_shutdown_waits_for_running_job() {
    let queue = queue("drain", QueueOptions::default());
    let id = queue.add(Payload::default(), JobOptions::new()).await.unwrap();

    let started = Arc::new(tokio::sync::Notify::new());
    let handler = {
        let started = started.clone();
        handler_fn(move |ctx: JobContext| {
            let started = started.clone();
            async move {
                started.notify_one();
                while !ctx.is_cancelled() {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                Ok::<_, JobError>(serde_json::json!("stopped cleanly"))
            }
        })
    };

    let handle = queue.worker_with(handler, fast_worker_options()).unwrap().start();
    timeout(Duration::from_secs(5), started.notified()).await.unwrap();
    assert_eq!(handle.in_flight(), 1);

    timeout(Duration::from_secs(5), handle.shutdown()).await.unwrap().unwrap();

    let job = queue.get_job(&id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.return_value, Some(serde_json::json!("stopped cleanly")));
}

/// A shared rate limit caps claims across pools on the same queue
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rate_limit_shared_across_pools() {
    let queue = queue(
        "limited",
        QueueOptions::default()
            .with_concurrency(2)
            .with_rate_limit(3, Duration::from_secs(30)),
    );
    for _ in 0..10 {
        queue.add(Payload::default(), JobOptions::new()).await.unwrap();
    }

    let handler = || handler_fn(|_ctx: JobContext| async move { Ok::<_, JobError>(serde_json::Value::Null) });
    let first = queue.worker_with(handler(), fast_worker_options()).unwrap().start();
    let second = queue.worker_with(handler(), fast_worker_options()).unwrap().start();

    wait_for_counts(&queue, |c| c.completed == 3).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let counts = queue.counts().await.unwrap();
    assert_eq!(counts.completed, 3);
    assert_eq!(counts.waiting, 7);

    first.shutdown().await.unwrap();
    second.shutdown().await.unwrap();
}

/// Event callbacks fire for the kinds they registered
#[tokio::test]
async fn test_event_callbacks() {
    let queue = queue("observed", QueueOptions::default());
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let subscriptions: Vec<_> = {
        let mut subscriptions = Vec::new();
        for kind in [EventKind::Active, EventKind::Completed] {
            let seen = seen.clone();
            subscriptions.push(
                queue
                    .on(kind, move |event: JobEvent| seen.lock().push((event.kind, event.job_id)))
                    .await
                    .unwrap(),
            );
        }
        subscriptions
    };

    let id = queue.add(Payload::default(), JobOptions::new()).await.unwrap();
    let worker = queue.worker(handler_fn(|_ctx: JobContext| async move { Ok::<_, JobError>(serde_json::Value::Null) }));
    assert!(matches!(worker.process_next().await.unwrap(), dog_jobs::Processed::Completed(_)));

    timeout(Duration::from_secs(1), async {
        while seen.lock().len() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let seen = seen.lock().clone();
    assert_eq!(seen.len(), 2);
    assert!(seen.contains(&(EventKind::Active, id.clone())));
    assert!(seen.contains(&(EventKind::Completed, id)));
    drop(subscriptions);
}
