//! Redis store.
//!
//! Every transition that touches more than one key runs as a single Lua
//! script, so concurrent workers, schedulers and stall monitors in different
//! processes never observe a half-applied change.

mod keys;
mod scripts;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

pub(crate) use keys::QueueKeys;

use crate::{
    backend::{AddOutcome, ClaimOutcome, ClaimRequest, FailOutcome, PromotedJob, QueueBackend, StalledJob, STALLED_REASON},
    clock,
    codec::Payload,
    config::{Retention, DEFAULT_KEY_PREFIX},
    scheduler::repeat::{RepeatableDefinition, RepeatableState},
    Backoff, JobCounts, JobId, JobRecord, JobState, LeasedJob, LockToken, NewJob, QueueError, QueueResult,
};

/// Immutable part of a job, stored as one JSON field
#[derive(Debug, Serialize, Deserialize)]
struct JobData {
    name: String,
    payload: Payload,
    backoff: Option<Backoff>,
    repeat_key: Option<String>,
}

impl JobData {
    fn encode(job: &NewJob) -> QueueResult<String> {
        Ok(serde_json::to_string(&JobData {
            name: job.name.clone(),
            payload: job.payload.clone(),
            backoff: job.backoff,
            repeat_key: job.repeat_key.clone(),
        })?)
    }
}

/// Redis-backed shared store
#[derive(Clone)]
pub struct RedisBackend {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisBackend {
    /// Connect with the default key prefix
    pub async fn connect(redis_url: &str) -> QueueResult<Self> {
        Self::connect_with_prefix(redis_url, DEFAULT_KEY_PREFIX).await
    }

    pub async fn connect_with_prefix(redis_url: &str, prefix: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        debug!(prefix, "Connected Redis queue backend");
        Ok(Self::from_connection(conn, prefix))
    }

    /// Share an existing connection manager
    pub fn from_connection(conn: ConnectionManager, prefix: &str) -> Self {
        Self { conn, prefix: prefix.to_string() }
    }

    fn keys(&self, queue: &str) -> QueueKeys {
        QueueKeys::new(&self.prefix, queue)
    }

    async fn load(&self, keys: &QueueKeys, queue: &str, id: &JobId) -> QueueResult<Option<JobRecord>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(keys.job(id))
            .query_async(&mut conn)
            .await?;
        if fields.is_empty() {
            return Ok(None);
        }
        decode_record(queue, fields).map(Some)
    }

    async fn load_many(&self, keys: &QueueKeys, queue: &str, ids: Vec<String>) -> QueueResult<Vec<JobRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut pipe = redis::pipe();
        for id in &ids {
            pipe.cmd("HGETALL").arg(keys.job(&JobId::from(id.as_str())));
        }
        let mut conn = self.conn.clone();
        let rows: Vec<HashMap<String, String>> = pipe.query_async(&mut conn).await?;
        rows.into_iter()
            .filter(|fields| !fields.is_empty())
            .map(|fields| decode_record(queue, fields))
            .collect()
    }
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend").field("prefix", &self.prefix).finish()
    }
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> QueueResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| QueueError::Backend(format!("timestamp out of range: {}", ms)))
}

fn optional_millis(at: Option<DateTime<Utc>>) -> String {
    at.map(|at| millis(at).to_string()).unwrap_or_default()
}

fn retention_args(retention: &Retention, now: DateTime<Utc>) -> (String, String) {
    (
        retention.count.map(|count| count.to_string()).unwrap_or_default(),
        optional_millis(retention.cutoff(now)),
    )
}

fn parse_field<T: std::str::FromStr>(fields: &HashMap<String, String>, name: &str) -> QueueResult<Option<T>> {
    match fields.get(name) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| QueueError::Backend(format!("malformed job field {}: {}", name, raw))),
    }
}

fn time_field(fields: &HashMap<String, String>, name: &str) -> QueueResult<Option<DateTime<Utc>>> {
    parse_field::<i64>(fields, name)?.map(from_millis).transpose()
}

fn json_field(fields: &HashMap<String, String>, name: &str) -> QueueResult<Option<serde_json::Value>> {
    fields
        .get(name)
        .map(|raw| serde_json::from_str(raw))
        .transpose()
        .map_err(Into::into)
}

fn decode_record(queue: &str, fields: HashMap<String, String>) -> QueueResult<JobRecord> {
    let data: JobData = serde_json::from_str(
        fields
            .get("data")
            .ok_or_else(|| QueueError::Backend("job hash without data".to_string()))?,
    )?;
    let state = fields
        .get("state")
        .ok_or_else(|| QueueError::Backend("job hash without state".to_string()))?
        .parse::<JobState>()
        .map_err(QueueError::Backend)?;
    let id = fields
        .get("id")
        .cloned()
        .ok_or_else(|| QueueError::Backend("job hash without id".to_string()))?;

    Ok(JobRecord {
        id: JobId::from(id),
        queue: queue.to_string(),
        name: data.name,
        payload: data.payload,
        priority: parse_field(&fields, "priority")?.unwrap_or(0),
        state,
        attempts_made: parse_field(&fields, "attempts_made")?.unwrap_or(0),
        attempts_started: parse_field(&fields, "attempts_started")?.unwrap_or(0),
        max_attempts: parse_field(&fields, "max_attempts")?.unwrap_or(1),
        backoff: data.backoff,
        delay_until: time_field(&fields, "delay_until")?,
        repeat_key: data.repeat_key,
        lock_token: fields.get("lock_token").map(|token| LockToken::from(token.as_str())),
        lock_expires_at: time_field(&fields, "lock_expires_at")?,
        stalled_count: parse_field(&fields, "stalled_count")?.unwrap_or(0),
        progress: json_field(&fields, "progress")?.unwrap_or(serde_json::Value::Null),
        created_at: time_field(&fields, "created_at")?.unwrap_or(DateTime::<Utc>::MIN_UTC),
        processed_at: time_field(&fields, "processed_at")?,
        finished_at: time_field(&fields, "finished_at")?,
        failed_reason: fields.get("failed_reason").cloned(),
        return_value: json_field(&fields, "return_value")?,
        seq: parse_field(&fields, "seq")?.unwrap_or(0),
    })
}

/// Map the lock guard's status codes
fn lock_status(code: i64, id: &JobId) -> QueueResult<i64> {
    match code {
        -1 => Err(QueueError::JobNotFound(id.to_string())),
        0 => Err(QueueError::LockMismatch(id.to_string())),
        code => Ok(code),
    }
}

fn state_of(raw: &str) -> QueueResult<JobState> {
    raw.parse().map_err(QueueError::Backend)
}

#[async_trait]
impl QueueBackend for RedisBackend {
    async fn add(&self, job: NewJob, now: DateTime<Utc>) -> QueueResult<AddOutcome> {
        let keys = self.keys(&job.queue);
        let id = job.job_id.clone().unwrap_or_default();
        let data = JobData::encode(&job)?;

        let mut invocation = scripts::ADD.prepare_invoke();
        invocation
            .key(keys.job(&id))
            .key(keys.wait())
            .key(keys.delayed())
            .key(keys.seq())
            .arg(id.as_str())
            .arg(job.priority)
            .arg(job.max_attempts)
            .arg(optional_millis(job.delay_until))
            .arg(millis(now))
            .arg(data);
        let mut conn = self.conn.clone();
        let (created, state): (String, String) = invocation.invoke_async(&mut conn).await?;
        if created == "full" {
            return Err(QueueError::SequenceExhausted(job.queue));
        }

        Ok(AddOutcome { id, created: created == "1", state: state_of(&state)? })
    }

    async fn claim(&self, queue: &str, request: ClaimRequest, now: DateTime<Utc>) -> QueueResult<ClaimOutcome> {
        let keys = self.keys(queue);
        let token = LockToken::new();
        let expires = clock::after(now, request.lease);

        let mut invocation = scripts::CLAIM.prepare_invoke();
        invocation
            .key(keys.wait())
            .key(keys.active())
            .key(keys.limiter())
            .arg(keys.job_prefix())
            .arg(token.as_str())
            .arg(millis(now))
            .arg(millis(expires))
            .arg(request.rate_limit.map(|limit| limit.max.to_string()).unwrap_or_default())
            .arg(request.rate_limit.map(|limit| limit.window_ms()).unwrap_or(1));
        let mut conn = self.conn.clone();
        let reply: Vec<String> = invocation.invoke_async(&mut conn).await?;

        match reply.first().map(String::as_str) {
            Some("claimed") => {
                let fields: HashMap<String, String> = reply[2..]
                    .chunks(2)
                    .filter_map(|pair| match pair {
                        [field, value] => Some((field.clone(), value.clone())),
                        _ => None,
                    })
                    .collect();
                let record = decode_record(queue, fields)?;
                let lock_expires_at = record.lock_expires_at.unwrap_or(expires);
                Ok(ClaimOutcome::Claimed(LeasedJob::new(record, token, lock_expires_at)))
            }
            Some("limited") => {
                let ttl_ms: u64 = reply.get(1).and_then(|raw| raw.parse().ok()).unwrap_or(0);
                Ok(ClaimOutcome::RateLimited { retry_after: Duration::from_millis(ttl_ms) })
            }
            _ => Ok(ClaimOutcome::Empty),
        }
    }

    async fn extend_lock(
        &self,
        queue: &str,
        id: &JobId,
        token: &LockToken,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> QueueResult<DateTime<Utc>> {
        let keys = self.keys(queue);
        let expires = clock::after(now, lease);

        let mut invocation = scripts::EXTEND.prepare_invoke();
        invocation
            .key(keys.job(id))
            .key(keys.active())
            .arg(id.as_str())
            .arg(token.as_str())
            .arg(millis(expires));
        let mut conn = self.conn.clone();
        let code: i64 = invocation.invoke_async(&mut conn).await?;
        lock_status(code, id)?;
        Ok(expires)
    }

    async fn update_progress(
        &self,
        queue: &str,
        id: &JobId,
        token: &LockToken,
        progress: serde_json::Value,
    ) -> QueueResult<()> {
        let keys = self.keys(queue);
        let mut invocation = scripts::PROGRESS.prepare_invoke();
        invocation
            .key(keys.job(id))
            .arg(id.as_str())
            .arg(token.as_str())
            .arg(serde_json::to_string(&progress)?);
        let mut conn = self.conn.clone();
        let code: i64 = invocation.invoke_async(&mut conn).await?;
        lock_status(code, id).map(|_| ())
    }

    async fn complete(
        &self,
        queue: &str,
        id: &JobId,
        token: &LockToken,
        output: serde_json::Value,
        retention: &Retention,
        now: DateTime<Utc>,
    ) -> QueueResult<()> {
        let keys = self.keys(queue);
        let (keep, cutoff) = retention_args(retention, now);

        let mut invocation = scripts::COMPLETE.prepare_invoke();
        invocation
            .key(keys.job(id))
            .key(keys.active())
            .key(keys.completed())
            .arg(id.as_str())
            .arg(token.as_str())
            .arg(millis(now))
            .arg(serde_json::to_string(&output)?)
            .arg(keep)
            .arg(cutoff)
            .arg(keys.job_prefix());
        let mut conn = self.conn.clone();
        let code: i64 = invocation.invoke_async(&mut conn).await?;
        lock_status(code, id).map(|_| ())
    }

    async fn fail(
        &self,
        queue: &str,
        id: &JobId,
        token: &LockToken,
        reason: &str,
        retry_at: Option<DateTime<Utc>>,
        retention: &Retention,
        now: DateTime<Utc>,
    ) -> QueueResult<FailOutcome> {
        let keys = self.keys(queue);
        let (keep, cutoff) = retention_args(retention, now);

        let mut invocation = scripts::FAIL.prepare_invoke();
        invocation
            .key(keys.job(id))
            .key(keys.active())
            .key(keys.delayed())
            .key(keys.failed())
            .key(keys.wait())
            .key(keys.seq())
            .arg(id.as_str())
            .arg(token.as_str())
            .arg(millis(now))
            .arg(reason)
            .arg(optional_millis(retry_at))
            .arg(keep)
            .arg(cutoff)
            .arg(keys.job_prefix());
        let mut conn = self.conn.clone();
        let code: i64 = invocation.invoke_async(&mut conn).await?;

        match lock_status(code, id)? {
            1 => match retry_at {
                Some(at) => Ok(FailOutcome::Retrying { at }),
                None => Err(QueueError::Internal("retry without a due time".to_string())),
            },
            2 => Ok(FailOutcome::Requeued),
            _ => Ok(FailOutcome::Failed),
        }
    }

    async fn promote_delayed(&self, queue: &str, now: DateTime<Utc>, limit: usize) -> QueueResult<Vec<PromotedJob>> {
        let keys = self.keys(queue);
        let mut invocation = scripts::PROMOTE_DUE.prepare_invoke();
        invocation
            .key(keys.delayed())
            .key(keys.wait())
            .key(keys.seq())
            .arg(millis(now))
            .arg(limit)
            .arg(keys.job_prefix());
        let mut conn = self.conn.clone();
        let reply: Vec<String> = invocation.invoke_async(&mut conn).await?;

        reply
            .chunks(2)
            .filter_map(|pair| match pair {
                [id, from] => Some(state_of(from).map(|from| PromotedJob { id: JobId::from(id.as_str()), from })),
                _ => None,
            })
            .collect()
    }

    async fn recover_stalled(
        &self,
        queue: &str,
        max_stalled_count: u32,
        retention: &Retention,
        now: DateTime<Utc>,
        limit: usize,
    ) -> QueueResult<Vec<StalledJob>> {
        let keys = self.keys(queue);
        let (keep, cutoff) = retention_args(retention, now);

        let mut invocation = scripts::RECOVER_STALLED.prepare_invoke();
        invocation
            .key(keys.active())
            .key(keys.wait())
            .key(keys.failed())
            .key(keys.seq())
            .arg(millis(now))
            .arg(max_stalled_count)
            .arg(limit)
            .arg(keys.job_prefix())
            .arg(keep)
            .arg(cutoff)
            .arg(STALLED_REASON);
        let mut conn = self.conn.clone();
        let reply: Vec<String> = invocation.invoke_async(&mut conn).await?;

        reply
            .chunks(3)
            .filter_map(|triple| match triple {
                [id, count, state] => Some(state_of(state).map(|state| StalledJob {
                    id: JobId::from(id.as_str()),
                    stalled_count: count.parse().unwrap_or(0),
                    state,
                })),
                _ => None,
            })
            .collect()
    }

    async fn remove(&self, queue: &str, id: &JobId) -> QueueResult<bool> {
        let keys = self.keys(queue);
        let mut invocation = scripts::REMOVE.prepare_invoke();
        invocation
            .key(keys.job(id))
            .key(keys.wait())
            .key(keys.delayed())
            .key(keys.completed())
            .key(keys.failed())
            .arg(id.as_str());
        let mut conn = self.conn.clone();
        let code: i64 = invocation.invoke_async(&mut conn).await?;
        match code {
            -1 => Err(QueueError::JobActive(id.to_string())),
            code => Ok(code == 1),
        }
    }

    async fn retry_failed(&self, queue: &str, id: &JobId, _now: DateTime<Utc>) -> QueueResult<()> {
        let keys = self.keys(queue);
        let mut invocation = scripts::RETRY_FAILED.prepare_invoke();
        invocation
            .key(keys.job(id))
            .key(keys.failed())
            .key(keys.wait())
            .key(keys.seq())
            .arg(id.as_str());
        let mut conn = self.conn.clone();
        let code: i64 = invocation.invoke_async(&mut conn).await?;
        match code {
            -1 => Err(QueueError::JobNotFound(id.to_string())),
            0 => Err(QueueError::InvalidOptions(format!("job {} is not failed", id))),
            _ => Ok(()),
        }
    }

    async fn promote(&self, queue: &str, id: &JobId) -> QueueResult<()> {
        let keys = self.keys(queue);
        let mut invocation = scripts::PROMOTE_ONE.prepare_invoke();
        invocation
            .key(keys.job(id))
            .key(keys.delayed())
            .key(keys.wait())
            .key(keys.seq())
            .arg(id.as_str());
        let mut conn = self.conn.clone();
        let code: i64 = invocation.invoke_async(&mut conn).await?;
        match code {
            -1 => Err(QueueError::JobNotFound(id.to_string())),
            0 => Err(QueueError::InvalidOptions(format!("job {} is not delayed", id))),
            _ => Ok(()),
        }
    }

    async fn get_job(&self, queue: &str, id: &JobId) -> QueueResult<Option<JobRecord>> {
        self.load(&self.keys(queue), queue, id).await
    }

    async fn list_jobs(&self, queue: &str, state: JobState, limit: usize) -> QueueResult<Vec<JobRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let keys = self.keys(queue);
        let set = match state {
            JobState::Waiting => keys.wait(),
            JobState::Active => keys.active(),
            JobState::Delayed | JobState::RetryWait => keys.delayed(),
            JobState::Completed => keys.completed(),
            JobState::Failed => keys.failed(),
        };
        let stop = if state == JobState::RetryWait { -1 } else { limit as isize - 1 };

        let mut conn = self.conn.clone();
        let ids: Vec<String> = redis::cmd("ZRANGE")
            .arg(&set)
            .arg(0)
            .arg(stop)
            .query_async(&mut conn)
            .await?;
        let records = self.load_many(&keys, queue, ids).await?;

        Ok(records
            .into_iter()
            .filter(|record| state != JobState::RetryWait || record.state == JobState::RetryWait)
            .take(limit)
            .collect())
    }

    async fn counts(&self, queue: &str) -> QueueResult<JobCounts> {
        let keys = self.keys(queue);
        let mut conn = self.conn.clone();
        let (waiting, active, delayed, completed, failed): (u64, u64, u64, u64, u64) = redis::pipe()
            .cmd("ZCARD").arg(keys.wait())
            .cmd("ZCARD").arg(keys.active())
            .cmd("ZCARD").arg(keys.delayed())
            .cmd("ZCARD").arg(keys.completed())
            .cmd("ZCARD").arg(keys.failed())
            .query_async(&mut conn)
            .await?;
        Ok(JobCounts { waiting, active, delayed, completed, failed })
    }

    async fn upsert_repeatable(&self, definition: &RepeatableDefinition) -> QueueResult<bool> {
        definition.validate()?;
        let keys = self.keys(&definition.queue);
        let mut invocation = scripts::UPSERT_REPEATABLE.prepare_invoke();
        invocation
            .key(keys.repeat())
            .key(keys.repeat_spec())
            .key(keys.repeat_last())
            .key(keys.repeat_count())
            .arg(definition.name.as_str())
            .arg(definition.fingerprint()?)
            .arg(serde_json::to_string(definition)?);
        let mut conn = self.conn.clone();
        let code: i64 = invocation.invoke_async(&mut conn).await?;
        Ok(code == 1)
    }

    async fn remove_repeatable(&self, queue: &str, name: &str) -> QueueResult<bool> {
        let keys = self.keys(queue);
        let mut conn = self.conn.clone();
        let (removed, _, _, _): (i64, i64, i64, i64) = redis::pipe()
            .atomic()
            .cmd("HDEL").arg(keys.repeat()).arg(name)
            .cmd("HDEL").arg(keys.repeat_spec()).arg(name)
            .cmd("HDEL").arg(keys.repeat_last()).arg(name)
            .cmd("HDEL").arg(keys.repeat_count()).arg(name)
            .query_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn repeatables(&self, queue: &str) -> QueueResult<Vec<RepeatableState>> {
        let keys = self.keys(queue);
        let mut conn = self.conn.clone();
        let (definitions, last, counts): (HashMap<String, String>, HashMap<String, i64>, HashMap<String, u64>) =
            redis::pipe()
                .atomic()
                .cmd("HGETALL").arg(keys.repeat())
                .cmd("HGETALL").arg(keys.repeat_last())
                .cmd("HGETALL").arg(keys.repeat_count())
                .query_async(&mut conn)
                .await?;

        let mut states = definitions
            .into_iter()
            .map(|(name, raw)| {
                let definition: RepeatableDefinition = serde_json::from_str(&raw)?;
                Ok(RepeatableState {
                    last_fire_at: last.get(&name).copied().map(from_millis).transpose()?,
                    materialized: counts.get(&name).copied().unwrap_or(0),
                    definition,
                })
            })
            .collect::<QueueResult<Vec<_>>>()?;
        states.sort_by(|a, b| a.definition.name.cmp(&b.definition.name));
        Ok(states)
    }

    async fn materialize_occurrence(
        &self,
        definition: &RepeatableDefinition,
        fire_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> QueueResult<Option<JobId>> {
        let keys = self.keys(&definition.queue);
        let job = definition.occurrence(fire_at, now)?;
        let id = JobId::for_occurrence(&definition.name, fire_at);

        let mut invocation = scripts::MATERIALIZE.prepare_invoke();
        invocation
            .key(keys.repeat_spec())
            .key(keys.repeat_last())
            .key(keys.repeat_count())
            .key(keys.job(&id))
            .key(keys.wait())
            .key(keys.seq())
            .arg(definition.name.as_str())
            .arg(definition.fingerprint()?)
            .arg(millis(fire_at))
            .arg(millis(definition.anchor()?))
            .arg(definition.limit.map(|limit| limit.to_string()).unwrap_or_default())
            .arg(id.as_str())
            .arg(job.priority)
            .arg(job.max_attempts)
            .arg(millis(now))
            .arg(JobData::encode(&job)?);
        let mut conn = self.conn.clone();
        let code: i64 = invocation.invoke_async(&mut conn).await?;
        match code {
            -1 => Err(QueueError::SequenceExhausted(definition.queue.clone())),
            code => Ok((code == 1).then_some(id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_decode_active_record() {
        let data = serde_json::to_string(&JobData {
            name: "send-email".to_string(),
            payload: Payload::raw(b"hi".to_vec()),
            backoff: Some(Backoff::fixed(Duration::from_secs(1))),
            repeat_key: None,
        })
        .unwrap();
        let record = decode_record(
            "emails",
            fields(&[
                ("id", "job-1"),
                ("state", "active"),
                ("priority", "3"),
                ("seq", "12"),
                ("attempts_made", "1"),
                ("attempts_started", "2"),
                ("max_attempts", "5"),
                ("stalled_count", "0"),
                ("created_at", "1700000000000"),
                ("lock_token", "tok"),
                ("lock_expires_at", "1700000030000"),
                ("progress", "{\"pct\":40}"),
                ("data", &data),
            ]),
        )
        .unwrap();

        assert_eq!(record.id, JobId::from("job-1"));
        assert_eq!(record.state, JobState::Active);
        assert_eq!(record.priority, 3);
        assert_eq!(record.seq, 12);
        assert_eq!(record.name, "send-email");
        assert_eq!(record.lock_token, Some(LockToken::from("tok")));
        assert_eq!(record.progress, serde_json::json!({"pct": 40}));
        assert_eq!(record.lock_expires_at.map(millis), Some(1_700_000_030_000));
    }

    #[test]
    fn test_decode_rejects_bad_fields() {
        let result = decode_record("emails", fields(&[("id", "job-1"), ("state", "stalled"), ("data", "{}")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_retention_args() {
        let now = from_millis(1_700_000_000_000).unwrap();
        assert_eq!(retention_args(&Retention::keep_all(), now), (String::new(), String::new()));
        assert_eq!(
            retention_args(&Retention::keep_for(Duration::from_secs(1)), now),
            (String::new(), "1699999999000".to_string())
        );
    }
}
