use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use crate::{
    backend::{AddOutcome, ClaimOutcome, ClaimRequest, FailOutcome, PromotedJob, StalledJob, STALLED_REASON},
    clock,
    config::Retention,
    rate_limit::{FixedWindow, RateDecision},
    scheduler::repeat::{RepeatableDefinition, RepeatableState},
    JobCounts, JobId, JobRecord, JobState, LeasedJob, LockToken, NewJob, QueueError, QueueResult,
};

#[derive(Debug)]
struct StoredRepeatable {
    fingerprint: String,
    state: RepeatableState,
}

/// All state of one queue. Every method is a complete transition.
#[derive(Debug, Default)]
pub(crate) struct QueueState {
    jobs: HashMap<JobId, JobRecord>,
    /// Claim order: `(priority, seq)`
    waiting: BTreeMap<(u32, u64), JobId>,
    /// Delayed and retry-wait jobs by due time
    delayed: BTreeSet<(DateTime<Utc>, JobId)>,
    /// Active jobs by lock expiry
    active: BTreeSet<(DateTime<Utc>, JobId)>,
    /// Archives, oldest finish first
    completed: VecDeque<JobId>,
    failed: VecDeque<JobId>,
    seq: u64,
    limiter: FixedWindow,
    repeatables: HashMap<String, StoredRepeatable>,
}

impl QueueState {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn enqueue_waiting(&mut self, id: &JobId, fresh_seq: bool) {
        let seq = if fresh_seq { self.next_seq() } else { 0 };
        if let Some(record) = self.jobs.get_mut(id) {
            if fresh_seq {
                record.seq = seq;
            }
            record.state = JobState::Waiting;
            record.delay_until = None;
            self.waiting.insert((record.priority, record.seq), id.clone());
        }
    }

    pub fn add(&mut self, job: NewJob, now: DateTime<Utc>) -> AddOutcome {
        let id = job.job_id.clone().unwrap_or_default();
        if let Some(existing) = self.jobs.get(&id) {
            return AddOutcome { id, created: false, state: existing.state };
        }

        let seq = self.next_seq();
        let record = JobRecord::new(id.clone(), job, seq, now);
        let state = record.state;
        match (state, record.delay_until) {
            (JobState::Delayed, Some(at)) => {
                self.delayed.insert((at, id.clone()));
            }
            _ => {
                self.waiting.insert((record.priority, seq), id.clone());
            }
        }
        self.jobs.insert(id.clone(), record);
        AddOutcome { id, created: true, state }
    }

    pub fn claim(&mut self, request: &ClaimRequest, now: DateTime<Utc>) -> ClaimOutcome {
        if self.waiting.is_empty() {
            return ClaimOutcome::Empty;
        }
        if let Some(limit) = &request.rate_limit {
            if let RateDecision::Limited { retry_after } = self.limiter.check(limit, now) {
                return ClaimOutcome::RateLimited { retry_after };
            }
        }

        while let Some((_, id)) = self.waiting.pop_first() {
            let Some(record) = self.jobs.get_mut(&id) else {
                continue;
            };
            let token = LockToken::new();
            let expires = clock::after(now, request.lease);
            record.state = JobState::Active;
            record.lock_token = Some(token.clone());
            record.lock_expires_at = Some(expires);
            record.attempts_started += 1;
            record.processed_at = Some(now);
            record.delay_until = None;
            let leased = LeasedJob::new(record.clone(), token, expires);

            self.active.insert((expires, id));
            if let Some(limit) = &request.rate_limit {
                self.limiter.record(limit, now);
            }
            return ClaimOutcome::Claimed(leased);
        }
        ClaimOutcome::Empty
    }

    /// Look up an active job and check the token
    fn locked(&mut self, id: &JobId, token: &LockToken) -> QueueResult<&mut JobRecord> {
        let record = self
            .jobs
            .get_mut(id)
            .ok_or_else(|| QueueError::JobNotFound(id.to_string()))?;
        if record.holds_lock(token) {
            Ok(record)
        } else {
            Err(QueueError::LockMismatch(id.to_string()))
        }
    }

    /// Drop the lock and the active index entry
    fn release(&mut self, id: &JobId, token: &LockToken) -> QueueResult<()> {
        let record = self.locked(id, token)?;
        let expires = record.lock_expires_at.take();
        record.lock_token = None;
        if let Some(expires) = expires {
            self.active.remove(&(expires, id.clone()));
        }
        Ok(())
    }

    pub fn extend_lock(
        &mut self,
        id: &JobId,
        token: &LockToken,
        lease: std::time::Duration,
        now: DateTime<Utc>,
    ) -> QueueResult<DateTime<Utc>> {
        let expires = clock::after(now, lease);
        let record = self.locked(id, token)?;
        let previous = record.lock_expires_at.replace(expires);
        if let Some(previous) = previous {
            self.active.remove(&(previous, id.clone()));
        }
        self.active.insert((expires, id.clone()));
        Ok(expires)
    }

    pub fn update_progress(&mut self, id: &JobId, token: &LockToken, progress: serde_json::Value) -> QueueResult<()> {
        self.locked(id, token)?.progress = progress;
        Ok(())
    }

    pub fn complete(
        &mut self,
        id: &JobId,
        token: &LockToken,
        output: serde_json::Value,
        retention: &Retention,
        now: DateTime<Utc>,
    ) -> QueueResult<()> {
        self.release(id, token)?;
        if let Some(record) = self.jobs.get_mut(id) {
            record.attempts_made = (record.attempts_made + 1).min(record.max_attempts);
            record.state = JobState::Completed;
            record.finished_at = Some(now);
            record.return_value = Some(output);
        }
        self.completed.push_back(id.clone());
        self.trim(JobState::Completed, retention, now);
        Ok(())
    }

    pub fn fail(
        &mut self,
        id: &JobId,
        token: &LockToken,
        reason: &str,
        retry_at: Option<DateTime<Utc>>,
        retention: &Retention,
        now: DateTime<Utc>,
    ) -> QueueResult<FailOutcome> {
        self.release(id, token)?;
        let Some(record) = self.jobs.get_mut(id) else {
            return Err(QueueError::JobNotFound(id.to_string()));
        };
        record.attempts_made = (record.attempts_made + 1).min(record.max_attempts);
        record.failed_reason = Some(reason.to_string());

        match retry_at {
            Some(at) if record.can_retry() && at > now => {
                record.state = JobState::RetryWait;
                record.delay_until = Some(at);
                self.delayed.insert((at, id.clone()));
                Ok(FailOutcome::Retrying { at })
            }
            Some(_) if record.can_retry() => {
                self.enqueue_waiting(id, true);
                Ok(FailOutcome::Requeued)
            }
            _ => {
                record.state = JobState::Failed;
                record.finished_at = Some(now);
                self.failed.push_back(id.clone());
                self.trim(JobState::Failed, retention, now);
                Ok(FailOutcome::Failed)
            }
        }
    }

    pub fn promote_delayed(&mut self, now: DateTime<Utc>, limit: usize) -> Vec<PromotedJob> {
        let due: Vec<(DateTime<Utc>, JobId)> = self
            .delayed
            .iter()
            .take_while(|(at, _)| *at <= now)
            .take(limit)
            .cloned()
            .collect();

        let mut batch: Vec<(u32, DateTime<Utc>, JobId, JobState)> = Vec::with_capacity(due.len());
        for entry in due {
            self.delayed.remove(&entry);
            let (at, id) = entry;
            if let Some(record) = self.jobs.get(&id) {
                batch.push((record.priority, at, id, record.state));
            }
        }
        batch.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        batch
            .into_iter()
            .map(|(_, _, id, from)| {
                self.enqueue_waiting(&id, true);
                PromotedJob { id, from }
            })
            .collect()
    }

    pub fn recover_stalled(
        &mut self,
        max_stalled_count: u32,
        retention: &Retention,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Vec<StalledJob> {
        let expired: Vec<(DateTime<Utc>, JobId)> = self
            .active
            .iter()
            .take_while(|(expires, _)| *expires < now)
            .take(limit)
            .cloned()
            .collect();

        let mut recovered = Vec::with_capacity(expired.len());
        let mut any_failed = false;
        for entry in expired {
            self.active.remove(&entry);
            let (_, id) = entry;
            let Some(record) = self.jobs.get_mut(&id).filter(|record| record.lock_expired(now)) else {
                continue;
            };
            record.lock_token = None;
            record.lock_expires_at = None;
            record.stalled_count += 1;
            let stalled_count = record.stalled_count;

            let state = if stalled_count > max_stalled_count {
                record.state = JobState::Failed;
                record.failed_reason = Some(STALLED_REASON.to_string());
                record.finished_at = Some(now);
                self.failed.push_back(id.clone());
                any_failed = true;
                JobState::Failed
            } else {
                // keeps its original place in the tier
                self.enqueue_waiting(&id, false);
                JobState::Waiting
            };
            recovered.push(StalledJob { id, stalled_count, state });
        }
        if any_failed {
            self.trim(JobState::Failed, retention, now);
        }
        recovered
    }

    /// Apply retention to an archive, oldest first
    fn trim(&mut self, archive: JobState, retention: &Retention, now: DateTime<Utc>) {
        let cutoff = retention.cutoff(now);
        let list = match archive {
            JobState::Completed => &mut self.completed,
            _ => &mut self.failed,
        };
        let mut dropped = Vec::new();
        while let Some(front) = list.front() {
            let over_count = retention.count.is_some_and(|count| list.len() > count);
            let too_old = match (cutoff, self.jobs.get(front).and_then(|r| r.finished_at)) {
                (Some(cutoff), Some(finished)) => finished < cutoff,
                _ => false,
            };
            if !(over_count || too_old) {
                break;
            }
            if let Some(id) = list.pop_front() {
                dropped.push(id);
            }
        }
        for id in dropped {
            self.jobs.remove(&id);
        }
    }

    pub fn remove(&mut self, id: &JobId) -> QueueResult<bool> {
        let Some(record) = self.jobs.get(id) else {
            return Ok(false);
        };
        match record.state {
            JobState::Active => return Err(QueueError::JobActive(id.to_string())),
            JobState::Waiting => {
                self.waiting.remove(&(record.priority, record.seq));
            }
            JobState::Delayed | JobState::RetryWait => {
                if let Some(at) = record.delay_until {
                    self.delayed.remove(&(at, id.clone()));
                }
            }
            JobState::Completed => self.completed.retain(|x| x != id),
            JobState::Failed => self.failed.retain(|x| x != id),
        }
        self.jobs.remove(id);
        Ok(true)
    }

    pub fn retry_failed(&mut self, id: &JobId) -> QueueResult<()> {
        let record = self
            .jobs
            .get_mut(id)
            .ok_or_else(|| QueueError::JobNotFound(id.to_string()))?;
        if record.state != JobState::Failed {
            return Err(QueueError::InvalidOptions(format!(
                "job {} is {}, only failed jobs can be retried",
                id, record.state
            )));
        }
        record.attempts_made = 0;
        record.stalled_count = 0;
        record.failed_reason = None;
        record.finished_at = None;
        self.failed.retain(|x| x != id);
        self.enqueue_waiting(id, true);
        Ok(())
    }

    pub fn promote(&mut self, id: &JobId) -> QueueResult<()> {
        let record = self
            .jobs
            .get(id)
            .ok_or_else(|| QueueError::JobNotFound(id.to_string()))?;
        if !record.state.is_scheduled() {
            return Err(QueueError::InvalidOptions(format!(
                "job {} is {}, only delayed jobs can be promoted",
                id, record.state
            )));
        }
        if let Some(at) = record.delay_until {
            self.delayed.remove(&(at, id.clone()));
        }
        self.enqueue_waiting(id, true);
        Ok(())
    }

    pub fn get_job(&self, id: &JobId) -> Option<JobRecord> {
        self.jobs.get(id).cloned()
    }

    pub fn list_jobs(&self, state: JobState, limit: usize) -> Vec<JobRecord> {
        let ids: Box<dyn Iterator<Item = &JobId> + '_> = match state {
            JobState::Waiting => Box::new(self.waiting.values()),
            JobState::Active => Box::new(self.active.iter().map(|(_, id)| id)),
            JobState::Delayed => Box::new(self.delayed.iter().map(|(_, id)| id)),
            JobState::RetryWait => Box::new(
                self.delayed
                    .iter()
                    .map(|(_, id)| id)
                    .filter(|id| self.jobs.get(*id).is_some_and(|r| r.state == JobState::RetryWait)),
            ),
            JobState::Completed => Box::new(self.completed.iter()),
            JobState::Failed => Box::new(self.failed.iter()),
        };
        ids.filter_map(|id| self.jobs.get(id).cloned()).take(limit).collect()
    }

    pub fn counts(&self) -> JobCounts {
        JobCounts {
            waiting: self.waiting.len() as u64,
            active: self.active.len() as u64,
            delayed: self.delayed.len() as u64,
            completed: self.completed.len() as u64,
            failed: self.failed.len() as u64,
        }
    }

    pub fn upsert_repeatable(&mut self, definition: &RepeatableDefinition) -> QueueResult<bool> {
        definition.validate()?;
        let fingerprint = definition.fingerprint()?;
        if self
            .repeatables
            .get(&definition.name)
            .is_some_and(|stored| stored.fingerprint == fingerprint)
        {
            return Ok(false);
        }
        self.repeatables.insert(
            definition.name.clone(),
            StoredRepeatable { fingerprint, state: RepeatableState::new(definition.clone()) },
        );
        Ok(true)
    }

    pub fn remove_repeatable(&mut self, name: &str) -> bool {
        self.repeatables.remove(name).is_some()
    }

    pub fn repeatables(&self) -> Vec<RepeatableState> {
        let mut states: Vec<RepeatableState> =
            self.repeatables.values().map(|stored| stored.state.clone()).collect();
        states.sort_by(|a, b| a.definition.name.cmp(&b.definition.name));
        states
    }

    pub fn materialize_occurrence(
        &mut self,
        definition: &RepeatableDefinition,
        fire_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> QueueResult<Option<JobId>> {
        let fingerprint = definition.fingerprint()?;
        let Some(stored) = self.repeatables.get(&definition.name) else {
            return Ok(None);
        };
        if stored.fingerprint != fingerprint
            || fire_at <= stored.state.anchor()?
            || stored.state.exhausted()
        {
            return Ok(None);
        }

        let id = JobId::for_occurrence(&definition.name, fire_at);
        let created = if self.jobs.contains_key(&id) {
            false
        } else {
            let job = definition.occurrence(fire_at, now)?;
            self.add(job, now).created
        };

        if let Some(stored) = self.repeatables.get_mut(&definition.name) {
            stored.state.last_fire_at = Some(fire_at);
            if created {
                stored.state.materialized += 1;
            }
        }
        Ok(created.then_some(id))
    }
}
