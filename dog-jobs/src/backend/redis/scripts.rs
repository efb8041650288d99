//! Lua scripts for every multi-key transition.
//!
//! Job hashes hold scalar fields the scripts manipulate (`state`, `priority`,
//! `seq`, counters, lock and timestamps in epoch milliseconds) plus opaque
//! JSON fields (`data`, `progress`, `return_value`) that only Rust decodes.
//! Scores of the wait set are `priority * 2^32 + seq`, so a queue accepts at
//! most `2^32 - 1` inserts; after that `ADD` and `MATERIALIZE` refuse new jobs
//! and re-queued jobs keep their previous sequence.

use once_cell::sync::Lazy;
use redis::Script;

/// Helpers shared by several scripts
const PRELUDE: &str = r#"
local SEQ_LIMIT = 4294967296

local function score(priority, seq)
  return string.format('%.0f', priority * SEQ_LIMIT + seq)
end

-- nil once the sequence would spill into the priority bits
local function next_seq(seq_key)
  local seq = tonumber(redis.call('GET', seq_key) or '0') + 1
  if seq >= SEQ_LIMIT then
    return nil
  end
  redis.call('SET', seq_key, seq)
  return seq
end

local function push_waiting(job, wait, seq_key, id, fresh)
  local seq
  if fresh then
    seq = next_seq(seq_key)
  end
  if seq then
    redis.call('HSET', job, 'seq', seq)
  else
    seq = tonumber(redis.call('HGET', job, 'seq'))
  end
  local priority = tonumber(redis.call('HGET', job, 'priority'))
  redis.call('HSET', job, 'state', 'waiting')
  redis.call('HDEL', job, 'delay_until')
  redis.call('ZADD', wait, score(priority, seq), id)
end

local function trim(archive, keep, cutoff, prefix)
  if cutoff ~= '' then
    local old = redis.call('ZRANGEBYSCORE', archive, '-inf', '(' .. cutoff)
    for _, id in ipairs(old) do
      redis.call('ZREM', archive, id)
      redis.call('DEL', prefix .. id)
    end
  end
  if keep ~= '' then
    local excess = redis.call('ZCARD', archive) - tonumber(keep)
    if excess > 0 then
      local oldest = redis.call('ZRANGE', archive, 0, excess - 1)
      for _, id in ipairs(oldest) do
        redis.call('ZREM', archive, id)
        redis.call('DEL', prefix .. id)
      end
    end
  end
end
"#;

/// Lock check: KEYS[1] job hash, ARGV[2] token. -1 missing, 0 stale token.
const LOCK_GUARD: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return -1
end
if redis.call('HGET', KEYS[1], 'state') ~= 'active' or redis.call('HGET', KEYS[1], 'lock_token') ~= ARGV[2] then
  return 0
end
"#;

fn script(parts: &[&str]) -> Script {
    Script::new(&parts.concat())
}

/// KEYS: job, wait, delayed, seq
/// ARGV: id, priority, max_attempts, delay_until_ms|'', now_ms, data
/// Returns `{created, state}`, or `{'full', ''}` once the sequence is used up.
pub(crate) static ADD: Lazy<Script> = Lazy::new(|| {
    script(&[
        PRELUDE,
        r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return {'0', redis.call('HGET', KEYS[1], 'state')}
end
local seq = next_seq(KEYS[4])
if not seq then
  return {'full', ''}
end
local state = 'waiting'
if ARGV[4] ~= '' and tonumber(ARGV[4]) > tonumber(ARGV[5]) then
  state = 'delayed'
end
redis.call('HSET', KEYS[1], 'id', ARGV[1], 'state', state, 'priority', ARGV[2], 'seq', seq,
  'attempts_made', 0, 'attempts_started', 0, 'max_attempts', ARGV[3], 'stalled_count', 0,
  'created_at', ARGV[5], 'data', ARGV[6])
if state == 'delayed' then
  redis.call('HSET', KEYS[1], 'delay_until', ARGV[4])
  redis.call('ZADD', KEYS[3], ARGV[4], ARGV[1])
else
  redis.call('ZADD', KEYS[2], score(tonumber(ARGV[2]), seq), ARGV[1])
end
return {'1', state}
"#,
    ])
});

/// KEYS: wait, active, limiter
/// ARGV: job_prefix, token, now_ms, expires_ms, rate_max|'', window_ms
pub(crate) static CLAIM: Lazy<Script> = Lazy::new(|| {
    script(&[r#"
if redis.call('ZCARD', KEYS[1]) == 0 then
  return {'empty'}
end
if ARGV[5] ~= '' then
  local count = tonumber(redis.call('GET', KEYS[3]) or '0')
  if count >= tonumber(ARGV[5]) then
    local ttl = redis.call('PTTL', KEYS[3])
    if ttl < 0 then
      redis.call('PEXPIRE', KEYS[3], ARGV[6])
      ttl = tonumber(ARGV[6])
    end
    return {'limited', tostring(ttl)}
  end
end
local popped = redis.call('ZPOPMIN', KEYS[1])
local id = popped[1]
local job = ARGV[1] .. id
redis.call('HSET', job, 'state', 'active', 'lock_token', ARGV[2], 'lock_expires_at', ARGV[4], 'processed_at', ARGV[3])
redis.call('HDEL', job, 'delay_until')
redis.call('HINCRBY', job, 'attempts_started', 1)
redis.call('ZADD', KEYS[2], ARGV[4], id)
if ARGV[5] ~= '' then
  if redis.call('INCR', KEYS[3]) == 1 then
    redis.call('PEXPIRE', KEYS[3], ARGV[6])
  end
end
local out = {'claimed', id}
local fields = redis.call('HGETALL', job)
for i = 1, #fields do
  out[#out + 1] = fields[i]
end
return out
"#])
});

/// KEYS: job, active
/// ARGV: id, token, expires_ms
pub(crate) static EXTEND: Lazy<Script> = Lazy::new(|| {
    script(&[
        LOCK_GUARD,
        r#"
redis.call('HSET', KEYS[1], 'lock_expires_at', ARGV[3])
redis.call('ZADD', KEYS[2], ARGV[3], ARGV[1])
return 1
"#,
    ])
});

/// KEYS: job
/// ARGV: id, token, progress
pub(crate) static PROGRESS: Lazy<Script> = Lazy::new(|| {
    script(&[
        LOCK_GUARD,
        r#"
redis.call('HSET', KEYS[1], 'progress', ARGV[3])
return 1
"#,
    ])
});

/// KEYS: job, active, completed
/// ARGV: id, token, now_ms, output, keep|'', cutoff_ms|'', job_prefix
pub(crate) static COMPLETE: Lazy<Script> = Lazy::new(|| {
    script(&[
        PRELUDE,
        LOCK_GUARD,
        r#"
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('HDEL', KEYS[1], 'lock_token', 'lock_expires_at')
local made = redis.call('HINCRBY', KEYS[1], 'attempts_made', 1)
local max = tonumber(redis.call('HGET', KEYS[1], 'max_attempts'))
if made > max then
  redis.call('HSET', KEYS[1], 'attempts_made', max)
end
redis.call('HSET', KEYS[1], 'state', 'completed', 'finished_at', ARGV[3], 'return_value', ARGV[4])
redis.call('ZADD', KEYS[3], ARGV[3], ARGV[1])
trim(KEYS[3], ARGV[5], ARGV[6], ARGV[7])
return 1
"#,
    ])
});

/// KEYS: job, active, delayed, failed, wait, seq
/// ARGV: id, token, now_ms, reason, retry_at_ms|'', keep|'', cutoff_ms|'', job_prefix
/// Returns 1 retry-wait, 2 requeued, 3 failed.
pub(crate) static FAIL: Lazy<Script> = Lazy::new(|| {
    script(&[
        PRELUDE,
        LOCK_GUARD,
        r#"
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('HDEL', KEYS[1], 'lock_token', 'lock_expires_at')
local made = redis.call('HINCRBY', KEYS[1], 'attempts_made', 1)
local max = tonumber(redis.call('HGET', KEYS[1], 'max_attempts'))
if made > max then
  made = max
  redis.call('HSET', KEYS[1], 'attempts_made', max)
end
redis.call('HSET', KEYS[1], 'failed_reason', ARGV[4])
if ARGV[5] ~= '' and made < max then
  if tonumber(ARGV[5]) > tonumber(ARGV[3]) then
    redis.call('HSET', KEYS[1], 'state', 'retry-wait', 'delay_until', ARGV[5])
    redis.call('ZADD', KEYS[3], ARGV[5], ARGV[1])
    return 1
  end
  push_waiting(KEYS[1], KEYS[5], KEYS[6], ARGV[1], true)
  return 2
end
redis.call('HSET', KEYS[1], 'state', 'failed', 'finished_at', ARGV[3])
redis.call('ZADD', KEYS[4], ARGV[3], ARGV[1])
trim(KEYS[4], ARGV[6], ARGV[7], ARGV[8])
return 3
"#,
    ])
});

/// KEYS: delayed, wait, seq
/// ARGV: now_ms, limit, job_prefix
/// Returns flat `[id, previous_state, ...]` in promotion order.
pub(crate) static PROMOTE_DUE: Lazy<Script> = Lazy::new(|| {
    script(&[
        PRELUDE,
        r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'WITHSCORES', 'LIMIT', 0, tonumber(ARGV[2]))
local batch = {}
for i = 1, #due, 2 do
  local id = due[i]
  local job = ARGV[3] .. id
  redis.call('ZREM', KEYS[1], id)
  local state = redis.call('HGET', job, 'state')
  if state then
    batch[#batch + 1] = {
      id = id,
      at = tonumber(due[i + 1]),
      priority = tonumber(redis.call('HGET', job, 'priority') or '0'),
      state = state,
    }
  end
end
table.sort(batch, function(a, b)
  if a.priority ~= b.priority then
    return a.priority < b.priority
  end
  if a.at ~= b.at then
    return a.at < b.at
  end
  return a.id < b.id
end)
local out = {}
for _, entry in ipairs(batch) do
  push_waiting(ARGV[3] .. entry.id, KEYS[2], KEYS[3], entry.id, true)
  out[#out + 1] = entry.id
  out[#out + 1] = entry.state
end
return out
"#,
    ])
});

/// KEYS: active, wait, failed, seq
/// ARGV: now_ms, max_stalled, limit, job_prefix, keep|'', cutoff_ms|'', reason
/// Returns flat `[id, stalled_count, new_state, ...]`.
pub(crate) static RECOVER_STALLED: Lazy<Script> = Lazy::new(|| {
    script(&[
        PRELUDE,
        r#"
local expired = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', '(' .. ARGV[1], 'LIMIT', 0, tonumber(ARGV[3]))
local out = {}
local failed_any = false
for _, id in ipairs(expired) do
  local job = ARGV[4] .. id
  redis.call('ZREM', KEYS[1], id)
  if redis.call('EXISTS', job) == 1 then
    redis.call('HDEL', job, 'lock_token', 'lock_expires_at')
    local count = redis.call('HINCRBY', job, 'stalled_count', 1)
    local state = 'waiting'
    if count > tonumber(ARGV[2]) then
      state = 'failed'
      redis.call('HSET', job, 'state', 'failed', 'failed_reason', ARGV[7], 'finished_at', ARGV[1])
      redis.call('ZADD', KEYS[3], ARGV[1], id)
      failed_any = true
    else
      push_waiting(job, KEYS[2], KEYS[4], id, false)
    end
    out[#out + 1] = id
    out[#out + 1] = tostring(count)
    out[#out + 1] = state
  end
end
if failed_any then
  trim(KEYS[3], ARGV[5], ARGV[6], ARGV[4])
end
return out
"#,
    ])
});

/// KEYS: job, wait, delayed, completed, failed
/// ARGV: id
/// Returns 1 removed, 0 missing, -1 active.
pub(crate) static REMOVE: Lazy<Script> = Lazy::new(|| {
    script(&[r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return 0
end
if redis.call('HGET', KEYS[1], 'state') == 'active' then
  return -1
end
for i = 2, 5 do
  redis.call('ZREM', KEYS[i], ARGV[1])
end
redis.call('DEL', KEYS[1])
return 1
"#])
});

/// KEYS: job, failed, wait, seq
/// ARGV: id
/// Returns 1 retried, 0 not failed, -1 missing.
pub(crate) static RETRY_FAILED: Lazy<Script> = Lazy::new(|| {
    script(&[
        PRELUDE,
        r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return -1
end
if redis.call('HGET', KEYS[1], 'state') ~= 'failed' then
  return 0
end
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('HSET', KEYS[1], 'attempts_made', 0, 'stalled_count', 0)
redis.call('HDEL', KEYS[1], 'failed_reason', 'finished_at')
push_waiting(KEYS[1], KEYS[3], KEYS[4], ARGV[1], true)
return 1
"#,
    ])
});

/// KEYS: job, delayed, wait, seq
/// ARGV: id
/// Returns 1 promoted, 0 not delayed, -1 missing.
pub(crate) static PROMOTE_ONE: Lazy<Script> = Lazy::new(|| {
    script(&[
        PRELUDE,
        r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return -1
end
local state = redis.call('HGET', KEYS[1], 'state')
if state ~= 'delayed' and state ~= 'retry-wait' then
  return 0
end
redis.call('ZREM', KEYS[2], ARGV[1])
push_waiting(KEYS[1], KEYS[3], KEYS[4], ARGV[1], true)
return 1
"#,
    ])
});

/// KEYS: repeat, repeat:spec, repeat:last, repeat:count
/// ARGV: name, fingerprint, definition
pub(crate) static UPSERT_REPEATABLE: Lazy<Script> = Lazy::new(|| {
    script(&[r#"
if redis.call('HGET', KEYS[2], ARGV[1]) == ARGV[2] then
  return 0
end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[3])
redis.call('HSET', KEYS[2], ARGV[1], ARGV[2])
redis.call('HDEL', KEYS[3], ARGV[1])
redis.call('HDEL', KEYS[4], ARGV[1])
return 1
"#])
});

/// KEYS: repeat:spec, repeat:last, repeat:count, job, wait, seq
/// ARGV: name, fingerprint, fire_ms, created_ms, limit|'', id, priority, max_attempts, now_ms, data
/// Returns 1 when the occurrence was inserted and -1 once the sequence is used up.
pub(crate) static MATERIALIZE: Lazy<Script> = Lazy::new(|| {
    script(&[
        PRELUDE,
        r#"
if redis.call('HGET', KEYS[1], ARGV[1]) ~= ARGV[2] then
  return 0
end
local anchor = tonumber(ARGV[4])
local last = redis.call('HGET', KEYS[2], ARGV[1])
if last then
  anchor = tonumber(last)
end
if tonumber(ARGV[3]) <= anchor then
  return 0
end
local count = tonumber(redis.call('HGET', KEYS[3], ARGV[1]) or '0')
if ARGV[5] ~= '' and count >= tonumber(ARGV[5]) then
  return 0
end
if redis.call('EXISTS', KEYS[4]) == 1 then
  redis.call('HSET', KEYS[2], ARGV[1], ARGV[3])
  return 0
end
local seq = next_seq(KEYS[6])
if not seq then
  return -1
end
redis.call('HSET', KEYS[2], ARGV[1], ARGV[3])
redis.call('HINCRBY', KEYS[3], ARGV[1], 1)
redis.call('HSET', KEYS[4], 'id', ARGV[6], 'state', 'waiting', 'priority', ARGV[7], 'seq', seq,
  'attempts_made', 0, 'attempts_started', 0, 'max_attempts', ARGV[8], 'stalled_count', 0,
  'created_at', ARGV[9], 'data', ARGV[10])
redis.call('ZADD', KEYS[5], score(tonumber(ARGV[7]), seq), ARGV[6])
return 1
"#,
    ])
});
