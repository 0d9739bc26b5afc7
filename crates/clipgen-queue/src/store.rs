//! Job persistence.
//!
//! Writes are partial: only the fields present in a [`JobUpdate`] are
//! touched, so concurrent writers never clobber each other's fields.
//!
//! Status writes must follow [`JobStatus::can_transition_to`]. A terminal
//! record accepts nothing but a rewrite of its own status, so an external
//! cancellation (FAILED) cannot be undone by a worker that has not noticed
//! it yet.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clipgen_models::{Job, JobId, JobKind, JobProgress, JobStatus, JobUpdate};
use redis::{AsyncCommands, Script};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{QueueError, QueueResult};

/// Status history entries kept per job.
const HISTORY_LIMIT: isize = 64;

/// Job record TTL once written (7 days).
const JOB_TTL_SECS: i64 = 7 * 24 * 3600;

/// Compare-and-set rounds before a Redis update gives up.
const UPDATE_ATTEMPTS: usize = 3;

/// Persistence boundary for jobs.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a PENDING job. Fails if the ID is taken.
    async fn create(&self, id: &JobId, owner_id: &str, kind: JobKind) -> QueueResult<Job>;

    /// Apply a partial update and return the resulting job.
    async fn update(&self, id: &JobId, update: JobUpdate) -> QueueResult<Job>;

    async fn read(&self, id: &JobId) -> QueueResult<Option<Job>>;
}

/// Refuse updates the current status does not accept.
///
/// Progress-only writes are refused once the job is terminal.
fn check_update(id: &JobId, current: JobStatus, update: &JobUpdate) -> QueueResult<()> {
    let accepted = match update.status {
        Some(next) => current.can_transition_to(next),
        None => !current.is_terminal(),
    };
    if accepted {
        Ok(())
    } else {
        warn!(
            job_id = %id,
            from = %current,
            to = ?update.status,
            "Rejected job update"
        );
        Err(QueueError::rejected_update(id.as_str(), current))
    }
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    job: Job,
    history: Vec<JobStatus>,
    writes: usize,
}

/// In-process job store for tests and local runs.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<JobId, MemoryEntry>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Statuses the job has passed through, in order. Repeated writes of the
    /// same status are recorded once.
    pub async fn status_history(&self, id: &JobId) -> Vec<JobStatus> {
        self.jobs
            .lock()
            .await
            .get(id)
            .map(|e| e.history.clone())
            .unwrap_or_default()
    }

    /// Number of updates applied to the job.
    pub async fn write_count(&self, id: &JobId) -> usize {
        self.jobs.lock().await.get(id).map(|e| e.writes).unwrap_or(0)
    }

    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, id: &JobId, owner_id: &str, kind: JobKind) -> QueueResult<Job> {
        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(id) {
            return Err(QueueError::JobExists(id.to_string()));
        }

        let job = Job::new(id.clone(), owner_id, kind);
        jobs.insert(
            id.clone(),
            MemoryEntry {
                job: job.clone(),
                history: vec![job.status],
                writes: 0,
            },
        );
        Ok(job)
    }

    async fn update(&self, id: &JobId, update: JobUpdate) -> QueueResult<Job> {
        let mut jobs = self.jobs.lock().await;
        let entry = jobs
            .get_mut(id)
            .ok_or_else(|| QueueError::job_not_found(id.as_str()))?;

        let previous = entry.job.status;
        check_update(id, previous, &update)?;

        entry.job.apply(&update);
        entry.writes += 1;
        if entry.job.status != previous {
            entry.history.push(entry.job.status);
        }

        Ok(entry.job.clone())
    }

    async fn read(&self, id: &JobId) -> QueueResult<Option<Job>> {
        Ok(self.jobs.lock().await.get(id).map(|e| e.job.clone()))
    }
}

/// Job store backed by one Redis hash per job.
///
/// Keys:
/// - `{prefix}:{id}`: hash of job fields
/// - `{prefix}:{id}:history`: list of statuses
#[derive(Clone)]
pub struct RedisJobStore {
    client: redis::Client,
    prefix: String,
}

mod field {
    pub const ID: &str = "id";
    pub const OWNER_ID: &str = "owner_id";
    pub const KIND: &str = "kind";
    pub const STATUS: &str = "status";
    pub const PROGRESS_PERCENT: &str = "progress_percent";
    pub const PROGRESS_DESCRIPTION: &str = "progress_description";
    pub const RESULT: &str = "result";
    pub const ERROR: &str = "error";
    pub const ATTEMPT: &str = "attempt";
    pub const CREATED_AT: &str = "created_at";
    pub const UPDATED_AT: &str = "updated_at";
}

impl RedisJobStore {
    pub fn new(redis_url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            prefix: "clipgen:job".to_string(),
        })
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn job_key(&self, id: &JobId) -> String {
        format!("{}:{}", self.prefix, id)
    }

    fn history_key(&self, id: &JobId) -> String {
        format!("{}:{}:history", self.prefix, id)
    }

    /// Statuses recorded for the job, oldest first.
    pub async fn status_history(&self, id: &JobId) -> QueueResult<Vec<JobStatus>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let raw: Vec<String> = conn.lrange(self.history_key(id), 0, -1).await?;
        Ok(raw.iter().filter_map(|s| s.parse().ok()).collect())
    }
}

/// Applies an update only if the status still matches the one it was
/// checked against.
///
/// KEYS: job hash, history list. ARGV: expected status, set count, field and
/// value pairs, delete count, fields, next status (or empty), history limit.
/// Returns 1 when written, 0 when the status moved, -1 when the job is gone.
const UPDATE_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[1], 'status')
if not current then
    return -1
end
if current ~= ARGV[1] then
    return 0
end
local i = 2
local set_count = tonumber(ARGV[i])
i = i + 1
for _ = 1, set_count do
    redis.call('HSET', KEYS[1], ARGV[i], ARGV[i + 1])
    i = i + 2
end
local del_count = tonumber(ARGV[i])
i = i + 1
for _ = 1, del_count do
    redis.call('HDEL', KEYS[1], ARGV[i])
    i = i + 1
end
local next_status = ARGV[i]
if next_status ~= '' and next_status ~= current then
    redis.call('RPUSH', KEYS[2], next_status)
    redis.call('LTRIM', KEYS[2], -tonumber(ARGV[i + 1]), -1)
end
return 1
"#;

/// Hash fields written for an update, plus the fields to delete.
fn update_fields(update: &JobUpdate, now: DateTime<Utc>) -> QueueResult<(Vec<(&'static str, String)>, Vec<&'static str>)> {
    let mut set = Vec::new();
    let mut del = Vec::new();

    if let Some(status) = update.status {
        set.push((field::STATUS, status.as_str().to_string()));
        if status != JobStatus::Completed {
            del.push(field::RESULT);
        }
        if status != JobStatus::Failed {
            del.push(field::ERROR);
        }
    }
    if let Some(progress) = &update.progress {
        set.push((field::PROGRESS_PERCENT, progress.percent.to_string()));
        set.push((field::PROGRESS_DESCRIPTION, progress.description.clone()));
    }
    if let Some(result) = &update.result {
        if update.status.map_or(true, |s| s == JobStatus::Completed) {
            set.push((field::RESULT, serde_json::to_string(result)?));
        }
    }
    if let Some(error) = &update.error {
        if update.status.map_or(true, |s| s == JobStatus::Failed) {
            set.push((field::ERROR, error.clone()));
        }
    }
    if let Some(attempt) = update.attempt {
        set.push((field::ATTEMPT, attempt.to_string()));
    }
    set.push((field::UPDATED_AT, now.to_rfc3339()));

    Ok((set, del))
}

fn parse_timestamp(id: &str, raw: Option<&String>) -> QueueResult<DateTime<Utc>> {
    let raw = raw.ok_or_else(|| QueueError::corrupt_record(id, "missing timestamp"))?;
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| QueueError::corrupt_record(id, e.to_string()))
}

/// Rebuild a job from its hash fields.
fn job_from_fields(fields: &HashMap<String, String>) -> QueueResult<Job> {
    let id = fields
        .get(field::ID)
        .ok_or_else(|| QueueError::corrupt_record("?", "missing id"))?;
    let corrupt = |msg: String| QueueError::corrupt_record(id.as_str(), msg);

    let kind: JobKind = fields
        .get(field::KIND)
        .ok_or_else(|| corrupt("missing kind".into()))?
        .parse()
        .map_err(|e: clipgen_models::ParseJobFieldError| corrupt(e.to_string()))?;
    let status: JobStatus = match fields.get(field::STATUS) {
        Some(s) => s
            .parse()
            .map_err(|e: clipgen_models::ParseJobFieldError| corrupt(e.to_string()))?,
        None => JobStatus::Pending,
    };
    let percent = fields
        .get(field::PROGRESS_PERCENT)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    let description = fields
        .get(field::PROGRESS_DESCRIPTION)
        .cloned()
        .unwrap_or_default();
    let result = match fields.get(field::RESULT) {
        Some(raw) if status == JobStatus::Completed => Some(serde_json::from_str(raw)?),
        _ => None,
    };
    let error = match fields.get(field::ERROR) {
        Some(e) if status == JobStatus::Failed => Some(e.clone()),
        _ => None,
    };

    Ok(Job {
        id: JobId::from_string(id.clone()),
        owner_id: fields.get(field::OWNER_ID).cloned().unwrap_or_default(),
        kind,
        status,
        progress: JobProgress::new(percent, description),
        result,
        error,
        attempt: fields
            .get(field::ATTEMPT)
            .and_then(|s| s.parse().ok())
            .unwrap_or(1),
        created_at: parse_timestamp(id, fields.get(field::CREATED_AT))?,
        updated_at: parse_timestamp(id, fields.get(field::UPDATED_AT))?,
    })
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn create(&self, id: &JobId, owner_id: &str, kind: JobKind) -> QueueResult<Job> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = self.job_key(id);

        let claimed: bool = conn.hset_nx(&key, field::ID, id.as_str()).await?;
        if !claimed {
            return Err(QueueError::JobExists(id.to_string()));
        }

        let job = Job::new(id.clone(), owner_id, kind);
        let fields: Vec<(&str, String)> = vec![
            (field::OWNER_ID, job.owner_id.clone()),
            (field::KIND, kind.as_str().to_string()),
            (field::STATUS, job.status.as_str().to_string()),
            (field::PROGRESS_PERCENT, job.progress.percent.to_string()),
            (field::PROGRESS_DESCRIPTION, job.progress.description.clone()),
            (field::ATTEMPT, job.attempt.to_string()),
            (field::CREATED_AT, job.created_at.to_rfc3339()),
            (field::UPDATED_AT, job.updated_at.to_rfc3339()),
        ];

        redis::pipe()
            .hset_multiple(&key, fields.as_slice())
            .ignore()
            .expire(&key, JOB_TTL_SECS)
            .ignore()
            .rpush(self.history_key(id), job.status.as_str())
            .ignore()
            .expire(self.history_key(id), JOB_TTL_SECS)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        debug!(job_id = %id, kind = %kind, "Created job record");
        Ok(job)
    }

    async fn update(&self, id: &JobId, update: JobUpdate) -> QueueResult<Job> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = self.job_key(id);
        let history_key = self.history_key(id);
        let script = Script::new(UPDATE_SCRIPT);

        for _ in 0..UPDATE_ATTEMPTS {
            let previous: Option<String> = conn.hget(&key, field::STATUS).await?;
            let previous = previous
                .ok_or_else(|| QueueError::job_not_found(id.as_str()))?
                .parse::<JobStatus>()
                .map_err(|e| QueueError::corrupt_record(id.as_str(), e.to_string()))?;
            check_update(id, previous, &update)?;

            let (set, del) = update_fields(&update, Utc::now())?;
            let mut invocation = script.key(&key);
            invocation
                .key(&history_key)
                .arg(previous.as_str())
                .arg(set.len());
            for (name, value) in &set {
                invocation.arg(*name).arg(value);
            }
            invocation.arg(del.len());
            for name in &del {
                invocation.arg(*name);
            }
            invocation
                .arg(update.status.map_or("", |s| s.as_str()))
                .arg(HISTORY_LIMIT);

            let written: i32 = invocation.invoke_async(&mut conn).await?;
            match written {
                1 => {
                    return self
                        .read(id)
                        .await?
                        .ok_or_else(|| QueueError::job_not_found(id.as_str()))
                }
                -1 => return Err(QueueError::job_not_found(id.as_str())),
                _ => debug!(job_id = %id, "Job status changed during update, re-checking"),
            }
        }

        Err(QueueError::UpdateConflict(id.to_string()))
    }

    async fn read(&self, id: &JobId) -> QueueResult<Option<Job>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let fields: HashMap<String, String> = conn.hgetall(self.job_key(id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        job_from_fields(&fields).map(Some)
    }
}
