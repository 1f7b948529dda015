//! C3 — Job Queue.
//!
//! A Redis-backed, per-location priority queue: a sorted set orders pending
//! job keys by priority (ties broken by enqueue order), a hash holds the
//! full `Job` payload, and capped lists record recent failed/completed
//! outcomes. Idempotent enqueue-by-key and typed errors are carried over
//! from the teacher's upload queue; the durability mechanism changes from
//! on-disk files to Redis because multiple worker processes share one queue.

use crate::types::{Job, JobState};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// What the caller should do after a job fails.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Re-enqueue after sleeping this long.
    RetryAfter(Duration),
    /// Attempts exhausted — job moved to the failed list, do not retry.
    GiveUp,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job. Returns `false` without modifying the queue if a job
    /// with the same `job_key` is already pending for that location.
    async fn enqueue(&self, job: &Job) -> Result<bool, QueueError>;

    /// Pop the highest-priority pending job for a location, if any.
    async fn dequeue_next(&self, location_id: &str) -> Result<Option<Job>, QueueError>;

    /// Record a successful completion: publish an event, append to the
    /// capped completed list, and drop the job from the active hash.
    async fn complete_job(&self, job: &Job, result: &serde_json::Value) -> Result<(), QueueError>;

    /// Record a failed attempt. Returns the retry decision the caller
    /// should act on; on `GiveUp` the job has already been moved to the
    /// failed list.
    async fn fail_job(&self, job: &Job, error_message: &str) -> Result<RetryDecision, QueueError>;
}

fn pending_key(location_id: &str) -> String {
    format!("queue:{location_id}:pending")
}
fn jobs_key(location_id: &str) -> String {
    format!("queue:{location_id}:jobs")
}
fn failed_key(location_id: &str) -> String {
    format!("queue:{location_id}:failed")
}
fn completed_key(location_id: &str) -> String {
    format!("queue:{location_id}:completed")
}
fn events_channel(location_id: &str) -> String {
    format!("queue:{location_id}:events")
}

static ENQUEUE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Priority score with a tiny tie-breaker subtracted so equal-priority jobs
/// pop in enqueue order without losing precision the way a nanosecond
/// timestamp component would.
fn priority_score(priority: i32) -> f64 {
    let seq = ENQUEUE_SEQ.fetch_add(1, Ordering::Relaxed);
    f64::from(priority) - (seq as f64) * 1e-9
}

fn backoff_delay(attempts: u32, base_delay_ms: u64) -> Duration {
    let multiplier = 2u64.saturating_pow(attempts.saturating_sub(1));
    Duration::from_millis(base_delay_ms.saturating_mul(multiplier))
}

#[derive(serde::Serialize, serde::Deserialize)]
struct Outcome {
    job_key: String,
    equipment_id: String,
    reason: String,
}

pub struct RedisJobQueue {
    conn: redis::aio::ConnectionManager,
    max_retry_attempts: u32,
    retry_base_delay_ms: u64,
    failed_retention: usize,
    completed_retention: usize,
}

impl RedisJobQueue {
    pub async fn connect(
        redis_url: &str,
        max_retry_attempts: u32,
        retry_base_delay_ms: u64,
        failed_retention: usize,
        completed_retention: usize,
    ) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self {
            conn,
            max_retry_attempts,
            retry_base_delay_ms,
            failed_retention,
            completed_retention,
        })
    }

    async fn push_capped(
        &self,
        conn: &mut redis::aio::ConnectionManager,
        list_key: &str,
        entry: &Outcome,
        retention: usize,
    ) -> Result<(), QueueError> {
        use redis::AsyncCommands;
        let raw = serde_json::to_string(entry)?;
        let _: () = conn.lpush(list_key, raw).await?;
        let _: () = conn.ltrim(list_key, 0, retention as isize - 1).await?;
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, job: &Job) -> Result<bool, QueueError> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();

        let exists: bool = conn.hexists(jobs_key(&job.location_id), &job.job_key).await?;
        if exists {
            debug!(job_key = %job.job_key, "Job already pending, skipping duplicate enqueue");
            return Ok(false);
        }

        let raw = serde_json::to_string(job)?;
        let _: () = conn.hset(jobs_key(&job.location_id), &job.job_key, raw).await?;
        let score = priority_score(job.priority);
        let _: () = conn
            .zadd(pending_key(&job.location_id), &job.job_key, score)
            .await?;
        Ok(true)
    }

    async fn dequeue_next(&self, location_id: &str) -> Result<Option<Job>, QueueError> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();

        let popped: Vec<(String, f64)> = conn.zpopmax(pending_key(location_id), 1).await?;
        let Some((job_key, _score)) = popped.into_iter().next() else {
            return Ok(None);
        };

        let raw: Option<String> = conn.hget(jobs_key(location_id), &job_key).await?;
        let Some(raw) = raw else {
            warn!(job_key, "Dequeued job key had no hash entry, dropping");
            return Ok(None);
        };

        let mut job: Job = serde_json::from_str(&raw)?;
        job.state = JobState::Active;
        let raw = serde_json::to_string(&job)?;
        let _: () = conn.hset(jobs_key(location_id), &job_key, raw).await?;
        Ok(Some(job))
    }

    async fn complete_job(&self, job: &Job, result: &serde_json::Value) -> Result<(), QueueError> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();

        let outcome = Outcome {
            job_key: job.job_key.clone(),
            equipment_id: job.equipment_id.clone(),
            reason: result.to_string(),
        };
        self.push_capped(
            &mut conn,
            &completed_key(&job.location_id),
            &outcome,
            self.completed_retention,
        )
        .await?;

        let _: () = conn.hdel(jobs_key(&job.location_id), &job.job_key).await?;
        let _: i32 = conn
            .publish(events_channel(&job.location_id), serde_json::to_string(&outcome)?)
            .await?;
        debug!(job_key = %job.job_key, "Job completed");
        Ok(())
    }

    async fn fail_job(&self, job: &Job, error_message: &str) -> Result<RetryDecision, QueueError> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();

        let attempts = job.attempts + 1;
        if attempts < self.max_retry_attempts {
            let mut retried = job.clone();
            retried.attempts = attempts;
            retried.state = JobState::Waiting;
            let raw = serde_json::to_string(&retried)?;
            let _: () = conn.hset(jobs_key(&job.location_id), &job.job_key, raw).await?;
            let delay = backoff_delay(attempts, self.retry_base_delay_ms);
            debug!(job_key = %job.job_key, attempts, delay_ms = delay.as_millis() as u64, "Job failed, will retry");
            return Ok(RetryDecision::RetryAfter(delay));
        }

        let outcome = Outcome {
            job_key: job.job_key.clone(),
            equipment_id: job.equipment_id.clone(),
            reason: error_message.to_string(),
        };
        self.push_capped(
            &mut conn,
            &failed_key(&job.location_id),
            &outcome,
            self.failed_retention,
        )
        .await?;
        let _: () = conn.hdel(jobs_key(&job.location_id), &job.job_key).await?;
        let _: i32 = conn
            .publish(events_channel(&job.location_id), serde_json::to_string(&outcome)?)
            .await?;
        warn!(job_key = %job.job_key, attempts, "Job exhausted retry attempts, giving up");
        Ok(RetryDecision::GiveUp)
    }
}

#[cfg(any(test, feature = "testing"))]
pub mod fakes {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeJobQueue {
        pending: Mutex<HashMap<String, Vec<Job>>>,
        pub completed: Mutex<Vec<Job>>,
        pub failed: Mutex<Vec<Job>>,
        pub max_retry_attempts: u32,
    }

    impl FakeJobQueue {
        pub fn new(max_retry_attempts: u32) -> Self {
            Self {
                max_retry_attempts,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl JobQueue for FakeJobQueue {
        async fn enqueue(&self, job: &Job) -> Result<bool, QueueError> {
            let mut pending = self.pending.lock().unwrap();
            let list = pending.entry(job.location_id.clone()).or_default();
            if list.iter().any(|j| j.job_key == job.job_key) {
                return Ok(false);
            }
            list.push(job.clone());
            list.sort_by(|a, b| b.priority.cmp(&a.priority));
            Ok(true)
        }

        async fn dequeue_next(&self, location_id: &str) -> Result<Option<Job>, QueueError> {
            let mut pending = self.pending.lock().unwrap();
            let list = pending.entry(location_id.to_string()).or_default();
            if list.is_empty() {
                return Ok(None);
            }
            let mut job = list.remove(0);
            job.state = JobState::Active;
            Ok(Some(job))
        }

        async fn complete_job(&self, job: &Job, _result: &serde_json::Value) -> Result<(), QueueError> {
            self.completed.lock().unwrap().push(job.clone());
            Ok(())
        }

        async fn fail_job(&self, job: &Job, _error_message: &str) -> Result<RetryDecision, QueueError> {
            let attempts = job.attempts + 1;
            if attempts < self.max_retry_attempts {
                let mut retried = job.clone();
                retried.attempts = attempts;
                retried.state = JobState::Waiting;
                let mut pending = self.pending.lock().unwrap();
                pending.entry(job.location_id.clone()).or_default().push(retried);
                Ok(RetryDecision::RetryAfter(backoff_delay(attempts, 2_000)))
            } else {
                self.failed.lock().unwrap().push(job.clone());
                Ok(RetryDecision::GiveUp)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fakes::FakeJobQueue;
    use super::*;
    use crate::types::JobType;

    fn job(priority: i32) -> Job {
        Job::new("L1-E1-boiler", "E1", "L1", JobType::Scheduled, priority, "test")
    }

    #[tokio::test]
    async fn duplicate_job_key_is_deduped() {
        let q = FakeJobQueue::new(3);
        assert!(q.enqueue(&job(5)).await.unwrap());
        assert!(!q.enqueue(&job(5)).await.unwrap());
    }

    #[tokio::test]
    async fn higher_priority_dequeues_first() {
        let q = FakeJobQueue::new(3);
        let mut low = job(5);
        low.job_key = "L1-E1-pump".into();
        let mut high = job(20);
        high.job_key = "L1-E2-boiler".into();
        q.enqueue(&low).await.unwrap();
        q.enqueue(&high).await.unwrap();

        let first = q.dequeue_next("L1").await.unwrap().unwrap();
        assert_eq!(first.job_key, "L1-E2-boiler");
    }

    #[tokio::test]
    async fn retry_then_give_up_after_max_attempts() {
        let q = FakeJobQueue::new(3);
        let mut j = job(10);
        j.attempts = 2;
        let decision = q.fail_job(&j, "boom").await.unwrap();
        assert_eq!(decision, RetryDecision::GiveUp);
        assert_eq!(q.failed.lock().unwrap().len(), 1);
    }

    #[test]
    fn backoff_doubles_each_attempt() {
        assert_eq!(backoff_delay(1, 2_000), Duration::from_millis(2_000));
        assert_eq!(backoff_delay(2, 2_000), Duration::from_millis(4_000));
        assert_eq!(backoff_delay(3, 2_000), Duration::from_millis(8_000));
    }
}
