//! C7 — Worker Pool.
//!
//! Bounded-concurrency consumer per location: pulls the highest-priority
//! job, resolves its control algorithm, merges metrics and settings into an
//! evaluation context, runs the algorithm, filters the output through the
//! equipment-type whitelist, writes it to both gateways, and updates job
//! status. A panicking or erroring algorithm degrades to a conservative
//! safe-state write rather than leaving the equipment at its last command.

use crate::processor::InFlightSet;
use crate::queue::{JobQueue, RetryDecision};
use crate::registry::{AlgorithmContext, AlgorithmRegistry};
use crate::store::{MetricCommandStore, SharedStateStore};
use crate::types::{CommandField, CommandValue, Equipment, Job, JobStatus};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

pub struct WorkerPool {
    location_id: String,
    equipment_by_id: std::collections::HashMap<String, Equipment>,
    registry: Arc<AlgorithmRegistry>,
    queue: Arc<dyn JobQueue>,
    metric_store: Arc<dyn MetricCommandStore>,
    state_store: Arc<dyn SharedStateStore>,
    in_flight: InFlightSet,
    concurrency: Arc<Semaphore>,
    job_status_ttl_secs: u64,
}

impl WorkerPool {
    pub fn new(
        location_id: impl Into<String>,
        equipment: Vec<Equipment>,
        registry: Arc<AlgorithmRegistry>,
        queue: Arc<dyn JobQueue>,
        metric_store: Arc<dyn MetricCommandStore>,
        state_store: Arc<dyn SharedStateStore>,
        in_flight: InFlightSet,
        max_concurrency: usize,
        job_status_ttl_secs: u64,
    ) -> Self {
        Self {
            location_id: location_id.into(),
            equipment_by_id: equipment.into_iter().map(|e| (e.equipment_id.clone(), e)).collect(),
            registry,
            queue,
            metric_store,
            state_store,
            in_flight,
            concurrency: Arc::new(Semaphore::new(max_concurrency)),
            job_status_ttl_secs,
        }
    }

    /// Drain whatever's pending for this location right now, honoring the
    /// concurrency cap. Intended to be called on a short poll loop by the
    /// background task that owns this pool.
    pub async fn drain_once(self: Arc<Self>) {
        loop {
            let Ok(permit) = self.concurrency.clone().try_acquire_owned() else {
                return;
            };
            let Ok(Some(job)) = self.queue.dequeue_next(&self.location_id).await else {
                drop(permit);
                return;
            };
            let this = self.clone();
            tokio::spawn(async move {
                this.run_job(job).await;
                drop(permit);
            });
        }
    }

    async fn run_job(&self, job: Job) {
        let Some(equipment) = self.equipment_by_id.get(&job.equipment_id).cloned() else {
            warn!(job_key = %job.job_key, "Job references unknown equipment, dropping");
            self.in_flight.remove(&job.job_key);
            return;
        };

        let result = self.evaluate_and_write(&equipment, &job).await;

        match result {
            Ok(written) => {
                let _ = self
                    .queue
                    .complete_job(&job, &serde_json::json!({ "fields_written": written }))
                    .await;
                let _ = self
                    .state_store
                    .put_status(
                        &JobStatus::completed(job.job_key.clone(), serde_json::json!({ "fields_written": written })),
                        self.job_status_ttl_secs,
                    )
                    .await;
                self.in_flight.remove(&job.job_key);
                info!(job_key = %job.job_key, written, "Job completed");
            }
            Err(e) => {
                warn!(job_key = %job.job_key, error = %e, "Job evaluation failed, writing conservative safe state");
                self.write_conservative_state(&equipment).await;

                match self.queue.fail_job(&job, &e.to_string()).await {
                    Ok(RetryDecision::RetryAfter(delay)) => {
                        let queue = self.queue.clone();
                        let mut retry_job = job.clone();
                        retry_job.attempts += 1;
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            let _ = queue.enqueue(&retry_job).await;
                        });
                    }
                    Ok(RetryDecision::GiveUp) => {
                        let _ = self
                            .state_store
                            .put_status(
                                &JobStatus::failed(job.job_key.clone(), e.to_string()),
                                self.job_status_ttl_secs,
                            )
                            .await;
                        self.in_flight.remove(&job.job_key);
                        error!(job_key = %job.job_key, "Job exhausted retries, holding equipment at safe state");
                    }
                    Err(queue_err) => {
                        error!(job_key = %job.job_key, error = %queue_err, "Could not record job failure in queue");
                        self.in_flight.remove(&job.job_key);
                    }
                }
            }
        }
    }

    async fn evaluate_and_write(&self, equipment: &Equipment, job: &Job) -> Result<usize, WorkerError> {
        let metrics = self
            .metric_store
            .read_latest_metrics(&equipment.equipment_id, &self.location_id, 15)
            .await;
        let settings = self
            .state_store
            .get_settings(&equipment.equipment_id)
            .await?
            .unwrap_or_else(|| crate::types::EquipmentSettings::new("system"));

        let state_key = format!("algo_state:{}", equipment.equipment_id);
        let persisted_state = self
            .state_store
            .get_equipment_result_cache(&state_key)
            .await?
            .unwrap_or(serde_json::Value::Null);

        let algorithm = self.registry.resolve(equipment);
        let ctx = AlgorithmContext {
            equipment,
            metrics: &metrics,
            settings: &settings,
            state: persisted_state,
            now: chrono::Utc::now(),
        };

        let output = catch_unwind(AssertUnwindSafe(|| algorithm.evaluate(&ctx)))
            .map_err(|_| WorkerError::AlgorithmPanicked(algorithm.name().to_string()))?;

        self.state_store
            .put_equipment_result_cache(&state_key, &output.state, 24 * 3600)
            .await?;

        let filtered = crate::registry::whitelist::apply(equipment.equipment_type, output.commands);
        let results = self
            .metric_store
            .write_commands(
                &equipment.equipment_id,
                &equipment.location_id,
                equipment.equipment_type,
                job_source_tag(job),
                &filtered,
            )
            .await;

        let failures: Vec<&String> = results.iter().filter(|(_, r)| r.is_err()).map(|(k, _)| k).collect();
        if !failures.is_empty() {
            return Err(WorkerError::PartialWriteFailure(failures.len()));
        }

        // Reflect the applied state back to C2 with a fresh lastModified
        // before the job is acknowledged, so a UI poll that sees the job
        // complete also sees post-apply settings.
        let mut applied = settings.clone();
        applied.last_modified = crate::types::now_rfc3339();
        applied.modified_by = "worker-pool".to_string();
        self.state_store.put_settings(&equipment.equipment_id, &applied).await?;

        Ok(filtered.len())
    }

    async fn write_conservative_state(&self, equipment: &Equipment) {
        let safe_fields: Vec<CommandField> = crate::registry::whitelist::fields_for(equipment.equipment_type)
            .iter()
            .filter(|spec| spec.name.to_ascii_lowercase().contains("enable"))
            .map(|spec| CommandField {
                command_type: spec.name.to_string(),
                value: CommandValue::QuotedBool(false),
            })
            .collect();

        if safe_fields.is_empty() {
            return;
        }

        let _ = self
            .metric_store
            .write_commands(
                &equipment.equipment_id,
                &equipment.location_id,
                equipment.equipment_type,
                "worker-failsafe",
                &safe_fields,
            )
            .await;
    }
}

fn job_source_tag(job: &Job) -> &'static str {
    match job.job_type {
        crate::types::JobType::OperatorCommand => "ui",
        crate::types::JobType::Scheduled => "scheduled",
        crate::types::JobType::EmergencyShutdown => "safety",
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("algorithm {0} panicked during evaluation")]
    AlgorithmPanicked(String),
    #[error("{0} command field(s) failed to write")]
    PartialWriteFailure(usize),
    #[error(transparent)]
    State(#[from] crate::store::state::StateStoreError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::fakes::FakeJobQueue;
    use crate::registry::default_registry;
    use crate::store::state::fakes::FakeStateStore;
    use crate::store::timeseries::fakes::FakeMetricStore;
    use crate::types::{EquipmentRole, EquipmentType, JobType, Scalar};
    use dashmap::DashMap;

    fn equip() -> Equipment {
        Equipment {
            equipment_id: "E1".into(),
            location_id: "L1".into(),
            equipment_type: EquipmentType::Boiler,
            subtype: None,
            role: EquipmentRole::Standalone,
        }
    }

    #[tokio::test]
    async fn successful_job_completes_and_writes_whitelisted_fields() {
        let metric_store = Arc::new(FakeMetricStore::default());
        let mut metrics = crate::types::MetricMap::new();
        metrics.insert("waterTemp".into(), Scalar::Num(150.0));
        metric_store.set_metrics("E1", metrics);

        let state_store = Arc::new(FakeStateStore::default());
        let queue = Arc::new(FakeJobQueue::new(3));
        let in_flight: InFlightSet = Arc::new(DashMap::new());
        in_flight.insert("L1-E1-boiler".to_string(), std::time::Instant::now());

        let pool = Arc::new(WorkerPool::new(
            "L1",
            vec![equip()],
            Arc::new(default_registry()),
            queue.clone(),
            metric_store.clone(),
            state_store,
            in_flight.clone(),
            4,
            300,
        ));

        let job = Job::new("L1-E1-boiler", "E1", "L1", JobType::Scheduled, 16, "deviation");
        pool.run_job(job).await;

        assert_eq!(queue.completed.lock().unwrap().len(), 1);
        assert!(!in_flight.contains_key("L1-E1-boiler"));
        let written = metric_store.written.lock().unwrap();
        assert_eq!(written.len(), 1);
        assert!(written[0].2.iter().any(|c| c.command_type == "firing"));
    }
}
