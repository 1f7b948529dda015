//! C6 — Location Processor.
//!
//! One processor owns all equipment at a single location. Each piece of
//! equipment gets its own ticker at its type's cadence; every tick reads
//! metrics, consults the smart gate, and enqueues a job if warranted. An
//! in-flight set keyed by job key prevents the same equipment from being
//! enqueued twice while a previous job is still outstanding, with a
//! wall-clock timeout per equipment category backstopping missed
//! completion events.

use crate::gate::SmartGate;
use crate::queue::JobQueue;
use crate::store::{MetricCommandStore, SharedStateStore};
use crate::types::{Equipment, Job, JobStatus, JobType, RequestId};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Job keys currently believed to be in flight, with the time they were
/// enqueued. Shared between the processor (which inserts) and the worker
/// pool (which removes on completion or failure).
pub type InFlightSet = Arc<DashMap<String, Instant>>;

pub struct LocationProcessor {
    location_id: String,
    equipment: Vec<Equipment>,
    gate: Arc<SmartGate>,
    metric_store: Arc<dyn MetricCommandStore>,
    state_store: Arc<dyn SharedStateStore>,
    queue: Arc<dyn JobQueue>,
    in_flight: InFlightSet,
    read_window_minutes: i64,
    recent_command_window_minutes: i64,
}

impl LocationProcessor {
    pub fn new(
        location_id: impl Into<String>,
        equipment: Vec<Equipment>,
        gate: Arc<SmartGate>,
        metric_store: Arc<dyn MetricCommandStore>,
        state_store: Arc<dyn SharedStateStore>,
        queue: Arc<dyn JobQueue>,
        in_flight: InFlightSet,
        read_window_minutes: i64,
        recent_command_window_minutes: i64,
    ) -> Self {
        Self {
            location_id: location_id.into(),
            equipment,
            gate,
            metric_store,
            state_store,
            queue,
            in_flight,
            read_window_minutes,
            recent_command_window_minutes,
        }
    }

    pub fn in_flight_handle(&self) -> InFlightSet {
        self.in_flight.clone()
    }

    /// The queue this processor enqueues onto, for callers (the HTTP API)
    /// that need to push an operator-originated job onto the same queue an
    /// equipment's own ticker uses.
    pub fn queue_handle(&self) -> Arc<dyn JobQueue> {
        self.queue.clone()
    }

    /// Spawn one ticker task per piece of equipment. Returns when the
    /// cancellation token fires; callers typically `tokio::select!` this
    /// against a shutdown signal.
    pub async fn run(self: Arc<Self>) {
        let mut handles = Vec::with_capacity(self.equipment.len());
        for equipment in self.equipment.clone() {
            let this = self.clone();
            handles.push(tokio::spawn(async move {
                this.run_equipment_ticker(equipment).await;
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Run one gating pass over every piece of equipment at this location,
    /// synchronously. This is the entry point the batch enqueuer drives
    /// instead of waiting on each equipment's own ticker — same smart
    /// gating, same enqueue path, just invoked externally rather than on
    /// a timer.
    pub async fn tick_all_once(&self, request_id: Option<RequestId>) -> TickSummary {
        let mut summary = TickSummary::default();
        for equipment in &self.equipment {
            match self.tick_once(equipment, request_id).await {
                Ok(TickOutcome::Enqueued) => summary.queued += 1,
                Ok(TickOutcome::AlreadyQueued) => summary.already_queued += 1,
                Ok(TickOutcome::NotWarranted) => {}
                Err(e) => {
                    warn!(
                        equipment_id = %equipment.equipment_id,
                        location_id = %self.location_id,
                        error = %e,
                        "Batch-driven tick failed"
                    );
                    summary.errors.push(e.to_string());
                }
            }
        }
        summary
    }

    pub fn location_id(&self) -> &str {
        &self.location_id
    }

    pub fn equipment(&self) -> &[Equipment] {
        &self.equipment
    }

    /// Run a single gating pass for one piece of equipment by id, if this
    /// processor owns it. Used by the single-equipment cron path, which
    /// addresses equipment without already knowing its location.
    pub async fn tick_equipment(
        &self,
        equipment_id: &str,
        request_id: Option<RequestId>,
    ) -> Option<Result<TickOutcome, ProcessorError>> {
        let equipment = self.equipment.iter().find(|e| e.equipment_id == equipment_id)?.clone();
        Some(self.tick_once(&equipment, request_id).await)
    }

    async fn run_equipment_ticker(&self, equipment: Equipment) {
        let period = equipment.equipment_type.tick_period();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.tick_once(&equipment, None).await {
                warn!(
                    equipment_id = %equipment.equipment_id,
                    location_id = %self.location_id,
                    error = %e,
                    "Processor tick failed"
                );
            }
        }
    }

    async fn tick_once(
        &self,
        equipment: &Equipment,
        request_id: Option<RequestId>,
    ) -> Result<TickOutcome, ProcessorError> {
        let job_key = equipment.job_key();

        if let Some(enqueued_at) = self.in_flight.get(&job_key).map(|v| *v) {
            if enqueued_at.elapsed() < equipment.equipment_type.job_timeout() {
                debug!(job_key, "Equipment already has an in-flight job, skipping tick");
                return Ok(TickOutcome::AlreadyQueued);
            }
            warn!(job_key, "In-flight job exceeded its timeout, clearing and re-evaluating");
            self.in_flight.remove(&job_key);
        }

        let metrics = self
            .metric_store
            .read_latest_metrics(&equipment.equipment_id, &self.location_id, self.read_window_minutes)
            .await;
        let settings = self
            .state_store
            .get_settings(&equipment.equipment_id)
            .await?
            .unwrap_or_else(|| crate::types::EquipmentSettings::new("system"));
        let recent_ui_commands = self
            .metric_store
            .read_recent_ui_commands(&equipment.equipment_id, self.recent_command_window_minutes)
            .await;

        let now = chrono::Utc::now().timestamp();
        let decision = self.gate.evaluate(equipment, &metrics, &settings, recent_ui_commands, now);

        if !decision.should_process {
            return Ok(TickOutcome::NotWarranted);
        }

        let job_type = if recent_ui_commands > 0 {
            JobType::OperatorCommand
        } else if decision.priority >= crate::config::defaults::priority::SAFETY {
            JobType::EmergencyShutdown
        } else {
            JobType::Scheduled
        };

        let mut job = Job::new(
            job_key.clone(),
            equipment.equipment_id.clone(),
            equipment.location_id.clone(),
            job_type,
            decision.priority,
            decision.reason.clone(),
        );
        if let Some(request_id) = request_id {
            job = job.with_request_id(request_id);
        }

        let enqueued = self.queue.enqueue(&job).await?;
        if enqueued {
            self.in_flight.insert(job_key.clone(), Instant::now());
            self.state_store
                .put_status(&JobStatus::waiting(job_key.clone()), Duration::from_secs(300).as_secs())
                .await?;
            info!(job_key, priority = decision.priority, reason = %decision.reason, "Job enqueued");
            Ok(TickOutcome::Enqueued)
        } else {
            Ok(TickOutcome::AlreadyQueued)
        }
    }
}

/// What a single equipment's gating pass decided, surfaced for the batch
/// enqueuer's response envelope (`queued`/`alreadyQueued` counts).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Enqueued,
    AlreadyQueued,
    NotWarranted,
}

#[derive(Debug, Clone, Default)]
pub struct TickSummary {
    pub queued: usize,
    pub already_queued: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error(transparent)]
    State(#[from] crate::store::state::StateStoreError),
    #[error(transparent)]
    Queue(#[from] crate::queue::QueueError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::fakes::FakeJobQueue;
    use crate::store::state::fakes::FakeStateStore;
    use crate::store::timeseries::fakes::FakeMetricStore;
    use crate::types::{EquipmentRole, EquipmentType, Scalar};

    fn processor(equipment: Vec<Equipment>) -> (Arc<LocationProcessor>, Arc<FakeJobQueue>, Arc<FakeMetricStore>) {
        let gate = Arc::new(SmartGate::new(30));
        let metric_store = Arc::new(FakeMetricStore::default());
        let state_store = Arc::new(FakeStateStore::default());
        let queue = Arc::new(FakeJobQueue::new(3));
        let in_flight: InFlightSet = Arc::new(DashMap::new());
        let processor = Arc::new(LocationProcessor::new(
            "L1",
            equipment,
            gate,
            metric_store.clone(),
            state_store,
            queue.clone(),
            in_flight,
            15,
            5,
        ));
        (processor, queue, metric_store)
    }

    fn equip() -> Equipment {
        Equipment {
            equipment_id: "E1".into(),
            location_id: "L1".into(),
            equipment_type: EquipmentType::AirHandler,
            subtype: None,
            role: EquipmentRole::Standalone,
        }
    }

    #[tokio::test]
    async fn first_tick_always_enqueues_a_baseline_job() {
        let (processor, queue, metric_store) = processor(vec![equip()]);
        let mut metrics = crate::types::MetricMap::new();
        metrics.insert("supply".into(), Scalar::Num(60.0));
        metrics.insert("room".into(), Scalar::Num(72.0));
        metric_store.set_metrics("E1", metrics);

        let outcome = processor.tick_once(&equip(), None).await.unwrap();
        assert_eq!(outcome, TickOutcome::Enqueued);
        assert_eq!(queue.completed.lock().unwrap().len(), 0);
        assert!(processor.in_flight.contains_key("L1-E1-air_handler"));
    }

    #[tokio::test]
    async fn second_tick_with_in_flight_job_is_skipped() {
        let (processor, _queue, metric_store) = processor(vec![equip()]);
        let mut metrics = crate::types::MetricMap::new();
        metrics.insert("supply".into(), Scalar::Num(60.0));
        metrics.insert("room".into(), Scalar::Num(72.0));
        metric_store.set_metrics("E1", metrics);

        processor.tick_once(&equip(), None).await.unwrap();
        let first_marker = *processor.in_flight.get("L1-E1-air_handler").unwrap();
        let outcome = processor.tick_once(&equip(), None).await.unwrap();
        assert_eq!(outcome, TickOutcome::AlreadyQueued);
        let second_marker = *processor.in_flight.get("L1-E1-air_handler").unwrap();
        assert_eq!(first_marker, second_marker, "in-flight marker must not be replaced while still active");
    }

    #[tokio::test]
    async fn tick_all_once_summarizes_queued_and_already_queued() {
        let (processor, _queue, metric_store) = processor(vec![equip()]);
        let mut metrics = crate::types::MetricMap::new();
        metrics.insert("supply".into(), Scalar::Num(60.0));
        metrics.insert("room".into(), Scalar::Num(72.0));
        metric_store.set_metrics("E1", metrics);

        let first = processor.tick_all_once(None).await;
        assert_eq!(first.queued, 1);
        assert_eq!(first.already_queued, 0);

        let second = processor.tick_all_once(None).await;
        assert_eq!(second.queued, 0);
        assert_eq!(second.already_queued, 1);
    }
}
