//! C9 — Batch Enqueuer.
//!
//! External periodic entry point (an outside scheduler hitting
//! `GET /cron-run-logic`, or a CLI subcommand invoking the same function
//! directly). Fans out across every configured location using the same
//! smart-gated enqueue path the per-location tickers use, then kicks off
//! lead-lag maintenance. Guarded by a single-flight C2 lock so two
//! overlapping invocations don't double-enqueue.

use crate::leadlag::LeadLagManager;
use crate::processor::LocationProcessor;
use crate::store::SharedStateStore;
use crate::types::{Equipment, LeadLagGroup, RequestId};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

const BATCH_LOCK_KEY: &str = "batch";
const LAST_RUN_CACHE_KEY: &str = "batch:last_run_at";

/// Response envelope for `GET /cron-run-logic`'s batch path.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub success: bool,
    pub skipped: bool,
    pub time_since_last_run: Option<i64>,
    pub queued: usize,
    pub already_queued: usize,
    pub errors: Vec<String>,
    pub duration_ms: u128,
    pub request_id: RequestId,
}

pub struct BatchEnqueuer {
    state_store: Arc<dyn SharedStateStore>,
    processors: Vec<Arc<LocationProcessor>>,
    leadlag: Arc<LeadLagManager>,
    leadlag_groups: Vec<LeadLagGroup>,
    batch_lock_ttl_secs: u64,
}

impl BatchEnqueuer {
    pub fn new(
        state_store: Arc<dyn SharedStateStore>,
        processors: Vec<Arc<LocationProcessor>>,
        leadlag: Arc<LeadLagManager>,
        leadlag_groups: Vec<LeadLagGroup>,
        batch_lock_ttl_secs: u64,
    ) -> Self {
        Self {
            state_store,
            processors,
            leadlag,
            leadlag_groups,
            batch_lock_ttl_secs,
        }
    }

    /// Run one batch pass. `force` bypasses only the batch single-flight
    /// lock (useful for an operator-triggered re-run); it never bypasses
    /// the lead-lag manager's own lock, which still governs its cadence.
    pub async fn run(&self, now_unix: i64, force: bool) -> Result<BatchResult, BatchError> {
        let started = Instant::now();
        let request_id = RequestId::new();

        let lock = if force {
            None
        } else {
            match self.state_store.acquire_lock(BATCH_LOCK_KEY, self.batch_lock_ttl_secs).await? {
                Some(lock) => Some(lock),
                None => {
                    let since = self.time_since_last_run(now_unix).await?;
                    info!(request_id = %request_id, time_since_last_run = ?since, "Batch run skipped, another invocation holds the lock");
                    return Ok(BatchResult {
                        success: true,
                        skipped: true,
                        time_since_last_run: since,
                        queued: 0,
                        already_queued: 0,
                        errors: vec![],
                        duration_ms: started.elapsed().as_millis(),
                        request_id,
                    });
                }
            }
        };

        let result = self.run_locked(now_unix, request_id).await;

        // Exit handler: release whatever lock we hold regardless of outcome.
        if let Some(lock) = lock {
            if let Err(e) = self.state_store.release_lock(&lock).await {
                warn!(request_id = %request_id, error = %e, "Failed to release batch lock");
            }
        }

        let mut outcome = result?;
        outcome.duration_ms = started.elapsed().as_millis();
        info!(
            request_id = %request_id,
            duration_ms = outcome.duration_ms,
            queued = outcome.queued,
            already_queued = outcome.already_queued,
            "Batch run complete"
        );
        Ok(outcome)
    }

    async fn run_locked(&self, now_unix: i64, request_id: RequestId) -> Result<BatchResult, BatchError> {
        self.refresh_equipment_list_cache().await?;

        let mut queued = 0;
        let mut already_queued = 0;
        let mut errors = Vec::new();
        for processor in &self.processors {
            let summary = processor.tick_all_once(Some(request_id)).await;
            queued += summary.queued;
            already_queued += summary.already_queued;
            errors.extend(summary.errors);
        }

        if let Err(e) = self.leadlag.run_once(&self.leadlag_groups, now_unix).await {
            warn!(request_id = %request_id, error = %e, "Lead-lag maintenance pass failed during batch run");
            errors.push(e.to_string());
        }

        self.state_store
            .put_equipment_result_cache(LAST_RUN_CACHE_KEY, &serde_json::json!({ "at": now_unix }), 24 * 3600)
            .await?;

        Ok(BatchResult {
            success: true,
            skipped: false,
            time_since_last_run: None,
            queued,
            already_queued,
            errors,
            duration_ms: 0,
            request_id,
        })
    }

    async fn refresh_equipment_list_cache(&self) -> Result<(), BatchError> {
        let all: Vec<Equipment> = self
            .processors
            .iter()
            .flat_map(|p| p.equipment().to_vec())
            .collect();
        self.state_store
            .put_equipment_list_cache(&all, crate::config::defaults::EQUIPMENT_LIST_CACHE_TTL_SECS)
            .await?;
        Ok(())
    }

    async fn time_since_last_run(&self, now_unix: i64) -> Result<Option<i64>, BatchError> {
        let cached = self.state_store.get_equipment_result_cache(LAST_RUN_CACHE_KEY).await?;
        Ok(cached.and_then(|v| v.get("at").and_then(|n| n.as_i64())).map(|at| now_unix - at))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error(transparent)]
    State(#[from] crate::store::state::StateStoreError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::SmartGate;
    use crate::queue::fakes::FakeJobQueue;
    use crate::store::state::fakes::FakeStateStore;
    use crate::store::timeseries::fakes::FakeMetricStore;
    use crate::types::{EquipmentRole, EquipmentType};
    use dashmap::DashMap;

    fn equip(id: &str) -> Equipment {
        Equipment {
            equipment_id: id.to_string(),
            location_id: "L1".to_string(),
            equipment_type: EquipmentType::Pump,
            subtype: None,
            role: EquipmentRole::Standalone,
        }
    }

    fn enqueuer(state_store: Arc<FakeStateStore>) -> BatchEnqueuer {
        let metric_store = Arc::new(FakeMetricStore::default());
        let gate = Arc::new(SmartGate::new(30));
        let queue = Arc::new(FakeJobQueue::new(3));
        let in_flight = Arc::new(DashMap::new());
        let processor = Arc::new(LocationProcessor::new(
            "L1",
            vec![equip("P1")],
            gate,
            metric_store.clone(),
            state_store.clone(),
            queue,
            in_flight,
            15,
            5,
        ));
        let leadlag = Arc::new(LeadLagManager::new(
            state_store.clone(),
            metric_store,
            vec![equip("P1")],
            crate::config::defaults::LEADLAG_LOCK_TTL_SECS,
        ));
        BatchEnqueuer::new(state_store, vec![processor], leadlag, vec![], crate::config::defaults::BATCH_LOCK_TTL_SECS)
    }

    #[tokio::test]
    async fn first_run_processes_every_location() {
        let state_store = Arc::new(FakeStateStore::default());
        let enqueuer = enqueuer(state_store);
        let result = enqueuer.run(1_000, false).await.unwrap();
        assert!(!result.skipped);
        assert_eq!(result.queued, 1);
        assert_eq!(result.already_queued, 0);
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn overlapping_run_is_reported_as_skipped() {
        let state_store = Arc::new(FakeStateStore::default());
        let held = state_store.acquire_lock(BATCH_LOCK_KEY, 180).await.unwrap();
        assert!(held.is_some());

        let enqueuer = enqueuer(state_store);
        let result = enqueuer.run(1_000, false).await.unwrap();
        assert!(result.success);
        assert!(result.skipped);
        assert_eq!(result.queued, 0);
    }

    #[tokio::test]
    async fn force_bypasses_the_batch_lock() {
        let state_store = Arc::new(FakeStateStore::default());
        let held = state_store.acquire_lock(BATCH_LOCK_KEY, 180).await.unwrap();
        assert!(held.is_some());

        let enqueuer = enqueuer(state_store);
        let result = enqueuer.run(1_000, true).await.unwrap();
        assert!(!result.skipped, "force must bypass the batch lock");
        assert_eq!(result.queued, 1);
    }
}
