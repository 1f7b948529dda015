//! C8 — Lead-Lag Manager.
//!
//! Tracks paired-equipment groups (boilers, pumps, chillers sharing a
//! function), rotates the lead on a configured schedule, and fails over to
//! a healthy lag member when the current lead exhibits a fault signature.
//! Mirrors the teacher's periodic-reconciliation shape: acquire the shared
//! lock, run one pass over every group, and let the lock expire on its own
//! TTL rather than releasing it, which is what enforces the "at most every
//! 10 minutes" cadence. Never bypasses C7 — only `EquipmentSettings.isLead`
//! is mutated here; the next processor tick is what actually re-evaluates
//! equipment.

use crate::config::defaults;
use crate::gate::safety_trigger;
use crate::store::{MetricCommandStore, SharedStateStore};
use crate::types::{Equipment, EquipmentSettings, FailoverState, LeadLagGroup};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

const LOCK_KEY: &str = "leadlag";
const FAULT_READ_WINDOW_MINUTES: i64 = 10;

fn group_cache_key(group_id: &str) -> String {
    format!("leadlag_group:{group_id}")
}

pub struct LeadLagManager {
    state_store: Arc<dyn SharedStateStore>,
    metric_store: Arc<dyn MetricCommandStore>,
    equipment_by_id: HashMap<String, Equipment>,
    lock_ttl_secs: u64,
}

impl LeadLagManager {
    pub fn new(
        state_store: Arc<dyn SharedStateStore>,
        metric_store: Arc<dyn MetricCommandStore>,
        equipment: Vec<Equipment>,
        lock_ttl_secs: u64,
    ) -> Self {
        Self {
            state_store,
            metric_store,
            equipment_by_id: equipment.into_iter().map(|e| (e.equipment_id.clone(), e)).collect(),
            lock_ttl_secs,
        }
    }

    /// One reconciliation pass over every configured group, guarded by the
    /// shared lead-lag lock. Returns `false` without touching any group if
    /// the lock is already held elsewhere — contention is a skip, not an
    /// error, so a caller on a tight cadence doesn't need to distinguish.
    ///
    /// Deliberately never releases the lock: its TTL is the cadence
    /// enforcement ("at most every 10 minutes"), so letting it expire
    /// naturally is what keeps a caller invoked more often than that from
    /// re-running early, whether or not individual groups reconciled
    /// cleanly.
    pub async fn run_once(&self, groups: &[LeadLagGroup], now_unix: i64) -> Result<bool, LeadLagError> {
        let Some(_lock) = self.state_store.acquire_lock(LOCK_KEY, self.lock_ttl_secs).await? else {
            return Ok(false);
        };

        for group in groups {
            if let Err(e) = self.reconcile_group(group, now_unix).await {
                warn!(group_id = %group.group_id, error = %e, "Lead-lag reconciliation failed for group");
            }
        }

        Ok(true)
    }

    async fn reconcile_group(&self, group: &LeadLagGroup, now_unix: i64) -> Result<(), LeadLagError> {
        let persisted = self
            .state_store
            .get_equipment_result_cache(&group_cache_key(&group.group_id))
            .await?
            .and_then(|v| serde_json::from_value::<LeadLagGroup>(v).ok())
            .unwrap_or_else(|| group.clone());

        let mut member_healthy = HashMap::with_capacity(persisted.members.len());
        for member_id in &persisted.members {
            member_healthy.insert(member_id.clone(), self.is_healthy(member_id).await);
        }

        let lead_healthy = persisted
            .lead_equipment_id
            .as_ref()
            .map(|id| member_healthy.get(id).copied().unwrap_or(false))
            .unwrap_or(false);

        let mut next = persisted.clone();

        if !lead_healthy {
            let healthy_lag = persisted
                .lag_members()
                .find(|id| member_healthy.get(*id).copied().unwrap_or(false))
                .cloned();

            match healthy_lag {
                Some(promoted) => {
                    self.promote(&persisted, &promoted).await?;
                    next.lead_equipment_id = Some(promoted.clone());
                    next.failover_state = FailoverState::Failedover;
                    info!(group_id = %group.group_id, new_lead = %promoted, "Lead-lag failover promoted a new lead");
                }
                None => {
                    next.failover_state = FailoverState::AllFaulted;
                    warn!(group_id = %group.group_id, "All lead-lag members faulted, no healthy member to promote");
                }
            }
        } else if now_unix >= persisted.next_changeover_at {
            if let Some(scheduled) = persisted.lag_members().next().cloned() {
                self.promote(&persisted, &scheduled).await?;
                next.lead_equipment_id = Some(scheduled);
                next.failover_state = FailoverState::Normal;
                next.next_changeover_at = now_unix + defaults::LEADLAG_CHANGEOVER_PERIOD_SECS;
                info!(group_id = %group.group_id, "Scheduled lead-lag changeover rotated lead");
            }
        } else if next.failover_state != FailoverState::Normal {
            // The previously failed-over lead is healthy again on this
            // pass, or another member recovered; the schedule still owns
            // the next rotation, so just clear the stale failover flag.
            next.failover_state = FailoverState::Normal;
        }

        self.state_store
            .put_equipment_result_cache(
                &group_cache_key(&group.group_id),
                &serde_json::to_value(&next)?,
                defaults::LEADLAG_GROUP_CACHE_TTL_SECS,
            )
            .await?;
        Ok(())
    }

    /// Write the new lead's settings before demoting the old one, so the
    /// group is never observed with zero leads by a racing C7 read —
    /// `isLead` changes atomically with respect to those reads per member,
    /// one settings write each, new lead first.
    async fn promote(&self, group: &LeadLagGroup, new_lead_id: &str) -> Result<(), LeadLagError> {
        let mut new_lead = self.settings_for(new_lead_id).await?;
        new_lead.is_lead = true;
        new_lead.modified_by = "leadlag-manager".to_string();
        new_lead.last_modified = crate::types::now_rfc3339();
        self.state_store.put_settings(new_lead_id, &new_lead).await?;

        if let Some(old_lead_id) = &group.lead_equipment_id {
            if old_lead_id != new_lead_id {
                let mut old_lead = self.settings_for(old_lead_id).await?;
                old_lead.is_lead = false;
                old_lead.modified_by = "leadlag-manager".to_string();
                old_lead.last_modified = crate::types::now_rfc3339();
                self.state_store.put_settings(old_lead_id, &old_lead).await?;
            }
        }
        Ok(())
    }

    async fn settings_for(&self, equipment_id: &str) -> Result<EquipmentSettings, LeadLagError> {
        Ok(self
            .state_store
            .get_settings(equipment_id)
            .await?
            .unwrap_or_else(|| EquipmentSettings::new("leadlag-manager")))
    }

    /// A member is healthy if it has reported samples within the fault
    /// read window and its equipment type's safety trigger is clear.
    /// Equipment the roster doesn't recognize is treated as unhealthy
    /// rather than panicking the reconciliation. A silent member is a
    /// fault signature in its own right: `read_latest_metrics` substitutes
    /// a conservative fallback map when samples are absent, which would
    /// otherwise read as healthy.
    async fn is_healthy(&self, equipment_id: &str) -> bool {
        let Some(equipment) = self.equipment_by_id.get(equipment_id) else {
            return false;
        };
        if !self
            .metric_store
            .has_recent_samples(equipment_id, FAULT_READ_WINDOW_MINUTES)
            .await
        {
            return false;
        }
        let metrics = self
            .metric_store
            .read_latest_metrics(equipment_id, &equipment.location_id, FAULT_READ_WINDOW_MINUTES)
            .await;
        safety_trigger(equipment.equipment_type, &metrics).is_none()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LeadLagError {
    #[error(transparent)]
    State(#[from] crate::store::state::StateStoreError),
    #[error("failed to serialize lead-lag group: {0}")]
    Serialization(#[from] serde_json::Error),
}
