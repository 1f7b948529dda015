//! Background health-check loop.
//!
//! Monitors the two gateway connections (C1, C2) on a fixed interval and
//! logs degradation — mirrors the teacher's self-healer shape, generalized
//! to async checks since both gateways here are I/O-bound rather than the
//! in-process state the teacher's checks inspected. There is no automatic
//! "heal" action: Redis and InfluxDB connections recover through their own
//! client-side retry (`ConnectionManager`, `reqwest`), so this loop's job is
//! observation, not intervention.

use crate::store::{InfluxGateway, SharedStateStore};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy { reason: String },
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "HEALTHY"),
            HealthStatus::Unhealthy { reason } => write!(f, "UNHEALTHY: {reason}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub last_checked: Instant,
}

#[derive(Debug, Clone)]
pub struct SystemHealth {
    pub components: Vec<ComponentHealth>,
    pub overall: HealthStatus,
    pub check_cycles: u64,
}

impl SystemHealth {
    fn new() -> Self {
        Self {
            components: Vec::new(),
            overall: HealthStatus::Healthy,
            check_cycles: 0,
        }
    }
}

#[async_trait]
pub trait HealthCheck: Send + Sync {
    fn component_name(&self) -> &str;
    async fn check(&self) -> HealthStatus;
}

pub struct StateStoreHealthCheck {
    store: Arc<dyn SharedStateStore>,
}

impl StateStoreHealthCheck {
    pub fn new(store: Arc<dyn SharedStateStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl HealthCheck for StateStoreHealthCheck {
    fn component_name(&self) -> &str {
        "shared state store"
    }

    async fn check(&self) -> HealthStatus {
        match self.store.acquire_lock("healthcheck", 5).await {
            Ok(Some(lock)) => {
                let _ = self.store.release_lock(&lock).await;
                HealthStatus::Healthy
            }
            Ok(None) => HealthStatus::Healthy, // held elsewhere — store itself is reachable
            Err(e) => HealthStatus::Unhealthy { reason: e.to_string() },
        }
    }
}

pub struct TimeseriesHealthCheck {
    gateway: Arc<InfluxGateway>,
}

impl TimeseriesHealthCheck {
    pub fn new(gateway: Arc<InfluxGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl HealthCheck for TimeseriesHealthCheck {
    fn component_name(&self) -> &str {
        "metric & command store"
    }

    async fn check(&self) -> HealthStatus {
        match self.gateway.ping().await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => HealthStatus::Unhealthy { reason: e.to_string() },
        }
    }
}

pub struct SelfHealer {
    checks: Vec<Box<dyn HealthCheck>>,
    health: Arc<RwLock<SystemHealth>>,
}

impl SelfHealer {
    pub fn new(checks: Vec<Box<dyn HealthCheck>>) -> Self {
        Self {
            checks,
            health: Arc::new(RwLock::new(SystemHealth::new())),
        }
    }

    pub fn health_handle(&self) -> Arc<RwLock<SystemHealth>> {
        self.health.clone()
    }

    /// Run the health check loop. Never returns under normal operation —
    /// intended to be spawned and left running for the process lifetime.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(HEALTH_CHECK_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.run_cycle().await;
        }
    }

    async fn run_cycle(&self) {
        let mut components = Vec::with_capacity(self.checks.len());
        let mut worst = HealthStatus::Healthy;

        for check in &self.checks {
            let status = check.check().await;
            match &status {
                HealthStatus::Unhealthy { .. } => {
                    error!(component = check.component_name(), status = %status, "Component unhealthy");
                    worst = status.clone();
                }
                HealthStatus::Healthy => {
                    debug!(component = check.component_name(), "Component healthy");
                }
            }
            components.push(ComponentHealth {
                name: check.component_name().to_string(),
                status,
                last_checked: Instant::now(),
            });
        }

        if worst != HealthStatus::Healthy {
            warn!(cycles = components.len(), "Health cycle completed with a degraded component");
        }

        let mut health = self.health.write().await;
        health.components = components;
        health.overall = worst;
        health.check_cycles += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::state::fakes::FakeStateStore;

    struct AlwaysUnhealthy;

    #[async_trait]
    impl HealthCheck for AlwaysUnhealthy {
        fn component_name(&self) -> &str {
            "always-down"
        }

        async fn check(&self) -> HealthStatus {
            HealthStatus::Unhealthy { reason: "simulated outage".to_string() }
        }
    }

    #[tokio::test]
    async fn state_store_check_reports_healthy_against_a_reachable_store() {
        let check = StateStoreHealthCheck::new(Arc::new(FakeStateStore::default()));
        assert_eq!(check.check().await, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn one_unhealthy_component_drags_overall_status_down() {
        let healer = SelfHealer::new(vec![
            Box::new(StateStoreHealthCheck::new(Arc::new(FakeStateStore::default()))),
            Box::new(AlwaysUnhealthy),
        ]);
        healer.run_cycle().await;

        let health = healer.health_handle();
        let snapshot = health.read().await;
        assert_eq!(snapshot.check_cycles, 1);
        assert_eq!(snapshot.components.len(), 2);
        assert_ne!(snapshot.overall, HealthStatus::Healthy);
    }
}
