//! Cross-component scenario tests.
//!
//! Exercises real `LocationProcessor`/`WorkerPool`/`BatchEnqueuer`/
//! `LeadLagManager` wiring against the in-memory gateway fakes, rather than
//! mocking at a single module boundary. No Redis or InfluxDB required:
//!
//!   cargo test --test end_to_end --features testing

#![cfg(feature = "testing")]

use dashmap::DashMap;
use hvac_fabric::batch::BatchEnqueuer;
use hvac_fabric::gate::SmartGate;
use hvac_fabric::leadlag::LeadLagManager;
use hvac_fabric::processor::{InFlightSet, LocationProcessor};
use hvac_fabric::queue::fakes::FakeJobQueue;
use hvac_fabric::queue::JobQueue;
use hvac_fabric::registry::default_registry;
use hvac_fabric::store::state::fakes::FakeStateStore;
use hvac_fabric::store::timeseries::fakes::FakeMetricStore;
use hvac_fabric::types::{
    Equipment, EquipmentRole, EquipmentType, FailoverState, LeadLagGroup, MetricMap, Scalar,
};
use hvac_fabric::worker::WorkerPool;
use std::sync::Arc;

fn equip(id: &str, location_id: &str, equipment_type: EquipmentType) -> Equipment {
    Equipment {
        equipment_id: id.to_string(),
        location_id: location_id.to_string(),
        equipment_type,
        subtype: None,
        role: EquipmentRole::Standalone,
    }
}

struct Harness {
    processor: Arc<LocationProcessor>,
    worker: Arc<WorkerPool>,
    metric_store: Arc<FakeMetricStore>,
    state_store: Arc<FakeStateStore>,
    queue: Arc<FakeJobQueue>,
}

fn build(equipment: Vec<Equipment>, location_id: &str) -> Harness {
    let gate = Arc::new(SmartGate::new(30));
    let metric_store = Arc::new(FakeMetricStore::default());
    let state_store = Arc::new(FakeStateStore::default());
    let queue = Arc::new(FakeJobQueue::new(3));
    let in_flight: InFlightSet = Arc::new(DashMap::new());

    let processor = Arc::new(LocationProcessor::new(
        location_id,
        equipment.clone(),
        gate,
        metric_store.clone() as Arc<dyn hvac_fabric::store::MetricCommandStore>,
        state_store.clone() as Arc<dyn hvac_fabric::store::SharedStateStore>,
        queue.clone() as Arc<dyn JobQueue>,
        in_flight.clone(),
        15,
        5,
    ));

    let worker = Arc::new(WorkerPool::new(
        location_id,
        equipment,
        Arc::new(default_registry()),
        queue.clone() as Arc<dyn JobQueue>,
        metric_store.clone() as Arc<dyn hvac_fabric::store::MetricCommandStore>,
        state_store.clone() as Arc<dyn hvac_fabric::store::SharedStateStore>,
        in_flight,
        4,
        300,
    ));

    Harness { processor, worker, metric_store, state_store, queue }
}

#[tokio::test]
async fn enqueue_deduplication_across_ticks() {
    let h = build(vec![equip("AH1", "L1", EquipmentType::AirHandler)], "L1");
    let mut metrics = MetricMap::new();
    metrics.insert("supply".into(), Scalar::Num(60.0));
    metrics.insert("room".into(), Scalar::Num(72.0));
    h.metric_store.set_metrics("AH1", metrics);

    let first = h.processor.tick_all_once(None).await;
    assert_eq!(first.queued, 1);

    // A second pass before the worker has drained anything must not
    // double-enqueue the same equipment.
    let second = h.processor.tick_all_once(None).await;
    assert_eq!(second.queued, 0);
    assert_eq!(second.already_queued, 1);
}

#[tokio::test]
async fn operator_setpoint_propagates_through_to_the_written_command() {
    let h = build(vec![equip("AH1", "L1", EquipmentType::AirHandler)], "L1");
    let mut metrics = MetricMap::new();
    metrics.insert("supply".into(), Scalar::Num(60.0));
    metrics.insert("room".into(), Scalar::Num(72.0));
    h.metric_store.set_metrics("AH1", metrics);

    let mut settings = hvac_fabric::types::EquipmentSettings::new("operator-1");
    settings.setpoints.insert("supplyTempSetpoint".to_string(), 58.0);
    h.state_store.put_settings("AH1", &settings).await.unwrap();

    h.processor.tick_all_once(None).await;
    h.worker.clone().drain_once().await;
    // drain_once spawns the job onto its own task; give it a beat to run.
    tokio::task::yield_now().await;
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let written = h.metric_store.written.lock().unwrap();
    let (_, _, fields) = written.iter().find(|(id, ..)| id == "AH1").expect("a command batch was written for AH1");
    let setpoint_field = fields.iter().find(|f| f.command_type == "supplyAirTempSetpoint").unwrap();
    assert_eq!(setpoint_field.value, hvac_fabric::types::CommandValue::Number(58.0));
}

#[tokio::test]
async fn freezestat_safety_override_forces_fan_off_and_full_heat() {
    let h = build(vec![equip("AH1", "L1", EquipmentType::AirHandler)], "L1");
    let mut metrics = MetricMap::new();
    metrics.insert("supply".into(), Scalar::Num(38.0)); // below FREEZESTAT_TRIP_F
    metrics.insert("room".into(), Scalar::Num(68.0));
    h.metric_store.set_metrics("AH1", metrics);

    let summary = h.processor.tick_all_once(None).await;
    assert_eq!(summary.queued, 1, "a safety-priority tick must still enqueue");

    h.worker.clone().drain_once().await;
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let written = h.metric_store.written.lock().unwrap();
    let (_, _, fields) = written.iter().find(|(id, ..)| id == "AH1").unwrap();
    let fan = fields.iter().find(|f| f.command_type == "fanEnabled").unwrap();
    assert_eq!(fan.value, hvac_fabric::types::CommandValue::QuotedBool(false));
    let heat = fields.iter().find(|f| f.command_type == "heatingValvePosition").unwrap();
    assert_eq!(heat.value, hvac_fabric::types::CommandValue::Number(100.0));
}

#[tokio::test]
async fn lead_lag_failover_promotes_a_healthy_member_during_a_batch_run() {
    let state_store = Arc::new(FakeStateStore::default());
    let metric_store = Arc::new(FakeMetricStore::default());

    let mut faulted = MetricMap::new();
    faulted.insert("motorCurrent".into(), Scalar::Num(25.0)); // over SAFETY_MOTOR_CURRENT_A
    faulted.insert("vibration".into(), Scalar::Num(1.0));
    metric_store.set_metrics("P1", faulted);

    let mut healthy = MetricMap::new();
    healthy.insert("motorCurrent".into(), Scalar::Num(5.0));
    healthy.insert("vibration".into(), Scalar::Num(1.0));
    metric_store.set_metrics("P2", healthy);

    let equipment = vec![equip("P1", "L1", EquipmentType::Pump), equip("P2", "L1", EquipmentType::Pump)];
    let gate = Arc::new(SmartGate::new(30));
    let queue = Arc::new(FakeJobQueue::new(3));
    let in_flight: InFlightSet = Arc::new(DashMap::new());
    let processor = Arc::new(LocationProcessor::new(
        "L1",
        equipment.clone(),
        gate,
        metric_store.clone() as Arc<dyn hvac_fabric::store::MetricCommandStore>,
        state_store.clone() as Arc<dyn hvac_fabric::store::SharedStateStore>,
        queue as Arc<dyn JobQueue>,
        in_flight,
        15,
        5,
    ));

    let leadlag = Arc::new(LeadLagManager::new(
        state_store.clone() as Arc<dyn hvac_fabric::store::SharedStateStore>,
        metric_store as Arc<dyn hvac_fabric::store::MetricCommandStore>,
        equipment,
        hvac_fabric::config::defaults::LEADLAG_LOCK_TTL_SECS,
    ));

    let group = LeadLagGroup {
        group_id: "pumps-L1".into(),
        members: vec!["P1".into(), "P2".into()],
        lead_equipment_id: Some("P1".into()),
        next_changeover_at: i64::MAX,
        failover_state: FailoverState::Normal,
    };

    let batch = BatchEnqueuer::new(
        state_store.clone() as Arc<dyn hvac_fabric::store::SharedStateStore>,
        vec![processor],
        leadlag,
        vec![group],
        hvac_fabric::config::defaults::BATCH_LOCK_TTL_SECS,
    );

    let result = batch.run(1_000, false).await.unwrap();
    assert!(!result.skipped);

    let p2 = state_store.get_settings("P2").await.unwrap().unwrap();
    assert!(p2.is_lead, "P2 must be promoted after P1's overcurrent fault");
    let p1 = state_store.get_settings("P1").await.unwrap().unwrap();
    assert!(!p1.is_lead);
}

#[tokio::test]
async fn unoccupied_fan_cycle_starts_immediately_when_eligible() {
    let h = build(vec![equip("AH1", "L1", EquipmentType::AirHandler)], "L1");
    let mut metrics = MetricMap::new();
    metrics.insert("supply".into(), Scalar::Num(60.0));
    metrics.insert("room".into(), Scalar::Num(72.0));
    h.metric_store.set_metrics("AH1", metrics);

    let mut settings = hvac_fabric::types::EquipmentSettings::new("scheduler");
    settings.flags.insert("isOccupied".to_string(), false);
    h.state_store.put_settings("AH1", &settings).await.unwrap();

    h.processor.tick_all_once(None).await;
    h.worker.clone().drain_once().await;
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let written = h.metric_store.written.lock().unwrap();
    let (_, _, fields) = written.iter().find(|(id, ..)| id == "AH1").unwrap();
    let fan = fields.iter().find(|f| f.command_type == "fanEnabled").unwrap();
    assert_eq!(fan.value, hvac_fabric::types::CommandValue::QuotedBool(true), "fan cycle should kick on immediately since no prior cycle state exists");
}

#[tokio::test]
async fn overlapping_batch_runs_are_serialized_by_the_batch_lock() {
    let state_store = Arc::new(FakeStateStore::default());
    let held = state_store.acquire_lock("batch", 180).await.unwrap();
    assert!(held.is_some(), "simulate another batch invocation already holding the lock");

    let metric_store = Arc::new(FakeMetricStore::default());
    let gate = Arc::new(SmartGate::new(30));
    let queue = Arc::new(FakeJobQueue::new(3));
    let in_flight: InFlightSet = Arc::new(DashMap::new());
    let processor = Arc::new(LocationProcessor::new(
        "L1",
        vec![equip("P1", "L1", EquipmentType::Pump)],
        gate,
        metric_store.clone() as Arc<dyn hvac_fabric::store::MetricCommandStore>,
        state_store.clone() as Arc<dyn hvac_fabric::store::SharedStateStore>,
        queue as Arc<dyn JobQueue>,
        in_flight,
        15,
        5,
    ));
    let leadlag = Arc::new(LeadLagManager::new(
        state_store.clone() as Arc<dyn hvac_fabric::store::SharedStateStore>,
        metric_store as Arc<dyn hvac_fabric::store::MetricCommandStore>,
        vec![equip("P1", "L1", EquipmentType::Pump)],
        hvac_fabric::config::defaults::LEADLAG_LOCK_TTL_SECS,
    ));
    let batch = BatchEnqueuer::new(
        state_store,
        vec![processor],
        leadlag,
        vec![],
        hvac_fabric::config::defaults::BATCH_LOCK_TTL_SECS,
    );

    let result = batch.run(1_000, false).await.unwrap();
    assert!(result.success);
    assert!(result.skipped, "a run that can't acquire the lock must report skipped rather than error");
    assert_eq!(result.queued, 0);
}
