//! Route handlers for the fabric's HTTP surface.

use super::envelope::ApiError;
use super::middleware::check_secret_key;
use super::ApiState;
use crate::batch::BatchResult;
use crate::config::defaults::priority;
use crate::processor::TickOutcome;
use crate::types::{EquipmentSettings, EquipmentType, Job, JobStatus, JobType, RequestId};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronQuery {
    pub secret_key: String,
    pub equipment_id: Option<String>,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub debug: bool,
}

/// `GET /cron-run-logic?secretKey=…[&equipmentId=…][&force=true][&debug=true]`
pub async fn cron_run_logic(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<CronQuery>,
) -> Result<Json<BatchResult>, ApiError> {
    check_secret_key(&query.secret_key, &state.secret_key)?;

    let now_unix = chrono::Utc::now().timestamp();
    let result = match &query.equipment_id {
        Some(equipment_id) => run_single_equipment(&state, equipment_id, now_unix, query.force).await?,
        None => {
            state.batch_run_count.fetch_add(1, Ordering::Relaxed);
            state.batch.run(now_unix, query.force).await?
        }
    };

    if query.debug {
        tracing::debug!(request_id = %result.request_id, ?result, "cron-run-logic debug output");
    }
    Ok(Json(result))
}

#[derive(Deserialize)]
struct CachedEquipmentTick {
    at: i64,
    queued: usize,
    already_queued: usize,
    errors: Vec<String>,
}

async fn run_single_equipment(
    state: &ApiState,
    equipment_id: &str,
    now_unix: i64,
    force: bool,
) -> Result<BatchResult, ApiError> {
    let request_id = RequestId::new();
    let cache_key = format!("cron:{equipment_id}");

    if !force {
        if let Some(cached) = state.state_store.get_equipment_result_cache(&cache_key).await? {
            if let Ok(prior) = serde_json::from_value::<CachedEquipmentTick>(cached) {
                let age = now_unix - prior.at;
                if age < state.equipment_cron_cache_ttl_secs as i64 {
                    return Ok(BatchResult {
                        success: true,
                        skipped: true,
                        time_since_last_run: Some(age),
                        queued: prior.queued,
                        already_queued: prior.already_queued,
                        errors: prior.errors,
                        duration_ms: 0,
                        request_id,
                    });
                }
            }
        }
    }

    let started = Instant::now();
    let processor = state.processor_for_equipment(equipment_id)?;
    let outcome = processor
        .tick_equipment(equipment_id, Some(request_id))
        .await
        .ok_or_else(|| ApiError::NotFound(format!("unknown equipment {equipment_id}")))??;

    let (queued, already_queued, errors) = match outcome {
        TickOutcome::Enqueued => (1, 0, Vec::new()),
        TickOutcome::AlreadyQueued => (0, 1, Vec::new()),
        TickOutcome::NotWarranted => (0, 0, Vec::new()),
    };

    state
        .state_store
        .put_equipment_result_cache(
            &cache_key,
            &serde_json::json!({ "at": now_unix, "queued": queued, "already_queued": already_queued, "errors": errors }),
            state.equipment_cron_cache_ttl_secs,
        )
        .await?;

    Ok(BatchResult {
        success: true,
        skipped: false,
        time_since_last_run: None,
        queued,
        already_queued,
        errors,
        duration_ms: started.elapsed().as_millis(),
        request_id,
    })
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub enabled: Option<bool>,
    #[serde(default)]
    pub setpoints: HashMap<String, f64>,
    #[serde(default)]
    pub flags: HashMap<String, bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRequest {
    pub command: String,
    #[serde(default)]
    pub settings: Option<SettingsPatch>,
    pub user_id: String,
    pub user_name: String,
    pub priority: Option<i32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    pub job_key: String,
    pub queued: bool,
    pub priority: i32,
    pub request_id: RequestId,
}

/// `POST /equipment/{id}/command`
pub async fn post_equipment_command(
    State(state): State<Arc<ApiState>>,
    Path(equipment_id): Path<String>,
    Json(body): Json<CommandRequest>,
) -> Result<Json<CommandResponse>, ApiError> {
    if body.user_id.trim().is_empty() || body.user_name.trim().is_empty() {
        return Err(ApiError::Validation("userId and userName are required".to_string()));
    }
    if body.command.trim().is_empty() {
        return Err(ApiError::Validation("command is required".to_string()));
    }

    let equipment = state
        .equipment_by_id
        .get(&equipment_id)
        .cloned()
        .ok_or_else(|| ApiError::NotFound(format!("unknown equipment {equipment_id}")))?;

    let mut settings = state
        .state_store
        .get_settings(&equipment_id)
        .await?
        .unwrap_or_else(|| EquipmentSettings::new(&body.user_name));
    if let Some(patch) = &body.settings {
        if let Some(enabled) = patch.enabled {
            settings.enabled = enabled;
        }
        settings.setpoints.extend(patch.setpoints.clone());
        settings.flags.extend(patch.flags.clone());
    }
    settings.modified_by = body.user_name.clone();
    settings.last_modified = crate::types::now_rfc3339();
    state.state_store.put_settings(&equipment_id, &settings).await?;

    let is_emergency = body.command.eq_ignore_ascii_case("EMERGENCY_SHUTDOWN");
    let default_priority = if is_emergency { priority::SAFETY } else { priority::RECENT_OPERATOR_COMMAND };
    let job_priority = body.priority.unwrap_or(default_priority);
    let job_type = if is_emergency { JobType::EmergencyShutdown } else { JobType::OperatorCommand };

    let job_key = equipment.job_key();
    let job = Job::new(
        job_key.clone(),
        equipment_id.clone(),
        equipment.location_id.clone(),
        job_type,
        job_priority,
        format!("operator command: {}", body.command),
    )
    .with_request_id(RequestId::new());

    let queue = state.queue_for_location(&equipment.location_id)?;
    let queued = queue.enqueue(&job).await?;
    if queued {
        if let Some(in_flight) = state.in_flight_for_location(&equipment.location_id) {
            in_flight.insert(job_key.clone(), Instant::now());
        }
        state
            .state_store
            .put_status(&JobStatus::waiting(job_key.clone()), state.job_status_ttl_secs)
            .await?;
    }

    Ok(Json(CommandResponse {
        job_key,
        queued,
        priority: job_priority,
        request_id: job.request_id.unwrap_or_default(),
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EquipmentStateResponse {
    #[serde(flatten)]
    pub settings: EquipmentSettings,
    pub oar_setpoint: Option<f64>,
}

/// `GET /equipment/{id}/state`
pub async fn get_equipment_state(
    State(state): State<Arc<ApiState>>,
    Path(equipment_id): Path<String>,
) -> Result<Json<EquipmentStateResponse>, ApiError> {
    let equipment = state
        .equipment_by_id
        .get(&equipment_id)
        .cloned()
        .ok_or_else(|| ApiError::NotFound(format!("unknown equipment {equipment_id}")))?;

    let settings = state
        .state_store
        .get_settings(&equipment_id)
        .await?
        .unwrap_or_else(|| EquipmentSettings::new("system"));

    let oar_setpoint = if equipment.equipment_type == EquipmentType::AirHandler {
        let metrics = state
            .metric_store
            .read_latest_metrics(&equipment_id, &equipment.location_id, state.read_window_minutes)
            .await;
        metrics
            .get("outdoor")
            .map(|v| crate::registry::air_handler::oar_setpoint(v.parse_safe_number(50.0)))
    } else {
        None
    };

    Ok(Json(EquipmentStateResponse { settings, oar_setpoint }))
}

/// `GET /equipment/{id}/status/{jobId}`
pub async fn get_equipment_status(
    State(state): State<Arc<ApiState>>,
    Path((_equipment_id, job_id)): Path<(String, String)>,
) -> Result<Json<JobStatus>, ApiError> {
    state
        .state_store
        .get_status(&job_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no status recorded for job {job_id}")))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
}

/// `GET /health`
pub async fn get_health(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

/// `GET /metrics` — Prometheus text exposition format.
pub async fn get_metrics(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let mut in_flight_total = 0usize;
    for set in state.in_flight_by_location.values() {
        in_flight_total += set.len();
    }
    let locations_total = state.in_flight_by_location.len();
    let equipment_total = state.equipment_by_id.len();
    let uptime = state.started_at.elapsed().as_secs();
    let batch_runs = state.batch_run_count.load(Ordering::Relaxed);

    let mut body = String::with_capacity(512);
    body.push_str("# HELP hvac_fabric_jobs_in_flight Jobs currently in flight across all locations\n");
    body.push_str("# TYPE hvac_fabric_jobs_in_flight gauge\n");
    body.push_str(&format!("hvac_fabric_jobs_in_flight {in_flight_total}\n"));

    body.push_str("# HELP hvac_fabric_locations_total Locations this process owns\n");
    body.push_str("# TYPE hvac_fabric_locations_total gauge\n");
    body.push_str(&format!("hvac_fabric_locations_total {locations_total}\n"));

    body.push_str("# HELP hvac_fabric_equipment_total Equipment this process owns\n");
    body.push_str("# TYPE hvac_fabric_equipment_total gauge\n");
    body.push_str(&format!("hvac_fabric_equipment_total {equipment_total}\n"));

    body.push_str("# HELP hvac_fabric_batch_runs_total Cumulative batch enqueuer invocations served\n");
    body.push_str("# TYPE hvac_fabric_batch_runs_total counter\n");
    body.push_str(&format!("hvac_fabric_batch_runs_total {batch_runs}\n"));

    body.push_str("# HELP hvac_fabric_uptime_seconds Seconds since process start\n");
    body.push_str("# TYPE hvac_fabric_uptime_seconds gauge\n");
    body.push_str(&format!("hvac_fabric_uptime_seconds {uptime}\n"));

    (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")], body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchEnqueuer;
    use crate::gate::SmartGate;
    use crate::leadlag::LeadLagManager;
    use crate::processor::LocationProcessor;
    use crate::queue::fakes::FakeJobQueue;
    use crate::store::state::fakes::FakeStateStore;
    use crate::store::timeseries::fakes::FakeMetricStore;
    use crate::types::{EquipmentRole, EquipmentType};
    use dashmap::DashMap;

    fn equip(id: &str, equipment_type: EquipmentType) -> Equipment {
        Equipment {
            equipment_id: id.to_string(),
            location_id: "L1".to_string(),
            equipment_type,
            subtype: None,
            role: EquipmentRole::Standalone,
        }
    }

    fn test_state() -> Arc<ApiState> {
        let state_store = Arc::new(FakeStateStore::default());
        let metric_store = Arc::new(FakeMetricStore::default());
        let gate = Arc::new(SmartGate::new(30));
        let queue = Arc::new(FakeJobQueue::new(3));
        let in_flight = Arc::new(DashMap::new());
        let equipment = vec![equip("E1", EquipmentType::AirHandler), equip("P1", EquipmentType::Pump)];
        let processor = Arc::new(LocationProcessor::new(
            "L1",
            equipment.clone(),
            gate,
            metric_store.clone() as Arc<dyn crate::store::MetricCommandStore>,
            state_store.clone() as Arc<dyn crate::store::SharedStateStore>,
            queue as Arc<dyn crate::queue::JobQueue>,
            in_flight,
            15,
            5,
        ));
        let leadlag = Arc::new(LeadLagManager::new(
            state_store.clone() as Arc<dyn crate::store::SharedStateStore>,
            metric_store.clone() as Arc<dyn crate::store::MetricCommandStore>,
            equipment,
            crate::config::defaults::LEADLAG_LOCK_TTL_SECS,
        ));
        let batch = Arc::new(BatchEnqueuer::new(
            state_store.clone() as Arc<dyn crate::store::SharedStateStore>,
            vec![processor.clone()],
            leadlag,
            vec![],
            crate::config::defaults::BATCH_LOCK_TTL_SECS,
        ));
        Arc::new(ApiState::new(
            state_store as Arc<dyn crate::store::SharedStateStore>,
            metric_store as Arc<dyn crate::store::MetricCommandStore>,
            batch,
            vec![processor],
            "shh-its-a-secret",
            15,
            300,
            120,
        ))
    }

    #[tokio::test]
    async fn operator_command_enqueues_and_advances_settings() {
        let state = test_state();
        let body = CommandRequest {
            command: "supplyTempSetpoint".to_string(),
            settings: Some(SettingsPatch {
                enabled: Some(true),
                setpoints: HashMap::from([("supplyTempSetpoint".to_string(), 165.0)]),
                flags: HashMap::new(),
            }),
            user_id: "operator-1".to_string(),
            user_name: "Jane Operator".to_string(),
            priority: None,
        };

        let before = state.state_store.get_settings("E1").await.unwrap();
        assert!(before.is_none());

        let response = post_equipment_command(State(state.clone()), Path("E1".to_string()), Json(body))
            .await
            .unwrap()
            .0;
        assert!(response.queued);
        assert_eq!(response.priority, priority::RECENT_OPERATOR_COMMAND);

        let after = state.state_store.get_settings("E1").await.unwrap().unwrap();
        assert_eq!(after.setpoints.get("supplyTempSetpoint"), Some(&165.0));
    }

    #[tokio::test]
    async fn emergency_shutdown_gets_safety_priority() {
        let state = test_state();
        let body = CommandRequest {
            command: "EMERGENCY_SHUTDOWN".to_string(),
            settings: None,
            user_id: "operator-1".to_string(),
            user_name: "Jane Operator".to_string(),
            priority: None,
        };

        let response = post_equipment_command(State(state), Path("E1".to_string()), Json(body))
            .await
            .unwrap()
            .0;
        assert_eq!(response.priority, priority::SAFETY);
    }

    #[tokio::test]
    async fn unauthenticated_cron_run_is_rejected() {
        let state = test_state();
        let query = CronQuery {
            secret_key: "wrong".to_string(),
            equipment_id: None,
            force: false,
            debug: false,
        };
        let err = cron_run_logic(State(state), Query(query)).await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn cron_run_single_equipment_is_cached_within_ttl() {
        let state = test_state();
        let query = CronQuery {
            secret_key: "shh-its-a-secret".to_string(),
            equipment_id: Some("P1".to_string()),
            force: false,
            debug: false,
        };
        let first = cron_run_logic(State(state.clone()), Query(query.clone())).await.unwrap().0;
        assert!(!first.skipped);

        let second = cron_run_logic(State(state), Query(query)).await.unwrap().0;
        assert!(second.skipped, "second call within the cache TTL should be served from cache");
    }

    #[tokio::test]
    async fn equipment_state_reports_oar_setpoint_only_for_air_handlers() {
        let state = test_state();

        let ahu = get_equipment_state(State(state.clone()), Path("E1".to_string())).await.unwrap().0;
        assert!(ahu.oar_setpoint.is_some());

        let pump = get_equipment_state(State(state), Path("P1".to_string())).await.unwrap().0;
        assert!(pump.oar_setpoint.is_none());
    }

    #[tokio::test]
    async fn unknown_equipment_state_is_not_found() {
        let state = test_state();
        let err = get_equipment_state(State(state), Path("ghost".to_string())).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
