//! C9's HTTP front door plus the operator-facing equipment endpoints.
//!
//! Router registration follows the teacher's `hub::api` shape: one module
//! per concern, a thin `build_router` wiring routes to a shared `Arc<State>`,
//! `tower-http` layers for tracing/compression/CORS. Auth differs from the
//! teacher's Bearer-token extractors — the fabric's only externally-facing
//! endpoint authenticates via a shared-secret query parameter instead.

pub mod envelope;
pub mod handlers;
pub mod middleware;

use crate::batch::BatchEnqueuer;
use crate::processor::{InFlightSet, LocationProcessor};
use crate::queue::JobQueue;
use crate::store::{MetricCommandStore, SharedStateStore};
use crate::types::Equipment;
use axum::routing::{get, post};
use axum::Router;
use envelope::ApiError;
use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Instant;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub struct ApiState {
    pub state_store: Arc<dyn SharedStateStore>,
    pub metric_store: Arc<dyn MetricCommandStore>,
    pub batch: Arc<BatchEnqueuer>,
    pub equipment_by_id: HashMap<String, Equipment>,
    processors_by_location: HashMap<String, Arc<LocationProcessor>>,
    queues_by_location: HashMap<String, Arc<dyn JobQueue>>,
    pub in_flight_by_location: HashMap<String, InFlightSet>,
    pub secret_key: String,
    pub read_window_minutes: i64,
    pub job_status_ttl_secs: u64,
    pub equipment_cron_cache_ttl_secs: u64,
    pub started_at: Instant,
    pub batch_run_count: AtomicU64,
}

impl ApiState {
    pub fn new(
        state_store: Arc<dyn SharedStateStore>,
        metric_store: Arc<dyn MetricCommandStore>,
        batch: Arc<BatchEnqueuer>,
        processors: Vec<Arc<LocationProcessor>>,
        secret_key: impl Into<String>,
        read_window_minutes: i64,
        job_status_ttl_secs: u64,
        equipment_cron_cache_ttl_secs: u64,
    ) -> Self {
        let mut equipment_by_id = HashMap::new();
        let mut processors_by_location = HashMap::new();
        let mut queues_by_location = HashMap::new();
        let mut in_flight_by_location = HashMap::new();

        for processor in processors {
            for equipment in processor.equipment() {
                equipment_by_id.insert(equipment.equipment_id.clone(), equipment.clone());
            }
            queues_by_location.insert(processor.location_id().to_string(), processor.queue_handle());
            in_flight_by_location.insert(processor.location_id().to_string(), processor.in_flight_handle());
            processors_by_location.insert(processor.location_id().to_string(), processor);
        }

        Self {
            state_store,
            metric_store,
            batch,
            equipment_by_id,
            processors_by_location,
            queues_by_location,
            in_flight_by_location,
            secret_key: secret_key.into(),
            read_window_minutes,
            job_status_ttl_secs,
            equipment_cron_cache_ttl_secs,
            started_at: Instant::now(),
            batch_run_count: AtomicU64::new(0),
        }
    }

    fn processor_for_equipment(&self, equipment_id: &str) -> Result<Arc<LocationProcessor>, ApiError> {
        let equipment = self
            .equipment_by_id
            .get(equipment_id)
            .ok_or_else(|| ApiError::NotFound(format!("unknown equipment {equipment_id}")))?;
        self.processors_by_location
            .get(&equipment.location_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("no processor for location {}", equipment.location_id)))
    }

    fn queue_for_location(&self, location_id: &str) -> Result<Arc<dyn JobQueue>, ApiError> {
        self.queues_by_location
            .get(location_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("no queue for location {location_id}")))
    }

    fn in_flight_for_location(&self, location_id: &str) -> Option<InFlightSet> {
        self.in_flight_by_location.get(location_id).cloned()
    }
}

pub fn build_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/cron-run-logic", get(handlers::cron_run_logic))
        .route("/equipment/{id}/command", post(handlers::post_equipment_command))
        .route("/equipment/{id}/state", get(handlers::get_equipment_state))
        .route("/equipment/{id}/status/{jobId}", get(handlers::get_equipment_status))
        .route("/health", get(handlers::get_health))
        .route("/metrics", get(handlers::get_metrics))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
