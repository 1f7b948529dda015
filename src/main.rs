//! HVAC fabric server binary.
//!
//! Wires the shared gateways, one [`LocationProcessor`]/[`WorkerPool`] pair
//! per location, a single fabric-wide [`LeadLagManager`], the batch
//! enqueuer, the HTTP surface, and the background health loop, then serves
//! until a shutdown signal arrives.
//!
//! ## Environment variables
//!
//! | Variable                   | Required | Description                              |
//! |-----------------------------|----------|------------------------------------------|
//! | `INFLUXDB_URL`               | Yes      | InfluxDB HTTP endpoint                   |
//! | `INFLUXDB_DATABASE`          | Yes      | InfluxDB database name                   |
//! | `REDIS_URL`                  | No       | Redis connection string (default local)  |
//! | `SERVER_ACTION_SECRET_KEY`   | Yes      | Shared secret for `GET /cron-run-logic`  |
//! | `HVAC_FABRIC_EQUIPMENT_FILE` | Yes      | Path to the equipment roster JSON file   |
//! | `HVAC_FABRIC_CONFIG`         | No       | Path to the tunables TOML file           |

use clap::Parser;
use hvac_fabric::api::{self, ApiState};
use hvac_fabric::background::{SelfHealer, StateStoreHealthCheck, TimeseriesHealthCheck};
use hvac_fabric::batch::BatchEnqueuer;
use hvac_fabric::config::{self, FabricConfig};
use hvac_fabric::gate::SmartGate;
use hvac_fabric::leadlag::LeadLagManager;
use hvac_fabric::processor::LocationProcessor;
use hvac_fabric::queue::RedisJobQueue;
use hvac_fabric::registry::{
    AirHandlerAlgorithm, AlgorithmRegistry, BoilerAlgorithm, ChillerAlgorithm, Doas1Algorithm,
    Doas2Algorithm, PumpAlgorithm,
};
use hvac_fabric::store::{InfluxGateway, RedisStateStore};
use hvac_fabric::worker::WorkerPool;
use hvac_fabric::{ConnectionConfig, Equipment};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const WORKER_CONCURRENCY_PER_LOCATION: usize = 4;
const WORKER_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "hvac-fabric", about = "HVAC building-management control fabric")]
struct CliArgs {
    /// Path to the equipment roster JSON file (array of `Equipment`).
    #[arg(long, env = "HVAC_FABRIC_EQUIPMENT_FILE")]
    equipment_file: String,

    /// Path to the lead-lag group roster JSON file (array of `LeadLagGroup`).
    /// Omit if this deployment has no paired equipment to manage.
    #[arg(long, env = "HVAC_FABRIC_LEADLAG_GROUPS_FILE")]
    leadlag_groups_file: Option<String>,

    /// Bind address for the HTTP server.
    #[arg(long, env = "HVAC_FABRIC_BIND_ADDRESS", default_value = "0.0.0.0:8080")]
    bind_address: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,hvac_fabric=debug")),
        )
        .init();

    let args = CliArgs::parse();
    let conn_config = ConnectionConfig::from_env()?;
    config::init(FabricConfig::load());
    let cfg = config::get();

    info!(bind = %args.bind_address, "Starting HVAC fabric");

    let roster_raw = std::fs::read_to_string(&args.equipment_file)?;
    let roster: Vec<Equipment> = serde_json::from_str(&roster_raw)?;
    info!(count = roster.len(), file = %args.equipment_file, "Loaded equipment roster");

    let mut by_location: HashMap<String, Vec<Equipment>> = HashMap::new();
    for equipment in &roster {
        by_location.entry(equipment.location_id.clone()).or_default().push(equipment.clone());
    }

    // ── Gateways ─────────────────────────────────────────────────────────
    let metric_store: Arc<InfluxGateway> =
        Arc::new(InfluxGateway::new(conn_config.influxdb_url.clone(), conn_config.influxdb_database.clone()));
    let state_store: Arc<RedisStateStore> = Arc::new(RedisStateStore::connect(&conn_config.redis_url).await?);
    let job_queue: Arc<RedisJobQueue> = Arc::new(
        RedisJobQueue::connect(
            &conn_config.redis_url,
            cfg.max_retry_attempts,
            cfg.retry_base_delay_ms,
            hvac_fabric::config::defaults::FAILED_JOB_RETENTION,
            hvac_fabric::config::defaults::COMPLETED_JOB_RETENTION,
        )
        .await?,
    );

    let gate = Arc::new(SmartGate::new(cfg.default_max_staleness_secs));
    let registry = Arc::new(AlgorithmRegistry::new(vec![
        Box::new(AirHandlerAlgorithm),
        Box::new(BoilerAlgorithm),
        Box::new(ChillerAlgorithm::two_stage()),
        Box::new(ChillerAlgorithm::four_stage()),
        Box::new(PumpAlgorithm),
        Box::new(Doas1Algorithm),
        Box::new(Doas2Algorithm),
    ]));

    // ── Per-location processors and worker pools ────────────────────────
    let mut processors = Vec::with_capacity(by_location.len());
    for (location_id, equipment) in &by_location {
        let processor = Arc::new(LocationProcessor::new(
            location_id.clone(),
            equipment.clone(),
            gate.clone(),
            metric_store.clone() as Arc<dyn hvac_fabric::store::MetricCommandStore>,
            state_store.clone() as Arc<dyn hvac_fabric::store::SharedStateStore>,
            job_queue.clone() as Arc<dyn hvac_fabric::queue::JobQueue>,
            Arc::new(dashmap::DashMap::new()),
            cfg.read_window_minutes,
            cfg.recent_command_window_minutes,
        ));

        let worker_pool = Arc::new(WorkerPool::new(
            location_id.clone(),
            equipment.clone(),
            registry.clone(),
            job_queue.clone() as Arc<dyn hvac_fabric::queue::JobQueue>,
            metric_store.clone() as Arc<dyn hvac_fabric::store::MetricCommandStore>,
            state_store.clone() as Arc<dyn hvac_fabric::store::SharedStateStore>,
            processor.in_flight_handle(),
            WORKER_CONCURRENCY_PER_LOCATION,
            cfg.job_status_ttl_secs,
        ));

        tokio::spawn(processor.clone().run());
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(WORKER_POLL_INTERVAL);
            loop {
                ticker.tick().await;
                worker_pool.clone().drain_once().await;
            }
        });

        processors.push(processor);
    }
    info!(locations = processors.len(), "Location processors and worker pools running");

    // ── Lead-lag and batch enqueuer ──────────────────────────────────────
    let leadlag = Arc::new(LeadLagManager::new(
        state_store.clone() as Arc<dyn hvac_fabric::store::SharedStateStore>,
        metric_store.clone() as Arc<dyn hvac_fabric::store::MetricCommandStore>,
        roster.clone(),
        cfg.leadlag_lock_ttl_secs,
    ));
    let leadlag_groups: Vec<hvac_fabric::types::LeadLagGroup> = match &args.leadlag_groups_file {
        Some(path) => {
            let raw = std::fs::read_to_string(path)?;
            let groups = serde_json::from_str(&raw)?;
            info!(file = %path, "Loaded lead-lag group roster");
            groups
        }
        None => {
            info!("No lead-lag group roster configured, lead-lag management disabled");
            Vec::new()
        }
    };

    let batch = Arc::new(BatchEnqueuer::new(
        state_store.clone() as Arc<dyn hvac_fabric::store::SharedStateStore>,
        processors.clone(),
        leadlag.clone(),
        leadlag_groups,
        cfg.batch_lock_ttl_secs,
    ));

    // ── Background health loop ───────────────────────────────────────────
    let self_healer = SelfHealer::new(vec![
        Box::new(StateStoreHealthCheck::new(state_store.clone() as Arc<dyn hvac_fabric::store::SharedStateStore>)),
        Box::new(TimeseriesHealthCheck::new(metric_store.clone())),
    ]);
    tokio::spawn(self_healer.run());

    // ── HTTP server ───────────────────────────────────────────────────────
    let api_state = Arc::new(ApiState::new(
        state_store as Arc<dyn hvac_fabric::store::SharedStateStore>,
        metric_store as Arc<dyn hvac_fabric::store::MetricCommandStore>,
        batch,
        processors,
        conn_config.server_action_secret_key,
        cfg.read_window_minutes,
        cfg.job_status_ttl_secs,
        cfg.equipment_result_cache_ttl_secs,
    ));
    let app = api::build_router(api_state);

    let listener = tokio::net::TcpListener::bind(&args.bind_address).await?;
    info!(address = %args.bind_address, "HVAC fabric listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HVAC fabric shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    info!("Shutdown signal received");
}
