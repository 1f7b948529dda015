//! Built-in threshold, band, and timing defaults.
//!
//! Every constant here can be overridden per-deployment via the TOML config
//! file loaded into [`super::FabricConfig`]; these are the fallback values
//! used when no override is configured.

/// Default read window for `readLatestMetrics`.
pub const DEFAULT_READ_WINDOW_MINUTES: i64 = 15;

/// Window for `readRecentUICommands`.
pub const RECENT_COMMAND_WINDOW_MINUTES: i64 = 5;

/// Batch-enqueuer single-flight lock TTL.
pub const BATCH_LOCK_TTL_SECS: u64 = 180;

/// Lead-lag management window lock TTL.
pub const LEADLAG_LOCK_TTL_SECS: u64 = 600;

/// Lead-lag manager run cadence — at most every 10 minutes.
pub const LEADLAG_RUN_INTERVAL_SECS: u64 = 600;

/// Default scheduled-changeover period when a group's own cadence is unset
/// (weekly, per the illustrative "commonly weekly" rotation schedule).
pub const LEADLAG_CHANGEOVER_PERIOD_SECS: i64 = 7 * 24 * 3600;

/// TTL for the persisted `LeadLagGroup` reconciliation cache entry.
pub const LEADLAG_GROUP_CACHE_TTL_SECS: u64 = 30 * 24 * 3600;

/// `JobStatus` TTL in the shared state store.
pub const JOB_STATUS_TTL_SECS: u64 = 300;

/// Named cache TTLs.
pub const EQUIPMENT_LIST_CACHE_TTL_SECS: u64 = 4 * 3600;
pub const EQUIPMENT_RESULT_CACHE_TTL_SECS: u64 = 120;

/// Retry policy: 3 attempts, exponential backoff starting at 2s.
pub const MAX_RETRY_ATTEMPTS: u32 = 3;
pub const RETRY_BASE_DELAY_MS: u64 = 2_000;

/// Failed/completed job retention.
pub const FAILED_JOB_RETENTION: usize = 25;
pub const COMPLETED_JOB_RETENTION: usize = 50;

/// Priority ladder for smart-gate enqueue decisions.
pub mod priority {
    pub const SAFETY: i32 = 20;
    pub const DEVIATION: i32 = 16;
    pub const CHILLER_STAGE_THRESHOLD: i32 = 15;
    pub const RECENT_OPERATOR_COMMAND: i32 = 10;
    pub const SIGNIFICANT_CHANGE: i32 = 5;
    pub const MAX_STALENESS: i32 = 1;
}

/// Max staleness before a forced re-evaluation.
pub const DEFAULT_MAX_STALENESS_SECS: i64 = 30;

/// Air handler thresholds.
pub mod air_handler {
    pub const SAFETY_SUPPLY_HIGH_F: f64 = 120.0;
    pub const SAFETY_SUPPLY_LOW_F: f64 = 35.0;
    pub const FREEZESTAT_TRIP_F: f64 = 40.0;

    pub const ROOM_ERROR_DEVIATION_F: f64 = 2.0;
    pub const SUPPLY_BAND_LOW_F: f64 = 45.0;
    pub const SUPPLY_BAND_HIGH_F: f64 = 85.0;

    pub const CHANGE_TEMP_F: f64 = 2.0;
    pub const CHANGE_VALVE_PCT: f64 = 15.0;
    pub const CHANGE_SPEED_PCT: f64 = 12.0;

    /// Outdoor Air Reset curve: (outdoor_temp, supply_setpoint) anchors.
    pub const OAR_LOW_OAT_F: f64 = 32.0;
    pub const OAR_LOW_SUPPLY_F: f64 = 74.0;
    pub const OAR_HIGH_OAT_F: f64 = 72.0;
    pub const OAR_HIGH_SUPPLY_F: f64 = 50.0;

    pub const OCCUPIED_START_MIN: i64 = 6 * 60 + 30;
    pub const OCCUPIED_END_MIN: i64 = 18 * 60 + 30;
    pub const FAN_CYCLE_RUN_MINUTES: i64 = 15;
    pub const FAN_CYCLE_PERIOD_MINUTES: i64 = 60;

    pub const STATIC_PRESSURE_OCCUPIED_INWC: f64 = 4.0;
    pub const STATIC_PRESSURE_CYCLING_INWC: f64 = 3.0;
    pub const DEADBAND_F: f64 = 2.0;
}

/// Boiler thresholds.
pub mod boiler {
    pub const SAFETY_WATER_TEMP_HIGH_F: f64 = 200.0;
    pub const SAFETY_PRESSURE_HIGH_PSI: f64 = 30.0;
    pub const DEVIATION_WATER_TEMP_ERROR_F: f64 = 10.0;
    pub const LEAD_LAG_SUSTAINED_WINDOW_SECS: i64 = 600;
}

/// Chiller thresholds (4-stage staging table).
pub mod chiller {
    pub const SAFETY_COMPRESSOR_CURRENT_A: f64 = 50.0;
    pub const SAFETY_REFRIGERANT_PRESSURE_PSI: f64 = 200.0;
    pub const SAFETY_SUPPLY_LOW_F: f64 = 35.0;
    pub const DEVIATION_TEMP_ERROR_F: f64 = 2.0;

    /// Stage-N threshold offsets above setpoint, degrees F.
    pub const STAGE_OFFSETS_F: [f64; 4] = [1.5, 3.0, 4.5, 6.0];
    pub const STAGE_HYSTERESIS_F: f64 = 0.5;
    pub const MIN_STAGE_RUNTIME_SECS: i64 = 300;
}

/// Pump thresholds.
pub mod pump {
    pub const SAFETY_MOTOR_CURRENT_A: f64 = 20.0;
    pub const SAFETY_VIBRATION_UNITS: f64 = 10.0;
    pub const LEAD_LAG_SUSTAINED_WINDOW_SECS: i64 = 600;
}

/// DOAS thresholds (both DOAS-1 and DOAS-2 share lockouts and safety limits).
pub mod doas {
    pub const HEAT_LOCKOUT_OAT_F: f64 = 65.0;
    pub const COOL_LOCKOUT_OAT_F: f64 = 50.0;
    pub const HIGH_TEMP_SAFETY_F: f64 = 85.0;
    pub const LOW_TEMP_SAFETY_F: f64 = 45.0;

    pub const DOAS1_HEAT_BELOW_OAT_F: f64 = 60.0;
    pub const DOAS1_COOL_ABOVE_OAT_F: f64 = 60.5;
    pub const DOAS1_HYSTERESIS_F: f64 = 0.5;
    pub const DOAS1_GAS_VALVE_PCT_PER_DEGREE: f64 = 10.0;
    pub const DOAS1_STAGE1_OFFSET_F: f64 = 2.0;
    pub const DOAS1_STAGE2_OFFSET_F: f64 = 4.0;

    pub const DOAS2_SUPPLY_SETPOINT_F: f64 = 65.0;
    pub const DOAS2_DEADBAND_F: f64 = 2.0;
}
