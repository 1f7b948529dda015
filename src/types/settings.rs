//! `EquipmentSettings` — the operator-facing target state held in C2.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Operator-facing settings for one piece of equipment.
///
/// `last_modified` is an RFC3339 string that must strictly increase across
/// writes for the same equipment — callers should always
/// source it from [`now_rfc3339`], never hand-construct it, so successive
/// calls are guaranteed monotonic even within the same millisecond.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquipmentSettings {
    pub enabled: bool,
    pub is_lead: bool,
    /// Free-form setpoints (e.g. `supplyTempSetpoint`, `temperatureSetpoint`).
    pub setpoints: HashMap<String, f64>,
    /// Auxiliary operator flags (e.g. `isOccupied`).
    pub flags: HashMap<String, bool>,
    pub last_modified: String,
    pub modified_by: String,
}

impl EquipmentSettings {
    pub fn new(modified_by: impl Into<String>) -> Self {
        Self {
            enabled: true,
            is_lead: false,
            setpoints: HashMap::new(),
            flags: HashMap::new(),
            last_modified: now_rfc3339(),
            modified_by: modified_by.into(),
        }
    }
}

static LAST_STAMP_NANOS: std::sync::atomic::AtomicI64 = std::sync::atomic::AtomicI64::new(0);

/// Monotonic wall-clock string for `EquipmentSettings.lastModified`.
///
/// Wall-clock nanosecond resolution alone isn't enough to guarantee strict
/// increase under fast back-to-back writes, so this bumps a
/// process-wide counter whenever the clock hasn't advanced since the last
/// call.
pub fn now_rfc3339() -> String {
    use std::sync::atomic::Ordering;

    let wall = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0);
    let mut prev = LAST_STAMP_NANOS.load(Ordering::Relaxed);
    loop {
        let next = if wall > prev { wall } else { prev + 1 };
        match LAST_STAMP_NANOS.compare_exchange_weak(
            prev,
            next,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => {
                let dt = chrono::DateTime::<chrono::Utc>::from_timestamp_nanos(next);
                return dt.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true);
            }
            Err(actual) => prev = actual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successive_timestamps_strictly_increase() {
        let a = now_rfc3339();
        let b = now_rfc3339();
        assert!(b > a, "expected {b} > {a}");
    }
}
