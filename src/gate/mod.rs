//! C5 — Smart Gate.
//!
//! Decides, on every processor tick, whether a piece of equipment's current
//! metrics warrant enqueuing a control job, and at what priority. Higher
//! priority always wins the ladder; the first matching rung short-circuits
//! the rest. A panic-free internal error always fails safe to "process at
//! safety priority" rather than silently skip a tick.

use crate::config::defaults::{air_handler, boiler, chiller, doas, priority, pump};
use crate::types::{Equipment, EquipmentSettings, EquipmentType, MetricMap};
use dashmap::DashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

#[derive(Debug, Clone, PartialEq)]
pub struct GateDecision {
    pub should_process: bool,
    pub priority: i32,
    pub reason: String,
}

impl GateDecision {
    fn skip() -> Self {
        Self {
            should_process: false,
            priority: 0,
            reason: "no trigger matched".to_string(),
        }
    }

    fn trigger(priority: i32, reason: impl Into<String>) -> Self {
        Self {
            should_process: true,
            priority,
            reason: reason.into(),
        }
    }
}

#[derive(Clone)]
struct CachedState {
    metrics: MetricMap,
    last_evaluated_unix_secs: i64,
}

pub struct SmartGate {
    cache: DashMap<String, CachedState>,
    max_staleness_secs: i64,
}

impl SmartGate {
    pub fn new(max_staleness_secs: i64) -> Self {
        Self {
            cache: DashMap::new(),
            max_staleness_secs,
        }
    }

    /// Evaluate the gate for one piece of equipment. `now_unix_secs` is
    /// passed in rather than read internally so tests can drive staleness
    /// deterministically.
    pub fn evaluate(
        &self,
        equipment: &Equipment,
        metrics: &MetricMap,
        settings: &EquipmentSettings,
        recent_ui_commands: u64,
        now_unix_secs: i64,
    ) -> GateDecision {
        let result = catch_unwind(AssertUnwindSafe(|| {
            self.evaluate_inner(equipment, metrics, settings, recent_ui_commands, now_unix_secs)
        }));

        match result {
            Ok(decision) => decision,
            Err(_) => GateDecision::trigger(
                priority::SAFETY,
                "internal gate error, failing safe to process",
            ),
        }
    }

    fn evaluate_inner(
        &self,
        equipment: &Equipment,
        metrics: &MetricMap,
        settings: &EquipmentSettings,
        recent_ui_commands: u64,
        now_unix_secs: i64,
    ) -> GateDecision {
        if let Some(reason) = safety_trigger(equipment.equipment_type, metrics) {
            self.remember(equipment, metrics, now_unix_secs);
            return GateDecision::trigger(priority::SAFETY, reason);
        }

        if let Some(reason) = deviation_trigger(equipment.equipment_type, metrics, settings) {
            self.remember(equipment, metrics, now_unix_secs);
            return GateDecision::trigger(priority::DEVIATION, reason);
        }

        if matches!(
            equipment.equipment_type,
            EquipmentType::Chiller2Stage | EquipmentType::Chiller4Stage
        ) {
            if let Some(reason) = chiller_stage_threshold_trigger(metrics, settings) {
                self.remember(equipment, metrics, now_unix_secs);
                return GateDecision::trigger(priority::CHILLER_STAGE_THRESHOLD, reason);
            }
        }

        if recent_ui_commands > 0 {
            self.remember(equipment, metrics, now_unix_secs);
            return GateDecision::trigger(
                priority::RECENT_OPERATOR_COMMAND,
                format!("{recent_ui_commands} recent operator command(s)"),
            );
        }

        let cached = self.cache.get(&equipment.equipment_id).map(|c| c.clone());

        if let Some(cached) = &cached {
            if let Some(reason) = significant_change_trigger(equipment.equipment_type, &cached.metrics, metrics) {
                self.remember(equipment, metrics, now_unix_secs);
                return GateDecision::trigger(priority::SIGNIFICANT_CHANGE, reason);
            }

            let staleness = now_unix_secs - cached.last_evaluated_unix_secs;
            if staleness >= self.max_staleness_secs {
                self.remember(equipment, metrics, now_unix_secs);
                return GateDecision::trigger(
                    priority::MAX_STALENESS,
                    format!("{staleness}s since last evaluation exceeds max staleness"),
                );
            }
            GateDecision::skip()
        } else {
            // First time we've seen this equipment — always process once so
            // the deviation cache has a baseline to compare against.
            self.remember(equipment, metrics, now_unix_secs);
            GateDecision::trigger(priority::MAX_STALENESS, "no prior evaluation on record")
        }
    }

    fn remember(&self, equipment: &Equipment, metrics: &MetricMap, now_unix_secs: i64) {
        self.cache.insert(
            equipment.equipment_id.clone(),
            CachedState {
                metrics: metrics.clone(),
                last_evaluated_unix_secs: now_unix_secs,
            },
        );
    }
}

fn num(metrics: &MetricMap, field: &str, default: f64) -> f64 {
    metrics.get(field).map_or(default, |v| v.parse_safe_number(default))
}

pub(crate) fn safety_trigger(equipment_type: EquipmentType, metrics: &MetricMap) -> Option<String> {
    match equipment_type {
        EquipmentType::AirHandler | EquipmentType::Rtu => {
            let supply = num(metrics, "supply", 55.0);
            if supply > air_handler::SAFETY_SUPPLY_HIGH_F || supply < air_handler::SAFETY_SUPPLY_LOW_F {
                return Some(format!("air handler supply {supply}F outside safety range"));
            }
            None
        }
        EquipmentType::Boiler => {
            let water_temp = num(metrics, "waterTemp", 150.0);
            let pressure = num(metrics, "pressure", 15.0);
            if water_temp > boiler::SAFETY_WATER_TEMP_HIGH_F || pressure > boiler::SAFETY_PRESSURE_HIGH_PSI {
                return Some(format!("boiler water temp {water_temp}F / pressure {pressure}psi unsafe"));
            }
            None
        }
        EquipmentType::Chiller2Stage | EquipmentType::Chiller4Stage | EquipmentType::CoolingTower => {
            let current = num(metrics, "compressorCurrent", 0.0);
            let psi = num(metrics, "refrigerantPressure", 0.0);
            let supply = num(metrics, "supply", 45.0);
            if current > chiller::SAFETY_COMPRESSOR_CURRENT_A
                || psi > chiller::SAFETY_REFRIGERANT_PRESSURE_PSI
                || supply < chiller::SAFETY_SUPPLY_LOW_F
            {
                return Some(format!("chiller current {current}A / pressure {psi}psi / supply {supply}F unsafe"));
            }
            None
        }
        EquipmentType::Pump => {
            let current = num(metrics, "motorCurrent", 0.0);
            let vibration = num(metrics, "vibration", 0.0);
            if current > pump::SAFETY_MOTOR_CURRENT_A || vibration > pump::SAFETY_VIBRATION_UNITS {
                return Some(format!("pump current {current}A / vibration {vibration} unsafe"));
            }
            None
        }
        EquipmentType::FanCoil | EquipmentType::Doas1 | EquipmentType::Doas2 => {
            let supply = num(metrics, "supply", 65.0);
            if supply > doas::HIGH_TEMP_SAFETY_F || supply < doas::LOW_TEMP_SAFETY_F {
                return Some(format!("DOAS supply {supply}F outside safety range"));
            }
            None
        }
    }
}

fn deviation_trigger(
    equipment_type: EquipmentType,
    metrics: &MetricMap,
    settings: &EquipmentSettings,
) -> Option<String> {
    match equipment_type {
        EquipmentType::AirHandler | EquipmentType::Rtu => {
            let room = num(metrics, "room", 72.0);
            let supply = num(metrics, "supply", 55.0);
            let setpoint = settings.setpoints.get("temperatureSetpoint").copied().unwrap_or(72.0);
            let room_error = (room - setpoint).abs();
            if room_error > air_handler::ROOM_ERROR_DEVIATION_F {
                return Some(format!("room error {room_error:.1}F exceeds deviation band"));
            }
            if !(air_handler::SUPPLY_BAND_LOW_F..=air_handler::SUPPLY_BAND_HIGH_F).contains(&supply) {
                return Some(format!("supply {supply}F outside {}-{}F band", air_handler::SUPPLY_BAND_LOW_F, air_handler::SUPPLY_BAND_HIGH_F));
            }
            None
        }
        EquipmentType::Boiler => {
            let water_temp = num(metrics, "waterTemp", 150.0);
            let setpoint = settings.setpoints.get("temperatureSetpoint").copied().unwrap_or(160.0);
            let error = (water_temp - setpoint).abs();
            (error > boiler::DEVIATION_WATER_TEMP_ERROR_F)
                .then(|| format!("water temp error {error:.1}F exceeds deviation band"))
        }
        EquipmentType::Chiller2Stage | EquipmentType::Chiller4Stage | EquipmentType::CoolingTower => {
            let supply = num(metrics, "supply", 45.0);
            let setpoint = settings.setpoints.get("temperatureSetpoint").copied().unwrap_or(45.0);
            let error = (supply - setpoint).abs();
            (error > chiller::DEVIATION_TEMP_ERROR_F)
                .then(|| format!("chiller supply error {error:.1}F exceeds deviation band"))
        }
        _ => None,
    }
}

fn chiller_stage_threshold_trigger(metrics: &MetricMap, settings: &EquipmentSettings) -> Option<String> {
    let supply = num(metrics, "supply", 45.0);
    let setpoint = settings.setpoints.get("temperatureSetpoint").copied().unwrap_or(45.0);
    let error_above = supply - setpoint;
    let crossing = chiller::STAGE_OFFSETS_F
        .iter()
        .any(|offset| (error_above - offset).abs() < chiller::STAGE_HYSTERESIS_F);
    crossing.then(|| format!("chiller error {error_above:.1}F near a stage threshold"))
}

fn significant_change_trigger(equipment_type: EquipmentType, before: &MetricMap, after: &MetricMap) -> Option<String> {
    let temp_threshold = match equipment_type {
        EquipmentType::AirHandler | EquipmentType::Rtu => air_handler::CHANGE_TEMP_F,
        _ => 2.0,
    };

    for (field, new_value) in after {
        let Some(old_value) = before.get(field) else {
            continue;
        };
        let delta = (new_value.parse_safe_number(0.0) - old_value.parse_safe_number(0.0)).abs();
        let threshold = if field.to_ascii_lowercase().contains("valve") {
            air_handler::CHANGE_VALVE_PCT
        } else if field.to_ascii_lowercase().contains("speed") {
            air_handler::CHANGE_SPEED_PCT
        } else {
            temp_threshold
        };
        if delta > threshold {
            return Some(format!("{field} changed by {delta:.1}, exceeds change-detection threshold"));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EquipmentRole, Scalar};

    fn equip(equipment_type: EquipmentType) -> Equipment {
        Equipment {
            equipment_id: "E1".into(),
            location_id: "L1".into(),
            equipment_type,
            subtype: None,
            role: EquipmentRole::Standalone,
        }
    }

    #[test]
    fn safety_trigger_wins_at_highest_priority() {
        let gate = SmartGate::new(30);
        let mut metrics = MetricMap::new();
        metrics.insert("supply".into(), Scalar::Num(39.9));
        let settings = EquipmentSettings::new("test");
        let decision = gate.evaluate(&equip(EquipmentType::AirHandler), &metrics, &settings, 0, 0);
        assert!(decision.should_process);
        assert_eq!(decision.priority, priority::SAFETY);
    }

    #[test]
    fn recent_operator_command_outranks_staleness() {
        let gate = SmartGate::new(30);
        let mut metrics = MetricMap::new();
        metrics.insert("supply".into(), Scalar::Num(60.0));
        metrics.insert("room".into(), Scalar::Num(72.0));
        let settings = EquipmentSettings::new("test");
        gate.evaluate(&equip(EquipmentType::AirHandler), &metrics, &settings, 0, 0);
        let decision = gate.evaluate(&equip(EquipmentType::AirHandler), &metrics, &settings, 2, 5);
        assert_eq!(decision.priority, priority::RECENT_OPERATOR_COMMAND);
    }

    #[test]
    fn stale_cache_forces_reevaluation() {
        let gate = SmartGate::new(30);
        let mut metrics = MetricMap::new();
        metrics.insert("supply".into(), Scalar::Num(60.0));
        metrics.insert("room".into(), Scalar::Num(72.0));
        let settings = EquipmentSettings::new("test");
        gate.evaluate(&equip(EquipmentType::AirHandler), &metrics, &settings, 0, 0);
        let fresh = gate.evaluate(&equip(EquipmentType::AirHandler), &metrics, &settings, 0, 10);
        assert!(!fresh.should_process, "10s since baseline is within the 30s staleness window");

        let stale = gate.evaluate(&equip(EquipmentType::AirHandler), &metrics, &settings, 0, 45);
        assert!(stale.should_process);
        assert_eq!(stale.priority, priority::MAX_STALENESS);
    }
}
