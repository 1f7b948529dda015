//! Air handler: outdoor-air-reset supply setpoint, occupancy-windowed
//! unoccupied fan cycling, deadband heating/cooling competition, and a
//! freezestat safety interlock that overrides everything else.

use super::{AlgorithmContext, AlgorithmOutput, ControlAlgorithm};
use crate::config::defaults::air_handler as cfg;
use crate::types::{CommandField, CommandValue, EquipmentType};
use chrono::Timelike;
use serde::{Deserialize, Serialize};

pub struct AirHandlerAlgorithm;

/// Persisted across ticks under `ctx.state` so the 15-min-on/60-min-period
/// cycle survives restarts and doesn't re-derive from wall clock alone —
/// an operator nudging settings mid-cycle shouldn't restart the cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct UnoccupiedFanCycle {
    is_cycling: bool,
    cycle_start_time: Option<i64>,
    next_cycle_eligible_time: i64,
}

impl Default for UnoccupiedFanCycle {
    fn default() -> Self {
        Self {
            is_cycling: false,
            cycle_start_time: None,
            next_cycle_eligible_time: 0,
        }
    }
}

fn is_occupied(ctx: &AlgorithmContext) -> bool {
    if let Some(flag) = ctx.settings.flags.get("isOccupied") {
        return *flag;
    }
    let minute_of_day = i64::from(ctx.now.hour()) * 60 + i64::from(ctx.now.minute());
    minute_of_day >= cfg::OCCUPIED_START_MIN && minute_of_day < cfg::OCCUPIED_END_MIN
}

/// Outdoor-air-reset supply setpoint for a given outdoor temperature.
/// Exposed for the equipment-state endpoint, which reports it alongside
/// `EquipmentSettings` as a derived value.
pub fn oar_setpoint(outdoor: f64) -> f64 {
    if outdoor <= cfg::OAR_LOW_OAT_F {
        return cfg::OAR_LOW_SUPPLY_F;
    }
    if outdoor >= cfg::OAR_HIGH_OAT_F {
        return cfg::OAR_HIGH_SUPPLY_F;
    }
    let span = cfg::OAR_HIGH_OAT_F - cfg::OAR_LOW_OAT_F;
    let frac = (outdoor - cfg::OAR_LOW_OAT_F) / span;
    cfg::OAR_LOW_SUPPLY_F + frac * (cfg::OAR_HIGH_SUPPLY_F - cfg::OAR_LOW_SUPPLY_F)
}

impl ControlAlgorithm for AirHandlerAlgorithm {
    fn name(&self) -> &str {
        "air_handler"
    }

    fn equipment_type(&self) -> EquipmentType {
        EquipmentType::AirHandler
    }

    fn evaluate(&self, ctx: &AlgorithmContext) -> AlgorithmOutput {
        let outdoor = ctx.metrics.get("outdoor").map_or(50.0, |v| v.parse_safe_number(50.0));
        let supply = ctx.metrics.get("supply").map_or(55.0, |v| v.parse_safe_number(55.0));
        let mixed_air = ctx
            .metrics
            .get("mixedAir")
            .map_or(supply, |v| v.parse_safe_number(supply));

        // Freezestat overrides everything: fan off, heat valve fully open,
        // cooling and outdoor air locked out.
        if supply < cfg::FREEZESTAT_TRIP_F || mixed_air < cfg::FREEZESTAT_TRIP_F {
            let commands = vec![
                field("fanEnabled", CommandValue::QuotedBool(false)),
                field("heatingValvePosition", CommandValue::Number(100.0)),
                field("coolingValvePosition", CommandValue::Number(0.0)),
                field("outdoorDamperPosition", CommandValue::Number(0.0)),
                field("unitEnable", CommandValue::QuotedBool(true)),
            ];
            return AlgorithmOutput::new(commands, ctx.state.clone());
        }

        let occupied = is_occupied(ctx);
        let mut cycle: UnoccupiedFanCycle =
            serde_json::from_value(ctx.state.clone()).unwrap_or_default();
        let now_secs = ctx.now.timestamp();

        let fan_enabled = if occupied {
            cycle = UnoccupiedFanCycle::default();
            true
        } else {
            step_fan_cycle(&mut cycle, now_secs);
            cycle.is_cycling
        };

        let static_pressure_setpoint = if occupied {
            cfg::STATIC_PRESSURE_OCCUPIED_INWC
        } else {
            cfg::STATIC_PRESSURE_CYCLING_INWC
        };

        let supply_setpoint = ctx
            .settings
            .setpoints
            .get("supplyTempSetpoint")
            .copied()
            .unwrap_or_else(|| oar_setpoint(outdoor));
        let room_setpoint = ctx.settings.setpoints.get("temperatureSetpoint").copied().unwrap_or(72.0);

        let error = supply_setpoint - supply;
        let (heating_valve, cooling_valve) = if error > cfg::DEADBAND_F {
            ((error * 10.0).clamp(0.0, 100.0), 0.0)
        } else if error < -cfg::DEADBAND_F {
            (0.0, ((-error) * 10.0).clamp(0.0, 100.0))
        } else {
            (0.0, 0.0)
        };

        let commands = vec![
            field("fanEnabled", CommandValue::QuotedBool(fan_enabled)),
            field("heatingValvePosition", CommandValue::Number(heating_valve)),
            field("coolingValvePosition", CommandValue::Number(cooling_valve)),
            field(
                "outdoorDamperPosition",
                CommandValue::Number(if occupied { 20.0 } else { 0.0 }),
            ),
            field("supplyAirTempSetpoint", CommandValue::Number(supply_setpoint)),
            field("temperatureSetpoint", CommandValue::Number(room_setpoint)),
            field(
                "fanVFDSpeed",
                CommandValue::Number(if fan_enabled { static_pressure_setpoint / cfg::STATIC_PRESSURE_OCCUPIED_INWC * 100.0 } else { 0.0 }),
            ),
            field("unitEnable", CommandValue::QuotedBool(ctx.settings.enabled)),
            field("isOccupied", CommandValue::QuotedBool(occupied)),
        ];

        let state = serde_json::to_value(&cycle).unwrap_or(serde_json::Value::Null);
        AlgorithmOutput::new(commands, state)
    }
}

fn step_fan_cycle(cycle: &mut UnoccupiedFanCycle, now_secs: i64) {
    let run_secs = cfg::FAN_CYCLE_RUN_MINUTES * 60;
    let period_secs = cfg::FAN_CYCLE_PERIOD_MINUTES * 60;

    if cycle.is_cycling {
        let start = cycle.cycle_start_time.unwrap_or(now_secs);
        if now_secs - start >= run_secs {
            cycle.is_cycling = false;
            cycle.cycle_start_time = None;
            cycle.next_cycle_eligible_time = start + period_secs;
        }
    } else if now_secs >= cycle.next_cycle_eligible_time {
        cycle.is_cycling = true;
        cycle.cycle_start_time = Some(now_secs);
    }
}

fn field(name: &str, value: CommandValue) -> CommandField {
    CommandField {
        command_type: name.to_string(),
        value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Equipment, EquipmentRole, EquipmentSettings, MetricMap, Scalar};
    use chrono::TimeZone;

    fn base_equipment() -> Equipment {
        Equipment {
            equipment_id: "AH1".into(),
            location_id: "L1".into(),
            equipment_type: EquipmentType::AirHandler,
            subtype: None,
            role: EquipmentRole::Standalone,
        }
    }

    #[test]
    fn freezestat_trips_regardless_of_occupancy() {
        let mut metrics = MetricMap::new();
        metrics.insert("supply".into(), Scalar::Num(39.9));
        let equipment = base_equipment();
        let settings = EquipmentSettings::new("test");
        let ctx = AlgorithmContext {
            equipment: &equipment,
            metrics: &metrics,
            settings: &settings,
            state: serde_json::Value::Null,
            now: chrono::Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap(),
        };
        let out = AirHandlerAlgorithm.evaluate(&ctx);
        let fan = out.commands.iter().find(|c| c.command_type == "fanEnabled").unwrap();
        assert_eq!(fan.value, CommandValue::QuotedBool(false));
        let heat = out
            .commands
            .iter()
            .find(|c| c.command_type == "heatingValvePosition")
            .unwrap();
        assert_eq!(heat.value, CommandValue::Number(100.0));
        let damper = out
            .commands
            .iter()
            .find(|c| c.command_type == "outdoorDamperPosition")
            .unwrap();
        assert_eq!(damper.value, CommandValue::Number(0.0));
    }

    #[test]
    fn oar_interpolates_between_anchors() {
        assert_eq!(oar_setpoint(32.0), 74.0);
        assert_eq!(oar_setpoint(72.0), 50.0);
        let mid = oar_setpoint(52.0);
        assert!((mid - 62.0).abs() < 0.01);
    }

    #[test]
    fn unoccupied_fan_cycle_starts_then_ends_then_reeligible() {
        let mut cycle = UnoccupiedFanCycle::default();
        step_fan_cycle(&mut cycle, 0);
        assert!(cycle.is_cycling);

        step_fan_cycle(&mut cycle, 14 * 60);
        assert!(cycle.is_cycling, "still within the 15-minute run window");

        step_fan_cycle(&mut cycle, 15 * 60);
        assert!(!cycle.is_cycling);
        assert_eq!(cycle.next_cycle_eligible_time, 60 * 60);

        step_fan_cycle(&mut cycle, 59 * 60);
        assert!(!cycle.is_cycling, "not yet eligible before the 60-minute mark");

        step_fan_cycle(&mut cycle, 60 * 60);
        assert!(cycle.is_cycling, "eligible again at the 60-minute mark");
    }
}
