//! DOAS-1 (outdoor-led) and DOAS-2 (feedback) dedicated outdoor air
//! algorithms. Both share lockouts and high/low temperature safety
//! shutdown; they differ in how the heat/cool call is derived.

use super::{AlgorithmContext, AlgorithmOutput, ControlAlgorithm};
use crate::config::defaults::doas as cfg;
use crate::types::{CommandField, CommandValue, EquipmentType};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
enum Mode {
    #[default]
    Idle,
    Heat,
    Cool,
}

fn field(name: &str, value: CommandValue) -> CommandField {
    CommandField {
        command_type: name.to_string(),
        value,
    }
}

fn emergency_shutdown() -> Vec<CommandField> {
    vec![
        field("heatEnable", CommandValue::QuotedBool(false)),
        field("coolEnable", CommandValue::QuotedBool(false)),
        field("gasValvePosition", CommandValue::Number(0.0)),
        field("coolStage", CommandValue::Number(0.0)),
        field("emergencyShutdown", CommandValue::QuotedBool(true)),
    ]
}

fn safety_trip(supply: f64) -> bool {
    supply > cfg::HIGH_TEMP_SAFETY_F || supply < cfg::LOW_TEMP_SAFETY_F
}

pub struct Doas1Algorithm;

impl ControlAlgorithm for Doas1Algorithm {
    fn name(&self) -> &str {
        "doas_1"
    }

    fn equipment_type(&self) -> EquipmentType {
        EquipmentType::Doas1
    }

    fn evaluate(&self, ctx: &AlgorithmContext) -> AlgorithmOutput {
        let outdoor = ctx.metrics.get("outdoor").map_or(60.0, |v| v.parse_safe_number(60.0));
        let supply = ctx.metrics.get("supply").map_or(65.0, |v| v.parse_safe_number(65.0));

        if safety_trip(supply) {
            return AlgorithmOutput::new(emergency_shutdown(), ctx.state.clone());
        }

        let mut mode: Mode = serde_json::from_value(ctx.state.clone()).unwrap_or_default();
        mode = next_mode(mode, outdoor);

        let heat_locked_out = outdoor > cfg::HEAT_LOCKOUT_OAT_F;
        let cool_locked_out = outdoor < cfg::COOL_LOCKOUT_OAT_F;

        let setpoint = ctx
            .settings
            .setpoints
            .get("supplyAirTempSetpoint")
            .copied()
            .unwrap_or(cfg::DOAS2_SUPPLY_SETPOINT_F);

        let commands = match mode {
            Mode::Heat if !heat_locked_out => {
                let error = setpoint - supply;
                let gas_valve = (error * cfg::DOAS1_GAS_VALVE_PCT_PER_DEGREE).clamp(0.0, 100.0);
                vec![
                    field("heatEnable", CommandValue::QuotedBool(true)),
                    field("coolEnable", CommandValue::QuotedBool(false)),
                    field("gasValvePosition", CommandValue::Number(gas_valve)),
                    field("coolStage", CommandValue::Number(0.0)),
                    field("supplyAirTempSetpoint", CommandValue::Number(setpoint)),
                ]
            }
            Mode::Cool if !cool_locked_out => {
                let error_above = supply - setpoint;
                let stage = if error_above >= cfg::DOAS1_STAGE2_OFFSET_F {
                    2.0
                } else if error_above >= cfg::DOAS1_STAGE1_OFFSET_F {
                    1.0
                } else {
                    0.0
                };
                vec![
                    field("heatEnable", CommandValue::QuotedBool(false)),
                    field("coolEnable", CommandValue::QuotedBool(stage > 0.0)),
                    field("gasValvePosition", CommandValue::Number(0.0)),
                    field("coolStage", CommandValue::Number(stage)),
                    field("supplyAirTempSetpoint", CommandValue::Number(setpoint)),
                ]
            }
            _ => vec![
                field("heatEnable", CommandValue::QuotedBool(false)),
                field("coolEnable", CommandValue::QuotedBool(false)),
                field("gasValvePosition", CommandValue::Number(0.0)),
                field("coolStage", CommandValue::Number(0.0)),
                field("supplyAirTempSetpoint", CommandValue::Number(setpoint)),
            ],
        };

        let state = serde_json::to_value(mode).unwrap_or(serde_json::Value::Null);
        AlgorithmOutput::new(commands, state)
    }
}

/// Heat below 60F, cool at/above 60.5F, 0.5F hysteresis band between —
/// the mode only changes when OAT crosses fully past the opposite anchor,
/// so a sweep through the band flips at most once per direction.
fn next_mode(current: Mode, outdoor: f64) -> Mode {
    match current {
        Mode::Heat => {
            if outdoor >= cfg::DOAS1_COOL_ABOVE_OAT_F {
                Mode::Cool
            } else {
                Mode::Heat
            }
        }
        Mode::Cool => {
            if outdoor < cfg::DOAS1_HEAT_BELOW_OAT_F {
                Mode::Heat
            } else {
                Mode::Cool
            }
        }
        Mode::Idle => {
            if outdoor < cfg::DOAS1_HEAT_BELOW_OAT_F {
                Mode::Heat
            } else if outdoor >= cfg::DOAS1_COOL_ABOVE_OAT_F {
                Mode::Cool
            } else {
                Mode::Idle
            }
        }
    }
}

pub struct Doas2Algorithm;

impl ControlAlgorithm for Doas2Algorithm {
    fn name(&self) -> &str {
        "doas_2"
    }

    fn equipment_type(&self) -> EquipmentType {
        EquipmentType::Doas2
    }

    fn evaluate(&self, ctx: &AlgorithmContext) -> AlgorithmOutput {
        let supply = ctx.metrics.get("supply").map_or(65.0, |v| v.parse_safe_number(65.0));
        let outdoor = ctx.metrics.get("outdoor").map_or(60.0, |v| v.parse_safe_number(60.0));

        if safety_trip(supply) {
            return AlgorithmOutput::new(emergency_shutdown(), ctx.state.clone());
        }

        let setpoint = ctx
            .settings
            .setpoints
            .get("supplyAirTempSetpoint")
            .copied()
            .unwrap_or(cfg::DOAS2_SUPPLY_SETPOINT_F);
        let heat_locked_out = outdoor > cfg::HEAT_LOCKOUT_OAT_F;
        let cool_locked_out = outdoor < cfg::COOL_LOCKOUT_OAT_F;

        let error = setpoint - supply;
        let (heat, cool) = if error > cfg::DOAS2_DEADBAND_F {
            (!heat_locked_out, false)
        } else if error < -cfg::DOAS2_DEADBAND_F {
            (false, !cool_locked_out)
        } else {
            (false, false)
        };

        let commands = vec![
            field("heatEnable", CommandValue::QuotedBool(heat)),
            field("coolEnable", CommandValue::QuotedBool(cool)),
            field("gasValvePosition", CommandValue::Number(if heat { 100.0 } else { 0.0 })),
            field("coolStage", CommandValue::Number(if cool { 1.0 } else { 0.0 })),
            field("supplyAirTempSetpoint", CommandValue::Number(setpoint)),
        ];
        AlgorithmOutput::new(commands, ctx.state.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hysteresis_does_not_flip_more_than_once_per_sweep() {
        // Sweeping 58 -> 62 -> 58 should flip heat->cool once, then
        // cool->heat once, never chattering at the midpoint.
        let mut mode = Mode::Heat;
        let mut flips = 0;
        let sweep = [58.0, 59.0, 60.0, 60.5, 61.0, 62.0, 61.0, 60.5, 60.0, 59.0, 58.0];
        for oat in sweep {
            let next = next_mode(mode, oat);
            if next != mode {
                flips += 1;
            }
            mode = next;
        }
        assert!(flips <= 2, "expected at most 2 flips, got {flips}");
    }

    #[test]
    fn emergency_shutdown_trips_on_high_supply() {
        assert!(safety_trip(90.0));
        assert!(safety_trip(40.0));
        assert!(!safety_trip(65.0));
    }
}
