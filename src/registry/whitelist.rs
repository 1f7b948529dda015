//! Per-equipment-type output whitelist.
//!
//! The worker pool runs every algorithm's output through this table before
//! writing to the timeseries store: unknown fields are dropped, numeric
//! fields are clamped into their safe range, and boolean fields are
//! re-rendered in the one wire convention that field uses everywhere —
//! never a per-write choice, since a gateway that alternates between
//! `1.0`/`0.0` and `"true"`/`"false"` for the same field breaks downstream
//! consumers that assume one type per column.

use crate::types::{BoolConvention, CommandField, CommandValue, EquipmentType};

#[derive(Debug, Clone, Copy)]
pub enum FieldKind {
    Numeric { min: f64, max: f64 },
    Bool(BoolConvention),
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

const fn numeric(name: &'static str, min: f64, max: f64) -> FieldSpec {
    FieldSpec {
        name,
        kind: FieldKind::Numeric { min, max },
    }
}

const fn boolean(name: &'static str, convention: BoolConvention) -> FieldSpec {
    FieldSpec {
        name,
        kind: FieldKind::Bool(convention),
    }
}

fn air_handler_fields() -> &'static [FieldSpec] {
    &[
        numeric("heatingValvePosition", 0.0, 100.0),
        numeric("coolingValvePosition", 0.0, 100.0),
        numeric("fanSpeed", 0.0, 100.0),
        numeric("fanVFDSpeed", 0.0, 100.0),
        numeric("outdoorDamperPosition", 0.0, 100.0),
        numeric("supplyAirTempSetpoint", 45.0, 85.0),
        numeric("temperatureSetpoint", 60.0, 80.0),
        boolean("fanEnabled", BoolConvention::Quoted),
        boolean("unitEnable", BoolConvention::Quoted),
        boolean("isOccupied", BoolConvention::Quoted),
    ]
}

fn boiler_fields() -> &'static [FieldSpec] {
    &[
        numeric("firing", 0.0, 100.0),
        numeric("temperatureSetpoint", 100.0, 190.0),
        boolean("unitEnable", BoolConvention::Numeric),
        boolean("isLead", BoolConvention::Numeric),
    ]
}

fn chiller_fields() -> &'static [FieldSpec] {
    &[
        numeric("stage", 0.0, 4.0),
        numeric("temperatureSetpoint", 38.0, 55.0),
        boolean("unitEnable", BoolConvention::Numeric),
        boolean("isLead", BoolConvention::Numeric),
    ]
}

fn pump_fields() -> &'static [FieldSpec] {
    &[
        numeric("pumpSpeed", 0.0, 100.0),
        boolean("pumpEnable", BoolConvention::Numeric),
        boolean("isLead", BoolConvention::Numeric),
    ]
}

fn doas_fields() -> &'static [FieldSpec] {
    &[
        numeric("gasValvePosition", 0.0, 100.0),
        numeric("coolStage", 0.0, 2.0),
        numeric("supplyAirTempSetpoint", 55.0, 75.0),
        boolean("heatEnable", BoolConvention::Quoted),
        boolean("coolEnable", BoolConvention::Quoted),
        boolean("emergencyShutdown", BoolConvention::Quoted),
    ]
}

/// Whitelist for an equipment type. An empty slice (the default case)
/// means every field is dropped — safe-by-default for unregistered types.
pub fn fields_for(equipment_type: EquipmentType) -> &'static [FieldSpec] {
    match equipment_type {
        EquipmentType::AirHandler | EquipmentType::Rtu => air_handler_fields(),
        EquipmentType::Boiler => boiler_fields(),
        EquipmentType::Chiller2Stage | EquipmentType::Chiller4Stage | EquipmentType::CoolingTower => {
            chiller_fields()
        }
        EquipmentType::Pump => pump_fields(),
        EquipmentType::FanCoil | EquipmentType::Doas1 | EquipmentType::Doas2 => doas_fields(),
    }
}

/// Filter and clamp raw algorithm output against the whitelist for this
/// equipment type. Unknown command types are dropped silently: an
/// algorithm emitting a field with no whitelist entry is a bug in that
/// algorithm, not something the gateway should propagate downstream.
pub fn apply(equipment_type: EquipmentType, commands: Vec<CommandField>) -> Vec<CommandField> {
    let specs = fields_for(equipment_type);
    commands
        .into_iter()
        .filter_map(|cmd| {
            let spec = specs.iter().find(|s| s.name == cmd.command_type)?;
            let value = match spec.kind {
                FieldKind::Numeric { min, max } => {
                    let n = match cmd.value {
                        CommandValue::Number(n) => n,
                        CommandValue::QuotedBool(b) => {
                            if b {
                                1.0
                            } else {
                                0.0
                            }
                        }
                    };
                    CommandValue::Number(n.clamp(min, max))
                }
                FieldKind::Bool(convention) => {
                    let b = match cmd.value {
                        CommandValue::Number(n) => n != 0.0,
                        CommandValue::QuotedBool(b) => b,
                    };
                    CommandValue::from_bool(b, convention)
                }
            };
            Some(CommandField {
                command_type: cmd.command_type,
                value,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_field_is_dropped() {
        let out = apply(
            EquipmentType::Boiler,
            vec![CommandField {
                command_type: "bogusField".into(),
                value: CommandValue::Number(1.0),
            }],
        );
        assert!(out.is_empty());
    }

    #[test]
    fn numeric_field_clamps_to_range() {
        let out = apply(
            EquipmentType::AirHandler,
            vec![CommandField {
                command_type: "supplyAirTempSetpoint".into(),
                value: CommandValue::Number(999.0),
            }],
        );
        assert_eq!(out[0].value, CommandValue::Number(85.0));
    }

    #[test]
    fn bool_field_renders_in_its_fixed_convention() {
        let out = apply(
            EquipmentType::Boiler,
            vec![CommandField {
                command_type: "unitEnable".into(),
                value: CommandValue::QuotedBool(true),
            }],
        );
        assert_eq!(out[0].value, CommandValue::Number(1.0));

        let out2 = apply(
            EquipmentType::AirHandler,
            vec![CommandField {
                command_type: "fanEnabled".into(),
                value: CommandValue::Number(1.0),
            }],
        );
        assert_eq!(out2[0].value, CommandValue::QuotedBool(true));
    }
}
