//! Pump: safety shutdown on overcurrent/vibration, otherwise a simple
//! speed command driven by the operator setpoint with lead/lag awareness.

use super::{AlgorithmContext, AlgorithmOutput, ControlAlgorithm};
use crate::config::defaults::pump as cfg;
use crate::types::{CommandField, CommandValue, EquipmentType};

pub struct PumpAlgorithm;

impl ControlAlgorithm for PumpAlgorithm {
    fn name(&self) -> &str {
        "pump"
    }

    fn equipment_type(&self) -> EquipmentType {
        EquipmentType::Pump
    }

    fn evaluate(&self, ctx: &AlgorithmContext) -> AlgorithmOutput {
        let current_amps = ctx.metrics.get("motorCurrent").map_or(0.0, |v| v.parse_safe_number(0.0));
        let vibration = ctx.metrics.get("vibration").map_or(0.0, |v| v.parse_safe_number(0.0));

        if current_amps > cfg::SAFETY_MOTOR_CURRENT_A || vibration > cfg::SAFETY_VIBRATION_UNITS {
            let commands = vec![
                field("pumpEnable", CommandValue::Number(0.0)),
                field("pumpSpeed", CommandValue::Number(0.0)),
            ];
            return AlgorithmOutput::new(commands, ctx.state.clone());
        }

        if !ctx.settings.is_lead && matches!(ctx.equipment.role, crate::types::EquipmentRole::Lag) {
            // Lag member idles until C8 promotes it; this algorithm only
            // decides speed for whichever member currently holds lead.
            let commands = vec![
                field("pumpEnable", CommandValue::Number(0.0)),
                field("pumpSpeed", CommandValue::Number(0.0)),
                field("isLead", CommandValue::Number(0.0)),
            ];
            return AlgorithmOutput::new(commands, ctx.state.clone());
        }

        let speed = ctx
            .settings
            .setpoints
            .get("pumpSpeed")
            .copied()
            .unwrap_or(60.0)
            .clamp(0.0, 100.0);

        let commands = vec![
            field("pumpEnable", CommandValue::Number(if ctx.settings.enabled { 1.0 } else { 0.0 })),
            field("pumpSpeed", CommandValue::Number(if ctx.settings.enabled { speed } else { 0.0 })),
            field("isLead", CommandValue::Number(if ctx.settings.is_lead { 1.0 } else { 0.0 })),
        ];
        AlgorithmOutput::new(commands, ctx.state.clone())
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

    #[test]
    fn overcurrent_forces_shutdown() {
        let equipment = Equipment {
            equipment_id: "P1".into(),
            location_id: "L1".into(),
            equipment_type: EquipmentType::Pump,
            subtype: None,
            role: EquipmentRole::Standalone,
        };
        let mut metrics = MetricMap::new();
        metrics.insert("motorCurrent".into(), Scalar::Num(25.0));
        let settings = EquipmentSettings::new("test");
        let ctx = AlgorithmContext {
            equipment: &equipment,
            metrics: &metrics,
            settings: &settings,
            state: serde_json::Value::Null,
            now: chrono::Utc::now(),
        };
        let out = PumpAlgorithm.evaluate(&ctx);
        let speed = out.commands.iter().find(|c| c.command_type == "pumpSpeed").unwrap();
        assert_eq!(speed.value, CommandValue::Number(0.0));
    }
}
