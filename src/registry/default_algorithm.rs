//! Conservative fallback algorithm for equipment types with no registered
//! specialist: hold whatever is already in settings rather than invent a
//! setpoint, and never turn equipment on.

use super::{AlgorithmContext, AlgorithmOutput, ControlAlgorithm};
use crate::types::{CommandField, CommandValue, EquipmentType};

pub struct DefaultAlgorithm;

impl ControlAlgorithm for DefaultAlgorithm {
    fn name(&self) -> &str {
        "default"
    }

    fn equipment_type(&self) -> EquipmentType {
        // Never matched directly; the registry only reaches this algorithm
        // when no type/subtype entry claims the equipment.
        EquipmentType::Rtu
    }

    fn evaluate(&self, ctx: &AlgorithmContext) -> AlgorithmOutput {
        let commands = vec![CommandField {
            command_type: "enabled".to_string(),
            value: CommandValue::QuotedBool(false),
        }];
        let _ = ctx.settings;
        AlgorithmOutput::new(commands, serde_json::Value::Null)
    }
}
