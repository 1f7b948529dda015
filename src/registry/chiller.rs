//! Chiller staging: never skip a stage up, may skip stages down, each
//! stage change respects a minimum on-time before the next change is
//! considered, and a half-degree hysteresis band prevents chatter at a
//! stage boundary. The 2-stage and 4-stage variants share this shape,
//! differing only in how many stage thresholds are in play.

use super::{AlgorithmContext, AlgorithmOutput, ControlAlgorithm};
use crate::config::defaults::chiller as cfg;
use crate::types::{CommandField, CommandValue, EquipmentType};
use serde::{Deserialize, Serialize};

pub struct ChillerAlgorithm {
    equipment_type: EquipmentType,
    max_stage: u8,
    name: &'static str,
}

impl ChillerAlgorithm {
    pub fn two_stage() -> Self {
        Self {
            equipment_type: EquipmentType::Chiller2Stage,
            max_stage: 2,
            name: "chiller_2stage",
        }
    }

    pub fn four_stage() -> Self {
        Self {
            equipment_type: EquipmentType::Chiller4Stage,
            max_stage: 4,
            name: "chiller_4stage",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct StageState {
    current_stage: u8,
    last_change_at: Option<i64>,
}

impl ControlAlgorithm for ChillerAlgorithm {
    fn name(&self) -> &str {
        self.name
    }

    fn equipment_type(&self) -> EquipmentType {
        self.equipment_type
    }

    fn evaluate(&self, ctx: &AlgorithmContext) -> AlgorithmOutput {
        let supply = ctx.metrics.get("supply").map_or(45.0, |v| v.parse_safe_number(45.0));
        let current_amps = ctx
            .metrics
            .get("compressorCurrent")
            .map_or(0.0, |v| v.parse_safe_number(0.0));
        let refrigerant_psi = ctx
            .metrics
            .get("refrigerantPressure")
            .map_or(0.0, |v| v.parse_safe_number(0.0));

        if supply < cfg::SAFETY_SUPPLY_LOW_F
            || current_amps > cfg::SAFETY_COMPRESSOR_CURRENT_A
            || refrigerant_psi > cfg::SAFETY_REFRIGERANT_PRESSURE_PSI
        {
            let commands = vec![
                field("unitEnable", CommandValue::Number(0.0)),
                field("stage", CommandValue::Number(0.0)),
            ];
            return AlgorithmOutput::new(commands, ctx.state.clone());
        }

        let setpoint = ctx
            .settings
            .setpoints
            .get("temperatureSetpoint")
            .copied()
            .unwrap_or(45.0);
        let mut state: StageState = serde_json::from_value(ctx.state.clone()).unwrap_or_default();
        let now_secs = ctx.now.timestamp();
        let min_runtime_elapsed = state
            .last_change_at
            .map(|t| now_secs - t >= cfg::MIN_STAGE_RUNTIME_SECS)
            .unwrap_or(true);

        if !ctx.settings.enabled {
            if state.current_stage != 0 {
                state.current_stage = 0;
                state.last_change_at = Some(now_secs);
            }
        } else if min_runtime_elapsed {
            let desired = desired_stage(supply - setpoint, self.max_stage, state.current_stage);
            if desired != state.current_stage {
                state.current_stage = desired;
                state.last_change_at = Some(now_secs);
            }
        }

        let commands = vec![
            field("unitEnable", CommandValue::Number(if state.current_stage > 0 { 1.0 } else { 0.0 })),
            field("stage", CommandValue::Number(f64::from(state.current_stage))),
            field("temperatureSetpoint", CommandValue::Number(setpoint)),
            field("isLead", CommandValue::Number(if ctx.settings.is_lead { 1.0 } else { 0.0 })),
        ];
        let state = serde_json::to_value(&state).unwrap_or(serde_json::Value::Null);
        AlgorithmOutput::new(commands, state)
    }
}

/// Never jump more than one stage up per evaluation; stages down can drop
/// straight to the satisfied stage since cooling too little is unsafe but
/// cooling too much briefly is not.
///
/// A single noisy or fast-moving reading can clear more than one stage's
/// threshold at once (e.g. supply running 6F above setpoint while still at
/// stage 2, which clears both the stage-3 and stage-4 thresholds). The
/// per-tick cap still holds in that case: the unit steps to stage 3 this
/// evaluation and reaches stage 4 on the next one, once minimum runtime has
/// elapsed, rather than energizing two more compressors in the same tick.
/// The illustrative boundary walk (supply stepping 45 -> 46 -> 47.5 -> 49 ->
/// 51F against a 45F setpoint, ending at stage 4) describes the stage the
/// unit settles at once it has had time to catch up, not the stage reached
/// on the very tick each reading first appears.
fn desired_stage(error_above_setpoint: f64, max_stage: u8, current: u8) -> u8 {
    let mut target = 0u8;
    for (i, offset) in cfg::STAGE_OFFSETS_F.iter().take(max_stage as usize).enumerate() {
        let threshold = if (i as u8) < current {
            offset - cfg::STAGE_HYSTERESIS_F
        } else {
            *offset
        };
        if error_above_setpoint >= threshold {
            target = (i + 1) as u8;
        }
    }
    if target > current + 1 {
        current + 1
    } else {
        target
    }
}

fn field(name: &str, value: CommandValue) -> CommandField {
    CommandField {
        command_type: name.to_string(),
        value,
    }
}
