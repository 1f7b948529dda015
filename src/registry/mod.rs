//! C4 — Control Algorithm Registry.
//!
//! Each algorithm evaluates one piece of equipment's metrics and settings
//! into a list of output command fields. Registration mirrors the
//! specialist-panel shape used elsewhere in this codebase: a trait per
//! behavior plus a flat `Vec<Box<dyn _>>` the registry searches, generalized
//! here to a most-specific-to-least-specific lookup by (equipment type,
//! subtype) instead of a fixed panel.

pub mod air_handler;
pub mod boiler;
pub mod chiller;
pub mod default_algorithm;
pub mod doas;
pub mod pump;
pub mod whitelist;

pub use air_handler::AirHandlerAlgorithm;
pub use boiler::BoilerAlgorithm;
pub use chiller::ChillerAlgorithm;
pub use doas::{Doas1Algorithm, Doas2Algorithm};
pub use pump::PumpAlgorithm;

use crate::types::{CommandField, Equipment, EquipmentSettings, EquipmentType, MetricMap};

/// Everything an algorithm needs to compute its next output.
pub struct AlgorithmContext<'a> {
    pub equipment: &'a Equipment,
    pub metrics: &'a MetricMap,
    pub settings: &'a EquipmentSettings,
    /// Algorithm-private state carried across evaluations for the same
    /// piece of equipment (e.g. chiller stage runtime, fan-cycle phase).
    /// Threaded in and back out by the worker, persisted in the shared
    /// state store under a key private to this equipment.
    pub state: serde_json::Value,
    pub now: chrono::DateTime<chrono::Utc>,
}

/// An algorithm's output: the command fields to write, plus the (possibly
/// updated) private state to persist for next time.
#[derive(Debug, Clone, Default)]
pub struct AlgorithmOutput {
    pub commands: Vec<CommandField>,
    pub state: serde_json::Value,
}

impl AlgorithmOutput {
    pub fn new(commands: Vec<CommandField>, state: serde_json::Value) -> Self {
        Self { commands, state }
    }
}

pub trait ControlAlgorithm: Send + Sync {
    fn name(&self) -> &str;
    fn equipment_type(&self) -> EquipmentType;
    /// `None` matches any subtype of `equipment_type` not claimed by a more
    /// specific algorithm.
    fn subtype(&self) -> Option<&str> {
        None
    }
    fn evaluate(&self, ctx: &AlgorithmContext) -> AlgorithmOutput;
}

pub struct AlgorithmRegistry {
    algorithms: Vec<Box<dyn ControlAlgorithm>>,
    default: Box<dyn ControlAlgorithm>,
}

impl AlgorithmRegistry {
    pub fn new(algorithms: Vec<Box<dyn ControlAlgorithm>>) -> Self {
        Self {
            algorithms,
            default: Box::new(default_algorithm::DefaultAlgorithm),
        }
    }

    /// Resolve the algorithm for a piece of equipment: an exact
    /// (type, subtype) match wins, then a type-only match, then the
    /// conservative default that holds last-known-safe values.
    pub fn resolve(&self, equipment: &Equipment) -> &dyn ControlAlgorithm {
        if let Some(subtype) = equipment.subtype.as_deref() {
            if let Some(found) = self.algorithms.iter().find(|a| {
                a.equipment_type() == equipment.equipment_type && a.subtype() == Some(subtype)
            }) {
                return found.as_ref();
            }
        }
        if let Some(found) = self
            .algorithms
            .iter()
            .find(|a| a.equipment_type() == equipment.equipment_type && a.subtype().is_none())
        {
            return found.as_ref();
        }
        self.default.as_ref()
    }
}

/// The standard registration set.
pub fn default_registry() -> AlgorithmRegistry {
    let algorithms: Vec<Box<dyn ControlAlgorithm>> = vec![
        Box::new(air_handler::AirHandlerAlgorithm),
        Box::new(boiler::BoilerAlgorithm),
        Box::new(chiller::ChillerAlgorithm::two_stage()),
        Box::new(chiller::ChillerAlgorithm::four_stage()),
        Box::new(pump::PumpAlgorithm),
        Box::new(doas::Doas1Algorithm),
        Box::new(doas::Doas2Algorithm),
    ];
    AlgorithmRegistry::new(algorithms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EquipmentRole;

    fn equip(equipment_type: EquipmentType, subtype: Option<&str>) -> Equipment {
        Equipment {
            equipment_id: "E1".into(),
            location_id: "L1".into(),
            equipment_type,
            subtype: subtype.map(String::from),
            role: EquipmentRole::Standalone,
        }
    }

    #[test]
    fn resolves_exact_type_match() {
        let reg = default_registry();
        let algo = reg.resolve(&equip(EquipmentType::Boiler, None));
        assert_eq!(algo.name(), "boiler");
    }

    #[test]
    fn unregistered_type_falls_back_to_default() {
        let reg = default_registry();
        let algo = reg.resolve(&equip(EquipmentType::FanCoil, None));
        assert_eq!(algo.name(), "default");
    }

    #[test]
    fn chiller_subtype_resolves_independently() {
        let reg = default_registry();
        let two = reg.resolve(&equip(EquipmentType::Chiller2Stage, None));
        let four = reg.resolve(&equip(EquipmentType::Chiller4Stage, None));
        assert_ne!(two.name(), four.name());
    }
}
