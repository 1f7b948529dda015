//! Equipment identity and roster types.
//!
//! Equipment rows are owned and edited outside the core (an external
//! collaborator); this module only models the read-only shape the fabric
//! consumes.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EquipmentRole {
    Lead,
    Lag,
    Standalone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EquipmentType {
    AirHandler,
    Boiler,
    Chiller2Stage,
    Chiller4Stage,
    Pump,
    FanCoil,
    Doas1,
    Doas2,
    CoolingTower,
    Rtu,
}

impl EquipmentType {
    /// The tag written as `equipment_type` on every `ControlCommand` row.
    pub fn tag(&self) -> &'static str {
        match self {
            EquipmentType::AirHandler => "air_handler",
            EquipmentType::Boiler => "boiler",
            EquipmentType::Chiller2Stage => "chiller_2stage",
            EquipmentType::Chiller4Stage => "chiller_4stage",
            EquipmentType::Pump => "pump",
            EquipmentType::FanCoil => "fan_coil",
            EquipmentType::Doas1 => "doas_1",
            EquipmentType::Doas2 => "doas_2",
            EquipmentType::CoolingTower => "cooling_tower",
            EquipmentType::Rtu => "rtu",
        }
    }

    /// Type-dependent ticker period for the location processor.
    pub fn tick_period(&self) -> std::time::Duration {
        use std::time::Duration;
        match self {
            EquipmentType::AirHandler => Duration::from_secs(30),
            EquipmentType::Boiler => Duration::from_secs(45),
            EquipmentType::Chiller2Stage | EquipmentType::Chiller4Stage => Duration::from_secs(30),
            EquipmentType::Pump => Duration::from_secs(30),
            EquipmentType::FanCoil | EquipmentType::Doas1 | EquipmentType::Doas2 => {
                Duration::from_secs(30)
            }
            EquipmentType::CoolingTower | EquipmentType::Rtu => Duration::from_secs(30),
        }
    }

    /// Category-specific job timeout used for in-flight cleanup.
    pub fn job_timeout(&self) -> std::time::Duration {
        use std::time::Duration;
        match self {
            EquipmentType::AirHandler | EquipmentType::Boiler => Duration::from_secs(90),
            EquipmentType::Chiller2Stage | EquipmentType::Chiller4Stage => Duration::from_secs(90),
            EquipmentType::Pump => Duration::from_secs(60),
            _ => Duration::from_secs(60),
        }
    }
}

impl fmt::Display for EquipmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Equipment identity, as supplied by the external roster collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Equipment {
    pub equipment_id: String,
    pub location_id: String,
    pub equipment_type: EquipmentType,
    pub subtype: Option<String>,
    pub role: EquipmentRole,
}

impl Equipment {
    /// The queue-level uniqueness key: `"{locationId}-{equipmentId}-{equipmentType}"`.
    pub fn job_key(&self) -> String {
        format!(
            "{}-{}-{}",
            self.location_id,
            self.equipment_id,
            self.equipment_type.tag()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_key_format() {
        let e = Equipment {
            equipment_id: "E1".into(),
            location_id: "L9".into(),
            equipment_type: EquipmentType::Boiler,
            subtype: None,
            role: EquipmentRole::Standalone,
        };
        assert_eq!(e.job_key(), "L9-E1-boiler");
    }
}
