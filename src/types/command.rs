//! `ControlCommand` — the output row written by C7 to both the
//! control-commands (audit) and locations (current-state) logical tables.

use super::equipment::EquipmentType;
use serde::{Deserialize, Serialize};

/// How a command field's value should be rendered on the wire.
///
/// The gateway must never mix conventions for the same field across writes
/// the convention lives with the field in the whitelist table
/// (`registry::whitelist`), not on the command itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolConvention {
    /// Written as `1.0` / `0.0`.
    Numeric,
    /// Written as the quoted strings `"true"` / `"false"`.
    Quoted,
}

/// A single command value, already coerced per the field's convention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandValue {
    Number(f64),
    QuotedBool(bool),
}

impl CommandValue {
    pub fn from_bool(value: bool, convention: BoolConvention) -> Self {
        match convention {
            BoolConvention::Numeric => CommandValue::Number(if value { 1.0 } else { 0.0 }),
            BoolConvention::Quoted => CommandValue::QuotedBool(value),
        }
    }
}

/// One field of a worker's command output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandField {
    pub command_type: String,
    pub value: CommandValue,
}

/// A fully-addressed control command ready to write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlCommand {
    pub equipment_id: String,
    pub location_id: String,
    pub equipment_type: EquipmentType,
    pub command_type: String,
    pub value: CommandValue,
    pub source_tag: String,
    pub status_tag: String,
    pub timestamp_ns: i64,
}
