//! `LeadLagGroup` — paired-equipment membership for C8.
//!
//! Represented as a single owning table keyed by `groupId` with members
//! stored by id; members never cross-link back to a group record.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverState {
    Normal,
    Failedover,
    AllFaulted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadLagGroup {
    pub group_id: String,
    pub members: Vec<String>,
    pub lead_equipment_id: Option<String>,
    /// Unix seconds of the next scheduled changeover.
    pub next_changeover_at: i64,
    pub failover_state: FailoverState,
}

impl LeadLagGroup {
    pub fn lag_members(&self) -> impl Iterator<Item = &String> {
        let lead = self.lead_equipment_id.clone();
        self.members.iter().filter(move |m| Some((*m).clone()) != lead)
    }
}
