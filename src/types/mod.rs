//! Core data model shared across the fabric.

pub mod command;
pub mod equipment;
pub mod job;
pub mod leadlag;
pub mod metrics;
pub mod request_id;
pub mod scalar;
pub mod settings;

pub use command::{BoolConvention, CommandField, CommandValue, ControlCommand};
pub use equipment::{Equipment, EquipmentRole, EquipmentType};
pub use job::{Job, JobState, JobStatus, JobStatusValue, JobType};
pub use leadlag::{FailoverState, LeadLagGroup};
pub use metrics::{fallback_metrics, merge_latest, MetricMap, MetricSample, RESERVED_TAGS};
pub use request_id::RequestId;
pub use scalar::Scalar;
pub use settings::{now_rfc3339, EquipmentSettings};
