pub mod config;
pub mod contracts;

pub use config::{ConfigError, DeliveryPolicy, EfficiencyThresholds, PipelineConfig};
pub use contracts::{
    normalize_entity, ApprovalKind, ApprovalStatus, Audience, CandidateReport, Decision,
    EfficiencyRating, EfficiencyReading, EfficiencyRecord, EfficiencySummary, EntitySnapshot,
    FieldChange, FuelRecord, Notification, ParsedFields, PendingApproval, RejectReason,
    CANONICAL_FIELDS,
};
