use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::config::EfficiencyThresholds;

/// The seven canonical fields a complete report must carry, in the order
/// they are surfaced to the sender when something is missing.
pub const CANONICAL_FIELDS: [&str; 7] = [
    "DEPARTMENT",
    "DRIVER",
    "CAR/VEHICLE",
    "LITERS",
    "AMOUNT",
    "TYPE",
    "ODOMETER",
];

/// A raw captured chat message awaiting validation. Produced by the capture
/// agent, owned by exactly one mailbox bin at a time, immutable once it has
/// left the raw bin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidateReport {
    pub message_id: String,
    /// Channel-origin timestamp, seconds since epoch.
    pub origin_ts: i64,
    pub captured_at: DateTime<Utc>,
    pub sender_name: String,
    pub sender_address: String,
    pub body: String,
    #[serde(default)]
    pub is_edit: bool,
    #[serde(default)]
    pub was_offline: bool,
    #[serde(default)]
    pub is_approved: bool,
    #[serde(default)]
    pub approval_id: Option<String>,
}

impl CandidateReport {
    pub fn origin_time(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.origin_ts, 0)
            .single()
            .unwrap_or(self.captured_at)
    }

    /// Export-friendly `YYYY-MM-DD-HH-MM` rendering of the origin timestamp.
    pub fn origin_datetime_label(&self) -> String {
        self.origin_time().format("%Y-%m-%d-%H-%M").to_string()
    }
}

/// Structured projection of a report body. Every field is optional; the
/// parser extracts whatever it can and leaves completeness judgment to the
/// validation pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ParsedFields {
    /// Normalized entity identifier: whitespace-stripped, upper-cased.
    pub entity: Option<String>,
    pub driver: Option<String>,
    pub department: Option<String>,
    pub liters: Option<f64>,
    pub amount: Option<f64>,
    pub fuel_type: Option<String>,
    pub odometer: Option<u64>,
}

impl ParsedFields {
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.department.as_deref().is_none_or_empty() {
            missing.push(CANONICAL_FIELDS[0]);
        }
        if self.driver.as_deref().is_none_or_empty() {
            missing.push(CANONICAL_FIELDS[1]);
        }
        if self.entity.as_deref().is_none_or_empty() {
            missing.push(CANONICAL_FIELDS[2]);
        }
        if self.liters.is_none() {
            missing.push(CANONICAL_FIELDS[3]);
        }
        if self.amount.is_none() {
            missing.push(CANONICAL_FIELDS[4]);
        }
        if self.fuel_type.as_deref().is_none_or_empty() {
            missing.push(CANONICAL_FIELDS[5]);
        }
        if self.odometer.is_none() {
            missing.push(CANONICAL_FIELDS[6]);
        }
        missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }
}

trait OptionStrExt {
    fn is_none_or_empty(&self) -> bool;
}

impl OptionStrExt for Option<&str> {
    fn is_none_or_empty(&self) -> bool {
        self.map(str::trim).map_or(true, str::is_empty)
    }
}

/// An authoritative accepted record, as handed to export sinks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FuelRecord {
    /// `YYYY-MM-DD-HH-MM`, derived from the channel-origin timestamp.
    pub recorded_at: String,
    pub department: String,
    pub driver: String,
    pub entity: String,
    pub liters: f64,
    pub amount: f64,
    pub fuel_type: String,
    pub odometer: u64,
    pub sender: String,
    pub raw_text: String,
}

impl FuelRecord {
    /// Builds the export record from a report plus its complete parse.
    /// Returns `None` when any canonical field is absent.
    pub fn from_parts(report: &CandidateReport, parsed: &ParsedFields) -> Option<Self> {
        Some(Self {
            recorded_at: report.origin_datetime_label(),
            department: parsed.department.clone()?,
            driver: parsed.driver.clone()?,
            entity: parsed.entity.clone()?,
            liters: parsed.liters?,
            amount: parsed.amount?,
            fuel_type: parsed.fuel_type.clone()?,
            odometer: parsed.odometer?,
            sender: report.sender_name.clone(),
            raw_text: report.body.clone(),
        })
    }
}

/// Last-known-good state for one entity. Written only on acceptance; the
/// odometer never decreases across accepted updates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntitySnapshot {
    pub recorded_at: DateTime<Utc>,
    pub driver: String,
    pub department: String,
    pub liters: f64,
    pub amount: f64,
    pub fuel_type: String,
    pub odometer: u64,
    #[serde(default)]
    pub efficiency: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalKind {
    CooldownConflict,
    EditConflict,
}

impl ApprovalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalKind::CooldownConflict => "cooldown-conflict",
            ApprovalKind::EditConflict => "edit-conflict",
        }
    }
}

impl fmt::Display for ApprovalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

/// One changed field in an edit, with before/after values and a signed
/// numeric delta where the field is numeric.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldChange {
    pub field: String,
    pub before: String,
    pub after: String,
    #[serde(default)]
    pub delta: Option<String>,
}

/// An escalated decision awaiting human resolution. Status transitions
/// exactly once, pending to approved or rejected; a resolved approval is
/// never reopened.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingApproval {
    pub id: String,
    pub kind: ApprovalKind,
    pub created_at: DateTime<Utc>,
    pub proposed: FuelRecord,
    #[serde(default)]
    pub prior: Option<FuelRecord>,
    pub reason: String,
    #[serde(default)]
    pub changes: Vec<FieldChange>,
    pub status: ApprovalStatus,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notified: bool,
    /// For edit conflicts: the message whose record the proposal replaces.
    #[serde(default)]
    pub source_message_id: Option<String>,
    /// Channel-origin timestamp of the proposed report. An approved record
    /// keeps the time the fueling was reported, not the approval time.
    #[serde(default)]
    pub origin_ts: i64,
    /// Sender address of the proposed report, so the acceptance
    /// confirmation still reaches the person who sent it.
    #[serde(default)]
    pub sender_address: String,
}

impl PendingApproval {
    /// Short random token, globally unique in practice.
    pub fn new_token() -> String {
        Uuid::new_v4().simple().to_string()[..8].to_string()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    Sender,
    Approvers,
}

/// Outbound text payload queued for the capture agent to deliver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub text: String,
    #[serde(default)]
    pub mentions: Vec<String>,
    pub audience: Audience,
    #[serde(default)]
    pub delivered: bool,
}

impl Notification {
    pub fn to_sender(text: String, mention: String, now: DateTime<Utc>) -> Self {
        let mentions = if mention.trim().is_empty() {
            Vec::new()
        } else {
            vec![mention]
        };
        Self {
            id: Uuid::new_v4().simple().to_string(),
            created_at: now,
            text,
            mentions,
            audience: Audience::Sender,
            delivered: false,
        }
    }

    pub fn to_approvers(text: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            created_at: now,
            text,
            mentions: Vec::new(),
            audience: Audience::Approvers,
            delivered: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    MissingFields(Vec<String>),
    NotInFleet(String),
    OdometerNotIncreased { current: u64, previous: u64 },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::MissingFields(fields) => {
                write!(f, "missing required field(s): {}", fields.join(", "))
            }
            RejectReason::NotInFleet(entity) => {
                write!(f, "vehicle {entity} is not in the approved fleet list")
            }
            RejectReason::OdometerNotIncreased { current, previous } => write!(
                f,
                "odometer reading {current} is not greater than previous reading {previous}"
            ),
        }
    }
}

/// Fuel-efficiency derived from the distance since the previous accepted
/// record and the fuel taken on in the previous fill.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EfficiencyReading {
    pub km_per_liter: f64,
    pub distance_km: u64,
    pub prior_liters: f64,
    pub rating: EfficiencyRating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EfficiencyRating {
    /// Inside the configured good band.
    Good,
    /// Below the good band but above the low-alert threshold.
    BelowGood,
    /// Above the good band but below the high-alert threshold.
    AboveGood,
    /// Below the low-alert threshold: possible theft or vehicle issue.
    AlertLow,
    /// Above the high-alert threshold: possible odometer discrepancy.
    AlertHigh,
}

impl EfficiencyRating {
    pub fn classify(km_per_liter: f64, thresholds: &EfficiencyThresholds) -> Self {
        if km_per_liter < thresholds.alert_low {
            EfficiencyRating::AlertLow
        } else if km_per_liter > thresholds.alert_high {
            EfficiencyRating::AlertHigh
        } else if km_per_liter < thresholds.good_min {
            EfficiencyRating::BelowGood
        } else if km_per_liter > thresholds.good_max {
            EfficiencyRating::AboveGood
        } else {
            EfficiencyRating::Good
        }
    }

    /// Anything outside the good band earns a secondary advisory without
    /// blocking acceptance.
    pub fn is_advisory(&self) -> bool {
        !matches!(self, EfficiencyRating::Good)
    }
}

/// One historical efficiency observation, appended on every acceptance
/// where a reading could be computed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EfficiencyRecord {
    pub ts: DateTime<Utc>,
    pub entity: String,
    pub driver: String,
    pub km_per_liter: f64,
    pub distance_km: u64,
    pub liters: f64,
}

/// Windowed per-entity efficiency statistics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EfficiencySummary {
    pub entity: String,
    pub window_days: i64,
    pub records: usize,
    pub avg_km_per_liter: f64,
    pub min_km_per_liter: f64,
    pub max_km_per_liter: f64,
    pub total_distance_km: u64,
    pub total_liters: f64,
}

/// Outcome of running a candidate report through the validation rules.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Accept {
        record: FuelRecord,
        efficiency: Option<EfficiencyReading>,
    },
    Reject {
        reason: RejectReason,
    },
    Escalate {
        approval: PendingApproval,
    },
}

/// Strip all whitespace and upper-case. The canonical entity key everywhere
/// an identifier is stored or compared.
pub fn normalize_entity(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}
