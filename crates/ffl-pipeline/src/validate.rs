use chrono::{DateTime, Duration, Utc};
use ffl_core::{
    ApprovalKind, ApprovalStatus, CandidateReport, Decision, EfficiencyRating, EfficiencyReading,
    EntitySnapshot, FuelRecord, ParsedFields, PendingApproval, PipelineConfig, RejectReason,
};
use ffl_storage::{FleetStore, SnapshotStore};

use crate::PipelineError;

/// The ordered validation rules. Each rule either rejects, escalates, or
/// falls through to the next; acceptance is the final fall-through.
pub struct Validator<'a> {
    fleet: &'a FleetStore,
    snapshots: &'a SnapshotStore,
    config: &'a PipelineConfig,
}

impl<'a> Validator<'a> {
    pub fn new(
        fleet: &'a FleetStore,
        snapshots: &'a SnapshotStore,
        config: &'a PipelineConfig,
    ) -> Self {
        Self {
            fleet,
            snapshots,
            config,
        }
    }

    /// Runs a parsed report through completeness, membership, cooldown and
    /// odometer-monotonicity, in that order. Cooldown is measured on
    /// channel-origin timestamps so a backlog processed late still compares
    /// the times the reports were actually sent.
    pub fn decide(
        &self,
        report: &CandidateReport,
        parsed: &ParsedFields,
        now: DateTime<Utc>,
    ) -> Result<Decision, PipelineError> {
        let missing = parsed.missing_fields();
        if !missing.is_empty() {
            return Ok(Decision::Reject {
                reason: RejectReason::MissingFields(
                    missing.iter().map(|f| f.to_string()).collect(),
                ),
            });
        }

        // Completeness passed, so the record builds.
        let Some(record) = FuelRecord::from_parts(report, parsed) else {
            return Ok(Decision::Reject {
                reason: RejectReason::MissingFields(
                    missing.iter().map(|f| f.to_string()).collect(),
                ),
            });
        };

        if !self.fleet.contains(&record.entity)? {
            return Ok(Decision::Reject {
                reason: RejectReason::NotInFleet(record.entity.clone()),
            });
        }

        let prior = self.snapshots.get(&record.entity)?;

        if let Some(snapshot) = &prior {
            let elapsed = report.origin_time() - snapshot.recorded_at;
            let cooldown = Duration::hours(self.config.cooldown_hours);
            if !report.is_approved && elapsed < cooldown {
                return Ok(Decision::Escalate {
                    approval: self.cooldown_approval(report, record, snapshot, elapsed, now),
                });
            }

            // An approved edit replacement may restate the same fill, so
            // equality is tolerated there; fresh reports must move forward.
            let moved_forward = if report.is_approved {
                record.odometer >= snapshot.odometer
            } else {
                record.odometer > snapshot.odometer
            };
            if !moved_forward {
                return Ok(Decision::Reject {
                    reason: RejectReason::OdometerNotIncreased {
                        current: record.odometer,
                        previous: snapshot.odometer,
                    },
                });
            }
        }

        let efficiency = prior
            .as_ref()
            .and_then(|snapshot| self.efficiency_since(&record, snapshot));
        Ok(Decision::Accept { record, efficiency })
    }

    fn efficiency_since(
        &self,
        record: &FuelRecord,
        snapshot: &EntitySnapshot,
    ) -> Option<EfficiencyReading> {
        let distance_km = record.odometer.checked_sub(snapshot.odometer)?;
        if distance_km == 0 || snapshot.liters <= 0.0 {
            return None;
        }
        let km_per_liter = distance_km as f64 / snapshot.liters;
        Some(EfficiencyReading {
            km_per_liter,
            distance_km,
            prior_liters: snapshot.liters,
            rating: EfficiencyRating::classify(km_per_liter, &self.config.efficiency),
        })
    }

    fn cooldown_approval(
        &self,
        report: &CandidateReport,
        record: FuelRecord,
        snapshot: &EntitySnapshot,
        elapsed: Duration,
        now: DateTime<Utc>,
    ) -> PendingApproval {
        let elapsed_hours = elapsed.num_minutes() as f64 / 60.0;
        let remaining_hours = self.config.cooldown_hours as f64 - elapsed_hours;
        let prior = snapshot_record(&record.entity, snapshot);
        PendingApproval {
            id: PendingApproval::new_token(),
            kind: ApprovalKind::CooldownConflict,
            created_at: now,
            proposed: record,
            prior: Some(prior),
            reason: format!(
                "vehicle fueled {elapsed_hours:.1}h ago; {remaining_hours:.1}h of cooldown remain"
            ),
            changes: Vec::new(),
            status: ApprovalStatus::Pending,
            resolved_at: None,
            notified: false,
            source_message_id: None,
            origin_ts: report.origin_ts,
            sender_address: report.sender_address.clone(),
        }
    }
}

/// Renders the last-known-good snapshot as a record for side-by-side
/// comparison in approval requests. Sender and raw text are not retained
/// in snapshots.
pub(crate) fn snapshot_record(entity: &str, snapshot: &EntitySnapshot) -> FuelRecord {
    FuelRecord {
        recorded_at: snapshot.recorded_at.format("%Y-%m-%d-%H-%M").to_string(),
        department: snapshot.department.clone(),
        driver: snapshot.driver.clone(),
        entity: entity.to_string(),
        liters: snapshot.liters,
        amount: snapshot.amount,
        fuel_type: snapshot.fuel_type.clone(),
        odometer: snapshot.odometer,
        sender: String::new(),
        raw_text: String::new(),
    }
}
