//! The validation agent's decision pipeline: parse raw mailbox entries,
//! run the validation rules, apply effects (snapshots, exports,
//! notifications, approvals) and move each report to its terminal bin.

pub mod approval;
pub mod notify;
pub mod reconcile;
pub mod recover;
pub mod validate;

pub use approval::ApprovalWorkflow;
pub use reconcile::{EditEvent, EditOutcome, EditReconciler};
pub use recover::{sync, HistorySource, SourceError, SyncReport};
pub use validate::Validator;

use chrono::{DateTime, Utc};
use ffl_core::{
    Decision, EfficiencyRecord, EntitySnapshot, FuelRecord, Notification, PipelineConfig,
};
use ffl_parser::FieldParser;
use ffl_storage::{
    ApprovalStore, Bin, EfficiencyHistory, FleetStore, Mailbox, NotificationQueue, SnapshotStore,
    StorageError, WatermarkStore,
};
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("export sink error: {0}")]
    Export(#[from] std::io::Error),
}

/// Where accepted records go. The concrete sink (spreadsheet upload, JSONL
/// file) lives outside this crate.
pub trait ExportSink {
    fn append(&mut self, record: &FuelRecord) -> std::io::Result<()>;
}

/// Every durable store, rooted under one data directory. Both agents open
/// the same layout; all cross-process coordination happens through these.
pub struct Stores {
    pub mailbox: Mailbox,
    pub snapshots: SnapshotStore,
    pub approvals: ApprovalStore,
    pub notifications: NotificationQueue,
    pub fleet: FleetStore,
    pub efficiency: EfficiencyHistory,
    pub watermark: WatermarkStore,
}

impl Stores {
    pub fn open(data_dir: &Path, config: &PipelineConfig) -> Result<Self, StorageError> {
        Ok(Self {
            mailbox: Mailbox::open(data_dir.join("mailbox"))?,
            snapshots: SnapshotStore::open(data_dir.join("snapshots.json")),
            approvals: ApprovalStore::open(
                data_dir.join("approvals.json"),
                config.approvals_keep_resolved,
            ),
            notifications: NotificationQueue::open(
                data_dir.join("outbox.json"),
                config.notification_cap,
            ),
            fleet: FleetStore::open_seeded(data_dir.join("fleet.json"), &config.fleet_seed)?,
            efficiency: EfficiencyHistory::open(
                data_dir.join("efficiency.json"),
                config.efficiency_history_cap,
            ),
            watermark: WatermarkStore::open(data_dir.join("watermark.json")),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub accepted: usize,
    pub rejected: usize,
    pub escalated: usize,
}

impl CycleReport {
    pub fn total(&self) -> usize {
        self.accepted + self.rejected + self.escalated
    }
}

/// One validation agent. `run_cycle` is its whole unit of work; the binary
/// just calls it on an interval.
pub struct Processor<S: ExportSink> {
    pub stores: Stores,
    config: PipelineConfig,
    parser: FieldParser,
    sink: S,
}

impl<S: ExportSink> Processor<S> {
    pub fn new(stores: Stores, config: PipelineConfig, sink: S) -> Self {
        Self {
            stores,
            config,
            parser: FieldParser::new(),
            sink,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Drain the raw bin, oldest channel timestamp first. Each report is
    /// decided, its effects applied, and its file moved to a terminal bin;
    /// a crash mid-cycle leaves undecided reports in raw for the next run.
    pub fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<CycleReport, PipelineError> {
        let mut cycle = CycleReport::default();
        let raw = self.stores.mailbox.read_bin(Bin::Raw)?;
        for report in raw {
            let parsed = self.parser.parse(&report.body);
            let decision = Validator::new(&self.stores.fleet, &self.stores.snapshots, &self.config)
                .decide(&report, &parsed, now)?;
            match decision {
                Decision::Accept { record, efficiency } => {
                    self.accept(&report, record, efficiency, now)?;
                    cycle.accepted += 1;
                }
                Decision::Reject { reason } => {
                    warn!(message_id = %report.message_id, %reason, "report rejected");
                    self.stores.notifications.push(Notification::to_sender(
                        notify::rejection_text(&report, &reason),
                        report.sender_address.clone(),
                        now,
                    ))?;
                    self.stores
                        .mailbox
                        .move_to(&report.message_id, Bin::Raw, Bin::Error)?;
                    cycle.rejected += 1;
                }
                Decision::Escalate { approval } => {
                    info!(message_id = %report.message_id, approval_id = %approval.id,
                          kind = %approval.kind, "report escalated");
                    let approval_id = approval.id.clone();
                    let text = notify::escalation_text(&approval);
                    self.stores.approvals.append(approval)?;
                    self.stores
                        .notifications
                        .push(Notification::to_approvers(text, now))?;
                    self.stores.approvals.mark_notified(&approval_id)?;
                    self.stores
                        .mailbox
                        .move_to(&report.message_id, Bin::Raw, Bin::Error)?;
                    cycle.escalated += 1;
                }
            }
        }
        Ok(cycle)
    }

    fn accept(
        &mut self,
        report: &ffl_core::CandidateReport,
        record: FuelRecord,
        efficiency: Option<ffl_core::EfficiencyReading>,
        now: DateTime<Utc>,
    ) -> Result<(), PipelineError> {
        self.stores.snapshots.upsert(
            &record.entity,
            EntitySnapshot {
                recorded_at: report.origin_time(),
                driver: record.driver.clone(),
                department: record.department.clone(),
                liters: record.liters,
                amount: record.amount,
                fuel_type: record.fuel_type.clone(),
                odometer: record.odometer,
                efficiency: efficiency.map(|e| e.km_per_liter),
            },
        )?;

        if let Some(reading) = &efficiency {
            self.stores.efficiency.append(EfficiencyRecord {
                ts: report.origin_time(),
                entity: record.entity.clone(),
                driver: record.driver.clone(),
                km_per_liter: reading.km_per_liter,
                distance_km: reading.distance_km,
                liters: record.liters,
            })?;
            if reading.rating.is_advisory() {
                self.stores.notifications.push(Notification::to_approvers(
                    notify::advisory_text(&record, reading, &self.config.efficiency),
                    now,
                ))?;
            }
        }

        self.sink.append(&record)?;
        self.stores.notifications.push(Notification::to_sender(
            notify::confirmation_text(&record, efficiency.as_ref()),
            report.sender_address.clone(),
            now,
        ))?;
        self.stores
            .mailbox
            .move_to(&report.message_id, Bin::Raw, Bin::Processed)?;
        info!(message_id = %report.message_id, entity = %record.entity,
              odometer = record.odometer, "report accepted");
        Ok(())
    }
}
