use chrono::{DateTime, Duration, Utc};
use ffl_core::{
    ApprovalKind, ApprovalStatus, CandidateReport, FieldChange, FuelRecord, Notification,
    ParsedFields, PendingApproval, PipelineConfig, CANONICAL_FIELDS,
};
use ffl_parser::FieldParser;
use ffl_storage::{ApprovalStore, Mailbox, NotificationQueue};
use tracing::info;

use crate::PipelineError;

/// A message edit as observed on the channel, keyed by the original
/// message identity.
#[derive(Debug, Clone)]
pub struct EditEvent {
    pub message_id: String,
    pub new_body: String,
    pub edited_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOutcome {
    /// The original was still unvalidated; its body was replaced in place.
    ReplacedInPlace,
    /// The edit changed nothing the pipeline tracks.
    NoTrackedChange,
    /// The original was already decided and the edit landed inside the
    /// window: escalated for human review.
    Escalated { approval_id: String },
    /// The edit landed outside the window: enqueued as an independent new
    /// report. The original record is never altered retroactively.
    Respawned { message_id: String },
    /// No trace of the original in any bin.
    OriginalUnknown,
}

pub struct EditReconciler<'a> {
    mailbox: &'a Mailbox,
    approvals: &'a ApprovalStore,
    notifications: &'a NotificationQueue,
    parser: &'a FieldParser,
    config: &'a PipelineConfig,
}

impl<'a> EditReconciler<'a> {
    pub fn new(
        mailbox: &'a Mailbox,
        approvals: &'a ApprovalStore,
        notifications: &'a NotificationQueue,
        parser: &'a FieldParser,
        config: &'a PipelineConfig,
    ) -> Self {
        Self {
            mailbox,
            approvals,
            notifications,
            parser,
            config,
        }
    }

    pub fn apply(&self, event: &EditEvent, now: DateTime<Utc>) -> Result<EditOutcome, PipelineError> {
        // Unvalidated reports are simply corrected in place.
        if self.mailbox.replace_body(&event.message_id, &event.new_body)? {
            info!(message_id = %event.message_id, "edit applied in place");
            return Ok(EditOutcome::ReplacedInPlace);
        }

        let Some((_, original)) = self.mailbox.find(&event.message_id)? else {
            return Ok(EditOutcome::OriginalUnknown);
        };

        let old_parsed = self.parser.parse(&original.body);
        let new_parsed = self.parser.parse(&event.new_body);
        let changes = diff_fields(&old_parsed, &new_parsed);
        if changes.is_empty() {
            return Ok(EditOutcome::NoTrackedChange);
        }

        let mut edited = original.clone();
        edited.body = event.new_body.clone();
        edited.is_edit = true;
        let proposed = FuelRecord::from_parts(&edited, &new_parsed);

        let elapsed = event.edited_at - original.origin_time();
        let within_window = elapsed <= Duration::minutes(self.config.edit_window_minutes);

        // Inside the window a complete replacement goes to human review;
        // everything else flows through the pipeline as a fresh report so
        // incomplete edits get the ordinary missing-fields treatment.
        if within_window {
            if let Some(proposed) = proposed {
                let approval = PendingApproval {
                    id: PendingApproval::new_token(),
                    kind: ApprovalKind::EditConflict,
                    created_at: now,
                    proposed,
                    prior: FuelRecord::from_parts(&original, &old_parsed),
                    reason: format!(
                        "report edited {}m after it was sent",
                        elapsed.num_minutes()
                    ),
                    changes,
                    status: ApprovalStatus::Pending,
                    resolved_at: None,
                    notified: false,
                    source_message_id: Some(original.message_id.clone()),
                    origin_ts: original.origin_ts,
                    sender_address: original.sender_address.clone(),
                };
                let approval_id = approval.id.clone();
                let text = crate::notify::escalation_text(&approval);
                self.approvals.append(approval)?;
                self.notifications.push(Notification::to_approvers(text, now))?;
                self.approvals.mark_notified(&approval_id)?;
                info!(message_id = %event.message_id, approval_id = %approval_id, "edit escalated");
                return Ok(EditOutcome::Escalated { approval_id });
            }
        }

        let respawn_id = format!("{}:edit:{}", event.message_id, event.edited_at.timestamp());
        let respawn = CandidateReport {
            message_id: respawn_id.clone(),
            origin_ts: event.edited_at.timestamp(),
            captured_at: now,
            sender_name: original.sender_name.clone(),
            sender_address: original.sender_address.clone(),
            body: event.new_body.clone(),
            is_edit: true,
            was_offline: false,
            is_approved: false,
            approval_id: None,
        };
        self.mailbox.enqueue(&respawn)?;
        info!(message_id = %event.message_id, respawn_id = %respawn_id, "edit respawned as new report");
        Ok(EditOutcome::Respawned {
            message_id: respawn_id,
        })
    }
}

/// Field-by-field comparison of two parses. Numeric fields carry a signed
/// delta; text fields just the before/after values.
pub(crate) fn diff_fields(old: &ParsedFields, new: &ParsedFields) -> Vec<FieldChange> {
    let mut changes = Vec::new();

    let text = |field: &str, before: &Option<String>, after: &Option<String>| {
        (before != after).then(|| FieldChange {
            field: field.to_string(),
            before: before.clone().unwrap_or_else(|| "-".to_string()),
            after: after.clone().unwrap_or_else(|| "-".to_string()),
            delta: None,
        })
    };

    let float = |field: &str, before: Option<f64>, after: Option<f64>| {
        (before != after).then(|| FieldChange {
            field: field.to_string(),
            before: before.map_or_else(|| "-".to_string(), |v| format!("{v:.1}")),
            after: after.map_or_else(|| "-".to_string(), |v| format!("{v:.1}")),
            delta: match (before, after) {
                (Some(b), Some(a)) => Some(format!("{:+.1}", a - b)),
                _ => None,
            },
        })
    };

    changes.extend(text(CANONICAL_FIELDS[0], &old.department, &new.department));
    changes.extend(text(CANONICAL_FIELDS[1], &old.driver, &new.driver));
    changes.extend(text(CANONICAL_FIELDS[2], &old.entity, &new.entity));
    changes.extend(float(CANONICAL_FIELDS[3], old.liters, new.liters));
    changes.extend(float(CANONICAL_FIELDS[4], old.amount, new.amount));
    changes.extend(text(CANONICAL_FIELDS[5], &old.fuel_type, &new.fuel_type));
    if old.odometer != new.odometer {
        changes.push(FieldChange {
            field: CANONICAL_FIELDS[6].to_string(),
            before: old.odometer.map_or_else(|| "-".to_string(), |v| v.to_string()),
            after: new.odometer.map_or_else(|| "-".to_string(), |v| v.to_string()),
            delta: match (old.odometer, new.odometer) {
                (Some(b), Some(a)) => Some(format!("{:+}", a as i64 - b as i64)),
                _ => None,
            },
        });
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ffl_storage::Bin;
    use tempfile::TempDir;

    fn base_time() -> DateTime<Utc> {
        Utc.timestamp_opt(1_760_000_000, 0).single().expect("valid")
    }

    const ORIGINAL_BODY: &str = "DEPARTMENT: Logistics\nDRIVER: Jane\nCAR: KCA 542Q\n\
                                 LITERS: 40\nAMOUNT: 6000\nTYPE: DIESEL\nODOMETER: 120000";
    const EDITED_BODY: &str = "DEPARTMENT: Logistics\nDRIVER: Jane\nCAR: KCA 542Q\n\
                               LITERS: 45\nAMOUNT: 6000\nTYPE: DIESEL\nODOMETER: 120000";

    struct Fixture {
        _dir: TempDir,
        mailbox: Mailbox,
        approvals: ApprovalStore,
        notifications: NotificationQueue,
        parser: FieldParser,
        config: PipelineConfig,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().expect("temp dir");
        let mailbox = Mailbox::open(dir.path().join("mailbox")).expect("mailbox");
        let approvals = ApprovalStore::open(dir.path().join("approvals.json"), 100);
        let notifications = NotificationQueue::open(dir.path().join("outbox.json"), 100);
        Fixture {
            mailbox,
            approvals,
            notifications,
            parser: FieldParser::new(),
            config: PipelineConfig::default(),
            _dir: dir,
        }
    }

    impl Fixture {
        fn reconciler(&self) -> EditReconciler<'_> {
            EditReconciler::new(
                &self.mailbox,
                &self.approvals,
                &self.notifications,
                &self.parser,
                &self.config,
            )
        }

        fn seed(&self, id: &str, at: DateTime<Utc>) {
            self.mailbox
                .enqueue(&CandidateReport {
                    message_id: id.to_string(),
                    origin_ts: at.timestamp(),
                    captured_at: at,
                    sender_name: "Jane".to_string(),
                    sender_address: "254700000001".to_string(),
                    body: ORIGINAL_BODY.to_string(),
                    is_edit: false,
                    was_offline: false,
                    is_approved: false,
                    approval_id: None,
                })
                .expect("enqueue");
        }
    }

    fn event(id: &str, body: &str, at: DateTime<Utc>) -> EditEvent {
        EditEvent {
            message_id: id.to_string(),
            new_body: body.to_string(),
            edited_at: at,
        }
    }

    #[test]
    fn edit_of_an_unvalidated_report_replaces_in_place() {
        let fx = fixture();
        let sent = base_time();
        fx.seed("m1", sent);

        let outcome = fx
            .reconciler()
            .apply(&event("m1", EDITED_BODY, sent + Duration::minutes(2)), sent)
            .expect("apply");
        assert_eq!(outcome, EditOutcome::ReplacedInPlace);

        let updated = fx.mailbox.load("m1", Bin::Raw).expect("load").expect("raw");
        assert_eq!(updated.body, EDITED_BODY);
        assert!(updated.is_edit);
        assert!(fx.approvals.pending().expect("pending").is_empty());
    }

    #[test]
    fn edit_inside_the_window_escalates_exactly_once() {
        let fx = fixture();
        let sent = base_time();
        fx.seed("m1", sent);
        fx.mailbox.move_to("m1", Bin::Raw, Bin::Processed).expect("move");

        let at = sent + Duration::minutes(9) + Duration::seconds(59);
        let outcome = fx
            .reconciler()
            .apply(&event("m1", EDITED_BODY, at), at)
            .expect("apply");
        let EditOutcome::Escalated { approval_id } = outcome else {
            panic!("expected escalation, got {outcome:?}");
        };

        let pending = fx.approvals.pending().expect("pending");
        assert_eq!(pending.len(), 1);
        let approval = &pending[0];
        assert_eq!(approval.id, approval_id);
        assert_eq!(approval.kind, ApprovalKind::EditConflict);
        assert_eq!(approval.source_message_id.as_deref(), Some("m1"));
        assert_eq!(approval.changes.len(), 1);
        assert_eq!(approval.changes[0].field, "LITERS");
        assert_eq!(approval.changes[0].delta.as_deref(), Some("+5.0"));
        assert_eq!(fx.notifications.undelivered_count().expect("count"), 1);
    }

    #[test]
    fn edit_outside_the_window_respawns_an_independent_report() {
        let fx = fixture();
        let sent = base_time();
        fx.seed("m1", sent);
        fx.mailbox.move_to("m1", Bin::Raw, Bin::Processed).expect("move");

        let at = sent + Duration::minutes(10) + Duration::seconds(1);
        let outcome = fx
            .reconciler()
            .apply(&event("m1", EDITED_BODY, at), at)
            .expect("apply");
        let EditOutcome::Respawned { message_id } = outcome else {
            panic!("expected respawn, got {outcome:?}");
        };

        let raw = fx.mailbox.read_bin(Bin::Raw).expect("raw");
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].message_id, message_id);
        assert!(raw[0].is_edit);
        // The decided original stays untouched.
        assert!(fx.mailbox.load("m1", Bin::Processed).expect("load").is_some());
        assert!(fx.approvals.pending().expect("pending").is_empty());
    }

    #[test]
    fn edit_with_no_tracked_change_is_ignored() {
        let fx = fixture();
        let sent = base_time();
        fx.seed("m1", sent);
        fx.mailbox.move_to("m1", Bin::Raw, Bin::Processed).expect("move");

        let reworded = format!("{ORIGINAL_BODY}\nthanks!");
        let outcome = fx
            .reconciler()
            .apply(&event("m1", &reworded, sent + Duration::minutes(3)), sent)
            .expect("apply");
        assert_eq!(outcome, EditOutcome::NoTrackedChange);
        assert!(fx.approvals.pending().expect("pending").is_empty());
    }

    #[test]
    fn edit_of_an_unknown_message_reports_so() {
        let fx = fixture();
        let outcome = fx
            .reconciler()
            .apply(&event("ghost", EDITED_BODY, base_time()), base_time())
            .expect("apply");
        assert_eq!(outcome, EditOutcome::OriginalUnknown);
    }

    #[test]
    fn diff_reports_signed_numeric_deltas() {
        let old = ParsedFields {
            odometer: Some(1_000),
            liters: Some(20.0),
            driver: Some("Jane".to_string()),
            ..ParsedFields::default()
        };
        let new = ParsedFields {
            odometer: Some(950),
            liters: Some(25.5),
            driver: Some("Peter".to_string()),
            ..ParsedFields::default()
        };
        let changes = diff_fields(&old, &new);
        assert_eq!(changes.len(), 3);
        let by_field = |f: &str| {
            changes
                .iter()
                .find(|c| c.field == f)
                .unwrap_or_else(|| panic!("missing change for {f}"))
        };
        assert_eq!(by_field("ODOMETER").delta.as_deref(), Some("-50"));
        assert_eq!(by_field("LITERS").delta.as_deref(), Some("+5.5"));
        assert_eq!(by_field("DRIVER").delta, None);
        assert_eq!(by_field("DRIVER").before, "Jane");
        assert_eq!(by_field("DRIVER").after, "Peter");
    }
}
