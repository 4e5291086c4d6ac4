use chrono::{DateTime, Utc};
use ffl_core::{ApprovalKind, ApprovalStatus, CandidateReport, Notification, PendingApproval};
use ffl_storage::{ApprovalStore, Bin, Mailbox, NotificationQueue, Resolution};
use tracing::{info, warn};

use crate::PipelineError;

/// Resolves escalated decisions. Approval never writes records directly:
/// the sanctioned report is re-enqueued through the ordinary pipeline so
/// every accepted record takes the same ingestion path.
pub struct ApprovalWorkflow<'a> {
    approvals: &'a ApprovalStore,
    mailbox: &'a Mailbox,
    notifications: &'a NotificationQueue,
}

impl<'a> ApprovalWorkflow<'a> {
    pub fn new(
        approvals: &'a ApprovalStore,
        mailbox: &'a Mailbox,
        notifications: &'a NotificationQueue,
    ) -> Self {
        Self {
            approvals,
            mailbox,
            notifications,
        }
    }

    pub fn approve(&self, id: &str, now: DateTime<Utc>) -> Result<Resolution, PipelineError> {
        let resolution = self.approvals.resolve(id, ApprovalStatus::Approved, now)?;
        if let Resolution::Applied(approval) = &resolution {
            self.enact(approval, now)?;
            self.notifications
                .push(Notification::to_approvers(
                    crate::notify::resolution_text(approval, true),
                    now,
                ))?;
            info!(approval_id = %id, entity = %approval.proposed.entity, "approval accepted");
        }
        Ok(resolution)
    }

    pub fn reject(&self, id: &str, now: DateTime<Utc>) -> Result<Resolution, PipelineError> {
        let resolution = self.approvals.resolve(id, ApprovalStatus::Rejected, now)?;
        if let Resolution::Applied(approval) = &resolution {
            self.notifications
                .push(Notification::to_approvers(
                    crate::notify::resolution_text(approval, false),
                    now,
                ))?;
            info!(approval_id = %id, entity = %approval.proposed.entity, "approval rejected");
        }
        Ok(resolution)
    }

    /// Synthesize the sanctioned report and enqueue it. It keeps the
    /// original channel timestamp and sender address, so the accepted
    /// record exports with the time the fueling was reported and the
    /// confirmation still reaches the sender. For edit conflicts the
    /// superseded original is moved out of its terminal bin so exports
    /// and audits can tell replaced records apart.
    fn enact(&self, approval: &PendingApproval, now: DateTime<Utc>) -> Result<(), PipelineError> {
        let synthesized = CandidateReport {
            message_id: format!("approval:{}", approval.id),
            origin_ts: approval.origin_ts,
            captured_at: now,
            sender_name: approval.proposed.sender.clone(),
            sender_address: approval.sender_address.clone(),
            body: approval.proposed.raw_text.clone(),
            is_edit: false,
            was_offline: false,
            is_approved: true,
            approval_id: Some(approval.id.clone()),
        };
        self.mailbox.enqueue(&synthesized)?;

        if approval.kind == ApprovalKind::EditConflict {
            if let Some(original_id) = &approval.source_message_id {
                match self.mailbox.find(original_id)? {
                    Some((bin, _)) if bin != Bin::Superseded && bin != Bin::Raw => {
                        self.mailbox.move_to(original_id, bin, Bin::Superseded)?;
                    }
                    Some(_) => {}
                    None => {
                        warn!(approval_id = %approval.id, original = %original_id,
                              "superseded original not found in any bin");
                    }
                }
            }
        }
        Ok(())
    }
}
