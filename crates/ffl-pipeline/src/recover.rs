use chrono::{DateTime, Duration, Utc};
use ffl_core::PipelineConfig;
use ffl_storage::{Enqueue, Mailbox, WatermarkStore};
use tracing::{info, warn};

use crate::PipelineError;

pub type SourceError = Box<dyn std::error::Error + Send + Sync>;

/// The external channel-history collaborator. Implementations fetch the
/// most recent messages, newest last.
pub trait HistorySource {
    fn fetch_recent(&mut self, limit: usize)
        -> Result<Vec<ffl_core::CandidateReport>, SourceError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub watermark_was_stale: bool,
    pub fetched: usize,
    pub enqueued: usize,
    pub duplicates: usize,
}

/// Startup reconciliation after downtime. Fetched messages go through the
/// same dedup as live ones, so replaying history is always safe; the
/// watermark advances to `now` whatever the fetch outcome, because a
/// failed fetch retried forever would wedge startup.
pub fn sync(
    source: &mut dyn HistorySource,
    mailbox: &Mailbox,
    watermark: &WatermarkStore,
    config: &PipelineConfig,
    now: DateTime<Utc>,
) -> Result<SyncReport, PipelineError> {
    let mut report = SyncReport::default();

    let stale_after = Duration::minutes(config.stale_watermark_minutes);
    report.watermark_was_stale = match watermark.load()? {
        Some(last) => now - last > stale_after,
        None => true,
    };

    if report.watermark_was_stale {
        match source.fetch_recent(config.history_fetch_limit) {
            Ok(messages) => {
                report.fetched = messages.len();
                for mut message in messages {
                    message.was_offline = true;
                    match mailbox.enqueue(&message)? {
                        Enqueue::Accepted => report.enqueued += 1,
                        Enqueue::DuplicateIgnored => report.duplicates += 1,
                    }
                }
                info!(
                    fetched = report.fetched,
                    enqueued = report.enqueued,
                    duplicates = report.duplicates,
                    "history sync complete"
                );
            }
            Err(err) => {
                warn!(error = %err, "history fetch failed; continuing with live traffic only");
            }
        }
    }

    watermark.store(now)?;
    Ok(report)
}
