use crate::{quarantine, write_json_atomic, StorageError};
use ffl_core::CandidateReport;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Where a report currently lives. Raw entries await validation; the other
/// three bins are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bin {
    Raw,
    Processed,
    Error,
    Superseded,
}

impl Bin {
    pub const ALL: [Bin; 4] = [Bin::Raw, Bin::Processed, Bin::Error, Bin::Superseded];

    fn dir_name(&self) -> &'static str {
        match self {
            Bin::Raw => "raw",
            Bin::Processed => "processed",
            Bin::Error => "errors",
            Bin::Superseded => "superseded",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    Accepted,
    DuplicateIgnored,
}

/// One JSON file per report, grouped into bins. Every write goes through
/// temp-file-then-rename; `exists` across all bins is the sole dedup
/// mechanism and must be consulted before any externally visible side
/// effect.
#[derive(Debug, Clone)]
pub struct Mailbox {
    root: PathBuf,
}

impl Mailbox {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        for bin in Bin::ALL {
            std::fs::create_dir_all(root.join(bin.dir_name()))?;
        }
        Ok(Self { root })
    }

    /// Channel message ids are opaque and may contain anything; the file
    /// name is a digest prefix so every id maps to a safe, stable path.
    fn file_name(message_id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(message_id.as_bytes());
        let digest = hasher.finalize();
        let mut hex = String::with_capacity(48);
        for byte in digest.iter().take(24) {
            hex.push_str(&format!("{byte:02x}"));
        }
        format!("msg_{hex}.json")
    }

    fn entry_path(&self, message_id: &str, bin: Bin) -> PathBuf {
        self.root.join(bin.dir_name()).join(Self::file_name(message_id))
    }

    pub fn exists(&self, message_id: &str) -> bool {
        Bin::ALL
            .iter()
            .any(|bin| self.entry_path(message_id, *bin).exists())
    }

    pub fn enqueue(&self, report: &CandidateReport) -> Result<Enqueue, StorageError> {
        if self.exists(&report.message_id) {
            return Ok(Enqueue::DuplicateIgnored);
        }
        write_json_atomic(&self.entry_path(&report.message_id, Bin::Raw), report)?;
        Ok(Enqueue::Accepted)
    }

    pub fn load(&self, message_id: &str, bin: Bin) -> Result<Option<CandidateReport>, StorageError> {
        let path = self.entry_path(message_id, bin);
        read_report(&path)
    }

    /// Locate a report in any terminal bin (used by the edit reconciler once
    /// the original has left raw).
    pub fn find(&self, message_id: &str) -> Result<Option<(Bin, CandidateReport)>, StorageError> {
        for bin in Bin::ALL {
            if let Some(report) = self.load(message_id, bin)? {
                return Ok(Some((bin, report)));
            }
        }
        Ok(None)
    }

    /// Move a report between bins. Returns false when it was not in `from`.
    pub fn move_to(&self, message_id: &str, from: Bin, to: Bin) -> Result<bool, StorageError> {
        let source = self.entry_path(message_id, from);
        if !source.exists() {
            return Ok(false);
        }
        let target = self.entry_path(message_id, to);
        std::fs::rename(&source, &target)?;
        Ok(true)
    }

    /// Replace the body of a still-unvalidated report in place. Only the raw
    /// bin is mutable; everywhere else a report is immutable.
    pub fn replace_body(&self, message_id: &str, body: &str) -> Result<bool, StorageError> {
        let path = self.entry_path(message_id, Bin::Raw);
        let Some(mut report) = read_report(&path)? else {
            return Ok(false);
        };
        report.body = body.to_string();
        report.is_edit = true;
        write_json_atomic(&path, &report)?;
        Ok(true)
    }

    /// All reports in a bin, oldest channel timestamp first. Corrupted
    /// entries are quarantined and skipped.
    pub fn read_bin(&self, bin: Bin) -> Result<Vec<CandidateReport>, StorageError> {
        let dir = self.root.join(bin.dir_name());
        let mut reports = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            let is_record = path.extension().map_or(false, |ext| ext == "json");
            if !is_record {
                continue;
            }
            if let Some(report) = read_report(&path)? {
                reports.push(report);
            }
        }
        reports.sort_by(|a, b| {
            a.origin_ts
                .cmp(&b.origin_ts)
                .then_with(|| a.message_id.cmp(&b.message_id))
        });
        Ok(reports)
    }
}

fn read_report(path: &Path) -> Result<Option<CandidateReport>, StorageError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    match serde_json::from_str(&content) {
        Ok(report) => Ok(Some(report)),
        Err(_) => {
            quarantine(path)?;
            Ok(None)
        }
    }
}
