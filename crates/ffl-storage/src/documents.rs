use crate::{read_json_or_default, write_json_atomic, DocumentLock, StorageError};
use chrono::{DateTime, Duration, Utc};
use ffl_core::{
    ApprovalStatus, DeliveryPolicy, EfficiencyRecord, EfficiencySummary, EntitySnapshot,
    Notification, PendingApproval,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Entity-id to last-known-good snapshot, one JSON document replaced
/// wholesale on every mutation.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn get(&self, entity: &str) -> Result<Option<EntitySnapshot>, StorageError> {
        let map: BTreeMap<String, EntitySnapshot> = read_json_or_default(&self.path)?;
        Ok(map.get(entity).cloned())
    }

    pub fn all(&self) -> Result<BTreeMap<String, EntitySnapshot>, StorageError> {
        read_json_or_default(&self.path)
    }

    pub fn upsert(&self, entity: &str, snapshot: EntitySnapshot) -> Result<(), StorageError> {
        let _lock = DocumentLock::acquire(&self.path)?;
        let mut map: BTreeMap<String, EntitySnapshot> = read_json_or_default(&self.path)?;
        map.insert(entity.to_string(), snapshot);
        write_json_atomic(&self.path, &map)
    }
}

/// Outcome of attempting to resolve a pending approval.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Applied(PendingApproval),
    NotFound,
    AlreadyResolved,
}

/// All approvals in one JSON list document. Pending entries are always
/// retained; resolved ones are capped to the most recent `keep_resolved`.
#[derive(Debug, Clone)]
pub struct ApprovalStore {
    path: PathBuf,
    keep_resolved: usize,
}

impl ApprovalStore {
    pub fn open(path: impl Into<PathBuf>, keep_resolved: usize) -> Self {
        Self {
            path: path.into(),
            keep_resolved,
        }
    }

    pub fn append(&self, approval: PendingApproval) -> Result<(), StorageError> {
        let _lock = DocumentLock::acquire(&self.path)?;
        let mut approvals: Vec<PendingApproval> = read_json_or_default(&self.path)?;
        approvals.push(approval);
        self.compact(&mut approvals);
        write_json_atomic(&self.path, &approvals)
    }

    pub fn get(&self, id: &str) -> Result<Option<PendingApproval>, StorageError> {
        let approvals: Vec<PendingApproval> = read_json_or_default(&self.path)?;
        Ok(approvals.into_iter().find(|a| a.id == id))
    }

    pub fn pending(&self) -> Result<Vec<PendingApproval>, StorageError> {
        let approvals: Vec<PendingApproval> = read_json_or_default(&self.path)?;
        Ok(approvals
            .into_iter()
            .filter(|a| a.status == ApprovalStatus::Pending)
            .collect())
    }

    /// Single-fire transition pending -> approved|rejected. A resolved
    /// approval is never reopened.
    pub fn resolve(
        &self,
        id: &str,
        status: ApprovalStatus,
        now: DateTime<Utc>,
    ) -> Result<Resolution, StorageError> {
        debug_assert!(status != ApprovalStatus::Pending);
        let _lock = DocumentLock::acquire(&self.path)?;
        let mut approvals: Vec<PendingApproval> = read_json_or_default(&self.path)?;
        let Some(approval) = approvals.iter_mut().find(|a| a.id == id) else {
            return Ok(Resolution::NotFound);
        };
        if approval.status != ApprovalStatus::Pending {
            return Ok(Resolution::AlreadyResolved);
        }
        approval.status = status;
        approval.resolved_at = Some(now);
        let resolved = approval.clone();
        write_json_atomic(&self.path, &approvals)?;
        Ok(Resolution::Applied(resolved))
    }

    pub fn mark_notified(&self, id: &str) -> Result<(), StorageError> {
        let _lock = DocumentLock::acquire(&self.path)?;
        let mut approvals: Vec<PendingApproval> = read_json_or_default(&self.path)?;
        if let Some(approval) = approvals.iter_mut().find(|a| a.id == id) {
            approval.notified = true;
            write_json_atomic(&self.path, &approvals)?;
        }
        Ok(())
    }

    fn compact(&self, approvals: &mut Vec<PendingApproval>) {
        let resolved_count = approvals
            .iter()
            .filter(|a| a.status != ApprovalStatus::Pending)
            .count();
        if resolved_count <= self.keep_resolved {
            return;
        }
        let mut to_drop = resolved_count - self.keep_resolved;
        approvals.retain(|a| {
            if a.status != ApprovalStatus::Pending && to_drop > 0 {
                to_drop -= 1;
                false
            } else {
                true
            }
        });
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct QueueDocument {
    messages: Vec<Notification>,
    last_delivered_at: Option<DateTime<Utc>>,
}

/// Outbound notification queue. The validation side pushes; the capture
/// side takes due batches and marks them delivered. Delivery is bounded by
/// a per-cycle cap and a minimum spacing between batches.
#[derive(Debug, Clone)]
pub struct NotificationQueue {
    path: PathBuf,
    cap: usize,
}

impl NotificationQueue {
    pub fn open(path: impl Into<PathBuf>, cap: usize) -> Self {
        Self {
            path: path.into(),
            cap,
        }
    }

    pub fn push(&self, notification: Notification) -> Result<(), StorageError> {
        let _lock = DocumentLock::acquire(&self.path)?;
        let mut doc: QueueDocument = read_json_or_default(&self.path)?;
        doc.messages.push(notification);
        if doc.messages.len() > self.cap {
            let excess = doc.messages.len() - self.cap;
            doc.messages.drain(..excess);
        }
        write_json_atomic(&self.path, &doc)
    }

    /// Undelivered messages ready for this cycle, oldest first. Empty when
    /// the minimum spacing since the previous delivery has not yet elapsed.
    pub fn take_due(
        &self,
        now: DateTime<Utc>,
        policy: &DeliveryPolicy,
    ) -> Result<Vec<Notification>, StorageError> {
        let doc: QueueDocument = read_json_or_default(&self.path)?;
        if let Some(last) = doc.last_delivered_at {
            if now - last < Duration::seconds(policy.min_spacing_secs) {
                return Ok(Vec::new());
            }
        }
        Ok(doc
            .messages
            .into_iter()
            .filter(|m| !m.delivered)
            .take(policy.max_per_cycle)
            .collect())
    }

    pub fn mark_delivered(&self, ids: &[String], now: DateTime<Utc>) -> Result<(), StorageError> {
        let _lock = DocumentLock::acquire(&self.path)?;
        let mut doc: QueueDocument = read_json_or_default(&self.path)?;
        let mut changed = false;
        for message in doc.messages.iter_mut() {
            if !message.delivered && ids.contains(&message.id) {
                message.delivered = true;
                changed = true;
            }
        }
        if changed {
            doc.last_delivered_at = Some(now);
            write_json_atomic(&self.path, &doc)?;
        }
        Ok(())
    }

    pub fn undelivered_count(&self) -> Result<usize, StorageError> {
        let doc: QueueDocument = read_json_or_default(&self.path)?;
        Ok(doc.messages.iter().filter(|m| !m.delivered).count())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct WatermarkDocument {
    timestamp: Option<DateTime<Utc>>,
}

/// The single timestamp recording how far inbound history has been
/// reconciled.
#[derive(Debug, Clone)]
pub struct WatermarkStore {
    path: PathBuf,
}

impl WatermarkStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Result<Option<DateTime<Utc>>, StorageError> {
        let doc: WatermarkDocument = read_json_or_default(&self.path)?;
        Ok(doc.timestamp)
    }

    pub fn store(&self, timestamp: DateTime<Utc>) -> Result<(), StorageError> {
        write_json_atomic(
            &self.path,
            &WatermarkDocument {
                timestamp: Some(timestamp),
            },
        )
    }
}

/// The entity allow-list, seeded from config on first run and mutated only
/// through explicit admin intents.
#[derive(Debug, Clone)]
pub struct FleetStore {
    path: PathBuf,
}

impl FleetStore {
    pub fn open_seeded(path: impl Into<PathBuf>, seed: &[String]) -> Result<Self, StorageError> {
        let store = Self { path: path.into() };
        if !store.path.exists() && !seed.is_empty() {
            let entities: BTreeSet<String> = seed
                .iter()
                .map(|e| ffl_core::normalize_entity(e))
                .collect();
            write_json_atomic(&store.path, &entities)?;
        }
        Ok(store)
    }

    pub fn contains(&self, entity: &str) -> Result<bool, StorageError> {
        let entities: BTreeSet<String> = read_json_or_default(&self.path)?;
        Ok(entities.contains(entity))
    }

    pub fn list(&self) -> Result<Vec<String>, StorageError> {
        let entities: BTreeSet<String> = read_json_or_default(&self.path)?;
        Ok(entities.into_iter().collect())
    }

    /// Returns false when the entity was already present.
    pub fn add(&self, entity: &str) -> Result<bool, StorageError> {
        let _lock = DocumentLock::acquire(&self.path)?;
        let mut entities: BTreeSet<String> = read_json_or_default(&self.path)?;
        let inserted = entities.insert(ffl_core::normalize_entity(entity));
        if inserted {
            write_json_atomic(&self.path, &entities)?;
        }
        Ok(inserted)
    }

    /// Returns false when the entity was not present.
    pub fn remove(&self, entity: &str) -> Result<bool, StorageError> {
        let _lock = DocumentLock::acquire(&self.path)?;
        let mut entities: BTreeSet<String> = read_json_or_default(&self.path)?;
        let removed = entities.remove(&ffl_core::normalize_entity(entity));
        if removed {
            write_json_atomic(&self.path, &entities)?;
        }
        Ok(removed)
    }
}

/// Capped append-only history of efficiency observations, queried for
/// per-entity windowed summaries.
#[derive(Debug, Clone)]
pub struct EfficiencyHistory {
    path: PathBuf,
    cap: usize,
}

impl EfficiencyHistory {
    pub fn open(path: impl Into<PathBuf>, cap: usize) -> Self {
        Self {
            path: path.into(),
            cap,
        }
    }

    pub fn append(&self, record: EfficiencyRecord) -> Result<(), StorageError> {
        let _lock = DocumentLock::acquire(&self.path)?;
        let mut history: Vec<EfficiencyRecord> = read_json_or_default(&self.path)?;
        history.push(record);
        if history.len() > self.cap {
            let excess = history.len() - self.cap;
            history.drain(..excess);
        }
        write_json_atomic(&self.path, &history)
    }

    pub fn summary(
        &self,
        entity: &str,
        window_days: i64,
        now: DateTime<Utc>,
    ) -> Result<EfficiencySummary, StorageError> {
        let history: Vec<EfficiencyRecord> = read_json_or_default(&self.path)?;
        let cutoff = now - Duration::days(window_days);
        let entity = ffl_core::normalize_entity(entity);
        let matching: Vec<&EfficiencyRecord> = history
            .iter()
            .filter(|r| r.entity == entity && r.ts >= cutoff)
            .collect();

        if matching.is_empty() {
            return Ok(EfficiencySummary {
                entity,
                window_days,
                records: 0,
                avg_km_per_liter: 0.0,
                min_km_per_liter: 0.0,
                max_km_per_liter: 0.0,
                total_distance_km: 0,
                total_liters: 0.0,
            });
        }

        let sum: f64 = matching.iter().map(|r| r.km_per_liter).sum();
        let min = matching
            .iter()
            .map(|r| r.km_per_liter)
            .fold(f64::INFINITY, f64::min);
        let max = matching
            .iter()
            .map(|r| r.km_per_liter)
            .fold(f64::NEG_INFINITY, f64::max);
        Ok(EfficiencySummary {
            entity,
            window_days,
            records: matching.len(),
            avg_km_per_liter: sum / matching.len() as f64,
            min_km_per_liter: min,
            max_km_per_liter: max,
            total_distance_km: matching.iter().map(|r| r.distance_km).sum(),
            total_liters: matching.iter().map(|r| r.liters).sum(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ffl_core::{ApprovalKind, Audience, FuelRecord};
    use tempfile::TempDir;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_760_000_000 + secs, 0)
            .single()
            .expect("valid test timestamp")
    }

    fn record(entity: &str, odometer: u64) -> FuelRecord {
        FuelRecord {
            recorded_at: "2026-08-01-09-30".to_string(),
            department: "LOGISTICS".to_string(),
            driver: "Jane".to_string(),
            entity: entity.to_string(),
            liters: 40.0,
            amount: 6_000.0,
            fuel_type: "DIESEL".to_string(),
            odometer,
            sender: "Jane".to_string(),
            raw_text: "FUEL UPDATE".to_string(),
        }
    }

    fn approval(id: &str) -> PendingApproval {
        PendingApproval {
            id: id.to_string(),
            kind: ApprovalKind::CooldownConflict,
            created_at: ts(0),
            proposed: record("KCA542Q", 1_050),
            prior: Some(record("KCA542Q", 1_000)),
            reason: "fueled 5.0 hours ago".to_string(),
            changes: Vec::new(),
            status: ApprovalStatus::Pending,
            resolved_at: None,
            notified: false,
            source_message_id: None,
            origin_ts: ts(0).timestamp(),
            sender_address: "254700000001".to_string(),
        }
    }

    #[test]
    fn snapshot_upsert_and_get_round_trip() {
        let dir = TempDir::new().expect("temp dir");
        let store = SnapshotStore::open(dir.path().join("snapshots.json"));
        assert!(store.get("KCA542Q").expect("get").is_none());

        let snapshot = EntitySnapshot {
            recorded_at: ts(0),
            driver: "Jane".to_string(),
            department: "LOGISTICS".to_string(),
            liters: 40.0,
            amount: 6_000.0,
            fuel_type: "DIESEL".to_string(),
            odometer: 120_000,
            efficiency: Some(8.5),
        };
        store.upsert("KCA542Q", snapshot.clone()).expect("upsert");
        assert_eq!(store.get("KCA542Q").expect("get"), Some(snapshot));
    }

    #[test]
    fn resolve_fires_exactly_once() {
        let dir = TempDir::new().expect("temp dir");
        let store = ApprovalStore::open(dir.path().join("approvals.json"), 10);
        store.append(approval("abcd1234")).expect("append");

        let first = store
            .resolve("abcd1234", ApprovalStatus::Approved, ts(60))
            .expect("resolve");
        let Resolution::Applied(applied) = first else {
            panic!("expected Applied, got {first:?}");
        };
        assert_eq!(applied.status, ApprovalStatus::Approved);
        assert_eq!(applied.resolved_at, Some(ts(60)));

        let second = store
            .resolve("abcd1234", ApprovalStatus::Rejected, ts(120))
            .expect("resolve");
        assert_eq!(second, Resolution::AlreadyResolved);
        assert_eq!(
            store.get("abcd1234").expect("get").expect("present").status,
            ApprovalStatus::Approved
        );

        assert_eq!(
            store
                .resolve("missing", ApprovalStatus::Approved, ts(60))
                .expect("resolve"),
            Resolution::NotFound
        );
    }

    #[test]
    fn compaction_never_drops_pending_approvals() {
        let dir = TempDir::new().expect("temp dir");
        let store = ApprovalStore::open(dir.path().join("approvals.json"), 2);
        for i in 0..5 {
            store.append(approval(&format!("res-{i}"))).expect("append");
            store
                .resolve(&format!("res-{i}"), ApprovalStatus::Rejected, ts(i))
                .expect("resolve");
        }
        store.append(approval("keep-pending")).expect("append");

        assert_eq!(store.pending().expect("pending").len(), 1);
        assert!(store.get("keep-pending").expect("get").is_some());
        // Oldest resolved entries were dropped by the cap.
        assert!(store.get("res-0").expect("get").is_none());
        assert!(store.get("res-4").expect("get").is_some());
    }

    #[test]
    fn queue_honors_spacing_and_per_cycle_cap() {
        let dir = TempDir::new().expect("temp dir");
        let queue = NotificationQueue::open(dir.path().join("outbox.json"), 100);
        let policy = DeliveryPolicy {
            min_spacing_secs: 30,
            max_per_cycle: 2,
        };
        for i in 0..4 {
            queue
                .push(Notification::to_approvers(format!("msg {i}"), ts(i)))
                .expect("push");
        }

        let first = queue.take_due(ts(10), &policy).expect("take");
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].text, "msg 0");
        let ids: Vec<String> = first.iter().map(|m| m.id.clone()).collect();
        queue.mark_delivered(&ids, ts(10)).expect("mark");

        // Too soon after the previous delivery.
        assert!(queue.take_due(ts(20), &policy).expect("take").is_empty());

        let second = queue.take_due(ts(45), &policy).expect("take");
        assert_eq!(second.len(), 2);
        assert_eq!(second[0].text, "msg 2");
        assert_eq!(queue.undelivered_count().expect("count"), 2);
    }

    #[test]
    fn queue_caps_backlog_by_dropping_oldest() {
        let dir = TempDir::new().expect("temp dir");
        let queue = NotificationQueue::open(dir.path().join("outbox.json"), 3);
        for i in 0..5 {
            queue
                .push(Notification::to_sender(
                    format!("msg {i}"),
                    "254700000001".to_string(),
                    ts(i),
                ))
                .expect("push");
        }
        let policy = DeliveryPolicy {
            min_spacing_secs: 0,
            max_per_cycle: 10,
        };
        let due = queue.take_due(ts(100), &policy).expect("take");
        assert_eq!(due.len(), 3);
        assert_eq!(due[0].text, "msg 2");
    }

    #[test]
    fn watermark_round_trips() {
        let dir = TempDir::new().expect("temp dir");
        let store = WatermarkStore::open(dir.path().join("watermark.json"));
        assert!(store.load().expect("load").is_none());
        store.store(ts(500)).expect("store");
        assert_eq!(store.load().expect("load"), Some(ts(500)));
    }

    #[test]
    fn fleet_seeds_once_then_tracks_mutations() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("fleet.json");
        let seed = vec!["kca 542q".to_string(), "KDB323M".to_string()];
        let store = FleetStore::open_seeded(&path, &seed).expect("open");

        assert!(store.contains("KCA542Q").expect("contains"));
        assert!(store.add("KDV064S").expect("add"));
        assert!(!store.add("KDV064S").expect("add again"));
        assert!(store.remove("KDB323M").expect("remove"));
        assert!(!store.remove("KDB323M").expect("remove again"));

        // Re-opening with the seed must not resurrect removed entities.
        let reopened = FleetStore::open_seeded(&path, &seed).expect("reopen");
        assert!(!reopened.contains("KDB323M").expect("contains"));
        assert_eq!(reopened.list().expect("list"), vec!["KCA542Q", "KDV064S"]);
    }

    #[test]
    fn efficiency_summary_is_windowed_per_entity() {
        let dir = TempDir::new().expect("temp dir");
        let history = EfficiencyHistory::open(dir.path().join("efficiency.json"), 100);
        let now = ts(0);
        let entry = |entity: &str, days_ago: i64, kmpl: f64| EfficiencyRecord {
            ts: now - Duration::days(days_ago),
            entity: entity.to_string(),
            driver: "Jane".to_string(),
            km_per_liter: kmpl,
            distance_km: 300,
            liters: 35.0,
        };
        history.append(entry("KCA542Q", 2, 8.0)).expect("append");
        history.append(entry("KCA542Q", 5, 10.0)).expect("append");
        history.append(entry("KCA542Q", 60, 4.0)).expect("append");
        history.append(entry("KDB323M", 1, 6.0)).expect("append");

        let summary = history.summary("kca 542q", 30, now).expect("summary");
        assert_eq!(summary.records, 2);
        assert!((summary.avg_km_per_liter - 9.0).abs() < 1e-9);
        assert_eq!(summary.min_km_per_liter, 8.0);
        assert_eq!(summary.max_km_per_liter, 10.0);
        assert_eq!(summary.total_distance_km, 600);

        let empty = history.summary("KCZ154S", 30, now).expect("summary");
        assert_eq!(empty.records, 0);
    }
}
