use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::error::StoreError;
use crate::models::{AttendanceRecord, Decision, DecisionSource, Session, UpsertOutcome};
use crate::store::{plan_upsert, AttendanceStore, SessionStore, UpsertPlan};

type RecordKey = (String, String);

/// In-process store for both sessions and attendance. Supports failure
/// injection so callers can exercise the error paths.
#[derive(Default)]
pub struct MemoryStore {
    sessions: Mutex<Vec<Session>>,
    records: Mutex<BTreeMap<RecordKey, AttendanceRecord>>,
    sessions_unreachable: AtomicBool,
    failing_writes: Mutex<HashSet<RecordKey>>,
    write_attempts: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sessions(sessions: Vec<Session>) -> Self {
        let store = Self::new();
        *store.sessions.lock() = sessions;
        store
    }

    pub fn set_sessions_unreachable(&self, unreachable: bool) {
        self.sessions_unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn fail_writes_for(&self, session_id: &str, student_id: &str) {
        self.failing_writes
            .lock()
            .insert((session_id.to_string(), student_id.to_string()));
    }

    /// Upserts attempted so far, successful or not.
    pub fn write_attempts(&self) -> usize {
        self.write_attempts.load(Ordering::SeqCst)
    }

    pub fn record(&self, session_id: &str, student_id: &str) -> Option<AttendanceRecord> {
        self.records
            .lock()
            .get(&(session_id.to_string(), student_id.to_string()))
            .cloned()
    }

    pub fn all_records(&self) -> Vec<AttendanceRecord> {
        self.records.lock().values().cloned().collect()
    }

    fn upsert(&self, incoming: AttendanceRecord) -> Result<UpsertOutcome, StoreError> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        let key = (incoming.session_id.clone(), incoming.student_id.clone());
        if self.failing_writes.lock().contains(&key) {
            return Err(StoreError::Unavailable(format!(
                "write rejected for {}/{}",
                key.0, key.1
            )));
        }

        let mut records = self.records.lock();
        let plan = plan_upsert(records.get(&key), &incoming);
        if matches!(plan, UpsertPlan::Insert | UpsertPlan::Replace) {
            records.insert(key, incoming);
        }
        Ok(plan.outcome())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn open_sessions(&self, cutoff: DateTime<Utc>) -> Result<Vec<Session>, StoreError> {
        if self.sessions_unreachable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("session store unreachable".to_string()));
        }
        Ok(self
            .sessions
            .lock()
            .iter()
            .filter(|s| s.ends_at < cutoff)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AttendanceStore for MemoryStore {
    async fn records_for_session(&self, session_id: &str) -> Result<Vec<AttendanceRecord>, StoreError> {
        Ok(self
            .records
            .lock()
            .values()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn upsert_automatic(&self, decision: &Decision) -> Result<UpsertOutcome, StoreError> {
        self.upsert(decision.clone().into_record())
    }

    async fn record_manual(&self, record: &AttendanceRecord) -> Result<UpsertOutcome, StoreError> {
        let mut record = record.clone();
        record.source = DecisionSource::Manual;
        self.upsert(record)
    }
}
