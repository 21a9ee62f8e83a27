use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::{AttendanceRecord, DecisionSource, Decision, Session, UpsertOutcome};

/// Read access to scheduled sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Sessions that ended strictly before `cutoff` and may still be missing
    /// decisions. Stores may return finalized sessions too; the catalog
    /// filters them out again.
    async fn open_sessions(&self, cutoff: DateTime<Utc>) -> Result<Vec<Session>, StoreError>;
}

/// Upsert access to attendance rows keyed on `(session_id, student_id)`.
#[async_trait]
pub trait AttendanceStore: Send + Sync {
    async fn records_for_session(&self, session_id: &str) -> Result<Vec<AttendanceRecord>, StoreError>;

    async fn upsert_automatic(&self, decision: &Decision) -> Result<UpsertOutcome, StoreError>;

    async fn record_manual(&self, record: &AttendanceRecord) -> Result<UpsertOutcome, StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertPlan {
    Insert,
    Replace,
    Keep,
    Protect,
}

impl UpsertPlan {
    pub fn outcome(self) -> UpsertOutcome {
        match self {
            UpsertPlan::Insert => UpsertOutcome::Created,
            UpsertPlan::Replace => UpsertOutcome::Updated,
            UpsertPlan::Keep => UpsertOutcome::Unchanged,
            UpsertPlan::Protect => UpsertOutcome::Protected,
        }
    }
}

/// Decide what an upsert of `incoming` does given the stored row.
///
/// Manual rows are never replaced by automatic ones. A write that matches
/// the stored status and source is a no-op and keeps the old timestamp.
pub fn plan_upsert(existing: Option<&AttendanceRecord>, incoming: &AttendanceRecord) -> UpsertPlan {
    match existing {
        None => UpsertPlan::Insert,
        Some(current)
            if current.source == DecisionSource::Manual
                && incoming.source == DecisionSource::Automatic =>
        {
            UpsertPlan::Protect
        }
        Some(current) if current.status == incoming.status && current.source == incoming.source => {
            UpsertPlan::Keep
        }
        Some(_) => UpsertPlan::Replace,
    }
}
