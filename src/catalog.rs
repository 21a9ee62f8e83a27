use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::RetrievalError;
use crate::models::{AttendanceRecord, Session};
use crate::rules::RulePolicy;
use crate::store::{AttendanceStore, SessionStore};

/// A session that still needs decisions, with the records already stored for it.
#[derive(Debug, Clone, PartialEq)]
pub struct EligibleSession {
    pub session: Session,
    pub records: Vec<AttendanceRecord>,
}

/// True when the session has attendees and every one of them already has a
/// terminal record. Sessions with nobody enrolled are never finalized.
pub fn is_finalized(session: &Session, records: &[AttendanceRecord]) -> bool {
    if session.attendees.is_empty() {
        return false;
    }
    let settled: HashSet<&str> = records
        .iter()
        .filter(|r| r.session_id == session.id && r.is_terminal())
        .map(|r| r.student_id.as_str())
        .collect();
    session.attendees.iter().all(|a| settled.contains(a.as_str()))
}

pub struct SessionCatalog {
    sessions: Arc<dyn SessionStore>,
    attendance: Arc<dyn AttendanceStore>,
}

impl SessionCatalog {
    pub fn new(sessions: Arc<dyn SessionStore>, attendance: Arc<dyn AttendanceStore>) -> Self {
        SessionCatalog { sessions, attendance }
    }

    /// Sessions that are due under `policy` at `now` and not yet finalized.
    pub async fn eligible_sessions(
        &self,
        now: DateTime<Utc>,
        policy: &RulePolicy,
    ) -> Result<Vec<EligibleSession>, RetrievalError> {
        let cutoff = policy.cutoff(now);
        let sessions = self.sessions.open_sessions(cutoff).await?;

        let mut eligible = Vec::with_capacity(sessions.len());
        for session in sessions {
            if session.ends_at >= cutoff {
                continue;
            }
            let records = self.attendance.records_for_session(&session.id).await?;
            if is_finalized(&session, &records) {
                continue;
            }
            eligible.push(EligibleSession { session, records });
        }

        tracing::debug!(cutoff = %cutoff, eligible = eligible.len(), "loaded eligible sessions");
        Ok(eligible)
    }
}
