use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};

use crate::error::EvaluationError;
use crate::models::{AttendanceRecord, AttendanceStatus, Decision, DecisionSource, Session};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RulePolicy {
    /// How long after a session ends before absences are filled in.
    pub grace_period: Duration,
}

impl Default for RulePolicy {
    fn default() -> Self {
        RulePolicy {
            grace_period: Duration::zero(),
        }
    }
}

impl RulePolicy {
    pub fn with_grace(grace_period: Duration) -> Self {
        RulePolicy { grace_period }
    }

    /// Sessions ending strictly before this instant are due.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.grace_period
    }

    pub fn is_due(&self, session: &Session, now: DateTime<Utc>) -> bool {
        session.ends_at < self.cutoff(now)
    }
}

/// Decide automatic absences for one session.
///
/// Pure: the result depends only on the arguments. Attendees with a manual
/// record of any status, or an automatic terminal record, get no decision.
pub fn evaluate(
    session: &Session,
    records: &[AttendanceRecord],
    now: DateTime<Utc>,
    policy: &RulePolicy,
) -> Result<Vec<Decision>, EvaluationError> {
    if session.ends_at < session.starts_at {
        return Err(EvaluationError::InvertedWindow {
            session_id: session.id.clone(),
        });
    }
    if !policy.is_due(session, now) {
        return Ok(Vec::new());
    }

    let existing: HashMap<&str, &AttendanceRecord> = records
        .iter()
        .filter(|r| r.session_id == session.id)
        .map(|r| (r.student_id.as_str(), r))
        .collect();

    let mut seen = HashSet::new();
    let mut decisions = Vec::new();
    for student_id in &session.attendees {
        if !seen.insert(student_id.as_str()) {
            continue;
        }
        let needs_decision = match existing.get(student_id.as_str()) {
            None => true,
            Some(record) => record.source == DecisionSource::Automatic && !record.is_terminal(),
        };
        if needs_decision {
            decisions.push(Decision {
                session_id: session.id.clone(),
                student_id: student_id.clone(),
                status: AttendanceStatus::Absent,
                decided_at: now,
            });
        }
    }
    Ok(decisions)
}
