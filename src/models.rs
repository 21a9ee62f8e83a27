use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A scheduled class occurrence. Owned by the scheduling side; read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub subject_id: String,
    pub classroom_id: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub attendees: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Excused,
    Pending,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Excused => "excused",
            AttendanceStatus::Pending => "pending",
        }
    }

    /// Everything except `pending` is a final answer for the pair.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AttendanceStatus::Pending)
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown attendance status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for AttendanceStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "present" => Ok(AttendanceStatus::Present),
            "absent" => Ok(AttendanceStatus::Absent),
            "excused" => Ok(AttendanceStatus::Excused),
            "pending" => Ok(AttendanceStatus::Pending),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionSource {
    Manual,
    Automatic,
}

impl DecisionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionSource::Manual => "manual",
            DecisionSource::Automatic => "automatic",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown decision source: {0}")]
pub struct UnknownSource(pub String);

impl FromStr for DecisionSource {
    type Err = UnknownSource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(DecisionSource::Manual),
            "automatic" => Ok(DecisionSource::Automatic),
            _ => Err(UnknownSource(s.to_string())),
        }
    }
}

/// The stored answer for one student in one session. Keyed on
/// `(session_id, student_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub session_id: String,
    pub student_id: String,
    pub status: AttendanceStatus,
    pub source: DecisionSource,
    pub decided_at: DateTime<Utc>,
}

impl AttendanceRecord {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// An automatic decision produced by the rule evaluator, not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub session_id: String,
    pub student_id: String,
    pub status: AttendanceStatus,
    pub decided_at: DateTime<Utc>,
}

impl Decision {
    pub fn into_record(self) -> AttendanceRecord {
        AttendanceRecord {
            session_id: self.session_id,
            student_id: self.student_id,
            status: self.status,
            source: DecisionSource::Automatic,
            decided_at: self.decided_at,
        }
    }
}

/// What an upsert did to the stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertOutcome {
    Created,
    Updated,
    Unchanged,
    /// A manual record blocked an automatic write.
    Protected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionError {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOutcome {
    pub session_id: String,
    pub decisions: usize,
    pub records_written: usize,
    pub errors: usize,
}

/// Summary of one auto-attendance run. Built per invocation, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub success: bool,
    pub sessions_processed: usize,
    pub records_written: usize,
    pub errors: Vec<SessionError>,
    pub sessions: Vec<SessionOutcome>,
    pub timed_out: bool,
}

impl CheckResult {
    pub fn from_parts(sessions: Vec<SessionOutcome>, errors: Vec<SessionError>, timed_out: bool) -> Self {
        let records_written = sessions.iter().map(|s| s.records_written).sum();
        CheckResult {
            success: errors.is_empty() && !timed_out,
            sessions_processed: sessions.len(),
            records_written,
            errors,
            sessions,
            timed_out,
        }
    }
}
