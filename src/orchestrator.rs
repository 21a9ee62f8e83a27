use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinSet};

use crate::catalog::{EligibleSession, SessionCatalog};
use crate::clock::Clock;
use crate::error::RetrievalError;
use crate::models::{CheckResult, SessionError, SessionOutcome};
use crate::rules::{self, RulePolicy};
use crate::store::{AttendanceStore, SessionStore};
use crate::writer::write_decisions;

#[derive(Debug, Clone, Copy)]
pub struct CheckOptions {
    pub policy: RulePolicy,
    /// Sessions processed at once.
    pub workers: usize,
    /// Stop waiting after this long and report what finished.
    pub timeout: Option<Duration>,
}

impl Default for CheckOptions {
    fn default() -> Self {
        CheckOptions {
            policy: RulePolicy::default(),
            workers: 4,
            timeout: None,
        }
    }
}

/// Entry point for one automatic attendance check: load eligible sessions,
/// decide absences, write them, and summarise.
pub struct AutoAttendance {
    catalog: SessionCatalog,
    attendance: Arc<dyn AttendanceStore>,
    clock: Arc<dyn Clock>,
    options: CheckOptions,
}

type TaskOutput = (usize, SessionOutcome, Vec<SessionError>);

impl AutoAttendance {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        attendance: Arc<dyn AttendanceStore>,
        clock: Arc<dyn Clock>,
        options: CheckOptions,
    ) -> Self {
        AutoAttendance {
            catalog: SessionCatalog::new(sessions, attendance.clone()),
            attendance,
            clock,
            options,
        }
    }

    /// Runs one check. Only a failure to read the session catalog is an
    /// error; everything after that is collected into the result.
    pub async fn run(&self) -> Result<CheckResult, RetrievalError> {
        let started = std::time::Instant::now();
        let deadline = self.options.timeout.map(|t| tokio::time::Instant::now() + t);
        let now = self.clock.now();
        let policy = self.options.policy;

        let loading = self.catalog.eligible_sessions(now, &policy);
        let eligible = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, loading).await {
                Ok(loaded) => loaded,
                Err(_) => {
                    tracing::warn!("auto-attendance check timed out while loading sessions");
                    return Ok(CheckResult::from_parts(Vec::new(), Vec::new(), true));
                }
            },
            None => loading.await,
        }
        .map_err(|e| {
            tracing::error!(error = %e, "auto-attendance check aborted");
            e
        })?;

        let semaphore = Arc::new(Semaphore::new(self.options.workers.max(1)));
        let mut tasks: JoinSet<TaskOutput> = JoinSet::new();
        let mut pending: BTreeMap<usize, String> = BTreeMap::new();
        let mut task_index: HashMap<Id, usize> = HashMap::new();

        for (index, item) in eligible.into_iter().enumerate() {
            pending.insert(index, item.session.id.clone());
            let semaphore = semaphore.clone();
            let store = self.attendance.clone();
            let handle = tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let (outcome, errors) = process_session(store.as_ref(), item, now, &policy).await;
                (index, outcome, errors)
            });
            task_index.insert(handle.id(), index);
        }

        let mut finished: Vec<(usize, SessionOutcome)> = Vec::new();
        let mut errors: Vec<(usize, SessionError)> = Vec::new();
        let mut timed_out = false;

        loop {
            let next = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, tasks.join_next_with_id()).await {
                    Ok(next) => next,
                    Err(_) => {
                        timed_out = true;
                        break;
                    }
                },
                None => tasks.join_next_with_id().await,
            };
            match next {
                None => break,
                Some(Ok((_, (index, outcome, session_errors)))) => {
                    pending.remove(&index);
                    finished.push((index, outcome));
                    errors.extend(session_errors.into_iter().map(|e| (index, e)));
                }
                Some(Err(join_error)) => {
                    let Some(index) = task_index.get(&join_error.id()).copied() else {
                        tracing::error!(error = %join_error, "unknown session task failed");
                        continue;
                    };
                    if let Some(session_id) = pending.remove(&index) {
                        tracing::error!(session_id = %session_id, error = %join_error, "session task failed");
                        errors.push((
                            index,
                            SessionError {
                                session_id,
                                student_id: None,
                                message: "session task failed".to_string(),
                            },
                        ));
                    }
                }
            }
        }
        tasks.abort_all();

        // Only reachable on timeout: crashed tasks were already moved out.
        let reason = "timed out before the session was processed";
        for (index, session_id) in pending {
            tracing::warn!(session_id = %session_id, reason, "session not processed");
            errors.push((
                index,
                SessionError {
                    session_id,
                    student_id: None,
                    message: reason.to_string(),
                },
            ));
        }

        finished.sort_by_key(|(index, _)| *index);
        errors.sort_by_key(|(index, _)| *index);
        let result = CheckResult::from_parts(
            finished.into_iter().map(|(_, o)| o).collect(),
            errors.into_iter().map(|(_, e)| e).collect(),
            timed_out,
        );

        tracing::info!(
            sessions = result.sessions_processed,
            records_written = result.records_written,
            errors = result.errors.len(),
            timed_out = result.timed_out,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "auto-attendance check finished"
        );
        Ok(result)
    }
}

async fn process_session(
    store: &dyn AttendanceStore,
    item: EligibleSession,
    now: DateTime<Utc>,
    policy: &RulePolicy,
) -> (SessionOutcome, Vec<SessionError>) {
    let session_id = item.session.id.clone();

    let decisions = match rules::evaluate(&item.session, &item.records, now, policy) {
        Ok(decisions) => decisions,
        Err(e) => {
            tracing::warn!(session_id = %session_id, error = %e, "session evaluation failed");
            let outcome = SessionOutcome {
                session_id: session_id.clone(),
                decisions: 0,
                records_written: 0,
                errors: 1,
            };
            let error = SessionError {
                session_id,
                student_id: None,
                message: e.to_string(),
            };
            return (outcome, vec![error]);
        }
    };

    let report = write_decisions(store, &decisions).await;
    let errors: Vec<SessionError> = report
        .failures
        .iter()
        .map(|f| SessionError {
            session_id: f.session_id.clone(),
            student_id: Some(f.student_id.clone()),
            message: f.to_string(),
        })
        .collect();

    let outcome = SessionOutcome {
        session_id,
        decisions: decisions.len(),
        records_written: report.written(),
        errors: errors.len(),
    };
    (outcome, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::error::StoreError;
    use crate::memory::MemoryStore;
    use crate::models::{AttendanceRecord, Decision, Session, UpsertOutcome};
    use async_trait::async_trait;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, hour, minute, 0).unwrap()
    }

    fn session(id: &str, attendees: &[&str]) -> Session {
        Session {
            id: id.to_string(),
            subject_id: "art".to_string(),
            classroom_id: "studio".to_string(),
            starts_at: at(9, 0),
            ends_at: at(10, 0),
            attendees: attendees.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Attendance store whose writes hang for one session and panic for another.
    #[derive(Default)]
    struct ScriptedStore {
        inner: MemoryStore,
        stall_session: Option<String>,
        panic_session: Option<String>,
    }

    #[async_trait]
    impl AttendanceStore for ScriptedStore {
        async fn records_for_session(&self, session_id: &str) -> Result<Vec<AttendanceRecord>, StoreError> {
            self.inner.records_for_session(session_id).await
        }

        async fn upsert_automatic(&self, decision: &Decision) -> Result<UpsertOutcome, StoreError> {
            if self.stall_session.as_deref() == Some(decision.session_id.as_str()) {
                std::future::pending::<()>().await;
            }
            if self.panic_session.as_deref() == Some(decision.session_id.as_str()) {
                panic!("attendance backend crashed");
            }
            self.inner.upsert_automatic(decision).await
        }

        async fn record_manual(&self, record: &AttendanceRecord) -> Result<UpsertOutcome, StoreError> {
            self.inner.record_manual(record).await
        }
    }

    #[tokio::test]
    async fn evaluation_error_is_session_level() {
        let mut broken = session("broken", &["s1"]);
        broken.starts_at = at(11, 0);
        let store = Arc::new(MemoryStore::with_sessions(vec![broken, session("ok", &["s1"])]));
        let clock = Arc::new(FixedClock::new(at(10, 5)));
        let check = AutoAttendance::new(store.clone(), store.clone(), clock, CheckOptions::default());

        let result = check.run().await.unwrap();
        assert!(!result.success);
        assert_eq!(result.sessions_processed, 2);
        assert_eq!(result.records_written, 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].session_id, "broken");
        assert!(store.record("broken", "s1").is_none());
    }

    #[tokio::test]
    async fn timeout_returns_partial_result() {
        let sessions = Arc::new(MemoryStore::with_sessions(vec![
            session("fast", &["s1"]),
            session("stuck", &["s1"]),
        ]));
        let attendance = Arc::new(ScriptedStore {
            stall_session: Some("stuck".to_string()),
            ..ScriptedStore::default()
        });
        let clock = Arc::new(FixedClock::new(at(10, 5)));
        let options = CheckOptions {
            timeout: Some(Duration::from_millis(200)),
            ..CheckOptions::default()
        };
        let check = AutoAttendance::new(sessions, attendance.clone(), clock, options);

        let result = check.run().await.unwrap();
        assert!(result.timed_out);
        assert!(!result.success);
        assert_eq!(result.sessions_processed, 1);
        assert_eq!(result.sessions[0].session_id, "fast");
        assert_eq!(result.records_written, 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].session_id, "stuck");
        assert!(attendance.inner.record("fast", "s1").is_some());
    }

    #[tokio::test]
    async fn panicking_session_becomes_session_error() {
        let sessions = Arc::new(MemoryStore::with_sessions(vec![
            session("boom", &["s1"]),
            session("ok", &["s1"]),
        ]));
        let attendance = Arc::new(ScriptedStore {
            panic_session: Some("boom".to_string()),
            ..ScriptedStore::default()
        });
        let clock = Arc::new(FixedClock::new(at(10, 5)));
        let check = AutoAttendance::new(sessions, attendance.clone(), clock, CheckOptions::default());

        let result = check.run().await.unwrap();
        assert!(!result.success);
        assert!(!result.timed_out);
        assert_eq!(result.sessions_processed, 1);
        assert_eq!(result.sessions[0].session_id, "ok");
        assert_eq!(result.records_written, 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].session_id, "boom");
        assert_eq!(result.errors[0].message, "session task failed");
        assert!(attendance.inner.record("ok", "s1").is_some());
        assert!(attendance.inner.record("boom", "s1").is_none());
    }

    #[tokio::test]
    async fn crashed_session_keeps_its_reason_when_run_times_out() {
        let sessions = Arc::new(MemoryStore::with_sessions(vec![
            session("boom", &["s1"]),
            session("stuck", &["s1"]),
            session("ok", &["s1"]),
        ]));
        let attendance = Arc::new(ScriptedStore {
            stall_session: Some("stuck".to_string()),
            panic_session: Some("boom".to_string()),
            ..ScriptedStore::default()
        });
        let clock = Arc::new(FixedClock::new(at(10, 5)));
        let options = CheckOptions {
            timeout: Some(Duration::from_millis(200)),
            ..CheckOptions::default()
        };
        let check = AutoAttendance::new(sessions, attendance, clock, options);

        let result = check.run().await.unwrap();
        assert!(result.timed_out);
        assert_eq!(result.sessions_processed, 1);
        let messages: Vec<(&str, &str)> = result
            .errors
            .iter()
            .map(|e| (e.session_id.as_str(), e.message.as_str()))
            .collect();
        assert_eq!(
            messages,
            vec![
                ("boom", "session task failed"),
                ("stuck", "timed out before the session was processed"),
            ]
        );
    }

    #[tokio::test]
    async fn single_worker_processes_every_session() {
        let store = Arc::new(MemoryStore::with_sessions(
            (0..10).map(|i| session(&format!("s{i}"), &["a", "b"])).collect(),
        ));
        let clock = Arc::new(FixedClock::new(at(10, 5)));
        let options = CheckOptions {
            workers: 1,
            ..CheckOptions::default()
        };
        let check = AutoAttendance::new(store.clone(), store.clone(), clock, options);

        let result = check.run().await.unwrap();
        assert!(result.success);
        assert_eq!(result.sessions_processed, 10);
        assert_eq!(result.records_written, 20);
        let ids: Vec<&str> = result.sessions.iter().map(|s| s.session_id.as_str()).collect();
        assert_eq!(ids[0], "s0");
        assert_eq!(ids[9], "s9");
    }
}
