use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;

use auto_attendance::store::AttendanceStore;
use auto_attendance::{
    AttendanceRecord, AttendanceStatus, AutoAttendance, CheckOptions, Database, DecisionSource, FixedClock,
    MemoryStore, Session,
};

fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, hour, minute, 0).unwrap()
}

fn session(id: &str, ends_at: DateTime<Utc>, attendees: &[&str]) -> Session {
    Session {
        id: id.to_string(),
        subject_id: "biology".to_string(),
        classroom_id: "lab-2".to_string(),
        starts_at: ends_at - Duration::minutes(50),
        ends_at,
        attendees: attendees.iter().map(|s| s.to_string()).collect(),
    }
}

fn manual(session_id: &str, student_id: &str, status: AttendanceStatus, when: DateTime<Utc>) -> AttendanceRecord {
    AttendanceRecord {
        session_id: session_id.to_string(),
        student_id: student_id.to_string(),
        status,
        source: DecisionSource::Manual,
        decided_at: when,
    }
}

#[tokio::test]
async fn second_run_writes_nothing() {
    let db = Arc::new(Database::in_memory().await.unwrap());
    db.insert_session(&session("x", at(10, 0), &["s1", "s2"])).await.unwrap();
    db.insert_session(&session("y", at(11, 0), &["s3"])).await.unwrap();
    let clock = Arc::new(FixedClock::new(at(11, 5)));
    let check = AutoAttendance::new(db.clone(), db.clone(), clock.clone(), CheckOptions::default());

    let first = check.run().await.unwrap();
    assert!(first.success);
    assert_eq!(first.sessions_processed, 2);
    assert_eq!(first.records_written, 3);
    let after_first = db.records_for_session("x").await.unwrap();

    clock.advance(Duration::minutes(5));
    let second = check.run().await.unwrap();
    assert!(second.success);
    assert_eq!(second.sessions_processed, 0);
    assert_eq!(second.records_written, 0);
    assert_eq!(db.records_for_session("x").await.unwrap(), after_first);
}

#[tokio::test]
async fn manual_record_wins_in_either_order() {
    // Manual entry first, then the automatic run.
    let store = Arc::new(MemoryStore::with_sessions(vec![session("x", at(10, 0), &["s1"])]));
    store
        .record_manual(&manual("x", "s1", AttendanceStatus::Excused, at(9, 50)))
        .await
        .unwrap();
    let clock = Arc::new(FixedClock::new(at(10, 5)));
    let check = AutoAttendance::new(store.clone(), store.clone(), clock, CheckOptions::default());
    let result = check.run().await.unwrap();
    assert_eq!(result.records_written, 0);
    assert_eq!(store.record("x", "s1").unwrap().status, AttendanceStatus::Excused);

    // Automatic run first, then a staff correction, then another run.
    let store = Arc::new(MemoryStore::with_sessions(vec![session("x", at(10, 0), &["s1"])]));
    let clock = Arc::new(FixedClock::new(at(10, 5)));
    let check = AutoAttendance::new(store.clone(), store.clone(), clock.clone(), CheckOptions::default());
    check.run().await.unwrap();
    assert_eq!(store.record("x", "s1").unwrap().status, AttendanceStatus::Absent);

    store
        .record_manual(&manual("x", "s1", AttendanceStatus::Present, at(10, 20)))
        .await
        .unwrap();
    clock.advance(Duration::hours(1));
    let result = check.run().await.unwrap();
    assert_eq!(result.records_written, 0);
    let record = store.record("x", "s1").unwrap();
    assert_eq!(record.status, AttendanceStatus::Present);
    assert_eq!(record.source, DecisionSource::Manual);
}

#[tokio::test]
async fn failed_write_in_one_session_spares_the_other() {
    let store = Arc::new(MemoryStore::with_sessions(vec![
        session("a", at(10, 0), &["s", "t"]),
        session("b", at(10, 0), &["s", "t"]),
    ]));
    store.fail_writes_for("a", "s");
    let clock = Arc::new(FixedClock::new(at(10, 5)));
    let check = AutoAttendance::new(store.clone(), store.clone(), clock, CheckOptions::default());

    let result = check.run().await.unwrap();
    assert!(!result.success);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].session_id, "a");
    assert_eq!(result.errors[0].student_id.as_deref(), Some("s"));
    assert!(store.record("a", "t").is_some());
    assert!(store.record("b", "s").is_some());
    assert!(store.record("b", "t").is_some());

    let a = result.sessions.iter().find(|o| o.session_id == "a").unwrap();
    assert_eq!(a.records_written, 1);
    assert_eq!(a.errors, 1);
}

#[tokio::test]
async fn empty_session_is_processed_without_error() {
    let db = Arc::new(Database::in_memory().await.unwrap());
    db.insert_session(&session("assembly", at(8, 30), &[])).await.unwrap();
    let clock = Arc::new(FixedClock::new(at(10, 5)));
    let check = AutoAttendance::new(db.clone(), db.clone(), clock, CheckOptions::default());

    let result = check.run().await.unwrap();
    assert!(result.success);
    assert_eq!(result.sessions_processed, 1);
    assert_eq!(result.records_written, 0);
    assert_eq!(result.sessions[0].decisions, 0);
}

#[tokio::test]
async fn retrieval_failure_attempts_no_writes() {
    let store = Arc::new(MemoryStore::with_sessions(vec![session("x", at(10, 0), &["s1"])]));
    store.set_sessions_unreachable(true);
    let clock = Arc::new(FixedClock::new(at(10, 5)));
    let check = AutoAttendance::new(store.clone(), store.clone(), clock, CheckOptions::default());

    assert!(check.run().await.is_err());
    assert_eq!(store.write_attempts(), 0);
}
