use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::models::{AttendanceRecord, AttendanceStatus, Decision, DecisionSource, Session, UpsertOutcome};
use crate::store::{plan_upsert, AttendanceStore, SessionStore, UpsertPlan};

type SessionRow = (String, String, String, i64, i64);
type RecordRow = (String, String, String, String, i64);

/// SQLite-backed session catalog and attendance table.
pub struct Database {
    pool: Pool<Sqlite>,
    // Upserts read then write; one writer at a time keeps that atomic.
    write_lock: Mutex<()>,
}

impl Database {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

        // Every pooled connection to ":memory:" would get its own empty
        // database, so pin it to a single long-lived connection.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
        } else {
            SqlitePoolOptions::new().max_connections(8)
        };
        let pool = pool_options.connect_with(options).await?;

        let database = Database {
            pool,
            write_lock: Mutex::new(()),
        };
        database.migrate().await?;
        Ok(database)
    }

    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::connect("sqlite::memory:").await
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                subject_id TEXT NOT NULL,
                classroom_id TEXT NOT NULL,
                starts_at_ms INTEGER NOT NULL,
                ends_at_ms INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_ends_at ON sessions(ends_at_ms)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS session_attendees (
                session_id TEXT NOT NULL REFERENCES sessions(id),
                student_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                PRIMARY KEY (session_id, student_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS attendance (
                session_id TEXT NOT NULL,
                student_id TEXT NOT NULL,
                status TEXT NOT NULL,
                source TEXT NOT NULL,
                decided_at_ms INTEGER NOT NULL,
                PRIMARY KEY (session_id, student_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Adds a session and its attendee list. Returns false if the id was
    /// already present, in which case nothing changes.
    pub async fn insert_session(&self, session: &Session) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO sessions (id, subject_id, classroom_id, starts_at_ms, ends_at_ms)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(&session.subject_id)
        .bind(&session.classroom_id)
        .bind(session.starts_at.timestamp_millis())
        .bind(session.ends_at.timestamp_millis())
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if inserted {
            for (position, student_id) in session.attendees.iter().enumerate() {
                sqlx::query(
                    "INSERT OR IGNORE INTO session_attendees (session_id, student_id, position) VALUES (?, ?, ?)",
                )
                .bind(&session.id)
                .bind(student_id)
                .bind(position as i64)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn attendees(&self, session_id: &str) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT student_id FROM session_attendees WHERE session_id = ? ORDER BY position",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn upsert(&self, incoming: AttendanceRecord) -> Result<UpsertOutcome, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let existing: Option<RecordRow> = sqlx::query_as(
            r#"
            SELECT session_id, student_id, status, source, decided_at_ms
            FROM attendance
            WHERE session_id = ? AND student_id = ?
            "#,
        )
        .bind(&incoming.session_id)
        .bind(&incoming.student_id)
        .fetch_optional(&mut *tx)
        .await?;
        let existing = existing.map(record_from_row).transpose()?;

        let plan = plan_upsert(existing.as_ref(), &incoming);
        if matches!(plan, UpsertPlan::Insert | UpsertPlan::Replace) {
            sqlx::query(
                r#"
                INSERT INTO attendance (session_id, student_id, status, source, decided_at_ms)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(session_id, student_id) DO UPDATE SET
                    status = excluded.status,
                    source = excluded.source,
                    decided_at_ms = excluded.decided_at_ms
                "#,
            )
            .bind(&incoming.session_id)
            .bind(&incoming.student_id)
            .bind(incoming.status.as_str())
            .bind(incoming.source.as_str())
            .bind(incoming.decided_at.timestamp_millis())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(plan.outcome())
    }
}

fn timestamp(millis: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {}", millis)))
}

fn record_from_row(row: RecordRow) -> Result<AttendanceRecord, StoreError> {
    let (session_id, student_id, status, source, decided_at_ms) = row;
    Ok(AttendanceRecord {
        status: AttendanceStatus::from_str(&status).map_err(|e| StoreError::Corrupt(e.to_string()))?,
        source: DecisionSource::from_str(&source).map_err(|e| StoreError::Corrupt(e.to_string()))?,
        decided_at: timestamp(decided_at_ms)?,
        session_id,
        student_id,
    })
}

#[async_trait]
impl SessionStore for Database {
    async fn open_sessions(&self, cutoff: DateTime<Utc>) -> Result<Vec<Session>, StoreError> {
        // Skip sessions where every attendee already has a terminal record.
        // Sessions with nobody enrolled stay in so they are still processed.
        let rows: Vec<SessionRow> = sqlx::query_as(
            r#"
            SELECT s.id, s.subject_id, s.classroom_id, s.starts_at_ms, s.ends_at_ms
            FROM sessions s
            WHERE s.ends_at_ms < ?
              AND (
                NOT EXISTS (SELECT 1 FROM session_attendees a WHERE a.session_id = s.id)
                OR EXISTS (
                    SELECT 1 FROM session_attendees a
                    WHERE a.session_id = s.id
                      AND NOT EXISTS (
                          SELECT 1 FROM attendance r
                          WHERE r.session_id = a.session_id
                            AND r.student_id = a.student_id
                            AND r.status <> 'pending'
                      )
                )
              )
            ORDER BY s.ends_at_ms, s.id
            "#,
        )
        .bind(cutoff.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;

        let mut sessions = Vec::with_capacity(rows.len());
        for (id, subject_id, classroom_id, starts_at_ms, ends_at_ms) in rows {
            let attendees = self.attendees(&id).await?;
            sessions.push(Session {
                id,
                subject_id,
                classroom_id,
                starts_at: timestamp(starts_at_ms)?,
                ends_at: timestamp(ends_at_ms)?,
                attendees,
            });
        }
        Ok(sessions)
    }
}

#[async_trait]
impl AttendanceStore for Database {
    async fn records_for_session(&self, session_id: &str) -> Result<Vec<AttendanceRecord>, StoreError> {
        let rows: Vec<RecordRow> = sqlx::query_as(
            r#"
            SELECT session_id, student_id, status, source, decided_at_ms
            FROM attendance
            WHERE session_id = ?
            ORDER BY student_id
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(record_from_row).collect()
    }

    async fn upsert_automatic(&self, decision: &Decision) -> Result<UpsertOutcome, StoreError> {
        self.upsert(decision.clone().into_record()).await
    }

    async fn record_manual(&self, record: &AttendanceRecord) -> Result<UpsertOutcome, StoreError> {
        let mut record = record.clone();
        record.source = DecisionSource::Manual;
        self.upsert(record).await
    }
}
