use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::clock::Clock;
use crate::error::StoreError;
use crate::models::{AttendanceRecord, AttendanceStatus, DecisionSource, UpsertOutcome};
use crate::orchestrator::{AutoAttendance, CheckOptions};
use crate::store::{AttendanceStore, SessionStore};

/// Shared handler state. Everything the handlers touch comes in through here.
pub struct AppState {
    pub checker: Arc<AutoAttendance>,
    pub attendance: Arc<dyn AttendanceStore>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        attendance: Arc<dyn AttendanceStore>,
        clock: Arc<dyn Clock>,
        options: CheckOptions,
    ) -> Self {
        let checker = AutoAttendance::new(sessions, attendance.clone(), clock.clone(), options);
        AppState {
            checker: Arc::new(checker),
            attendance,
            clock,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    message: String,
}

fn error_response(message: impl Into<String>) -> ErrorResponse {
    ErrorResponse {
        success: false,
        message: message.into(),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualEntry {
    pub session_id: String,
    pub student_id: String,
    pub status: String,
}

#[derive(Serialize)]
struct ManualEntryResponse {
    success: bool,
    outcome: UpsertOutcome,
    record: AttendanceRecord,
}

#[derive(Serialize)]
struct SessionAttendanceResponse {
    success: bool,
    records: Vec<AttendanceRecord>,
}

// Auto-attendance check endpoint
async fn auto_attendance(state: web::Data<AppState>) -> HttpResponse {
    let checker = state.checker.clone();
    // Run on its own task so a panic turns into a 500 instead of a dropped connection.
    match tokio::spawn(async move { checker.run().await }).await {
        Ok(Ok(result)) => HttpResponse::Ok().json(result),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "auto-attendance check failed");
            HttpResponse::InternalServerError().json(error_response(e.to_string()))
        }
        Err(e) => {
            tracing::error!(error = %e, "auto-attendance check crashed");
            HttpResponse::InternalServerError().json(error_response("auto-attendance check failed unexpectedly"))
        }
    }
}

// Manual attendance entry from staff
async fn record_attendance(state: web::Data<AppState>, entry: web::Json<ManualEntry>) -> HttpResponse {
    let entry = entry.into_inner();
    let status = match entry.status.parse::<AttendanceStatus>() {
        Ok(status) => status,
        Err(e) => return HttpResponse::BadRequest().json(error_response(e.to_string())),
    };
    if entry.session_id.trim().is_empty() || entry.student_id.trim().is_empty() {
        return HttpResponse::BadRequest().json(error_response("sessionId and studentId are required"));
    }

    let record = AttendanceRecord {
        session_id: entry.session_id,
        student_id: entry.student_id,
        status,
        source: DecisionSource::Manual,
        decided_at: state.clock.now(),
    };

    let outcome = match state.attendance.record_manual(&record).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(
                session_id = %record.session_id,
                student_id = %record.student_id,
                error = %e,
                "manual attendance write failed"
            );
            return HttpResponse::InternalServerError().json(error_response(e.to_string()));
        }
    };

    // An unchanged write keeps the stored timestamp; answer with what is stored.
    let record = match outcome {
        UpsertOutcome::Created | UpsertOutcome::Updated => record,
        UpsertOutcome::Unchanged | UpsertOutcome::Protected => {
            match stored_record(state.attendance.as_ref(), &record).await {
                Ok(Some(stored)) => stored,
                Ok(None) => record,
                Err(e) => {
                    tracing::error!(session_id = %record.session_id, error = %e, "failed to reload attendance");
                    return HttpResponse::InternalServerError().json(error_response(e.to_string()));
                }
            }
        }
    };

    HttpResponse::Ok().json(ManualEntryResponse {
        success: true,
        outcome,
        record,
    })
}

async fn stored_record(
    store: &dyn AttendanceStore,
    record: &AttendanceRecord,
) -> Result<Option<AttendanceRecord>, StoreError> {
    let records = store.records_for_session(&record.session_id).await?;
    Ok(records.into_iter().find(|r| r.student_id == record.student_id))
}

async fn session_attendance(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let session_id = path.into_inner();
    match state.attendance.records_for_session(&session_id).await {
        Ok(records) => HttpResponse::Ok().json(SessionAttendanceResponse { success: true, records }),
        Err(e) => {
            tracing::error!(session_id = %session_id, error = %e, "failed to load session attendance");
            HttpResponse::InternalServerError().json(error_response(e.to_string()))
        }
    }
}

// Health check endpoint
async fn health_check() -> HttpResponse {
    HttpResponse::Ok().body("Auto-attendance service is running!")
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .route("/api/auto-attendance", web::get().to(auto_attendance))
        .route("/api/attendance", web::post().to(record_attendance))
        .route("/api/sessions/{id}/attendance", web::get().to(session_attendance));
}
