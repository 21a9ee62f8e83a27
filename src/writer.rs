use crate::error::PersistenceError;
use crate::models::{Decision, UpsertOutcome};
use crate::store::AttendanceStore;

#[derive(Debug, Default)]
pub struct WriteReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub protected: usize,
    pub failures: Vec<PersistenceError>,
}

impl WriteReport {
    pub fn written(&self) -> usize {
        self.created + self.updated
    }

    fn count(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Created => self.created += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Unchanged => self.unchanged += 1,
            UpsertOutcome::Protected => self.protected += 1,
        }
    }
}

/// Upserts every decision. A failed record is reported and the rest of the
/// batch still goes through.
pub async fn write_decisions(store: &dyn AttendanceStore, decisions: &[Decision]) -> WriteReport {
    let mut report = WriteReport::default();
    for decision in decisions {
        match store.upsert_automatic(decision).await {
            Ok(outcome) => report.count(outcome),
            Err(source) => {
                let failure = PersistenceError {
                    session_id: decision.session_id.clone(),
                    student_id: decision.student_id.clone(),
                    source,
                };
                tracing::warn!(error = %failure, "attendance write failed");
                report.failures.push(failure);
            }
        }
    }
    report
}
