use chrono::{DateTime, Utc};
use csv::Reader;
use serde::Deserialize;
use std::io::Read;
use std::path::Path;

use crate::database::Database;
use crate::error::SeedError;
use crate::models::Session;

#[derive(Debug, Deserialize)]
struct SessionRow {
    id: String,
    subject_id: String,
    classroom_id: String,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    #[serde(default)]
    attendees: String,
}

/// Reads a session roster. Header:
/// `id,subject_id,classroom_id,starts_at,ends_at,attendees`, times in
/// RFC 3339, attendees separated by `;`.
pub fn read_sessions<R: Read>(input: R) -> Result<Vec<Session>, SeedError> {
    let mut rdr = Reader::from_reader(input);
    let mut sessions = Vec::new();

    for (index, result) in rdr.deserialize::<SessionRow>().enumerate() {
        let row = result?;
        // +2: one for the header, one because rows are 1-based
        let line = index + 2;
        if row.id.trim().is_empty() {
            return Err(SeedError::Row {
                row: line,
                reason: "empty session id".to_string(),
            });
        }
        if row.ends_at < row.starts_at {
            return Err(SeedError::Row {
                row: line,
                reason: format!("session {} ends before it starts", row.id),
            });
        }

        let attendees = row
            .attendees
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        sessions.push(Session {
            id: row.id.trim().to_string(),
            subject_id: row.subject_id,
            classroom_id: row.classroom_id,
            starts_at: row.starts_at,
            ends_at: row.ends_at,
            attendees,
        });
    }

    Ok(sessions)
}

pub fn load_sessions(path: &Path) -> Result<Vec<Session>, SeedError> {
    let file = std::fs::File::open(path).map_err(csv::Error::from)?;
    read_sessions(file)
}

/// Imports the roster at `path`. Returns how many sessions were new.
pub async fn seed_database(db: &Database, path: &Path) -> Result<usize, SeedError> {
    let sessions = load_sessions(path)?;
    let mut inserted = 0;
    for session in &sessions {
        if db.insert_session(session).await? {
            inserted += 1;
        }
    }
    tracing::info!(path = %path.display(), total = sessions.len(), inserted, "seeded sessions");
    Ok(inserted)
}
