//! Automatic attendance for elapsed class sessions.
//!
//! A run reads the sessions that have ended and still lack final attendance,
//! marks every attendee without a record as absent, and upserts the result.
//! Manual records always win. Runs are safe to repeat: a second run over the
//! same data writes nothing.

pub mod api;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod data;
pub mod database;
pub mod error;
pub mod memory;
pub mod models;
pub mod orchestrator;
pub mod rules;
pub mod store;
pub mod writer;

pub use api::AppState;
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::Config;
pub use database::Database;
pub use memory::MemoryStore;
pub use models::{AttendanceRecord, AttendanceStatus, CheckResult, DecisionSource, Session};
pub use orchestrator::{AutoAttendance, CheckOptions};
