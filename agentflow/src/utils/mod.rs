//! Utility types for time handling and identifiers.

mod clock;

pub use clock::{elapsed_between, system_clock, Clock, ManualClock, SystemClock, Timestamp};

/// Generates a time-ordered run identifier.
#[must_use]
pub fn generate_run_id() -> uuid::Uuid {
    uuid::Uuid::now_v7()
}

/// Returns the current UTC time as an RFC 3339 string.
#[must_use]
pub fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, false)
}
