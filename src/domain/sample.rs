use chrono::{DateTime, NaiveDate, Utc};

use super::sequence::Sequence;
use crate::utils::CommandError;

/// Format of the timestamp part of a sample id.
pub const SAMPLE_ID_TIME_FORMAT: &str = "%Y%m%d%H%M%S%3f";

/// A sequence captured for a patient at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub id: String,
    pub subject_id: String,
    pub sequence: Sequence,
    pub captured_at: DateTime<Utc>,
}

impl Sample {
    /// Builds a sample with its derived id.
    pub fn new(subject_id: impl Into<String>, sequence: Sequence, captured_at: DateTime<Utc>) -> Self {
        let subject_id = subject_id.into();
        Self {
            id: sample_id(&subject_id, &captured_at),
            subject_id,
            sequence,
            captured_at,
        }
    }
}

pub fn sample_id(subject_id: &str, captured_at: &DateTime<Utc>) -> String {
    format!("{}_{}", subject_id, captured_at.format(SAMPLE_ID_TIME_FORMAT))
}

/// Parses a capture date given as RFC 3339 or as a plain `YYYY-MM-DD` day.
pub fn parse_capture_date(raw: &str) -> Result<DateTime<Utc>, CommandError> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|day| day.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| CommandError::Validation(format!("Fecha invalida: {}", raw)))
}
