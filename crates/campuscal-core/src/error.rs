//! Error types for the pure calendar core.

use thiserror::Error;

/// Misuse of the calendar generators. Callers are expected to never
/// produce these; they signal an internal bug, not bad user data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CalendarError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Why a stored entry could not be turned into an event record.
///
/// These never escape a render pass: the offending entry is logged and
/// skipped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("unparsable date `{value}` in `{field}`")]
    BadDate { field: &'static str, value: String },

    #[error("unparsable weekday number `{0}`")]
    BadWeekday(String),

    /// A weekly class whose `thu` number disagrees with its `daystart`.
    /// The class is dropped at ingestion instead of being shown on the
    /// stated weekday, so it never lands in a cell of the wrong week day.
    #[error("weekday number {weekday} contradicts date {date}")]
    WeekdayMismatch { weekday: u32, date: String },
}

pub type CalendarResult<T> = Result<T, CalendarError>;
