use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};

/// Malformed or out-of-range input. Always recoverable: the actor is told
/// what was wrong and may try again from the same step.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("expected a positive whole number, got {0:?}")]
    NotAPositiveInteger(String),
    #[error("expected a date as YYYY-MM-DD, got {0:?}")]
    MalformedDate(String),
    #[error("expected a time as HH:MM, got {0:?}")]
    MalformedTime(String),
    #[error("date {0} is in the past")]
    DateInPast(NaiveDate),
    #[error("start {0} is in the past")]
    StartInPast(NaiveDateTime),
    #[error("description is {len} characters, the limit is {max}")]
    InfoTooLong { len: usize, max: usize },
    #[error("cannot lower capacity to {requested}: {registered} participants already registered")]
    CapacityBelowRegistered { requested: u32, registered: u32 },
    #[error("unknown field {0:?}")]
    UnknownField(String),
}

impl ValidationError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::NotAPositiveInteger(_) => "not_a_positive_integer",
            Self::MalformedDate(_) => "malformed_date",
            Self::MalformedTime(_) => "malformed_time",
            Self::DateInPast(_) => "date_in_past",
            Self::StartInPast(_) => "start_in_past",
            Self::InfoTooLong { .. } => "info_too_long",
            Self::CapacityBelowRegistered { .. } => "capacity_below_registered",
            Self::UnknownField(_) => "unknown_field",
        }
    }
}

/// A single message could not be delivered to one recipient.
/// Never escalated past the component doing the fan-out.
#[derive(Clone, Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("recipient rejected the message: {0}")]
    Rejected(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),
}

impl DeliveryError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Rejected(_) => "rejected",
            Self::Transport(_) => "transport",
            Self::Timeout(_) => "timeout",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_message_names_both_numbers() {
        let err = ValidationError::CapacityBelowRegistered {
            requested: 2,
            registered: 5,
        };
        let msg = err.to_string();
        assert!(msg.contains('2') && msg.contains('5'), "got: {msg}");
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(
            ValidationError::MalformedTime("25:00".into()).error_kind(),
            "malformed_time"
        );
        assert_eq!(
            DeliveryError::Timeout(Duration::from_secs(1)).error_kind(),
            "timeout"
        );
    }

    #[test]
    fn info_too_long_display() {
        let err = ValidationError::InfoTooLong { len: 501, max: 500 };
        assert_eq!(
            err.to_string(),
            "description is 501 characters, the limit is 500"
        );
    }
}
