use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;
use crate::ids::EventId;
use crate::validate;

/// A capacity-limited, time-bound event as read from the store.
///
/// `registered` is derived from the registration ledger at read time and is
/// never written back.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub max_participants: u32,
    pub end_date: NaiveDate,
    pub event_time: NaiveTime,
    pub info: String,
    pub created_at: NaiveDateTime,
    pub registered: u32,
}

impl Event {
    /// The instant the event starts.
    pub fn starts_at(&self) -> NaiveDateTime {
        self.end_date.and_time(self.event_time)
    }

    pub fn available(&self) -> u32 {
        self.max_participants.saturating_sub(self.registered)
    }

    pub fn is_full(&self) -> bool {
        self.registered >= self.max_participants
    }
}

/// Input for creating an event. Validated by the store on insert.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewEvent {
    pub max_participants: u32,
    pub end_date: NaiveDate,
    pub event_time: NaiveTime,
    pub info: String,
}

impl NewEvent {
    pub fn starts_at(&self) -> NaiveDateTime {
        self.end_date.and_time(self.event_time)
    }
}

/// The fixed set of fields an organizer may edit.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditableField {
    MaxParticipants,
    EndDate,
    EventTime,
    Info,
}

impl EditableField {
    pub const ALL: [EditableField; 4] = [
        Self::MaxParticipants,
        Self::EndDate,
        Self::EventTime,
        Self::Info,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MaxParticipants => "max_participants",
            Self::EndDate => "end_date",
            Self::EventTime => "event_time",
            Self::Info => "info",
        }
    }

    /// Whether changing this field moves the event's start.
    pub fn affects_schedule(self) -> bool {
        matches!(self, Self::EndDate | Self::EventTime)
    }
}

impl std::fmt::Display for EditableField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EditableField {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "max_participants" => Ok(Self::MaxParticipants),
            "end_date" => Ok(Self::EndDate),
            "event_time" => Ok(Self::EventTime),
            "info" => Ok(Self::Info),
            other => Err(ValidationError::UnknownField(other.to_string())),
        }
    }
}

/// A parsed new value for one editable field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldValue {
    MaxParticipants(u32),
    EndDate(NaiveDate),
    EventTime(NaiveTime),
    Info(String),
}

impl FieldValue {
    /// Parse raw actor input for `field`. Only format and range checks that
    /// need no stored state happen here.
    pub fn parse(field: EditableField, raw: &str) -> Result<Self, ValidationError> {
        match field {
            EditableField::MaxParticipants => {
                validate::parse_capacity(raw).map(Self::MaxParticipants)
            }
            EditableField::EndDate => validate::parse_date(raw).map(Self::EndDate),
            EditableField::EventTime => validate::parse_time(raw).map(Self::EventTime),
            EditableField::Info => {
                let info = raw.trim().to_string();
                validate::check_info(&info)?;
                Ok(Self::Info(info))
            }
        }
    }

    pub fn field(&self) -> EditableField {
        match self {
            Self::MaxParticipants(_) => EditableField::MaxParticipants,
            Self::EndDate(_) => EditableField::EndDate,
            Self::EventTime(_) => EditableField::EventTime,
            Self::Info(_) => EditableField::Info,
        }
    }
}
