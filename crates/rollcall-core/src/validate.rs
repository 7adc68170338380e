//! Input parsing and range checks shared by the store and the workflows.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::errors::ValidationError;

/// Maximum event description length, in characters.
pub const MAX_INFO_CHARS: usize = 500;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M";

pub fn parse_capacity(raw: &str) -> Result<u32, ValidationError> {
    let trimmed = raw.trim();
    match trimmed.parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ValidationError::NotAPositiveInteger(trimmed.to_string())),
    }
}

pub fn check_capacity(n: u32) -> Result<u32, ValidationError> {
    if n == 0 {
        return Err(ValidationError::NotAPositiveInteger(n.to_string()));
    }
    Ok(n)
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, ValidationError> {
    let trimmed = raw.trim();
    NaiveDate::parse_from_str(trimmed, DATE_FORMAT)
        .map_err(|_| ValidationError::MalformedDate(trimmed.to_string()))
}

pub fn parse_time(raw: &str) -> Result<NaiveTime, ValidationError> {
    let trimmed = raw.trim();
    NaiveTime::parse_from_str(trimmed, TIME_FORMAT)
        .map_err(|_| ValidationError::MalformedTime(trimmed.to_string()))
}

pub fn check_info(info: &str) -> Result<(), ValidationError> {
    let len = info.chars().count();
    if len > MAX_INFO_CHARS {
        return Err(ValidationError::InfoTooLong {
            len,
            max: MAX_INFO_CHARS,
        });
    }
    Ok(())
}

/// A date is acceptable if it is today or later.
pub fn check_date_not_past(date: NaiveDate, now: NaiveDateTime) -> Result<(), ValidationError> {
    if date < now.date() {
        return Err(ValidationError::DateInPast(date));
    }
    Ok(())
}

/// The combined start must not already have passed.
pub fn check_start_not_past(
    date: NaiveDate,
    time: NaiveTime,
    now: NaiveDateTime,
) -> Result<NaiveDateTime, ValidationError> {
    let start = date.and_time(time);
    if start < now {
        return Err(ValidationError::StartInPast(start));
    }
    Ok(start)
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn format_time(time: NaiveTime) -> String {
    time.format(TIME_FORMAT).to_string()
}
