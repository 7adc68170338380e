use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rollcall_core::validate::{DATE_FORMAT, TIME_FORMAT};

use crate::error::StoreError;
use crate::schema::TIMESTAMP_FORMAT;

/// Get a required column value from a row, returning CorruptRow on failure.
pub fn get<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Get a non-negative integer column as `u32`.
pub fn get_u32(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<u32, StoreError> {
    let raw: i64 = get(row, idx, table, column)?;
    u32::try_from(raw).map_err(|_| StoreError::CorruptRow {
        table,
        column,
        detail: format!("out of range: {raw}"),
    })
}

pub fn parse_date(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: format!("invalid date {raw:?}: {e}"),
    })
}

pub fn parse_time(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<NaiveTime, StoreError> {
    NaiveTime::parse_from_str(raw, TIME_FORMAT).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: format!("invalid time {raw:?}: {e}"),
    })
}

pub fn parse_timestamp(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<NaiveDateTime, StoreError> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: format!("invalid timestamp {raw:?}: {e}"),
    })
}

pub fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Sortable `YYYY-MM-DD HH:MM` key, comparable against
/// `end_date || ' ' || event_time` in SQL.
pub fn start_key(ts: NaiveDateTime) -> String {
    ts.format("%Y-%m-%d %H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_date_failure_is_corrupt_row() {
        let result = parse_date("17/10/2026", "events", "end_date");
        assert!(matches!(
            result,
            Err(StoreError::CorruptRow { table: "events", column: "end_date", .. })
        ));
    }

    #[test]
    fn timestamp_roundtrip() {
        let ts = NaiveDate::from_ymd_opt(2026, 10, 16)
            .unwrap()
            .and_hms_opt(8, 5, 9)
            .unwrap();
        let raw = format_timestamp(ts);
        assert_eq!(raw, "2026-10-16 08:05:09");
        assert_eq!(parse_timestamp(&raw, "events", "created_at").unwrap(), ts);
    }

    #[test]
    fn start_key_drops_seconds() {
        let ts = NaiveDate::from_ymd_opt(2026, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 59)
            .unwrap();
        assert_eq!(start_key(ts), "2026-01-02 03:04");
    }

    #[test]
    fn parse_time_rejects_seconds_layout() {
        assert!(parse_time("18:00:00", "events", "event_time").is_err());
    }
}
