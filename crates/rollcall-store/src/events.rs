use std::sync::Arc;

use chrono::{Duration, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, instrument};

use rollcall_core::validate::{self, format_date, format_time};
use rollcall_core::{Clock, Event, EventId, FieldValue, NewEvent, ValidationError};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

const EVENT_SELECT: &str = "SELECT e.id, e.max_participants, e.end_date, e.event_time,
        e.info, e.created_at,
        (SELECT COUNT(*) FROM registrations r WHERE r.event_id = e.id) AS registered
 FROM events e";

/// Durable table of events. Owns the capacity invariant together with
/// [`crate::RegistrationLedger`].
#[derive(Clone)]
pub struct EventRepo {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl EventRepo {
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Create a new event and return its freshly assigned id.
    #[instrument(skip(self, new), fields(max_participants = new.max_participants))]
    pub fn create(&self, new: &NewEvent) -> Result<EventId, StoreError> {
        let now = self.clock.now();
        validate::check_capacity(new.max_participants)?;
        validate::check_info(&new.info)?;
        validate::check_date_not_past(new.end_date, now)?;
        validate::check_start_not_past(new.end_date, new.event_time, now)?;

        let id = self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO events (max_participants, end_date, event_time, info, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    new.max_participants,
                    format_date(new.end_date),
                    format_time(new.event_time),
                    new.info,
                    row_helpers::format_timestamp(now),
                ],
            )?;
            Ok(EventId::new(conn.last_insert_rowid()))
        })?;

        info!(event_id = %id, starts_at = %new.starts_at(), "event created");
        Ok(id)
    }

    /// Get an event by ID.
    #[instrument(skip(self), fields(event_id = %id))]
    pub fn get(&self, id: EventId) -> Result<Event, StoreError> {
        self.db
            .with_conn(|conn| fetch(conn, id))?
            .ok_or_else(|| not_found(id))
    }

    /// Apply one field edit. Validation that depends on stored state (the
    /// registered count, the other half of the start datetime) happens in
    /// the same transaction as the write.
    #[instrument(skip(self, value), fields(event_id = %id, field = %value.field()))]
    pub fn update_field(&self, id: EventId, value: &FieldValue) -> Result<Event, StoreError> {
        let now = self.clock.now();
        self.db.with_tx(|conn| {
            let current = fetch(conn, id)?.ok_or_else(|| not_found(id))?;

            match value {
                FieldValue::MaxParticipants(n) => {
                    validate::check_capacity(*n)?;
                    let changed = conn.execute(
                        "UPDATE events SET max_participants = ?1
                         WHERE id = ?2
                           AND (SELECT COUNT(*) FROM registrations WHERE event_id = ?2) <= ?1",
                        params![n, id.get()],
                    )?;
                    if changed == 0 {
                        return Err(ValidationError::CapacityBelowRegistered {
                            requested: *n,
                            registered: current.registered,
                        }
                        .into());
                    }
                }
                FieldValue::EndDate(date) => {
                    validate::check_date_not_past(*date, now)?;
                    validate::check_start_not_past(*date, current.event_time, now)?;
                    conn.execute(
                        "UPDATE events SET end_date = ?1 WHERE id = ?2",
                        params![format_date(*date), id.get()],
                    )?;
                }
                FieldValue::EventTime(time) => {
                    validate::check_start_not_past(current.end_date, *time, now)?;
                    conn.execute(
                        "UPDATE events SET event_time = ?1 WHERE id = ?2",
                        params![format_time(*time), id.get()],
                    )?;
                }
                FieldValue::Info(info) => {
                    validate::check_info(info)?;
                    conn.execute(
                        "UPDATE events SET info = ?1 WHERE id = ?2",
                        params![info, id.get()],
                    )?;
                }
            }

            fetch(conn, id)?.ok_or_else(|| not_found(id))
        })
    }

    /// Delete an event and all of its registrations. Deleting an id that
    /// does not exist succeeds; the return value says whether a row was removed.
    #[instrument(skip(self), fields(event_id = %id))]
    pub fn delete(&self, id: EventId) -> Result<bool, StoreError> {
        let removed = self.db.with_tx(|conn| {
            let registrations =
                conn.execute("DELETE FROM registrations WHERE event_id = ?1", [id.get()])?;
            let events = conn.execute("DELETE FROM events WHERE id = ?1", [id.get()])?;
            Ok((events > 0, registrations))
        })?;

        if removed.0 {
            info!(event_id = %id, registrations = removed.1, "event deleted");
        }
        Ok(removed.0)
    }

    /// Events whose start is no older than `grace`, soonest first.
    #[instrument(skip(self))]
    pub fn list_active(&self, grace: Duration) -> Result<Vec<Event>, StoreError> {
        let cutoff = row_helpers::start_key(cutoff_before(self.clock.now(), grace));
        self.query(
            &format!(
                "{EVENT_SELECT} WHERE (e.end_date || ' ' || e.event_time) >= ?1
                 ORDER BY e.end_date ASC, e.event_time ASC, e.id ASC"
            ),
            params![cutoff],
        )
    }

    /// Every stored event, soonest first.
    #[instrument(skip(self))]
    pub fn list_all(&self) -> Result<Vec<Event>, StoreError> {
        self.query(
            &format!("{EVENT_SELECT} ORDER BY e.end_date ASC, e.event_time ASC, e.id ASC"),
            params![],
        )
    }

    /// Events that started more than `older_than` ago, most recent first.
    #[instrument(skip(self))]
    pub fn list_past(&self, older_than: Duration) -> Result<Vec<Event>, StoreError> {
        let cutoff = row_helpers::start_key(cutoff_before(self.clock.now(), older_than));
        self.query(
            &format!(
                "{EVENT_SELECT} WHERE (e.end_date || ' ' || e.event_time) <= ?1
                 ORDER BY e.end_date DESC, e.event_time DESC, e.id DESC"
            ),
            params![cutoff],
        )
    }

    fn query(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::types::ToSql],
    ) -> Result<Vec<Event>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let mut rows = stmt.query(params)?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_event(row)?);
            }
            Ok(results)
        })
    }
}

pub(crate) fn fetch(conn: &Connection, id: EventId) -> Result<Option<Event>, StoreError> {
    let mut stmt = conn.prepare(&format!("{EVENT_SELECT} WHERE e.id = ?1"))?;
    let mut rows = stmt.query([id.get()])?;
    match rows.next()? {
        Some(row) => row_to_event(row).map(Some),
        None => Ok(None),
    }
}

pub(crate) fn exists(conn: &Connection, id: EventId) -> Result<bool, StoreError> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM events WHERE id = ?1", [id.get()], |row| row.get(0))
        .optional()?;
    Ok(found.is_some())
}

pub(crate) fn not_found(id: EventId) -> StoreError {
    StoreError::NotFound(format!("event {id}"))
}

pub(crate) fn row_to_event(row: &rusqlite::Row<'_>) -> Result<Event, StoreError> {
    let end_date: String = row_helpers::get(row, 2, "events", "end_date")?;
    let event_time: String = row_helpers::get(row, 3, "events", "event_time")?;
    let created_at: String = row_helpers::get(row, 5, "events", "created_at")?;

    Ok(Event {
        id: EventId::new(row_helpers::get(row, 0, "events", "id")?),
        max_participants: row_helpers::get_u32(row, 1, "events", "max_participants")?,
        end_date: row_helpers::parse_date(&end_date, "events", "end_date")?,
        event_time: row_helpers::parse_time(&event_time, "events", "event_time")?,
        info: row_helpers::get(row, 4, "events", "info")?,
        created_at: row_helpers::parse_timestamp(&created_at, "events", "created_at")?,
        registered: row_helpers::get_u32(row, 6, "events", "registered")?,
    })
}

/// `now - span`, clamped instead of overflowing for huge spans.
pub(crate) fn cutoff_before(now: NaiveDateTime, span: Duration) -> NaiveDateTime {
    now.checked_sub_signed(span).unwrap_or(NaiveDateTime::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registrations::{RegisterOutcome, RegistrationLedger};
    use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
    use rollcall_core::{ActorId, ManualClock};

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 16)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn setup() -> (Database, Arc<ManualClock>, EventRepo) {
        let db = Database::in_memory().unwrap();
        let clock = Arc::new(ManualClock::new(now()));
        let repo = EventRepo::new(db.clone(), clock.clone());
        (db, clock, repo)
    }

    fn new_event(days_ahead: i64, time: &str, max: u32) -> NewEvent {
        NewEvent {
            max_participants: max,
            end_date: now().date() + Duration::days(days_ahead),
            event_time: NaiveTime::parse_from_str(time, "%H:%M").unwrap(),
            info: "Evening run".into(),
        }
    }

    #[test]
    fn create_and_get() {
        let (_, _, repo) = setup();
        let id = repo.create(&new_event(1, "18:00", 2)).unwrap();
        let event = repo.get(id).unwrap();
        assert_eq!(event.max_participants, 2);
        assert_eq!(event.registered, 0);
        assert_eq!(event.info, "Evening run");
        assert_eq!(event.created_at, now());
        let tomorrow = now().date().succ_opt().unwrap();
        assert_eq!(event.starts_at(), tomorrow.and_hms_opt(18, 0, 0).unwrap());
    }

    #[test]
    fn ids_increase_and_are_not_reused() {
        let (_, _, repo) = setup();
        let a = repo.create(&new_event(1, "10:00", 1)).unwrap();
        let b = repo.create(&new_event(1, "11:00", 1)).unwrap();
        assert!(b > a);
        repo.delete(b).unwrap();
        let c = repo.create(&new_event(1, "12:00", 1)).unwrap();
        assert!(c > b);
    }

    #[test]
    fn create_rejects_invalid_input() {
        let (_, _, repo) = setup();

        let zero = new_event(1, "18:00", 0);
        assert!(matches!(
            repo.create(&zero),
            Err(StoreError::Validation(ValidationError::NotAPositiveInteger(_)))
        ));

        let past = new_event(-1, "18:00", 2);
        assert!(matches!(
            repo.create(&past),
            Err(StoreError::Validation(ValidationError::DateInPast(_)))
        ));

        let earlier_today = new_event(0, "09:00", 2);
        assert!(matches!(
            repo.create(&earlier_today),
            Err(StoreError::Validation(ValidationError::StartInPast(_)))
        ));

        let mut long = new_event(1, "18:00", 2);
        long.info = "x".repeat(501);
        assert!(matches!(
            repo.create(&long),
            Err(StoreError::Validation(ValidationError::InfoTooLong { .. }))
        ));

        assert!(repo.list_all().unwrap().is_empty());
    }

    #[test]
    fn get_nonexistent_fails() {
        let (_, _, repo) = setup();
        assert!(matches!(repo.get(EventId::new(99)), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn update_each_field() {
        let (_, _, repo) = setup();
        let id = repo.create(&new_event(1, "18:00", 2)).unwrap();

        let e = repo.update_field(id, &FieldValue::MaxParticipants(5)).unwrap();
        assert_eq!(e.max_participants, 5);

        let new_date = now().date() + Duration::days(3);
        let e = repo.update_field(id, &FieldValue::EndDate(new_date)).unwrap();
        assert_eq!(e.end_date, new_date);

        let new_time = NaiveTime::from_hms_opt(7, 30, 0).unwrap();
        let e = repo.update_field(id, &FieldValue::EventTime(new_time)).unwrap();
        assert_eq!(e.event_time, new_time);

        let e = repo.update_field(id, &FieldValue::Info("Morning run".into())).unwrap();
        assert_eq!(e.info, "Morning run");
    }

    #[test]
    fn update_rejects_past_datetimes() {
        let (_, _, repo) = setup();
        let id = repo.create(&new_event(0, "18:00", 2)).unwrap();

        let yesterday = now().date().pred_opt().unwrap();
        assert!(matches!(
            repo.update_field(id, &FieldValue::EndDate(yesterday)),
            Err(StoreError::Validation(ValidationError::DateInPast(_)))
        ));

        let morning = NaiveTime::from_hms_opt(8, 0, 0).unwrap();
        assert!(matches!(
            repo.update_field(id, &FieldValue::EventTime(morning)),
            Err(StoreError::Validation(ValidationError::StartInPast(_)))
        ));

        let event = repo.get(id).unwrap();
        assert_eq!(event.end_date, now().date());
        assert_eq!(event.event_time, NaiveTime::from_hms_opt(18, 0, 0).unwrap());
    }

    #[test]
    fn capacity_cannot_drop_below_registered() {
        let (db, clock, repo) = setup();
        let ledger = RegistrationLedger::new(db, clock);
        let id = repo.create(&new_event(1, "18:00", 3)).unwrap();
        for n in 1..=3 {
            let outcome = ledger.register(ActorId::new(n), &format!("user{n}"), id).unwrap();
            assert_eq!(outcome, RegisterOutcome::Admitted);
        }

        let err = repo.update_field(id, &FieldValue::MaxParticipants(2)).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Validation(ValidationError::CapacityBelowRegistered {
                requested: 2,
                registered: 3
            })
        ));
        let event = repo.get(id).unwrap();
        assert_eq!(event.max_participants, 3);
        assert_eq!(event.registered, 3);

        // Equal to the registered count is allowed.
        assert_eq!(
            repo.update_field(id, &FieldValue::MaxParticipants(3)).unwrap().max_participants,
            3
        );
    }

    #[test]
    fn update_missing_event_is_not_found() {
        let (_, _, repo) = setup();
        assert!(matches!(
            repo.update_field(EventId::new(7), &FieldValue::Info("x".into())),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn delete_cascades_and_is_idempotent() {
        let (db, clock, repo) = setup();
        let ledger = RegistrationLedger::new(db, clock);
        let id = repo.create(&new_event(1, "18:00", 3)).unwrap();
        ledger.register(ActorId::new(1), "ann", id).unwrap();
        ledger.register(ActorId::new(2), "bob", id).unwrap();

        assert!(repo.delete(id).unwrap());
        assert!(ledger.participants_of(id).unwrap().is_empty());
        assert!(matches!(repo.get(id), Err(StoreError::NotFound(_))));

        assert!(!repo.delete(id).unwrap());
        assert!(!repo.delete(EventId::new(12345)).unwrap());
    }

    #[test]
    fn list_active_orders_by_start_and_honors_grace() {
        let (_, clock, repo) = setup();
        let later = repo.create(&new_event(2, "09:00", 1)).unwrap();
        let sooner = repo.create(&new_event(0, "14:00", 1)).unwrap();
        let soonest = repo.create(&new_event(0, "13:00", 1)).unwrap();

        let active_ids = || -> Vec<EventId> {
            repo.list_active(Duration::hours(6)).unwrap().iter().map(|e| e.id).collect()
        };
        assert_eq!(active_ids(), vec![soonest, sooner, later]);

        // 17:00: both same-day events started, but within a 6h grace.
        clock.advance(Duration::hours(5));
        assert_eq!(repo.list_active(Duration::hours(6)).unwrap().len(), 3);

        // 20:30: the 14:00 event is 6.5h old and the 13:00 event 7.5h old.
        clock.advance(Duration::minutes(210));
        assert_eq!(active_ids(), vec![later]);
    }

    #[test]
    fn huge_windows_clamp_instead_of_overflowing() {
        let (_, _, repo) = setup();
        repo.create(&new_event(1, "09:00", 1)).unwrap();
        let span = Duration::try_days(1_000_000_000).unwrap();

        assert_eq!(repo.list_active(span).unwrap().len(), 1);
        assert!(repo.list_past(span).unwrap().is_empty());
    }

    #[test]
    fn list_past_newest_first() {
        let (_, clock, repo) = setup();
        let first = repo.create(&new_event(0, "13:00", 1)).unwrap();
        let second = repo.create(&new_event(0, "15:00", 1)).unwrap();
        let future = repo.create(&new_event(3, "15:00", 1)).unwrap();

        clock.advance(Duration::days(1));
        let ids: Vec<_> = repo
            .list_past(Duration::hours(6))
            .unwrap()
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![second, first]);
        assert!(!ids.contains(&future));
    }

    #[test]
    fn corrupt_date_surfaces_as_corrupt_row() {
        let (db, _, repo) = setup();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO events (max_participants, end_date, event_time, info, created_at)
                 VALUES (1, 'tomorrow', '18:00', '', '2026-10-16 10:00:00')",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        assert!(matches!(
            repo.list_all(),
            Err(StoreError::CorruptRow { table: "events", column: "end_date", .. })
        ));
    }
}
