use std::sync::Arc;

use chrono::{Duration, NaiveDateTime};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use rollcall_core::{ActorId, Clock, Event, EventId};

use crate::database::Database;
use crate::error::StoreError;
use crate::events;
use crate::row_helpers;

const TABLE: &str = "registrations";

/// Result of a registration attempt. These are expected outcomes, not errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterOutcome {
    Admitted,
    AlreadyRegistered,
    Full,
}

/// A participant holding a slot, in registration order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ActorId,
    pub name: String,
    pub registered_at: NaiveDateTime,
}

/// Durable set of (participant, event) pairs.
#[derive(Clone)]
pub struct RegistrationLedger {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl RegistrationLedger {
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Claim one slot of `event_id` for `participant`.
    ///
    /// The capacity predicate and the insert are a single statement: the row
    /// is only selected for insertion while the committed count is below
    /// `max_participants`, and the primary key rejects a second row for the
    /// same pair. When nothing was inserted, the same transaction works out
    /// which of the outcomes applies.
    #[instrument(skip(self, name), fields(actor_id = %participant, event_id = %event_id))]
    pub fn register(
        &self,
        participant: ActorId,
        name: &str,
        event_id: EventId,
    ) -> Result<RegisterOutcome, StoreError> {
        let now = row_helpers::format_timestamp(self.clock.now());
        let outcome = self.db.with_tx(|conn| {
            let inserted = conn.execute(
                "INSERT INTO registrations (user_id, event_id, username, registered_at)
                 SELECT ?1, e.id, ?3, ?4 FROM events e
                 WHERE e.id = ?2
                   AND (SELECT COUNT(*) FROM registrations r WHERE r.event_id = e.id)
                       < e.max_participants",
                params![participant.get(), event_id.get(), name, now],
            );

            match inserted {
                Ok(1) => Ok(RegisterOutcome::Admitted),
                Ok(_) => diagnose_rejection(conn, participant, event_id),
                Err(e) if e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) => {
                    Ok(RegisterOutcome::AlreadyRegistered)
                }
                Err(e) => Err(e.into()),
            }
        })?;

        match outcome {
            RegisterOutcome::Admitted => {
                info!(actor_id = %participant, event_id = %event_id, "participant admitted")
            }
            other => {
                debug!(
                    actor_id = %participant,
                    event_id = %event_id,
                    outcome = ?other,
                    "registration refused"
                )
            }
        }
        Ok(outcome)
    }

    /// Release a slot. Returns whether a registration existed.
    #[instrument(skip(self), fields(actor_id = %participant, event_id = %event_id))]
    pub fn unregister(&self, participant: ActorId, event_id: EventId) -> Result<bool, StoreError> {
        let removed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM registrations WHERE user_id = ?1 AND event_id = ?2",
                params![participant.get(), event_id.get()],
            )?)
        })?;
        if removed > 0 {
            info!(actor_id = %participant, event_id = %event_id, "participant unregistered");
        }
        Ok(removed > 0)
    }

    /// Whether `participant` currently holds a slot of `event_id`.
    #[instrument(skip(self), fields(actor_id = %participant, event_id = %event_id))]
    pub fn is_registered(
        &self,
        participant: ActorId,
        event_id: EventId,
    ) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| holds_slot(conn, participant, event_id))
    }

    /// Participants of an event in registration order.
    #[instrument(skip(self), fields(event_id = %event_id))]
    pub fn participants_of(&self, event_id: EventId) -> Result<Vec<Participant>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, username, registered_at FROM registrations
                 WHERE event_id = ?1
                 ORDER BY registered_at ASC, rowid ASC",
            )?;
            let mut rows = stmt.query([event_id.get()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                let registered_at: String = row_helpers::get(row, 2, TABLE, "registered_at")?;
                results.push(Participant {
                    id: ActorId::new(row_helpers::get(row, 0, TABLE, "user_id")?),
                    name: row_helpers::get(row, 1, TABLE, "username")?,
                    registered_at: row_helpers::parse_timestamp(
                        &registered_at,
                        TABLE,
                        "registered_at",
                    )?,
                });
            }
            Ok(results)
        })
    }

    /// Active events (start no older than `grace`) the participant holds a
    /// slot for, soonest first.
    #[instrument(skip(self), fields(actor_id = %participant))]
    pub fn events_of(
        &self,
        participant: ActorId,
        grace: Duration,
    ) -> Result<Vec<Event>, StoreError> {
        let cutoff = row_helpers::start_key(events::cutoff_before(self.clock.now(), grace));
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT e.id, e.max_participants, e.end_date, e.event_time, e.info, e.created_at,
                        (SELECT COUNT(*) FROM registrations c WHERE c.event_id = e.id) AS registered
                 FROM events e
                 JOIN registrations r ON r.event_id = e.id
                 WHERE r.user_id = ?1 AND (e.end_date || ' ' || e.event_time) >= ?2
                 ORDER BY e.end_date ASC, e.event_time ASC, e.id ASC",
            )?;
            let mut rows = stmt.query(params![participant.get(), cutoff])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(events::row_to_event(row)?);
            }
            Ok(results)
        })
    }
}

fn holds_slot(
    conn: &Connection,
    participant: ActorId,
    event_id: EventId,
) -> Result<bool, StoreError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM registrations WHERE user_id = ?1 AND event_id = ?2",
            params![participant.get(), event_id.get()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Nothing was inserted: the participant already holds a slot (checked
/// first, so a full event still reports the participant's own slot), the
/// event is full, or it does not exist.
fn diagnose_rejection(
    conn: &Connection,
    participant: ActorId,
    event_id: EventId,
) -> Result<RegisterOutcome, StoreError> {
    if holds_slot(conn, participant, event_id)? {
        return Ok(RegisterOutcome::AlreadyRegistered);
    }
    if events::exists(conn, event_id)? {
        return Ok(RegisterOutcome::Full);
    }
    Err(events::not_found(event_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventRepo;
    use chrono::{NaiveDate, NaiveTime};
    use rollcall_core::{ManualClock, NewEvent};

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 16)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn setup() -> (Arc<ManualClock>, EventRepo, RegistrationLedger) {
        let db = Database::in_memory().unwrap();
        let clock = Arc::new(ManualClock::new(now()));
        (
            clock.clone(),
            EventRepo::new(db.clone(), clock.clone()),
            RegistrationLedger::new(db, clock),
        )
    }

    fn event(repo: &EventRepo, max: u32, days_ahead: i64) -> EventId {
        repo.create(&NewEvent {
            max_participants: max,
            end_date: now().date() + Duration::days(days_ahead),
            event_time: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            info: String::new(),
        })
        .unwrap()
    }

    #[test]
    fn admits_until_full() {
        let (_, repo, ledger) = setup();
        let id = event(&repo, 2, 1);
        assert_eq!(ledger.register(ActorId::new(1), "ann", id).unwrap(), RegisterOutcome::Admitted);
        assert_eq!(ledger.register(ActorId::new(2), "bob", id).unwrap(), RegisterOutcome::Admitted);
        assert_eq!(ledger.register(ActorId::new(3), "cat", id).unwrap(), RegisterOutcome::Full);
        assert_eq!(repo.get(id).unwrap().registered, 2);
    }

    #[test]
    fn second_attempt_is_already_registered() {
        let (_, repo, ledger) = setup();
        let id = event(&repo, 5, 1);
        assert_eq!(ledger.register(ActorId::new(1), "ann", id).unwrap(), RegisterOutcome::Admitted);
        assert_eq!(
            ledger.register(ActorId::new(1), "ann", id).unwrap(),
            RegisterOutcome::AlreadyRegistered
        );
        assert_eq!(ledger.participants_of(id).unwrap().len(), 1);
    }

    #[test]
    fn already_registered_wins_over_full() {
        let (_, repo, ledger) = setup();
        let id = event(&repo, 1, 1);
        ledger.register(ActorId::new(1), "ann", id).unwrap();
        assert_eq!(
            ledger.register(ActorId::new(1), "ann", id).unwrap(),
            RegisterOutcome::AlreadyRegistered
        );
    }

    #[test]
    fn register_for_missing_event_is_not_found() {
        let (_, _, ledger) = setup();
        assert!(matches!(
            ledger.register(ActorId::new(1), "ann", EventId::new(404)),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn unregister_frees_the_slot() {
        let (_, repo, ledger) = setup();
        let id = event(&repo, 1, 1);
        ledger.register(ActorId::new(1), "ann", id).unwrap();
        assert!(ledger.unregister(ActorId::new(1), id).unwrap());
        assert!(!ledger.unregister(ActorId::new(1), id).unwrap());
        assert_eq!(ledger.register(ActorId::new(2), "bob", id).unwrap(), RegisterOutcome::Admitted);
    }

    #[test]
    fn participants_in_registration_order() {
        let (clock, repo, ledger) = setup();
        let id = event(&repo, 5, 1);
        ledger.register(ActorId::new(30), "zed", id).unwrap();
        clock.advance(Duration::minutes(1));
        ledger.register(ActorId::new(10), "amy", id).unwrap();
        ledger.register(ActorId::new(20), "max", id).unwrap();

        let names: Vec<_> =
            ledger.participants_of(id).unwrap().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["zed", "amy", "max"]);
    }

    #[test]
    fn events_of_lists_only_active_holdings() {
        let (clock, repo, ledger) = setup();
        let soon = event(&repo, 5, 0);
        let later = event(&repo, 5, 2);
        let other = event(&repo, 5, 1);
        let me = ActorId::new(1);
        ledger.register(me, "ann", later).unwrap();
        ledger.register(me, "ann", soon).unwrap();
        ledger.register(ActorId::new(2), "bob", other).unwrap();

        let held = || -> Vec<EventId> {
            ledger.events_of(me, Duration::hours(6)).unwrap().iter().map(|e| e.id).collect()
        };
        assert_eq!(held(), vec![soon, later]);

        clock.advance(Duration::days(1));
        assert_eq!(held(), vec![later]);
    }

    #[test]
    fn concurrent_registrants_never_exceed_capacity() {
        let (_, repo, ledger) = setup();
        let capacity = 3;
        let id = event(&repo, capacity, 1);

        let handles: Vec<_> = (0..24)
            .map(|n| {
                let ledger = ledger.clone();
                std::thread::spawn(move || {
                    ledger.register(ActorId::new(n), &format!("user{n}"), id).unwrap()
                })
            })
            .collect();
        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let admitted = outcomes.iter().filter(|o| **o == RegisterOutcome::Admitted).count();
        let full = outcomes.iter().filter(|o| **o == RegisterOutcome::Full).count();
        assert_eq!(admitted, capacity as usize);
        assert_eq!(full, 24 - capacity as usize);
        assert_eq!(repo.get(id).unwrap().registered, capacity);
    }

    #[test]
    fn concurrent_duplicates_yield_one_row() {
        let (_, repo, ledger) = setup();
        let id = event(&repo, 10, 1);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = ledger.clone();
                std::thread::spawn(move || ledger.register(ActorId::new(7), "dup", id).unwrap())
            })
            .collect();
        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(outcomes.iter().filter(|o| **o == RegisterOutcome::Admitted).count(), 1);
        assert_eq!(
            outcomes.iter().filter(|o| **o == RegisterOutcome::AlreadyRegistered).count(),
            7
        );
        assert_eq!(ledger.participants_of(id).unwrap().len(), 1);
    }
}
