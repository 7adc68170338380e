use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};

use rollcall_core::testing::RecordingMessenger;
use rollcall_core::{ActorId, Clock, EventId, ManualClock, NewEvent};
use rollcall_engine::{Notifier, ReminderConfig, ReminderScheduler, SessionConfig, SessionTracker};
use rollcall_store::{Database, EventRepo, RegistrationLedger};

use crate::access::AccessPolicy;
use crate::orchestrator::Orchestrator;

pub const ADMIN: ActorId = ActorId::new(1);

pub struct Harness {
    pub events: EventRepo,
    pub ledger: RegistrationLedger,
    pub messenger: Arc<RecordingMessenger>,
    pub orchestrator: Arc<Orchestrator>,
}

pub fn now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 10, 16)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

pub fn harness() -> Harness {
    let db = Database::in_memory().unwrap();
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(now()));
    let events = EventRepo::new(db.clone(), clock.clone());
    let ledger = RegistrationLedger::new(db, clock.clone());
    let messenger = Arc::new(RecordingMessenger::new());
    let notifier = Notifier::new(messenger.clone(), StdDuration::from_secs(5));
    let scheduler = ReminderScheduler::new(
        events.clone(),
        ledger.clone(),
        notifier.clone(),
        clock.clone(),
        ReminderConfig {
            remind_before: Duration::hours(3),
            active_grace: Duration::hours(6),
            template: "Reminder".into(),
        },
    );
    let sessions = Arc::new(SessionTracker::new(
        events.clone(),
        ledger.clone(),
        scheduler,
        notifier.clone(),
        clock,
        SessionConfig {
            idle_timeout: StdDuration::from_secs(900),
            link_template: "Event link: {link}".into(),
            privileged: vec![ADMIN],
        },
    ));
    let orchestrator = Arc::new(Orchestrator::new(
        events.clone(),
        ledger.clone(),
        sessions,
        notifier,
        AccessPolicy::new([ADMIN]),
        Duration::hours(6),
    ));
    Harness {
        events,
        ledger,
        messenger,
        orchestrator,
    }
}

/// An event tomorrow at 18:00.
pub fn event(h: &Harness, max: u32) -> EventId {
    h.events
        .create(&NewEvent {
            max_participants: max,
            end_date: NaiveDate::from_ymd_opt(2026, 10, 17).unwrap(),
            event_time: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            info: "yoga".into(),
        })
        .unwrap()
}
