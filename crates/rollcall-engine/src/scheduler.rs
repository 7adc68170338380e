//! Reminder scheduler.
//!
//! Holds at most one pending timer per event id. Each timer is a spawned
//! task that sleeps until its fire time and then claims its own map entry
//! before firing. Replacing or cancelling an entry goes through the same
//! map shard, so a timer whose entry was replaced or removed can no longer
//! claim it and never fires.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{Duration, NaiveDateTime};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use rollcall_core::validate::{format_date, format_time};
use rollcall_core::{ActorId, Clock, Event, EventId};
use rollcall_store::{EventRepo, RegistrationLedger, StoreError};

use crate::error::EngineError;
use crate::notifier::{DeliveryReport, Notifier};

#[derive(Clone, Debug)]
pub struct ReminderConfig {
    /// Lead time between the reminder and the event start.
    pub remind_before: Duration,
    /// Events that started longer ago than this are not scanned on rebuild.
    pub active_grace: Duration,
    /// Reminder text with `{date}`, `{time}` and `{info}` placeholders.
    pub template: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Scheduled { fire_at: NaiveDateTime },
    /// The fire time was not in the future; nothing is pending.
    Skipped,
}

#[derive(Debug)]
pub enum FireOutcome {
    Delivered(DeliveryReport),
    EventMissing,
    AlreadyStarted,
    /// The timer woke before the event's current fire time and was put back.
    Rescheduled { fire_at: NaiveDateTime },
    /// A newer timer for the event was already pending.
    Superseded,
    /// The event's fire time moved before this timer and has passed.
    WindowElapsed,
    StoreUnavailable,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RebuildReport {
    pub scheduled: usize,
    pub skipped: usize,
}

struct PendingReminder {
    fire_at: NaiveDateTime,
    generation: u64,
    cancel: CancellationToken,
}

struct Inner {
    events: EventRepo,
    ledger: RegistrationLedger,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
    config: ReminderConfig,
    tasks: DashMap<EventId, PendingReminder>,
    generations: AtomicU64,
}

#[derive(Clone)]
pub struct ReminderScheduler {
    inner: Arc<Inner>,
}

impl ReminderScheduler {
    pub fn new(
        events: EventRepo,
        ledger: RegistrationLedger,
        notifier: Notifier,
        clock: Arc<dyn Clock>,
        config: ReminderConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                events,
                ledger,
                notifier,
                clock,
                config,
                tasks: DashMap::new(),
                generations: AtomicU64::new(0),
            }),
        }
    }

    /// When the reminder for an event starting at `start` is due.
    pub fn fire_at_for(&self, start: NaiveDateTime) -> NaiveDateTime {
        self.inner.fire_at_for(start)
    }

    /// Install a timer for `event_id`, replacing any pending one.
    ///
    /// A fire time that is not strictly in the future still cancels the old
    /// timer but installs nothing. Fails only when no tokio runtime is
    /// available to drive the timer.
    #[instrument(skip(self), fields(event_id = %event_id))]
    pub fn schedule(
        &self,
        event_id: EventId,
        fire_at: NaiveDateTime,
    ) -> Result<ScheduleOutcome, EngineError> {
        let handle = current_runtime()?;
        let entry = self.inner.tasks.entry(event_id);
        Ok(self.inner.install(&handle, entry, event_id, fire_at))
    }

    /// Replace the timer of `event_id` from its stored start.
    ///
    /// The event is read while the map entry is locked, so concurrent
    /// reschedules of one event apply one at a time and the last one sees
    /// the latest committed start. A deleted event loses its pending timer.
    #[instrument(skip(self), fields(event_id = %event_id))]
    pub fn reschedule(&self, event_id: EventId) -> Result<ScheduleOutcome, EngineError> {
        let handle = current_runtime()?;
        let entry = self.inner.tasks.entry(event_id);
        match self.inner.events.get(event_id) {
            Ok(event) => {
                let fire_at = self.inner.fire_at_for(event.starts_at());
                Ok(self.inner.install(&handle, entry, event_id, fire_at))
            }
            Err(StoreError::NotFound(_)) => {
                if let Entry::Occupied(occupied) = entry {
                    let (_, pending) = occupied.remove_entry();
                    pending.cancel.cancel();
                    info!(fire_at = %pending.fire_at, "event gone, pending reminder dropped");
                }
                Ok(ScheduleOutcome::Skipped)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Schedule the reminder for an event from a start already in hand.
    /// Only safe while nothing else can edit the event, as on rebuild.
    pub fn schedule_event(&self, event: &Event) -> Result<ScheduleOutcome, EngineError> {
        self.schedule(event.id, self.fire_at_for(event.starts_at()))
    }

    /// Cancel and forget the pending timer. Returns whether one existed.
    #[instrument(skip(self), fields(event_id = %event_id))]
    pub fn cancel(&self, event_id: EventId) -> bool {
        match self.inner.tasks.remove(&event_id) {
            Some((_, pending)) => {
                pending.cancel.cancel();
                info!(fire_at = %pending.fire_at, "reminder cancelled");
                true
            }
            None => false,
        }
    }

    /// Run the fire step now. The timer path calls the same logic.
    pub async fn fire(&self, event_id: EventId) -> FireOutcome {
        self.inner.fire(event_id, None).await
    }

    /// Schedule every active event whose fire time is still ahead.
    /// Elapsed windows are skipped, never fired late.
    pub fn rebuild_from_store(&self) -> Result<RebuildReport, EngineError> {
        let events = self.inner.events.list_active(self.inner.config.active_grace)?;
        let mut report = RebuildReport::default();
        for event in &events {
            match self.schedule_event(event)? {
                ScheduleOutcome::Scheduled { .. } => report.scheduled += 1,
                ScheduleOutcome::Skipped => report.skipped += 1,
            }
        }
        info!(
            scanned = events.len(),
            scheduled = report.scheduled,
            skipped = report.skipped,
            "reminders rebuilt from store"
        );
        Ok(report)
    }

    pub fn pending(&self, event_id: EventId) -> Option<NaiveDateTime> {
        self.inner.tasks.get(&event_id).map(|p| p.fire_at)
    }

    pub fn pending_fire_times(&self) -> BTreeMap<EventId, NaiveDateTime> {
        self.inner
            .tasks
            .iter()
            .map(|entry| (*entry.key(), entry.value().fire_at))
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.tasks.len()
    }

    /// Cancel every pending timer. Used on shutdown.
    pub fn cancel_all(&self) -> usize {
        let count = self.inner.tasks.len();
        for entry in self.inner.tasks.iter() {
            entry.value().cancel.cancel();
        }
        self.inner.tasks.clear();
        count
    }
}

impl Inner {
    fn fire_at_for(&self, start: NaiveDateTime) -> NaiveDateTime {
        start - self.config.remind_before
    }

    /// Replace whatever `entry` holds with a timer for `fire_at`.
    fn install(
        self: &Arc<Self>,
        handle: &Handle,
        entry: Entry<'_, EventId, PendingReminder>,
        event_id: EventId,
        fire_at: NaiveDateTime,
    ) -> ScheduleOutcome {
        let now = self.clock.now();
        if let Entry::Occupied(occupied) = &entry {
            occupied.get().cancel.cancel();
        }

        if fire_at <= now {
            if let Entry::Occupied(occupied) = entry {
                occupied.remove();
                info!(%fire_at, "pending reminder dropped, new fire time already elapsed");
            } else {
                debug!(%fire_at, "fire time already elapsed, not scheduling");
            }
            return ScheduleOutcome::Skipped;
        }

        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let pending = PendingReminder {
            fire_at,
            generation,
            cancel: cancel.clone(),
        };
        match entry {
            Entry::Occupied(mut occupied) => {
                occupied.insert(pending);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(pending);
            }
        }

        let delay = (fire_at - now).to_std().unwrap_or_default();
        let inner = Arc::clone(self);
        let timer_handle = handle.clone();
        handle.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(event_id = %event_id, generation, "reminder timer cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    if inner.claim(event_id, generation) {
                        inner.fire(event_id, Some((fire_at, &timer_handle))).await;
                    }
                }
            }
        });

        info!(event_id = %event_id, %fire_at, "reminder scheduled");
        ScheduleOutcome::Scheduled { fire_at }
    }

    /// Take ownership of the entry for the fire step. Fails if the entry
    /// was replaced or cancelled since `generation` was installed.
    fn claim(&self, event_id: EventId, generation: u64) -> bool {
        self.tasks
            .remove_if(&event_id, |_, pending| pending.generation == generation)
            .is_some()
    }

    /// `due` carries the fire time and runtime of the timer that woke up.
    /// A manual fire passes `None` and skips the fire time check.
    #[instrument(skip(self, due), fields(event_id = %event_id))]
    async fn fire(
        self: &Arc<Self>,
        event_id: EventId,
        due: Option<(NaiveDateTime, &Handle)>,
    ) -> FireOutcome {
        // Event state is read now, not when the timer was installed.
        let event = match self.events.get(event_id) {
            Ok(event) => event,
            Err(StoreError::NotFound(_)) => {
                info!("event no longer exists, reminder dropped");
                return FireOutcome::EventMissing;
            }
            Err(e) => {
                error!(error = %e, "failed to load event for reminder");
                return FireOutcome::StoreUnavailable;
            }
        };

        if event.starts_at() < self.clock.now() {
            warn!(start = %event.starts_at(), "event already started, reminder dropped");
            return FireOutcome::AlreadyStarted;
        }

        if let Some((fired_for, handle)) = due {
            let fire_at = self.fire_at_for(event.starts_at());
            if fire_at > fired_for {
                // The start moved later than this timer knew about.
                return match self.tasks.entry(event_id) {
                    Entry::Vacant(vacant) => {
                        warn!(%fired_for, %fire_at, "early reminder timer, rescheduling");
                        match self.install(handle, Entry::Vacant(vacant), event_id, fire_at) {
                            ScheduleOutcome::Scheduled { fire_at } => {
                                FireOutcome::Rescheduled { fire_at }
                            }
                            ScheduleOutcome::Skipped => FireOutcome::WindowElapsed,
                        }
                    }
                    Entry::Occupied(_) => {
                        debug!("newer timer already pending, early timer dropped");
                        FireOutcome::Superseded
                    }
                };
            }
            if fire_at < fired_for {
                warn!(%fired_for, %fire_at, "reminder window moved earlier and closed");
                return FireOutcome::WindowElapsed;
            }
        }

        let recipients: Vec<ActorId> = match self.ledger.participants_of(event_id) {
            Ok(participants) => participants.into_iter().map(|p| p.id).collect(),
            Err(e) => {
                error!(error = %e, "failed to load participants for reminder");
                return FireOutcome::StoreUnavailable;
            }
        };

        let text = render_reminder(&self.config.template, &event);
        let report = self.notifier.deliver_all(&recipients, &text).await;
        info!(
            delivered = report.delivered,
            failed = report.failed.len(),
            "reminder fired"
        );
        FireOutcome::Delivered(report)
    }
}

fn current_runtime() -> Result<Handle, EngineError> {
    Handle::try_current().map_err(|e| EngineError::TimerUnavailable(e.to_string()))
}

/// Substitute `{date}`, `{time}` and `{info}` into the reminder template.
pub fn render_reminder(template: &str, event: &Event) -> String {
    template
        .replace("{date}", &format_date(event.end_date))
        .replace("{time}", &format_time(event.event_time))
        .replace("{info}", &event.info)
        .trim_end()
        .to_string()
}
