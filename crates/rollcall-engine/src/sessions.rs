//! Per-actor multi-step workflows.
//!
//! Each actor has at most one workflow in progress. A workflow is a typed
//! step enum carrying exactly the input collected so far; nothing touches
//! the store until the final step commits. Invalid input keeps the current
//! step and reports why. Abandoned workflows expire after an idle timeout.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveTime};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use rollcall_core::validate;
use rollcall_core::{
    ActorId, Clock, EditableField, Event, EventId, FieldValue, NewEvent, ValidationError,
};
use rollcall_store::{EventRepo, RegistrationLedger, StoreError};

use crate::error::EngineError;
use crate::notifier::{DeliveryReport, Notifier};
use crate::scheduler::{ReminderScheduler, ScheduleOutcome};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateStep {
    AwaitCapacity,
    AwaitDate {
        max_participants: u32,
    },
    AwaitTime {
        max_participants: u32,
        end_date: NaiveDate,
    },
    AwaitInfo {
        max_participants: u32,
        end_date: NaiveDate,
        event_time: NaiveTime,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EditStep {
    ChooseField,
    AwaitValue(EditableField),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkStep {
    AwaitLink,
    /// The rendered message is held until the organizer confirms it.
    AwaitConfirmation { message: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Workflow {
    Create(CreateStep),
    Edit { event_id: EventId, step: EditStep },
    Delete { event_id: EventId },
    Broadcast { event_id: EventId },
    ShareLink { event_id: EventId, step: LinkStep },
}

impl Workflow {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Create(_) => "create",
            Self::Edit { .. } => "edit",
            Self::Delete { .. } => "delete",
            Self::Broadcast { .. } => "broadcast",
            Self::ShareLink { .. } => "share_link",
        }
    }

    /// What the workflow is waiting for.
    pub fn prompt(&self) -> Prompt {
        match self {
            Self::Create(CreateStep::AwaitCapacity) => Prompt::Capacity,
            Self::Create(CreateStep::AwaitDate { .. }) => Prompt::Date,
            Self::Create(CreateStep::AwaitTime { .. }) => Prompt::Time,
            Self::Create(CreateStep::AwaitInfo { .. }) => Prompt::Info,
            Self::Edit {
                step: EditStep::ChooseField,
                ..
            } => Prompt::ChooseField,
            Self::Edit {
                step: EditStep::AwaitValue(field),
                ..
            } => Prompt::Value(*field),
            Self::Delete { event_id } => Prompt::ConfirmDelete(*event_id),
            Self::Broadcast { .. } => Prompt::BroadcastMessage,
            Self::ShareLink {
                step: LinkStep::AwaitLink,
                ..
            } => Prompt::Link,
            Self::ShareLink {
                step: LinkStep::AwaitConfirmation { message },
                ..
            } => Prompt::ConfirmLink {
                preview: message.clone(),
            },
        }
    }
}

/// One piece of actor input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Input {
    Text(String),
    Field(EditableField),
    Confirm(bool),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Prompt {
    Capacity,
    Date,
    Time,
    Info,
    ChooseField,
    Value(EditableField),
    ConfirmDelete(EventId),
    BroadcastMessage,
    Link,
    ConfirmLink { preview: String },
}

#[derive(Debug)]
pub enum StepOutcome {
    /// Input accepted; the workflow moved on and asks for the next input.
    Next(Prompt),
    /// Input rejected; the workflow is still on the same step.
    Retry { prompt: Prompt, error: ValidationError },
    Completed(Completion),
    /// The actor declined a confirmation. Nothing was changed.
    Cancelled,
}

#[derive(Debug)]
pub enum Completion {
    Created {
        event: Event,
        reminder: ScheduleOutcome,
    },
    Edited {
        event: Event,
        /// Set when the edit moved the start and the reminder was replaced.
        reminder: Option<ScheduleOutcome>,
    },
    Deleted {
        event_id: EventId,
        existed: bool,
        reminder_cancelled: bool,
    },
    Broadcast {
        event_id: EventId,
        report: DeliveryReport,
    },
    LinkShared {
        event_id: EventId,
        report: DeliveryReport,
    },
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub idle_timeout: Duration,
    /// Wrapper for shared links, containing `{link}`.
    pub link_template: String,
    /// Actors never addressed by broadcasts and link shares.
    pub privileged: Vec<ActorId>,
}

struct Session {
    workflow: Workflow,
    started_at: Instant,
    last_input: Instant,
}

/// Result of one step: keep the session with its new state, or drop it.
enum Transition {
    Continue(Workflow, StepOutcome),
    Finished(StepOutcome),
}

fn next(workflow: Workflow) -> Transition {
    let prompt = workflow.prompt();
    Transition::Continue(workflow, StepOutcome::Next(prompt))
}

fn retry(workflow: Workflow, error: ValidationError) -> Transition {
    let prompt = workflow.prompt();
    Transition::Continue(workflow, StepOutcome::Retry { prompt, error })
}

fn finished(completion: Completion) -> Transition {
    Transition::Finished(StepOutcome::Completed(completion))
}

fn expect_text(input: Input) -> Result<String, EngineError> {
    match input {
        Input::Text(text) => Ok(text),
        _ => Err(EngineError::UnexpectedInput { expected: "text" }),
    }
}

fn expect_confirmation(input: Input) -> Result<bool, EngineError> {
    let unexpected = EngineError::UnexpectedInput {
        expected: "a yes or no answer",
    };
    match input {
        Input::Confirm(yes) => Ok(yes),
        Input::Text(text) => match text.trim().to_lowercase().as_str() {
            "yes" | "y" => Ok(true),
            "no" | "n" => Ok(false),
            _ => Err(unexpected),
        },
        Input::Field(_) => Err(unexpected),
    }
}

pub struct SessionTracker {
    sessions: DashMap<ActorId, Session>,
    events: EventRepo,
    ledger: RegistrationLedger,
    scheduler: ReminderScheduler,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
}

impl SessionTracker {
    pub fn new(
        events: EventRepo,
        ledger: RegistrationLedger,
        scheduler: ReminderScheduler,
        notifier: Notifier,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            events,
            ledger,
            scheduler,
            notifier,
            clock,
            config,
        }
    }

    pub fn begin_create(&self, actor: ActorId) -> Prompt {
        self.begin(actor, Workflow::Create(CreateStep::AwaitCapacity))
    }

    pub fn begin_edit(&self, actor: ActorId, event_id: EventId) -> Result<Prompt, EngineError> {
        self.events.get(event_id)?;
        Ok(self.begin(
            actor,
            Workflow::Edit {
                event_id,
                step: EditStep::ChooseField,
            },
        ))
    }

    pub fn begin_delete(&self, actor: ActorId, event_id: EventId) -> Result<Prompt, EngineError> {
        self.events.get(event_id)?;
        Ok(self.begin(actor, Workflow::Delete { event_id }))
    }

    pub fn begin_broadcast(
        &self,
        actor: ActorId,
        event_id: EventId,
    ) -> Result<Prompt, EngineError> {
        self.events.get(event_id)?;
        Ok(self.begin(actor, Workflow::Broadcast { event_id }))
    }

    pub fn begin_share_link(
        &self,
        actor: ActorId,
        event_id: EventId,
    ) -> Result<Prompt, EngineError> {
        self.events.get(event_id)?;
        Ok(self.begin(
            actor,
            Workflow::ShareLink {
                event_id,
                step: LinkStep::AwaitLink,
            },
        ))
    }

    #[instrument(skip(self, workflow), fields(actor_id = %actor, workflow = workflow.name()))]
    fn begin(&self, actor: ActorId, workflow: Workflow) -> Prompt {
        let prompt = workflow.prompt();
        let now = Instant::now();
        let previous = self.sessions.insert(
            actor,
            Session {
                workflow,
                started_at: now,
                last_input: now,
            },
        );
        match previous {
            Some(old) => {
                info!(replaced = old.workflow.name(), "workflow started, previous one discarded")
            }
            None => debug!("workflow started"),
        }
        prompt
    }

    /// Feed one input to the actor's workflow.
    ///
    /// `UnexpectedInput` keeps the session as it was. `NotFound` and storage
    /// failures discard it.
    #[instrument(skip(self, input), fields(actor_id = %actor))]
    pub async fn advance(&self, actor: ActorId, input: Input) -> Result<StepOutcome, EngineError> {
        let (_, session) = self
            .sessions
            .remove(&actor)
            .ok_or(EngineError::NoSession(actor))?;

        if session.last_input.elapsed() >= self.config.idle_timeout {
            info!(workflow = session.workflow.name(), "workflow expired");
            return Err(EngineError::SessionExpired(actor));
        }

        let Session {
            workflow,
            started_at,
            ..
        } = session;
        let keep = workflow.clone();

        match self.step(workflow, input).await {
            Ok(Transition::Continue(workflow, outcome)) => {
                self.restore(actor, workflow, started_at);
                Ok(outcome)
            }
            Ok(Transition::Finished(outcome)) => {
                debug!(
                    workflow = keep.name(),
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    "workflow finished"
                );
                Ok(outcome)
            }
            Err(e @ EngineError::UnexpectedInput { .. }) => {
                self.restore(actor, keep, started_at);
                Err(e)
            }
            Err(e) => {
                info!(workflow = keep.name(), error = %e, "workflow aborted");
                Err(e)
            }
        }
    }

    /// Put a continuing session back, unless the actor started a new
    /// workflow while this step was running.
    fn restore(&self, actor: ActorId, workflow: Workflow, started_at: Instant) {
        match self.sessions.entry(actor) {
            Entry::Vacant(vacant) => {
                vacant.insert(Session {
                    workflow,
                    started_at,
                    last_input: Instant::now(),
                });
            }
            Entry::Occupied(_) => {
                debug!(actor_id = %actor, "newer workflow present, step result dropped")
            }
        }
    }

    async fn step(&self, workflow: Workflow, input: Input) -> Result<Transition, EngineError> {
        match workflow {
            Workflow::Create(step) => self.step_create(step, input),
            Workflow::Edit { event_id, step } => self.step_edit(event_id, step, input),
            Workflow::Delete { event_id } => self.step_delete(event_id, input),
            Workflow::Broadcast { event_id } => self.step_broadcast(event_id, input).await,
            Workflow::ShareLink { event_id, step } => {
                self.step_share_link(event_id, step, input).await
            }
        }
    }

    fn step_create(&self, step: CreateStep, input: Input) -> Result<Transition, EngineError> {
        let text = expect_text(input)?;
        let now = self.clock.now();

        let advanced = match step {
            CreateStep::AwaitCapacity => validate::parse_capacity(&text)
                .map(|max_participants| CreateStep::AwaitDate { max_participants }),
            CreateStep::AwaitDate { max_participants } => validate::parse_date(&text)
                .and_then(|end_date| {
                    validate::check_date_not_past(end_date, now).map(|()| end_date)
                })
                .map(|end_date| CreateStep::AwaitTime {
                    max_participants,
                    end_date,
                }),
            CreateStep::AwaitTime {
                max_participants,
                end_date,
            } => validate::parse_time(&text)
                .and_then(|time| validate::check_start_not_past(end_date, time, now).map(|_| time))
                .map(|event_time| CreateStep::AwaitInfo {
                    max_participants,
                    end_date,
                    event_time,
                }),
            CreateStep::AwaitInfo {
                max_participants,
                end_date,
                event_time,
            } => {
                let info = text.trim().to_string();
                if let Err(error) = validate::check_info(&info) {
                    return Ok(retry(Workflow::Create(step), error));
                }
                return self.commit_create(NewEvent {
                    max_participants,
                    end_date,
                    event_time,
                    info,
                });
            }
        };

        Ok(match advanced {
            Ok(next_step) => next(Workflow::Create(next_step)),
            Err(error) => retry(Workflow::Create(step), error),
        })
    }

    fn commit_create(&self, new: NewEvent) -> Result<Transition, EngineError> {
        match self.events.create(&new) {
            Ok(id) => {
                let reminder = self.scheduler.reschedule(id)?;
                let event = self.events.get(id)?;
                Ok(finished(Completion::Created { event, reminder }))
            }
            // The start slipped into the past while the description was
            // being written: ask for the date again, keeping the capacity.
            Err(StoreError::Validation(error)) => Ok(retry(
                Workflow::Create(CreateStep::AwaitDate {
                    max_participants: new.max_participants,
                }),
                error,
            )),
            Err(e) => Err(e.into()),
        }
    }

    fn step_edit(
        &self,
        event_id: EventId,
        step: EditStep,
        input: Input,
    ) -> Result<Transition, EngineError> {
        let current = Workflow::Edit { event_id, step };
        match step {
            EditStep::ChooseField => {
                let field = match input {
                    Input::Field(field) => field,
                    Input::Text(text) => match text.trim().parse::<EditableField>() {
                        Ok(field) => field,
                        Err(error) => return Ok(retry(current, error)),
                    },
                    Input::Confirm(_) => {
                        return Err(EngineError::UnexpectedInput {
                            expected: "a field to edit",
                        })
                    }
                };
                Ok(next(Workflow::Edit {
                    event_id,
                    step: EditStep::AwaitValue(field),
                }))
            }
            EditStep::AwaitValue(field) => {
                let text = expect_text(input)?;
                let value = match FieldValue::parse(field, &text) {
                    Ok(value) => value,
                    Err(error) => return Ok(retry(current, error)),
                };
                match self.events.update_field(event_id, &value) {
                    Ok(event) => {
                        // Rescheduled from the stored start, not from `event`:
                        // another edit may have committed since.
                        let reminder = if field.affects_schedule() {
                            Some(self.scheduler.reschedule(event_id)?)
                        } else {
                            None
                        };
                        Ok(finished(Completion::Edited { event, reminder }))
                    }
                    Err(StoreError::Validation(error)) => Ok(retry(current, error)),
                    Err(e) => Err(e.into()),
                }
            }
        }
    }

    fn step_delete(&self, event_id: EventId, input: Input) -> Result<Transition, EngineError> {
        if !expect_confirmation(input)? {
            return Ok(Transition::Finished(StepOutcome::Cancelled));
        }
        let existed = self.events.delete(event_id)?;
        let reminder_cancelled = self.scheduler.cancel(event_id);
        Ok(finished(Completion::Deleted {
            event_id,
            existed,
            reminder_cancelled,
        }))
    }

    async fn step_broadcast(
        &self,
        event_id: EventId,
        input: Input,
    ) -> Result<Transition, EngineError> {
        let text = expect_text(input)?;
        let message = text.trim();
        if message.is_empty() {
            return Err(EngineError::UnexpectedInput {
                expected: "a non-empty message",
            });
        }
        let report = self.deliver_to_participants(event_id, message).await?;
        Ok(finished(Completion::Broadcast { event_id, report }))
    }

    async fn step_share_link(
        &self,
        event_id: EventId,
        step: LinkStep,
        input: Input,
    ) -> Result<Transition, EngineError> {
        match step {
            LinkStep::AwaitLink => {
                let text = expect_text(input)?;
                let link = text.trim();
                if link.is_empty() {
                    return Err(EngineError::UnexpectedInput { expected: "a link" });
                }
                let message = self.config.link_template.replace("{link}", link);
                Ok(next(Workflow::ShareLink {
                    event_id,
                    step: LinkStep::AwaitConfirmation { message },
                }))
            }
            LinkStep::AwaitConfirmation { message } => {
                if !expect_confirmation(input)? {
                    return Ok(Transition::Finished(StepOutcome::Cancelled));
                }
                let report = self.deliver_to_participants(event_id, &message).await?;
                Ok(finished(Completion::LinkShared { event_id, report }))
            }
        }
    }

    async fn deliver_to_participants(
        &self,
        event_id: EventId,
        text: &str,
    ) -> Result<DeliveryReport, EngineError> {
        self.events.get(event_id)?;
        let recipients: Vec<ActorId> = self
            .ledger
            .participants_of(event_id)?
            .into_iter()
            .map(|p| p.id)
            .filter(|id| !self.config.privileged.contains(id))
            .collect();
        Ok(self.notifier.deliver_all(&recipients, text).await)
    }

    /// Drop the actor's workflow. Returns whether one existed.
    pub fn cancel(&self, actor: ActorId) -> bool {
        self.sessions.remove(&actor).is_some()
    }

    pub fn current(&self, actor: ActorId) -> Option<Workflow> {
        self.sessions.get(&actor).map(|s| s.workflow.clone())
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    /// Discard every workflow idle for longer than the timeout.
    pub fn sweep_expired(&self) -> usize {
        let timeout = self.config.idle_timeout;
        let mut expired = 0;
        self.sessions.retain(|actor, session| {
            let keep = session.last_input.elapsed() < timeout;
            if !keep {
                debug!(actor_id = %actor, workflow = session.workflow.name(), "workflow expired");
                expired += 1;
            }
            keep
        });
        expired
    }

    /// Periodically sweep expired workflows until `shutdown` fires.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        every: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let expired = self.sweep_expired();
                        if expired > 0 {
                            info!(expired, "expired workflows discarded");
                        }
                    }
                }
            }
        })
    }
}
