//! Routes inbound actions to single-shot store operations or to the
//! session tracker, and reports the outcome back to the actor.

use std::sync::Arc;

use chrono::Duration;
use tracing::{error, info, instrument, warn};

use rollcall_core::{ActorId, Event, EventId, ValidationError};
use rollcall_engine::{
    Completion, EngineError, Input, Notifier, Prompt, SessionTracker, StepOutcome,
};
use rollcall_store::{EventRepo, Participant, RegisterOutcome, RegistrationLedger, StoreError};

use crate::access::AccessPolicy;
use crate::action::{Action, Inbound};
use crate::error::ServerError;
use crate::render;

/// Result of handling one action, before rendering.
#[derive(Debug)]
pub enum Reply {
    Events(Vec<Event>),
    MyEvents(Vec<Event>),
    AdminEvents(Vec<Event>),
    Registration {
        event_id: EventId,
        outcome: RegisterOutcome,
    },
    Unregistered {
        event_id: EventId,
        removed: bool,
    },
    Participants {
        event_id: EventId,
        participants: Vec<Participant>,
    },
    Prompt(Prompt),
    Invalid {
        prompt: Prompt,
        error: ValidationError,
    },
    Rejected(ValidationError),
    Completed(Completion),
    Cancelled,
    NotFound,
    Forbidden,
    NoSession,
    SessionExpired,
    Unexpected {
        expected: &'static str,
    },
    /// Storage or timer failure. Rendered the same regardless of cause.
    Failure,
}

pub struct Orchestrator {
    events: EventRepo,
    ledger: RegistrationLedger,
    sessions: Arc<SessionTracker>,
    notifier: Notifier,
    access: AccessPolicy,
    active_grace: Duration,
}

impl Orchestrator {
    pub fn new(
        events: EventRepo,
        ledger: RegistrationLedger,
        sessions: Arc<SessionTracker>,
        notifier: Notifier,
        access: AccessPolicy,
        active_grace: Duration,
    ) -> Self {
        Self {
            events,
            ledger,
            sessions,
            notifier,
            access,
            active_grace,
        }
    }

    /// Handle one action and send the rendered reply to the actor.
    pub async fn process(&self, inbound: &Inbound) -> Reply {
        let reply = self.handle(inbound).await;
        let text = render::render(&reply);
        if let Err(e) = self.notifier.send(inbound.actor, &text).await {
            warn!(actor_id = %inbound.actor, error = %e, "reply not delivered");
        }
        reply
    }

    #[instrument(
        skip(self, inbound),
        fields(actor_id = %inbound.actor, action = inbound.action.name())
    )]
    pub async fn handle(&self, inbound: &Inbound) -> Reply {
        match self.dispatch(inbound).await {
            Ok(reply) => reply,
            Err(e) => failure_reply(e),
        }
    }

    async fn dispatch(&self, inbound: &Inbound) -> Result<Reply, ServerError> {
        let actor = inbound.actor;
        self.access.check(actor, &inbound.action)?;

        let reply = match &inbound.action {
            Action::ListEvents => Reply::Events(self.events.list_active(self.active_grace)?),
            Action::Register { event_id } => {
                let outcome = self.ledger.register(actor, &inbound.display_name(), *event_id)?;
                info!(event_id = %event_id, ?outcome, "registration attempt");
                Reply::Registration {
                    event_id: *event_id,
                    outcome,
                }
            }
            Action::Unregister { event_id } => Reply::Unregistered {
                event_id: *event_id,
                removed: self.ledger.unregister(actor, *event_id)?,
            },
            Action::MyEvents => Reply::MyEvents(self.ledger.events_of(actor, self.active_grace)?),
            Action::Participants { event_id } => {
                self.events.get(*event_id)?;
                Reply::Participants {
                    event_id: *event_id,
                    participants: self.ledger.participants_of(*event_id)?,
                }
            }
            Action::AdminEvents => Reply::AdminEvents(self.events.list_all()?),
            Action::CreateEvent => Reply::Prompt(self.sessions.begin_create(actor)),
            Action::EditEvent { event_id } => {
                Reply::Prompt(self.sessions.begin_edit(actor, *event_id)?)
            }
            Action::DeleteEvent { event_id } => {
                Reply::Prompt(self.sessions.begin_delete(actor, *event_id)?)
            }
            Action::Broadcast { event_id } => {
                Reply::Prompt(self.sessions.begin_broadcast(actor, *event_id)?)
            }
            Action::ShareLink { event_id } => {
                Reply::Prompt(self.sessions.begin_share_link(actor, *event_id)?)
            }
            Action::Input { text } => self.step(actor, Input::Text(text.clone())).await?,
            Action::ChooseField { field } => self.step(actor, Input::Field(*field)).await?,
            Action::Confirm { yes } => self.step(actor, Input::Confirm(*yes)).await?,
            Action::Cancel => {
                if self.sessions.cancel(actor) {
                    Reply::Cancelled
                } else {
                    Reply::NoSession
                }
            }
        };
        Ok(reply)
    }

    async fn step(&self, actor: ActorId, input: Input) -> Result<Reply, ServerError> {
        Ok(match self.sessions.advance(actor, input).await? {
            StepOutcome::Next(prompt) => Reply::Prompt(prompt),
            StepOutcome::Retry { prompt, error } => Reply::Invalid { prompt, error },
            StepOutcome::Completed(completion) => Reply::Completed(completion),
            StepOutcome::Cancelled => Reply::Cancelled,
        })
    }
}

fn failure_reply(e: ServerError) -> Reply {
    match e {
        ServerError::Forbidden { .. } => Reply::Forbidden,
        ServerError::Engine(EngineError::NoSession(_)) => Reply::NoSession,
        ServerError::Engine(EngineError::SessionExpired(_)) => Reply::SessionExpired,
        ServerError::Engine(EngineError::UnexpectedInput { expected }) => {
            Reply::Unexpected { expected }
        }
        ServerError::Engine(EngineError::Store(StoreError::NotFound(_))) => Reply::NotFound,
        ServerError::Engine(EngineError::Store(StoreError::Validation(error))) => {
            Reply::Rejected(error)
        }
        other => {
            error!(error = %other, storage = other.is_storage(), "action failed");
            Reply::Failure
        }
    }
}
