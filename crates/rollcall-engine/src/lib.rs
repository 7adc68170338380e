//! # rollcall-engine
//!
//! Time-driven and conversational logic on top of the store: reminder
//! timers, multi-step organizer workflows, and notification fan-out.

pub mod error;
pub mod notifier;
pub mod scheduler;
pub mod sessions;

pub use error::EngineError;
pub use notifier::{DeliveryReport, Notifier};
pub use scheduler::{
    render_reminder, FireOutcome, RebuildReport, ReminderConfig, ReminderScheduler, ScheduleOutcome,
};
pub use sessions::{
    Completion, CreateStep, EditStep, Input, LinkStep, Prompt, SessionConfig, SessionTracker,
    StepOutcome, Workflow,
};
