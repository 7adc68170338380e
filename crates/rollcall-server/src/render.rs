//! Plain-text rendering of replies.

use std::fmt::Write;

use rollcall_core::validate::{format_date, format_time, MAX_INFO_CHARS};
use rollcall_core::{EditableField, Event};
use rollcall_engine::{Completion, DeliveryReport, Prompt, ScheduleOutcome};
use rollcall_store::RegisterOutcome;

use crate::orchestrator::Reply;

pub const FAILURE_TEXT: &str = "Something went wrong, please try again later.";

pub fn render(reply: &Reply) -> String {
    match reply {
        Reply::Events(events) => event_list(events, "No upcoming events."),
        Reply::MyEvents(events) => {
            event_list(events, "You are not registered for any upcoming event.")
        }
        Reply::AdminEvents(events) => event_list(events, "No events."),
        Reply::Registration { event_id, outcome } => match outcome {
            RegisterOutcome::Admitted => format!("You are registered for event #{event_id}."),
            RegisterOutcome::AlreadyRegistered => {
                format!("You are already registered for event #{event_id}.")
            }
            RegisterOutcome::Full => format!("Event #{event_id} is full."),
        },
        Reply::Unregistered { event_id, removed } => {
            if *removed {
                format!("Your registration for event #{event_id} was cancelled.")
            } else {
                format!("You were not registered for event #{event_id}.")
            }
        }
        Reply::Participants { event_id, participants } => {
            if participants.is_empty() {
                return format!("No participants yet for event #{event_id}.");
            }
            let mut out = format!("Participants of event #{event_id} ({}):", participants.len());
            for (n, p) in participants.iter().enumerate() {
                let _ = write!(out, "\n{}. {}", n + 1, p.name);
            }
            out
        }
        Reply::Prompt(prompt) => prompt_text(prompt),
        Reply::Invalid { prompt, error } => {
            format!("{}\n{}", capitalize(&error.to_string()), prompt_text(prompt))
        }
        Reply::Rejected(error) => capitalize(&error.to_string()),
        Reply::Completed(completion) => completion_text(completion),
        Reply::Cancelled => "Cancelled.".to_string(),
        Reply::NotFound => "That event no longer exists.".to_string(),
        Reply::Forbidden => "This action is available to organizers only.".to_string(),
        Reply::NoSession => "Nothing is in progress. Start an action first.".to_string(),
        Reply::SessionExpired => "Your previous action timed out. Please start again.".to_string(),
        Reply::Unexpected { expected } => format!("Expected {expected}."),
        Reply::Failure => FAILURE_TEXT.to_string(),
    }
}

fn event_line(event: &Event) -> String {
    let mut line = format!(
        "#{} {} {} | {}/{} free",
        event.id,
        format_date(event.end_date),
        format_time(event.event_time),
        event.available(),
        event.max_participants,
    );
    if !event.info.is_empty() {
        let _ = write!(line, " | {}", event.info);
    }
    line
}

fn event_list(events: &[Event], empty: &str) -> String {
    if events.is_empty() {
        return empty.to_string();
    }
    events.iter().map(event_line).collect::<Vec<_>>().join("\n")
}

pub fn prompt_text(prompt: &Prompt) -> String {
    match prompt {
        Prompt::Capacity => "How many participants can attend?".to_string(),
        Prompt::Date => "Enter the event date (YYYY-MM-DD).".to_string(),
        Prompt::Time => "Enter the start time (HH:MM).".to_string(),
        Prompt::Info => format!("Enter a description (up to {MAX_INFO_CHARS} characters)."),
        Prompt::ChooseField => {
            let fields: Vec<&str> = EditableField::ALL.iter().map(|f| f.as_str()).collect();
            format!("Which field do you want to change? One of: {}.", fields.join(", "))
        }
        Prompt::Value(field) => format!("Enter the new value for {field}."),
        Prompt::ConfirmDelete(event_id) => {
            format!("Delete event #{event_id} and all its registrations? (yes/no)")
        }
        Prompt::BroadcastMessage => "Enter the message to send to all participants.".to_string(),
        Prompt::Link => "Send the link to share with participants.".to_string(),
        Prompt::ConfirmLink { preview } => {
            format!("Participants will receive:\n{preview}\nSend it? (yes/no)")
        }
    }
}

fn reminder_text(outcome: &ScheduleOutcome) -> String {
    match outcome {
        ScheduleOutcome::Scheduled { fire_at } => {
            format!(
                " Reminder set for {} {}.",
                format_date(fire_at.date()),
                format_time(fire_at.time())
            )
        }
        ScheduleOutcome::Skipped => " No reminder: its time has already passed.".to_string(),
    }
}

fn delivery_text(report: &DeliveryReport) -> String {
    format!("Message sent to {} of {} participants.", report.delivered, report.attempted())
}

fn completion_text(completion: &Completion) -> String {
    match completion {
        Completion::Created { event, reminder } => format!(
            "Event #{} created for {} {}.{}",
            event.id,
            format_date(event.end_date),
            format_time(event.event_time),
            reminder_text(reminder)
        ),
        Completion::Edited { event, reminder } => {
            let mut out = format!("Event #{} updated.", event.id);
            if let Some(reminder) = reminder {
                out.push_str(&reminder_text(reminder));
            }
            out
        }
        Completion::Deleted { event_id, existed, .. } => {
            if *existed {
                format!("Event #{event_id} deleted.")
            } else {
                format!("Event #{event_id} was already gone.")
            }
        }
        Completion::Broadcast { report, .. } | Completion::LinkShared { report, .. } => {
            delivery_text(report)
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use rollcall_core::{ActorId, DeliveryError, EventId, ValidationError};

    fn sample_event() -> Event {
        Event {
            id: EventId::new(3),
            max_participants: 5,
            end_date: NaiveDate::from_ymd_opt(2026, 10, 17).unwrap(),
            event_time: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            info: "yoga".into(),
            created_at: NaiveDate::from_ymd_opt(2026, 10, 16)
                .unwrap()
                .and_hms_opt(9, 0, 0)
                .unwrap(),
            registered: 2,
        }
    }

    #[test]
    fn event_list_shows_availability() {
        let text = render(&Reply::Events(vec![sample_event()]));
        assert_eq!(text, "#3 2026-10-17 18:00 | 3/5 free | yoga");
        assert_eq!(render(&Reply::Events(vec![])), "No upcoming events.");
    }

    #[test]
    fn invalid_input_repeats_the_prompt() {
        let text = render(&Reply::Invalid {
            prompt: Prompt::Time,
            error: ValidationError::MalformedTime("7pm".into()),
        });
        assert_eq!(text, "Expected a time as HH:MM, got \"7pm\"\nEnter the start time (HH:MM).");
    }

    #[test]
    fn creation_mentions_the_reminder() {
        let event = sample_event();
        let fire_at = event.starts_at() - chrono::Duration::hours(3);
        let text = render(&Reply::Completed(Completion::Created {
            event,
            reminder: ScheduleOutcome::Scheduled { fire_at },
        }));
        assert_eq!(
            text,
            "Event #3 created for 2026-10-17 18:00. Reminder set for 2026-10-17 15:00."
        );
    }

    #[test]
    fn delivery_counts() {
        let report = DeliveryReport {
            delivered: 2,
            failed: vec![(ActorId::new(9), DeliveryError::Transport("reset".into()))],
        };
        let text = render(&Reply::Completed(Completion::Broadcast {
            event_id: EventId::new(3),
            report,
        }));
        assert_eq!(text, "Message sent to 2 of 3 participants.");
    }

    #[test]
    fn field_choice_lists_editable_fields() {
        assert_eq!(
            prompt_text(&Prompt::ChooseField),
            "Which field do you want to change? \
             One of: max_participants, end_date, event_time, info."
        );
    }
}
