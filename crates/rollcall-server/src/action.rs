//! Inbound actor actions.
//!
//! One JSON object per action:
//! `{"actor": 42, "name": "Ann", "action": {"type": "register", "event_id": 3}}`

use serde::{Deserialize, Serialize};

use rollcall_core::{ActorId, EditableField, EventId};

use crate::error::ServerError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    // Participant actions
    ListEvents,
    Register { event_id: EventId },
    Unregister { event_id: EventId },
    MyEvents,

    // Organizer actions
    Participants { event_id: EventId },
    AdminEvents,
    CreateEvent,
    EditEvent { event_id: EventId },
    DeleteEvent { event_id: EventId },
    Broadcast { event_id: EventId },
    ShareLink { event_id: EventId },

    // Workflow input
    Input { text: String },
    ChooseField { field: EditableField },
    Confirm { yes: bool },
    Cancel,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ListEvents => "list_events",
            Self::Register { .. } => "register",
            Self::Unregister { .. } => "unregister",
            Self::MyEvents => "my_events",
            Self::Participants { .. } => "participants",
            Self::AdminEvents => "admin_events",
            Self::CreateEvent => "create_event",
            Self::EditEvent { .. } => "edit_event",
            Self::DeleteEvent { .. } => "delete_event",
            Self::Broadcast { .. } => "broadcast",
            Self::ShareLink { .. } => "share_link",
            Self::Input { .. } => "input",
            Self::ChooseField { .. } => "choose_field",
            Self::Confirm { .. } => "confirm",
            Self::Cancel => "cancel",
        }
    }

    /// Whether only privileged actors may perform this action. Workflow
    /// input is not gated here: only organizers can have a workflow open.
    pub fn requires_admin(&self) -> bool {
        matches!(
            self,
            Self::Participants { .. }
                | Self::AdminEvents
                | Self::CreateEvent
                | Self::EditEvent { .. }
                | Self::DeleteEvent { .. }
                | Self::Broadcast { .. }
                | Self::ShareLink { .. }
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inbound {
    pub actor: ActorId,
    /// Display name reported by the messaging platform.
    #[serde(default)]
    pub name: String,
    pub action: Action,
}

impl Inbound {
    pub fn new(actor: ActorId, name: impl Into<String>, action: Action) -> Self {
        Self {
            actor,
            name: name.into(),
            action,
        }
    }

    pub fn parse(line: &str) -> Result<Self, ServerError> {
        serde_json::from_str(line).map_err(|e| ServerError::Malformed(e.to_string()))
    }

    /// Name stored with a registration. Falls back to the actor id.
    pub fn display_name(&self) -> String {
        let trimmed = self.name.trim();
        if trimmed.is_empty() {
            self.actor.to_string()
        } else {
            trimmed.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_action() {
        let line = r#"{"actor":42,"name":"Ann","action":{"type":"register","event_id":3}}"#;
        let inbound = Inbound::parse(line).unwrap();
        assert_eq!(inbound.actor, ActorId::new(42));
        assert_eq!(
            inbound.action,
            Action::Register {
                event_id: EventId::new(3)
            }
        );
    }

    #[test]
    fn parses_unit_and_field_actions() {
        let inbound = Inbound::parse(r#"{"actor":1,"action":{"type":"create_event"}}"#).unwrap();
        assert_eq!(inbound.action, Action::CreateEvent);
        assert_eq!(inbound.display_name(), "1");

        let line = r#"{"actor":1,"action":{"type":"choose_field","field":"event_time"}}"#;
        let inbound = Inbound::parse(line).unwrap();
        assert_eq!(
            inbound.action,
            Action::ChooseField {
                field: EditableField::EventTime
            }
        );
    }

    #[test]
    fn rejects_unknown_action() {
        let err = Inbound::parse(r#"{"actor":1,"action":{"type":"drop_table"}}"#).unwrap_err();
        assert!(matches!(err, ServerError::Malformed(_)));
        assert!(Inbound::parse("not json").is_err());
    }

    #[test]
    fn admin_gating() {
        assert!(Action::CreateEvent.requires_admin());
        assert!(Action::Participants {
            event_id: EventId::new(1)
        }
        .requires_admin());
        assert!(!Action::ListEvents.requires_admin());
        assert!(!Action::Input { text: "2".into() }.requires_admin());
    }
}
