use std::collections::HashSet;

use tracing::warn;

use rollcall_core::ActorId;

use crate::action::Action;
use crate::error::ServerError;

/// Static allow-list of privileged actors.
#[derive(Clone, Debug, Default)]
pub struct AccessPolicy {
    admins: HashSet<ActorId>,
}

impl AccessPolicy {
    pub fn new(admins: impl IntoIterator<Item = ActorId>) -> Self {
        Self {
            admins: admins.into_iter().collect(),
        }
    }

    pub fn is_admin(&self, actor: ActorId) -> bool {
        self.admins.contains(&actor)
    }

    pub fn admins(&self) -> Vec<ActorId> {
        let mut ids: Vec<ActorId> = self.admins.iter().copied().collect();
        ids.sort();
        ids
    }

    pub fn check(&self, actor: ActorId, action: &Action) -> Result<(), ServerError> {
        if action.requires_admin() && !self.is_admin(actor) {
            warn!(actor_id = %actor, action = action.name(), "privileged action denied");
            return Err(ServerError::Forbidden {
                actor,
                action: action.name(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_admins_pass_privileged_actions() {
        let policy = AccessPolicy::new([ActorId::new(1)]);
        assert!(policy.check(ActorId::new(1), &Action::CreateEvent).is_ok());
        assert!(matches!(
            policy.check(ActorId::new(2), &Action::CreateEvent),
            Err(ServerError::Forbidden { action: "create_event", .. })
        ));
        assert!(policy.check(ActorId::new(2), &Action::ListEvents).is_ok());
    }

    #[test]
    fn empty_policy_has_no_admins() {
        let policy = AccessPolicy::default();
        assert!(!policy.is_admin(ActorId::new(1)));
        assert!(policy.admins().is_empty());
    }
}
