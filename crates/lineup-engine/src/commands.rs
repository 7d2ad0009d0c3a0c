//! Host command parsing and permission policy.

use std::collections::BTreeSet;

use lineup_core::ids::ParticipantId;
use lineup_settings::HostSettings;

/// Who sent a channel message, as seen by the chat service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Requester {
    pub id: ParticipantId,
    pub is_admin: bool,
    pub roles: Vec<String>,
    pub is_bot: bool,
}

impl Requester {
    pub fn new(id: ParticipantId) -> Self {
        Self {
            id,
            is_admin: false,
            roles: Vec::new(),
            is_bot: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostCommand {
    /// Slot label the host wants to take up front.
    pub slot_label: Option<String>,
}

impl HostCommand {
    /// Parse `content` when its first word is exactly `command`.
    pub fn parse(command: &str, content: &str) -> Option<Self> {
        let mut words = content.split_whitespace();
        if words.next()? != command {
            return None;
        }
        Some(Self {
            slot_label: words.next().map(str::to_string),
        })
    }
}

#[derive(Clone, Debug)]
pub struct HostPolicy {
    allow_administrators: bool,
    allowed_roles: BTreeSet<String>,
}

impl HostPolicy {
    pub fn from_settings(settings: &HostSettings) -> Self {
        Self {
            allow_administrators: settings.allow_administrators,
            allowed_roles: settings.allowed_roles.iter().cloned().collect(),
        }
    }

    pub fn permits(&self, requester: &Requester) -> bool {
        if requester.is_bot {
            return false;
        }
        (self.allow_administrators && requester.is_admin)
            || requester.roles.iter().any(|r| self.allowed_roles.contains(r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> HostPolicy {
        HostPolicy::from_settings(&HostSettings::default())
    }

    #[test]
    fn parse_bare_command() {
        assert_eq!(
            HostCommand::parse("!hostfriendly", "!hostfriendly"),
            Some(HostCommand { slot_label: None })
        );
    }

    #[test]
    fn parse_with_label_and_extra_spaces() {
        let cmd = HostCommand::parse("!hostfriendly", "  !hostfriendly   st  extra").unwrap();
        assert_eq!(cmd.slot_label.as_deref(), Some("st"));
    }

    #[test]
    fn parse_requires_exact_first_word() {
        assert!(HostCommand::parse("!hostfriendly", "!hostfriendlyx").is_none());
        assert!(HostCommand::parse("!hostfriendly", "hey !hostfriendly").is_none());
        assert!(HostCommand::parse("!hostfriendly", "").is_none());
    }

    #[test]
    fn admins_and_roles_may_host() {
        let p = policy();
        let admin = Requester {
            is_admin: true,
            ..Requester::new(ParticipantId::from_raw("a"))
        };
        let staff = Requester {
            roles: vec!["Friendlies Department".into()],
            ..Requester::new(ParticipantId::from_raw("s"))
        };
        assert!(p.permits(&admin));
        assert!(p.permits(&staff));
        assert!(!p.permits(&Requester::new(ParticipantId::from_raw("x"))));
    }

    #[test]
    fn bots_never_host() {
        let bot = Requester {
            is_admin: true,
            is_bot: true,
            ..Requester::new(ParticipantId::from_raw("b"))
        };
        assert!(!policy().permits(&bot));
    }

    #[test]
    fn admin_flag_can_be_disabled() {
        let p = HostPolicy::from_settings(&HostSettings {
            allow_administrators: false,
            ..HostSettings::default()
        });
        let admin = Requester {
            is_admin: true,
            ..Requester::new(ParticipantId::from_raw("a"))
        };
        assert!(!p.permits(&admin));
    }
}
