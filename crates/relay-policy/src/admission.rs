use std::collections::BTreeSet;

/// Identifiers allowed through a gate. Empty means everyone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    entries: BTreeSet<String>,
}

impl AllowList {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|entry| entry.as_ref().trim().to_string())
                .filter(|entry| !entry.is_empty())
                .collect(),
        }
    }

    /// Parses a comma separated list, ignoring blanks.
    pub fn parse_csv(raw: &str) -> Self {
        Self::new(raw.split(','))
    }

    pub fn allows(&self, id: &str) -> bool {
        self.entries.is_empty() || self.entries.contains(id.trim())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    Allow { reason_code: String },
    Deny { reason_code: String },
}

impl AdmissionDecision {
    fn allow(reason_code: &str) -> Self {
        Self::Allow {
            reason_code: reason_code.to_string(),
        }
    }

    fn deny(reason_code: &str) -> Self {
        Self::Deny {
            reason_code: reason_code.to_string(),
        }
    }

    pub fn reason_code(&self) -> &str {
        match self {
            Self::Allow { reason_code } | Self::Deny { reason_code } => reason_code,
        }
    }

    pub fn as_str(&self) -> &'static str {
        if self.is_allowed() {
            "allow"
        } else {
            "deny"
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }
}

/// The facts about one inbound event that admission looks at.
#[derive(Debug, Clone, Copy)]
pub struct AdmissionRequest<'a> {
    pub conversation_id: &'a str,
    pub sender_id: &'a str,
    pub is_from_bot: bool,
    /// The bot was mentioned, or the event is a slash command or button press.
    pub addressed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct AdmissionPolicy {
    pub allowed_users: AllowList,
    pub allowed_channels: AllowList,
}

impl AdmissionPolicy {
    pub fn new(allowed_users: AllowList, allowed_channels: AllowList) -> Self {
        Self {
            allowed_users,
            allowed_channels,
        }
    }

    /// Bot filter followed by the user and channel allow-lists.
    pub fn screen_sender(&self, request: &AdmissionRequest<'_>) -> AdmissionDecision {
        if request.is_from_bot {
            return AdmissionDecision::deny("deny_bot_author");
        }
        if !self.allowed_users.allows(request.sender_id) {
            return AdmissionDecision::deny("deny_user_not_allowlisted");
        }
        if !self.allowed_channels.allows(request.conversation_id) {
            return AdmissionDecision::deny("deny_channel_not_allowlisted");
        }
        AdmissionDecision::allow("allow_sender")
    }

    /// Direct messages always pass; shared channels need the bot addressed.
    pub fn check_visibility(&self, request: &AdmissionRequest<'_>) -> AdmissionDecision {
        if is_direct_message_channel(request.conversation_id) {
            AdmissionDecision::allow("allow_direct_message")
        } else if request.addressed {
            AdmissionDecision::allow("allow_addressed")
        } else {
            AdmissionDecision::deny("deny_not_addressed")
        }
    }
}

pub fn is_direct_message_channel(conversation_id: &str) -> bool {
    conversation_id.starts_with('D')
}
