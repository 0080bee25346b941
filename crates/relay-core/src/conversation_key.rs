use std::fmt;

/// Shards per-conversation state: a conversation id plus an optional thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationKey {
    conversation_id: String,
    thread_id: Option<String>,
}

impl ConversationKey {
    pub fn new(conversation_id: impl Into<String>, thread_id: Option<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            thread_id: thread_id.filter(|thread| !thread.trim().is_empty()),
        }
    }

    /// Derives the key for an inbound message.
    ///
    /// An explicit thread wins. Outside direct messages a root message keys on
    /// its own timestamp, since replies land in that thread. Direct messages
    /// without a thread share one key per channel.
    pub fn for_message(
        conversation_id: &str,
        thread_id: Option<&str>,
        message_ts: &str,
        is_direct_message: bool,
    ) -> Self {
        let thread = match thread_id.filter(|thread| !thread.trim().is_empty()) {
            Some(thread) => Some(thread.to_string()),
            None if !is_direct_message && !message_ts.trim().is_empty() => {
                Some(message_ts.to_string())
            }
            None => None,
        };
        Self::new(conversation_id, thread)
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    /// The thread-less key for the whole conversation. Rate limits apply here.
    pub fn conversation_root(&self) -> Self {
        Self {
            conversation_id: self.conversation_id.clone(),
            thread_id: None,
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.thread_id {
            Some(thread) => write!(f, "{}:{thread}", self.conversation_id),
            None => f.write_str(&self.conversation_id),
        }
    }
}
