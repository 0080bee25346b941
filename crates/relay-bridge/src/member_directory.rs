use std::collections::HashMap;

use async_trait::async_trait;
use relay_orchestrator::MemberResolver;

/// Fixed chat-user to team-member mapping loaded from configuration.
#[derive(Debug, Clone, Default)]
pub(crate) struct MemberDirectory {
    members: HashMap<String, String>,
}

impl MemberDirectory {
    pub(crate) fn new(members: HashMap<String, String>) -> Self {
        Self { members }
    }
}

#[async_trait]
impl MemberResolver for MemberDirectory {
    async fn resolve_identity(&self, sender_id: &str) -> anyhow::Result<Option<String>> {
        Ok(self.members.get(sender_id.trim()).cloned())
    }
}
