use std::path::Path;

use relay_core::truncate_text;

pub const GREETING_REPLY: &str =
    "👋 Hi! I can answer questions about the codebase, research, draft plans, or run tasks. \
     Send me a request or try `/help`.";

pub const CONFIRMATION_HINT: &str = "Reply *yes* to execute or *no* to cancel.";

/// Intents answered with one read-only executor run and a direct reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOnlyKind {
    Question,
    Research,
    Planning,
    Chat,
}

impl ReadOnlyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Question => "question",
            Self::Research => "research",
            Self::Planning => "planning",
            Self::Chat => "chat",
        }
    }

    pub fn task_id_prefix(self) -> &'static str {
        match self {
            Self::Question => "Q",
            Self::Research => "RES",
            Self::Planning => "PLAN",
            Self::Chat => "CHAT",
        }
    }

    pub fn acknowledgement(self) -> &'static str {
        match self {
            Self::Question => "🔍 Looking into that...",
            Self::Research => "🔬 Researching...",
            Self::Planning => "📐 Drafting a plan...",
            Self::Chat => "💬 Thinking...",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Question => "Question",
            Self::Research => "Research",
            Self::Planning => "Plan",
            Self::Chat => "Chat",
        }
    }

    pub fn title(self, request: &str) -> String {
        format!("{}: {}", self.label(), truncate_text(request, 40))
    }

    pub fn failed_reply(self, detail: &str) -> String {
        format!("❌ {} failed: {detail}", self.label())
    }

    pub fn timed_out_reply(self) -> &'static str {
        match self {
            Self::Question => "⏱ Question timed out. Try asking something more specific.",
            Self::Research => "⏱ Research timed out. Try narrowing the scope.",
            Self::Planning => "⏱ Planning timed out. Try a smaller request.",
            Self::Chat => "⏱ Chat reply timed out. Try again in a moment.",
        }
    }

    pub fn prompt(self, request: &str, project_path: &Path) -> String {
        match self {
            Self::Question => question_prompt(request),
            Self::Research => research_prompt(request),
            Self::Planning => planning_prompt(request),
            Self::Chat => chat_prompt(request, project_path),
        }
    }
}

fn question_prompt(question: &str) -> String {
    format!(
        "Answer this question about the codebase. Read and analyze only; do not modify any files.\n\n\
         Question: {question}\n\n\
         Keep it short: look at no more than 5-10 files and give a direct answer. \
         If the question is too broad, ask for clarification instead."
    )
}

fn research_prompt(topic: &str) -> String {
    format!(
        "Research and analyze: {topic}\n\n\
         Structure the findings as:\n\
         - Executive summary\n\
         - Key findings\n\
         - Relevant code and files\n\
         - Recommendations\n\n\
         This is read-only research. Do not modify any files."
    )
}

fn planning_prompt(request: &str) -> String {
    format!(
        "Create an implementation plan for: {request}\n\n\
         Explore the codebase and propose:\n\
         1. Summary of the approach\n\
         2. Files to modify or create\n\
         3. Implementation phases, step by step\n\
         4. Risks and open considerations\n\n\
         Only explore and plan. Do not modify any files."
    )
}

fn chat_prompt(message: &str, project_path: &Path) -> String {
    format!(
        "You are a conversational assistant for the codebase at {}.\n\n\
         The user wants a conversation, not a task. Answer helpfully and keep it under 500 words. \
         You may reference the project but must not modify any files.\n\n\
         User message: {message}",
        project_path.display()
    )
}

/// Task description stored for a confirmed plan.
pub fn plan_task_description(plan: &str, request: &str) -> String {
    format!("## Implementation Plan\n\n{plan}\n\n## Original Request\n\n{request}")
}

pub fn pending_refusal(task_id: &str) -> String {
    format!("⚠️ You already have a pending task: `{task_id}`\n\n{CONFIRMATION_HINT}")
}

pub fn confirmation_fallback(task_id: &str, description: &str) -> String {
    format!("📋 Task `{task_id}`\n\n{description}\n\n{CONFIRMATION_HINT}")
}

pub fn task_rate_limited() -> &'static str {
    "⏳ Task limit reached for this conversation. Please wait before requesting another task."
}

pub fn pending_discarded(task_id: &str) -> String {
    format!("❌ Task `{task_id}` cancelled.")
}

pub fn still_running(running_task_id: &str, pending_task_id: &str) -> String {
    format!(
        "⚠️ Task `{running_task_id}` is still running. `{pending_task_id}` stays pending until it finishes."
    )
}

pub fn pending_expired(task_id: &str, ttl: &str) -> String {
    format!("⏰ Pending task `{task_id}` expired after {ttl} without confirmation. Send a new request.")
}

pub fn task_failed(task_id: &str, detail: &str) -> String {
    format!("❌ Task `{task_id}` failed: {detail}")
}

pub fn task_timed_out(task_id: &str, elapsed: &str) -> String {
    format!("⏱ Task `{task_id}` timed out after {elapsed}.")
}

pub fn task_cancelled(task_id: &str) -> String {
    format!("🛑 Task `{task_id}` was cancelled.")
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{plan_task_description, ReadOnlyKind};

    #[test]
    fn unit_read_only_prompts_forbid_modifications() {
        for kind in [
            ReadOnlyKind::Question,
            ReadOnlyKind::Research,
            ReadOnlyKind::Planning,
            ReadOnlyKind::Chat,
        ] {
            let prompt = kind.prompt("how does login work", Path::new("/srv/web"));
            assert!(prompt.contains("how does login work"), "{kind:?}");
            assert!(prompt.contains("not modify any files"), "{kind:?}");
        }
    }

    #[test]
    fn unit_plan_description_keeps_plan_and_request() {
        let description = plan_task_description("1. add route", "add a logout button");
        assert!(description.starts_with("## Implementation Plan\n\n1. add route"));
        assert!(description.ends_with("## Original Request\n\nadd a logout button"));
    }
}
