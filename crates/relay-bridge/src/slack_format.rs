use relay_core::truncate_text;
use relay_orchestrator::TaskOutcome;
use serde_json::{json, Value};

/// Character limit Slack enforces on a single section block.
pub(crate) const SLACK_BLOCK_TEXT_LIMIT: usize = 3_000;

const PLAN_TASK_PREFIX: &str = "PLAN-";
const TASK_SUMMARY_CHARS: usize = 200;
const PLAN_SUMMARY_CHARS: usize = 2_500;
const PROGRESS_BAR_CELLS: usize = 20;

pub(crate) fn is_plan_task(task_id: &str) -> bool {
    task_id.starts_with(PLAN_TASK_PREFIX)
}

fn button(label: &str, action_id: &str, task_id: &str, style: &str) -> Value {
    json!({
        "type": "button",
        "text": { "type": "plain_text", "text": label, "emoji": true },
        "action_id": action_id,
        "value": task_id,
        "style": style,
    })
}

fn section(text: &str) -> Value {
    json!({
        "type": "section",
        "text": { "type": "mrkdwn", "text": text },
    })
}

/// Block Kit layout for a confirmation prompt. Plans get their own action ids
/// so the button round-trips as a plan confirmation.
pub(crate) fn confirmation_blocks(task_id: &str, description: &str) -> Value {
    if is_plan_task(task_id) {
        return json!([
            {
                "type": "header",
                "text": { "type": "plain_text", "text": "📋 Implementation Plan", "emoji": true },
            },
            section(&truncate_text(description, PLAN_SUMMARY_CHARS)),
            { "type": "divider" },
            section("*Ready to execute this plan?*"),
            {
                "type": "actions",
                "block_id": format!("plan_confirm_{task_id}"),
                "elements": [
                    button("Execute Plan", "execute_plan", task_id, "primary"),
                    button("Cancel", "cancel_plan", task_id, "danger"),
                ],
            },
        ]);
    }

    json!([
        {
            "type": "header",
            "text": { "type": "plain_text", "text": "📋 Confirm Task", "emoji": true },
        },
        section(&format!(
            "*Task ID:* `{task_id}`\n\n{}",
            truncate_text(description, TASK_SUMMARY_CHARS)
        )),
        { "type": "divider" },
        {
            "type": "actions",
            "block_id": format!("task_confirm_{task_id}"),
            "elements": [
                button("Execute", "execute_task", task_id, "primary"),
                button("Cancel", "cancel_task", task_id, "danger"),
            ],
        },
    ])
}

pub(crate) fn confirmation_fallback_text(task_id: &str) -> String {
    if is_plan_task(task_id) {
        format!("📋 Plan `{task_id}` is ready. Reply *yes* to execute or *no* to cancel.")
    } else {
        format!("📋 Confirm task `{task_id}`. Reply *yes* to execute or *no* to cancel.")
    }
}

fn phase_emoji(phase: &str) -> &'static str {
    match phase {
        phase if phase.starts_with("Starting") => "🚀",
        "Branching" => "🌱",
        "Exploring" => "🔍",
        "Installing" => "📦",
        "Implementing" => "⚙️",
        "Testing" => "🧪",
        "Committing" => "💾",
        "Completed" => "✅",
        _ => "⏳",
    }
}

pub(crate) fn progress_bar(percent: u8) -> String {
    let filled = usize::from(percent.min(100)) * PROGRESS_BAR_CELLS / 100;
    format!(
        "{}{}",
        "█".repeat(filled),
        "░".repeat(PROGRESS_BAR_CELLS - filled)
    )
}

pub(crate) fn progress_text(task_id: &str, phase: &str, percent: u8, detail: &str) -> String {
    let percent = percent.min(100);
    let mut text = format!(
        "{} *{phase}* ({percent}%) `{task_id}`\n`{}`",
        phase_emoji(phase),
        progress_bar(percent)
    );
    let detail = detail.trim();
    if !detail.is_empty() {
        text.push_str("\n_");
        text.push_str(&truncate_text(detail, 200));
        text.push('_');
    }
    text
}

/// Header line for a finished task; the output follows in separate messages.
pub(crate) fn result_header(task_id: &str, outcome: &TaskOutcome) -> String {
    let mut text = if outcome.success {
        format!("✅ *Task Completed* `{task_id}`")
    } else {
        format!("❌ *Task Failed* `{task_id}`")
    };
    if let Some(link) = outcome.link.as_deref().filter(|link| !link.trim().is_empty()) {
        text.push_str(&format!("\n🔗 *Pull Request:* <{link}|View PR>"));
    }
    text
}

pub(crate) fn result_body(outcome: &TaskOutcome) -> Option<String> {
    let output = outcome.output.trim();
    if output.is_empty() {
        return None;
    }
    if outcome.success {
        Some(output.to_string())
    } else {
        Some(format!("```{output}```"))
    }
}
