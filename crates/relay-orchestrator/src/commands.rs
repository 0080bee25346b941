use std::{path::PathBuf, time::Instant};

use relay_core::format_elapsed;

use crate::state::{PendingTask, RunningTaskInfo};

const KNOWN_COMMANDS: &[&str] = &["help", "status", "queue", "switch", "cancel"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub name: String,
    pub path: PathBuf,
}

impl Project {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Status,
    Queue,
    Switch(Option<String>),
    Cancel(Option<String>),
    Unknown(String),
}

/// Parses `/status`, `status`, or a slash command such as `/relay status`
/// whose first word is the bot's own command name.
pub fn parse_command(text: &str) -> Command {
    let tokens = text
        .trim()
        .trim_start_matches('/')
        .split_whitespace()
        .collect::<Vec<_>>();
    let Some(first) = tokens.first() else {
        return Command::Help;
    };
    let (name, args) = if KNOWN_COMMANDS.contains(&first.to_ascii_lowercase().as_str()) {
        (first.to_ascii_lowercase(), &tokens[1..])
    } else if let Some(second) = tokens
        .get(1)
        .filter(|second| KNOWN_COMMANDS.contains(&second.to_ascii_lowercase().as_str()))
    {
        (second.to_ascii_lowercase(), &tokens[2..])
    } else if let Some(second) = tokens.get(1) {
        // the first word is the bot's own command, e.g. `/relay deploy now`
        return Command::Unknown(second.to_ascii_lowercase());
    } else {
        // bare bot command, e.g. `/relay`
        return Command::Help;
    };
    let argument = args.first().map(|arg| (*arg).to_string());
    match name.as_str() {
        "help" => Command::Help,
        "status" => Command::Status,
        "queue" => Command::Queue,
        "switch" => Command::Switch(argument),
        "cancel" => Command::Cancel(argument),
        other => Command::Unknown(other.to_string()),
    }
}

pub fn render_help() -> String {
    [
        "*Commands*",
        "`/help` show this message",
        "`/status` current project and task counts",
        "`/queue` running and pending tasks in this conversation",
        "`/switch [project]` list projects or switch the active one",
        "`/cancel [task-id]` cancel the pending or running task",
        "",
        "Anything else is treated as a task, question, or chat. Tasks need a yes/no confirmation.",
    ]
    .join("\n")
}

pub fn render_status(project: &Project, running: usize, pending: usize) -> String {
    format!(
        "*Project:* {} (`{}`)\n*Running tasks:* {running}\n*Pending tasks:* {pending}",
        project.name,
        project.path.display()
    )
}

pub fn render_queue(running: &[RunningTaskInfo], pending: &[PendingTask], now: Instant) -> String {
    if running.is_empty() && pending.is_empty() {
        return "Queue is empty.".to_string();
    }
    let mut lines = Vec::new();
    for task in running {
        let elapsed = format_elapsed(now.saturating_duration_since(task.started_at));
        let suffix = if task.cancel_requested {
            ", stopping"
        } else {
            ""
        };
        lines.push(format!("🔄 Running: `{}` ({elapsed}{suffix})", task.task_id));
    }
    for task in pending {
        let age = format_elapsed(now.saturating_duration_since(task.created_at));
        lines.push(format!(
            "⏳ Pending {}: `{}` (waiting {age})",
            task.kind.as_str(),
            task.task_id
        ));
    }
    lines.join("\n")
}

pub fn render_projects(projects: &[Project], active: &Project) -> String {
    if projects.is_empty() {
        return format!(
            "No projects configured. Using `{}` ({}).",
            active.name,
            active.path.display()
        );
    }
    let mut lines = vec!["*Projects*".to_string()];
    for project in projects {
        let marker = if project.name == active.name {
            "▶"
        } else {
            "•"
        };
        lines.push(format!(
            "{marker} {} (`{}`)",
            project.name,
            project.path.display()
        ));
    }
    lines.push("Use `/switch <name>` to change.".to_string());
    lines.join("\n")
}

pub fn find_project<'a>(projects: &'a [Project], name: &str) -> Option<&'a Project> {
    projects
        .iter()
        .find(|project| project.name.eq_ignore_ascii_case(name.trim()))
}

#[cfg(test)]
mod tests {
    use std::{
        path::PathBuf,
        time::{Duration, Instant},
    };

    use relay_core::ConversationKey;

    use super::{
        find_project, parse_command, render_projects, render_queue, render_status, Command,
        Project,
    };
    use crate::state::{PendingKind, PendingTask, RunningTaskInfo};

    #[test]
    fn unit_parse_command_accepts_plain_and_prefixed_forms() {
        assert_eq!(parse_command("/status"), Command::Status);
        assert_eq!(parse_command("/relay queue"), Command::Queue);
        assert_eq!(parse_command("/relay"), Command::Help);
        assert_eq!(
            parse_command("/switch Web"),
            Command::Switch(Some("Web".to_string()))
        );
        assert_eq!(parse_command("/cancel"), Command::Cancel(None));
    }

    #[test]
    fn regression_unknown_subcommand_is_named_instead_of_bot_command() {
        assert_eq!(
            parse_command("/relay deploy now"),
            Command::Unknown("deploy".to_string())
        );
        assert_eq!(
            parse_command("/relay Deploy"),
            Command::Unknown("deploy".to_string())
        );
    }

    #[test]
    fn unit_find_project_is_case_insensitive() {
        let projects = vec![Project::new("web", "/srv/web"), Project::new("api", "/srv/api")];
        assert_eq!(
            find_project(&projects, "API").map(|project| project.path.clone()),
            Some(PathBuf::from("/srv/api"))
        );
        assert!(find_project(&projects, "mobile").is_none());
    }

    #[test]
    fn functional_render_queue_reports_running_and_pending() {
        let now = Instant::now();
        let key = ConversationKey::new("C1", None);
        let running = RunningTaskInfo {
            task_id: "TASK-1".to_string(),
            key: key.clone(),
            started_at: now,
            cancel_requested: false,
        };
        let pending = PendingTask {
            task_id: "TASK-2".to_string(),
            description: "add tests".to_string(),
            key,
            thread_id: None,
            sender_id: "U1".to_string(),
            created_at: now,
            kind: PendingKind::Plan,
        };

        let rendered = render_queue(&[running], &[pending], now + Duration::from_secs(75));
        assert!(rendered.contains("`TASK-1` (1m 15s)"));
        assert!(rendered.contains("Pending plan: `TASK-2`"));
        assert_eq!(render_queue(&[], &[], now), "Queue is empty.");
    }

    #[test]
    fn unit_render_status_and_projects_mark_active_project() {
        let web = Project::new("web", "/srv/web");
        let projects = vec![web.clone(), Project::new("api", "/srv/api")];
        assert!(render_status(&web, 1, 2).contains("*Running tasks:* 1"));
        let listing = render_projects(&projects, &web);
        assert!(listing.contains("▶ web"));
        assert!(listing.contains("• api"));
    }
}
