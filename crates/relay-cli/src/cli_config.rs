use std::{collections::HashMap, path::PathBuf, time::Duration};

use anyhow::{anyhow, bail, Context, Result};
use relay_history::HistoryConfig;
use relay_orchestrator::{OrchestratorConfig, ProgressThrottleConfig, Project};
use relay_policy::{AdmissionPolicy, AllowList, RateLimitConfig};
use relay_socket::{ManagerConfig, SessionConfig};

use crate::Cli;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierSettings {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorSettings {
    pub command: String,
    pub args: Vec<String>,
}

/// Parses a `name=path` project entry.
pub fn parse_project_entry(raw: &str) -> Result<Project> {
    let (name, path) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("project entry '{raw}' must use the form name=path"))?;
    let (name, path) = (name.trim(), path.trim());
    if name.is_empty() || path.is_empty() {
        bail!("project entry '{raw}' needs both a name and a path");
    }
    Ok(Project::new(name, PathBuf::from(path)))
}

/// Parses a `user_id=member_id` mapping entry.
pub fn parse_member_entry(raw: &str) -> Result<(String, String)> {
    let (user_id, member_id) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("member entry '{raw}' must use the form user_id=member_id"))?;
    let (user_id, member_id) = (user_id.trim(), member_id.trim());
    if user_id.is_empty() || member_id.is_empty() {
        bail!("member entry '{raw}' needs both a user id and a member id");
    }
    Ok((user_id.to_string(), member_id.to_string()))
}

fn non_empty_token(value: Option<&str>, flag: &str) -> Result<String> {
    value
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("{flag} is required"))
}

impl Cli {
    /// Rejects settings the runtime cannot honour.
    pub fn validate(&self) -> Result<()> {
        self.slack_tokens()?;
        if self.ping_interval_seconds >= self.pong_wait_seconds {
            bail!(
                "--ping-interval-seconds ({}) must be less than --pong-wait-seconds ({})",
                self.ping_interval_seconds,
                self.pong_wait_seconds
            );
        }
        if self.reconnect_initial_backoff_ms > self.reconnect_max_backoff_ms {
            bail!("--reconnect-initial-backoff-ms must not exceed --reconnect-max-backoff-ms");
        }
        if self.rate_limit_enabled
            && (self.rate_limit_messages_per_minute == 0
                || self.rate_limit_tasks_per_hour == 0
                || self.rate_limit_burst == 0)
        {
            bail!("rate limit rates and burst must be greater than 0 when --rate-limit-enabled is true");
        }
        if self.executor_command.trim().is_empty() {
            bail!("--executor-command must not be empty");
        }
        if self.task_id_prefix.trim().is_empty() {
            bail!("--task-id-prefix must not be empty");
        }
        self.projects().context("invalid --project entry")?;
        self.member_map().context("invalid --member entry")?;
        self.executor_settings()?;
        Ok(())
    }

    /// `(app_token, bot_token)`.
    pub fn slack_tokens(&self) -> Result<(String, String)> {
        let app_token = non_empty_token(self.slack_app_token.as_deref(), "--slack-app-token")?;
        let bot_token = non_empty_token(self.slack_bot_token.as_deref(), "--slack-bot-token")?;
        Ok((app_token, bot_token))
    }

    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            enabled: self.rate_limit_enabled,
            messages_per_minute: self.rate_limit_messages_per_minute,
            tasks_per_hour: self.rate_limit_tasks_per_hour,
            burst: self.rate_limit_burst,
        }
    }

    pub fn admission_policy(&self) -> AdmissionPolicy {
        AdmissionPolicy::new(
            AllowList::parse_csv(&self.allowed_users),
            AllowList::parse_csv(&self.allowed_channels),
        )
    }

    pub fn history_config(&self) -> HistoryConfig {
        HistoryConfig {
            max_size: self.history_max_size,
            ttl: Duration::from_secs(self.history_ttl_seconds),
            ..HistoryConfig::default()
        }
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            initial_backoff: Duration::from_millis(self.reconnect_initial_backoff_ms),
            max_backoff: Duration::from_millis(self.reconnect_max_backoff_ms),
            session: SessionConfig {
                ping_interval: Duration::from_secs(self.ping_interval_seconds),
                pong_wait: Duration::from_secs(self.pong_wait_seconds),
                ..SessionConfig::default()
            },
            ..ManagerConfig::default()
        }
    }

    pub fn projects(&self) -> Result<Vec<Project>> {
        self.projects
            .iter()
            .filter(|raw| !raw.trim().is_empty())
            .map(|raw| parse_project_entry(raw))
            .collect()
    }

    /// Empty when no mapping is configured, which disables member resolution.
    pub fn member_map(&self) -> Result<HashMap<String, String>> {
        self.members
            .iter()
            .filter(|raw| !raw.trim().is_empty())
            .map(|raw| parse_member_entry(raw))
            .collect()
    }

    pub fn orchestrator_config(&self) -> Result<OrchestratorConfig> {
        Ok(OrchestratorConfig {
            task_id_prefix: self.task_id_prefix.trim().to_string(),
            default_project: Project::new(
                self.default_project_name.trim(),
                self.default_project_path.clone(),
            ),
            projects: self.projects()?,
            classifier_timeout: Duration::from_millis(self.classifier_timeout_ms),
            task_timeout: Duration::from_secs(self.task_timeout_seconds),
            pending_ttl: Duration::from_secs(self.pending_ttl_seconds),
            progress: ProgressThrottleConfig {
                min_delta: self.progress_min_delta,
                min_interval: Duration::from_millis(self.progress_min_interval_ms),
            },
            ..OrchestratorConfig::default()
        })
    }

    /// `None` when no API key is configured, which disables the classifier.
    pub fn classifier_settings(&self) -> Option<ClassifierSettings> {
        let api_key = self
            .classifier_api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())?;
        Some(ClassifierSettings {
            api_key: api_key.to_string(),
            api_base: self.classifier_api_base.trim_end_matches('/').to_string(),
            model: self.classifier_model.clone(),
            request_timeout_ms: self.request_timeout_ms,
        })
    }

    pub fn executor_settings(&self) -> Result<ExecutorSettings> {
        let args = shell_words::split(&self.executor_args)
            .with_context(|| format!("invalid --executor-args '{}'", self.executor_args))?;
        Ok(ExecutorSettings {
            command: self.executor_command.trim().to_string(),
            args,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, time::Duration};

    use clap::Parser;

    use super::{parse_member_entry, parse_project_entry};
    use crate::Cli;

    fn parse(extra: &[&str]) -> Cli {
        let mut args = vec![
            "relay-bridge",
            "--slack-app-token",
            "xapp-test",
            "--slack-bot-token",
            "xoxb-test",
        ];
        args.extend_from_slice(extra);
        Cli::try_parse_from(args).expect("parse cli")
    }

    #[test]
    fn unit_defaults_validate_and_convert() {
        let cli = parse(&[]);
        cli.validate().expect("defaults are valid");

        let manager = cli.manager_config();
        assert_eq!(manager.initial_backoff, Duration::from_secs(1));
        assert_eq!(manager.max_backoff, Duration::from_secs(30));
        assert_eq!(manager.session.ping_interval, Duration::from_secs(30));
        assert_eq!(manager.session.pong_wait, Duration::from_secs(60));

        let rate = cli.rate_limit_config();
        assert!(rate.enabled);
        assert_eq!(
            (rate.messages_per_minute, rate.tasks_per_hour, rate.burst),
            (20, 10, 5)
        );
        assert_eq!(cli.history_config().max_size, 10);
        assert!(cli.classifier_settings().is_none());
        let executor = cli.executor_settings().expect("executor settings");
        assert_eq!(executor.command, "claude");
        assert_eq!(executor.args, vec!["-p".to_string()]);
    }

    #[test]
    fn functional_projects_and_allow_lists_are_parsed() {
        let cli = parse(&[
            "--project",
            "web=/srv/web,api=/srv/api",
            "--allowed-users",
            "U1, U2",
            "--classifier-api-key",
            "sk-test",
        ]);
        cli.validate().expect("valid");

        let config = cli.orchestrator_config().expect("orchestrator config");
        let names = config
            .projects
            .iter()
            .map(|project| project.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["web", "api"]);
        assert_eq!(config.projects[1].path, PathBuf::from("/srv/api"));
        assert_eq!(config.default_project.path, PathBuf::from("."));

        let policy = cli.admission_policy();
        assert!(policy.allowed_users.allows("U2"));
        assert!(!policy.allowed_users.allows("U3"));
        assert!(policy.allowed_channels.is_empty());
        assert_eq!(
            cli.classifier_settings().map(|settings| settings.api_key),
            Some("sk-test".to_string())
        );
    }

    #[test]
    fn regression_validate_rejects_inconsistent_settings() {
        let cases: &[&[&str]] = &[
            &["--ping-interval-seconds", "60", "--pong-wait-seconds", "60"],
            &["--rate-limit-burst", "0"],
            &["--project", "broken"],
            &["--reconnect-initial-backoff-ms", "5000", "--reconnect-max-backoff-ms", "1000"],
            &["--executor-args", "-p 'unterminated"],
            &["--member", "U1"],
        ];
        for extra in cases {
            let cli = parse(extra);
            assert!(cli.validate().is_err(), "{extra:?} should be rejected");
        }

        let disabled = parse(&["--rate-limit-enabled", "false", "--rate-limit-burst", "0"]);
        disabled
            .validate()
            .expect("zero rates are fine when disabled");
    }

    #[test]
    fn regression_missing_or_blank_tokens_are_rejected() {
        let cli = Cli::try_parse_from(["relay-bridge", "--slack-bot-token", "xoxb-test"])
            .expect("parse cli");
        let error = cli.validate().expect_err("missing app token");
        assert!(error.to_string().contains("--slack-app-token"));

        let blank = Cli::try_parse_from([
            "relay-bridge",
            "--slack-app-token",
            "xapp-test",
            "--slack-bot-token",
            "  ",
        ])
        .expect("parse cli");
        assert!(blank.validate().is_err());
    }

    #[test]
    fn functional_executor_args_respect_shell_quoting() {
        let cli = parse(&[
            "--executor-args",
            "-p --append-system-prompt 'stay in the repo'",
        ]);
        let executor = cli.executor_settings().expect("executor settings");
        assert_eq!(
            executor.args,
            vec!["-p", "--append-system-prompt", "stay in the repo"]
        );
    }

    #[test]
    fn unit_parse_project_entry_requires_name_and_path() {
        let project = parse_project_entry(" web = /srv/web ").expect("valid entry");
        assert_eq!(project.name, "web");
        assert_eq!(project.path, PathBuf::from("/srv/web"));
        assert!(parse_project_entry("=/srv/web").is_err());
        assert!(parse_project_entry("web=").is_err());
        assert!(parse_project_entry("web").is_err());
    }

    #[test]
    fn unit_member_map_collects_entries() {
        let cli = parse(&["--member", "U1=alice, U2 = bob"]);
        let members = cli.member_map().expect("member map");
        assert_eq!(members.get("U1").map(String::as_str), Some("alice"));
        assert_eq!(members.get("U2").map(String::as_str), Some("bob"));
        assert!(parse(&[]).member_map().expect("empty").is_empty());
        assert!(parse_member_entry("U1=").is_err());
    }
}
