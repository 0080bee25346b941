use std::path::PathBuf;

use clap::{ArgAction, Parser};

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_percent(value: &str) -> Result<u8, String> {
    let parsed = value
        .parse::<u8>()
        .map_err(|error| format!("failed to parse percent: {error}"))?;
    if !(1..=100).contains(&parsed) {
        return Err("value must be in range 1..=100".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Clone, Parser)]
#[command(
    name = "relay-bridge",
    about = "Slack Socket Mode bridge that turns chat requests into confirmed executor runs",
    version
)]
pub struct Cli {
    #[arg(
        long = "slack-app-token",
        env = "RELAY_SLACK_APP_TOKEN",
        hide_env_values = true,
        help = "Slack Socket Mode app token (xapp-...)"
    )]
    pub slack_app_token: Option<String>,

    #[arg(
        long = "slack-bot-token",
        env = "RELAY_SLACK_BOT_TOKEN",
        hide_env_values = true,
        help = "Slack bot token for Web API calls (xoxb-...)"
    )]
    pub slack_bot_token: Option<String>,

    #[arg(
        long = "slack-api-base",
        env = "RELAY_SLACK_API_BASE",
        default_value = "https://slack.com/api",
        help = "Slack Web API base URL"
    )]
    pub slack_api_base: String,

    #[arg(
        long = "slack-bot-user-id",
        env = "RELAY_SLACK_BOT_USER_ID",
        help = "Bot user id; resolved through auth.test when omitted"
    )]
    pub slack_bot_user_id: Option<String>,

    #[arg(
        long = "allowed-users",
        env = "RELAY_ALLOWED_USERS",
        default_value = "",
        help = "Comma-separated user ids allowed to talk to the bot (empty allows everyone)"
    )]
    pub allowed_users: String,

    #[arg(
        long = "allowed-channels",
        env = "RELAY_ALLOWED_CHANNELS",
        default_value = "",
        help = "Comma-separated conversation ids the bot serves (empty allows every conversation)"
    )]
    pub allowed_channels: String,

    #[arg(
        long = "rate-limit-enabled",
        env = "RELAY_RATE_LIMIT_ENABLED",
        default_value_t = true,
        action = ArgAction::Set,
        help = "Enable per-conversation message and task rate limiting"
    )]
    pub rate_limit_enabled: bool,

    #[arg(
        long = "rate-limit-messages-per-minute",
        env = "RELAY_RATE_LIMIT_MESSAGES_PER_MINUTE",
        default_value_t = 20,
        help = "Sustained inbound message rate per conversation"
    )]
    pub rate_limit_messages_per_minute: u32,

    #[arg(
        long = "rate-limit-tasks-per-hour",
        env = "RELAY_RATE_LIMIT_TASKS_PER_HOUR",
        default_value_t = 10,
        help = "Sustained task request rate per conversation"
    )]
    pub rate_limit_tasks_per_hour: u32,

    #[arg(
        long = "rate-limit-burst",
        env = "RELAY_RATE_LIMIT_BURST",
        default_value_t = 5,
        help = "Bucket capacity; each bucket holds min(rate, burst) tokens"
    )]
    pub rate_limit_burst: u32,

    #[arg(
        long = "history-max-size",
        env = "RELAY_HISTORY_MAX_SIZE",
        default_value_t = 10,
        value_parser = parse_positive_usize,
        help = "Messages kept per conversation for classification context"
    )]
    pub history_max_size: usize,

    #[arg(
        long = "history-ttl-seconds",
        env = "RELAY_HISTORY_TTL_SECONDS",
        default_value_t = 3_600,
        value_parser = parse_positive_u64,
        help = "Idle time after which a conversation's history is dropped"
    )]
    pub history_ttl_seconds: u64,

    #[arg(
        long = "reconnect-initial-backoff-ms",
        env = "RELAY_RECONNECT_INITIAL_BACKOFF_MS",
        default_value_t = 1_000,
        value_parser = parse_positive_u64,
        help = "First reconnect delay after a transient Socket Mode failure"
    )]
    pub reconnect_initial_backoff_ms: u64,

    #[arg(
        long = "reconnect-max-backoff-ms",
        env = "RELAY_RECONNECT_MAX_BACKOFF_MS",
        default_value_t = 30_000,
        value_parser = parse_positive_u64,
        help = "Ceiling for the doubling reconnect delay"
    )]
    pub reconnect_max_backoff_ms: u64,

    #[arg(
        long = "ping-interval-seconds",
        env = "RELAY_PING_INTERVAL_SECONDS",
        default_value_t = 30,
        value_parser = parse_positive_u64,
        help = "Keepalive ping interval; must be below --pong-wait-seconds"
    )]
    pub ping_interval_seconds: u64,

    #[arg(
        long = "pong-wait-seconds",
        env = "RELAY_PONG_WAIT_SECONDS",
        default_value_t = 60,
        value_parser = parse_positive_u64,
        help = "Liveness deadline; a session with no inbound frame for this long is dropped"
    )]
    pub pong_wait_seconds: u64,

    #[arg(
        long = "executor-command",
        env = "RELAY_EXECUTOR_COMMAND",
        default_value = "claude",
        help = "Program run for every task; the prompt is appended as the last argument"
    )]
    pub executor_command: String,

    #[arg(
        long = "executor-args",
        env = "RELAY_EXECUTOR_ARGS",
        allow_hyphen_values = true,
        default_value = "-p",
        help = "Shell-quoted arguments passed to the executor command before the prompt"
    )]
    pub executor_args: String,

    #[arg(
        long = "default-project-name",
        env = "RELAY_DEFAULT_PROJECT_NAME",
        default_value = "default",
        help = "Name shown for the default project"
    )]
    pub default_project_name: String,

    #[arg(
        long = "default-project-path",
        env = "RELAY_DEFAULT_PROJECT_PATH",
        default_value = ".",
        help = "Working directory used when a conversation has not switched projects"
    )]
    pub default_project_path: PathBuf,

    #[arg(
        long = "project",
        env = "RELAY_PROJECTS",
        value_delimiter = ',',
        help = "Switchable project as name=path; repeat or comma-separate"
    )]
    pub projects: Vec<String>,

    #[arg(
        long = "member",
        env = "RELAY_MEMBERS",
        value_delimiter = ',',
        help = "Chat user to team member mapping as user_id=member_id; repeat or comma-separate"
    )]
    pub members: Vec<String>,

    #[arg(
        long = "task-id-prefix",
        env = "RELAY_TASK_ID_PREFIX",
        default_value = "TASK",
        help = "Prefix for generated task ids"
    )]
    pub task_id_prefix: String,

    #[arg(
        long = "task-timeout-seconds",
        env = "RELAY_TASK_TIMEOUT_SECONDS",
        default_value_t = 1_800,
        value_parser = parse_positive_u64,
        help = "Upper bound for a confirmed task run"
    )]
    pub task_timeout_seconds: u64,

    #[arg(
        long = "pending-ttl-seconds",
        env = "RELAY_PENDING_TTL_SECONDS",
        default_value_t = 300,
        value_parser = parse_positive_u64,
        help = "Unconfirmed tasks older than this are expired"
    )]
    pub pending_ttl_seconds: u64,

    #[arg(
        long = "progress-min-delta",
        env = "RELAY_PROGRESS_MIN_DELTA",
        default_value_t = 50,
        value_parser = parse_percent,
        help = "Percent points between progress updates within one phase"
    )]
    pub progress_min_delta: u8,

    #[arg(
        long = "progress-min-interval-ms",
        env = "RELAY_PROGRESS_MIN_INTERVAL_MS",
        default_value_t = 3_000,
        help = "Time after which any progress report is forwarded"
    )]
    pub progress_min_interval_ms: u64,

    #[arg(
        long = "classifier-api-key",
        env = "RELAY_CLASSIFIER_API_KEY",
        hide_env_values = true,
        help = "Anthropic API key; enables model-based intent classification"
    )]
    pub classifier_api_key: Option<String>,

    #[arg(
        long = "classifier-api-base",
        env = "RELAY_CLASSIFIER_API_BASE",
        default_value = "https://api.anthropic.com/v1",
        help = "Anthropic API base URL"
    )]
    pub classifier_api_base: String,

    #[arg(
        long = "classifier-model",
        env = "RELAY_CLASSIFIER_MODEL",
        default_value = "claude-3-5-haiku-latest",
        help = "Model used for intent classification"
    )]
    pub classifier_model: String,

    #[arg(
        long = "classifier-timeout-ms",
        env = "RELAY_CLASSIFIER_TIMEOUT_MS",
        default_value_t = 2_000,
        value_parser = parse_positive_u64,
        help = "Time the classifier gets before the pattern engine decides"
    )]
    pub classifier_timeout_ms: u64,

    #[arg(
        long = "request-timeout-ms",
        env = "RELAY_REQUEST_TIMEOUT_MS",
        default_value_t = 10_000,
        value_parser = parse_positive_u64,
        help = "HTTP timeout for Slack and classifier requests"
    )]
    pub request_timeout_ms: u64,

    #[arg(
        long = "retry-max-attempts",
        env = "RELAY_RETRY_MAX_ATTEMPTS",
        default_value_t = 3,
        value_parser = parse_positive_usize,
        help = "Attempts per Slack Web API call on 429/5xx and transport errors"
    )]
    pub retry_max_attempts: usize,

    #[arg(
        long = "retry-base-delay-ms",
        env = "RELAY_RETRY_BASE_DELAY_MS",
        default_value_t = 500,
        value_parser = parse_positive_u64,
        help = "Base delay for exponential Web API retries"
    )]
    pub retry_base_delay_ms: u64,
}
