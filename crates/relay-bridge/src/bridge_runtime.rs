//! Process wiring: builds every collaborator from the validated [`Cli`] and
//! runs the connection manager and orchestrator until ctrl-c or a permanent
//! auth failure.

use std::sync::Arc;

use anyhow::{Context, Result};
use relay_cli::Cli;
use relay_history::{spawn_sweeper, HistoryStore};
use relay_intent::IntentClassifier;
use relay_orchestrator::{MemberResolver, Orchestrator, OrchestratorParts, TaskStateService};
use relay_policy::RateLimiter;
use relay_socket::{ConnectionManager, ConnectionStatus, SlackApiClient};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::{
    anthropic_classifier::AnthropicClassifier, command_executor::CommandExecutor,
    member_directory::MemberDirectory, slack_messenger::SlackMessenger,
};

pub(crate) async fn run_bridge(cli: Cli) -> Result<()> {
    let (app_token, bot_token) = cli.slack_tokens()?;
    let client = SlackApiClient::new(
        cli.slack_api_base.clone(),
        app_token,
        bot_token,
        cli.request_timeout_ms,
        cli.retry_max_attempts,
        cli.retry_base_delay_ms,
    )?;

    let bot_user_id = match cli
        .slack_bot_user_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
    {
        Some(id) => id.to_string(),
        None => client
            .resolve_bot_user_id()
            .await
            .context("failed to resolve slack bot user id")?,
    };
    info!(bot_user_id = %bot_user_id, "slack bot identity resolved");

    let orchestrator = build_orchestrator(&cli, client.clone())?;
    let mut sweeper = spawn_sweeper(Arc::clone(orchestrator.history()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (status_tx, status_rx) = mpsc::unbounded_channel();
    let mut manager_config = cli.manager_config();
    manager_config.bot_user_id = Some(bot_user_id);
    let manager =
        ConnectionManager::new(Arc::new(client), manager_config).with_status_sink(status_tx);
    let (events, mut connection) = manager.start(shutdown_rx.clone());
    let status_logger = tokio::spawn(log_connection_status(status_rx));
    let orchestrator_task = orchestrator.spawn(events, shutdown_rx);

    let outcome = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
            connection.await.context("connection manager task panicked")?
        }
        joined = &mut connection => {
            let _ = shutdown_tx.send(true);
            joined.context("connection manager task panicked")?
        }
    };

    if orchestrator_task.await.is_err() {
        warn!("orchestrator task ended abnormally");
    }
    sweeper.stop().await;
    let _ = status_logger.await;

    outcome.context("socket mode connection ended")
}

fn build_orchestrator(cli: &Cli, client: SlackApiClient) -> Result<Orchestrator> {
    let classifier = match cli.classifier_settings() {
        Some(settings) => {
            info!(model = %settings.model, "external intent classifier enabled");
            Some(Arc::new(AnthropicClassifier::new(&settings)?) as Arc<dyn IntentClassifier>)
        }
        None => None,
    };
    let members = cli.member_map()?;
    let members = if members.is_empty() {
        None
    } else {
        info!(members = members.len(), "member directory loaded");
        Some(Arc::new(MemberDirectory::new(members)) as Arc<dyn MemberResolver>)
    };
    let executor = cli.executor_settings()?;

    Ok(Orchestrator::new(
        OrchestratorParts {
            messenger: Arc::new(SlackMessenger::new(client)),
            executor: Arc::new(CommandExecutor::new(executor.command, executor.args)),
            state: Arc::new(TaskStateService::new()),
            limiter: Arc::new(RateLimiter::new(&cli.rate_limit_config())),
            history: Arc::new(HistoryStore::new(cli.history_config())),
            policy: cli.admission_policy(),
            classifier,
            members,
        },
        cli.orchestrator_config()?,
    ))
}

async fn log_connection_status(mut status_rx: mpsc::UnboundedReceiver<ConnectionStatus>) {
    while let Some(status) = status_rx.recv().await {
        match status {
            ConnectionStatus::Handshaking { attempt } => {
                tracing::debug!(attempt, "socket mode handshake");
            }
            ConnectionStatus::Connected { connection } => {
                info!(connection, "socket mode connected");
            }
            ConnectionStatus::Retrying { delay, reason } => {
                warn!(
                    delay_ms = delay.as_millis() as u64,
                    reason = %reason,
                    "socket mode reconnect scheduled"
                );
            }
            ConnectionStatus::Terminal { permanent } => {
                info!(permanent, "socket mode connection manager stopped");
            }
        }
    }
}
