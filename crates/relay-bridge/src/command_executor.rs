//! Subprocess-backed [`TaskExecutor`].
//!
//! Each task runs the configured command in the project directory with the
//! prompt appended as the last argument. Stdout lines of the form
//! `PROGRESS <percent> <phase> [detail]` are routed to the registered progress
//! callback; every other line is collected as output. The first pull request
//! URL seen in the output becomes the result link.

use std::{process::Stdio, sync::LazyLock, time::Duration};

use async_trait::async_trait;
use regex::Regex;
use relay_core::truncate_text;
use relay_orchestrator::{
    ExecutionResult, ExecutorError, ExecutorTask, ProgressCallback, ProgressRegistry,
    ProgressUpdate, TaskExecutor,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, BufReader},
    process::{Child, Command},
};

const PROGRESS_MARKER: &str = "PROGRESS";
const NO_PR_INSTRUCTION: &str =
    "Do not create a branch, commit, or pull request. Report what you did when finished.";
const MAX_ERROR_CHARS: usize = 500;

static PULL_REQUEST_URL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"https://[^\s<>()|]+/pull/\d+").ok());

#[derive(Debug)]
pub(crate) struct CommandExecutor {
    command: String,
    args: Vec<String>,
    progress: ProgressRegistry,
}

impl CommandExecutor {
    pub(crate) fn new(command: String, args: Vec<String>) -> Self {
        Self {
            command,
            args,
            progress: ProgressRegistry::new(),
        }
    }

    fn build_command(&self, task: &ExecutorTask) -> Command {
        let mut command = Command::new(&self.command);
        command.kill_on_drop(true);
        command.args(&self.args);
        command.arg(render_prompt(task));
        command.current_dir(&task.working_dir);
        command.env("RELAY_TASK_ID", &task.id);
        command.env("RELAY_WANTS_PR", if task.wants_pr { "1" } else { "0" });
        if let Some(member_id) = task.member_id.as_deref() {
            command.env("RELAY_MEMBER_ID", member_id);
        }
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command
    }
}

fn render_prompt(task: &ExecutorTask) -> String {
    if task.wants_pr {
        task.description.clone()
    } else {
        format!("{}\n\n{NO_PR_INSTRUCTION}", task.description)
    }
}

async fn spawn_with_text_file_busy_retry(
    command: &mut Command,
    program: &str,
) -> Result<Child, ExecutorError> {
    const MAX_TEXT_FILE_BUSY_RETRIES: u32 = 5;
    const TEXT_FILE_BUSY_ERRNO: i32 = 26;
    let mut attempt = 0;
    loop {
        match command.spawn() {
            Ok(child) => return Ok(child),
            Err(error)
                if error.raw_os_error() == Some(TEXT_FILE_BUSY_ERRNO)
                    && attempt < MAX_TEXT_FILE_BUSY_RETRIES =>
            {
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
            Err(error) => return Err(ExecutorError::Launch(format!("'{program}': {error}"))),
        }
    }
}

/// Parses `PROGRESS <percent> <phase> [detail]`. Percent is clamped to 100.
pub(crate) fn parse_progress_line(task_id: &str, line: &str) -> Option<ProgressUpdate> {
    let rest = line.trim().strip_prefix(PROGRESS_MARKER)?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let mut parts = rest.trim_start().splitn(3, char::is_whitespace);
    let percent = parts.next()?.trim_end_matches('%').parse::<u16>().ok()?;
    let phase = parts.next().map(str::trim).filter(|phase| !phase.is_empty())?;
    let detail = parts.next().map(str::trim).unwrap_or_default();
    Some(ProgressUpdate {
        task_id: task_id.to_string(),
        phase: phase.to_string(),
        percent: percent.min(100) as u8,
        detail: detail.to_string(),
    })
}

pub(crate) fn find_pull_request_link(text: &str) -> Option<String> {
    PULL_REQUEST_URL
        .as_ref()?
        .find(text)
        .map(|found| found.as_str().to_string())
}

fn summarize_failure(status: &str, stderr: &str, output: &str) -> String {
    let stderr = stderr.trim();
    let source = if stderr.is_empty() {
        output.trim()
    } else {
        stderr
    };
    if source.is_empty() {
        format!("executor exited with status {status}")
    } else {
        format!(
            "executor exited with status {status}: {}",
            truncate_text(source, MAX_ERROR_CHARS)
        )
    }
}

#[async_trait]
impl TaskExecutor for CommandExecutor {
    async fn execute(&self, task: ExecutorTask) -> Result<ExecutionResult, ExecutorError> {
        let mut command = self.build_command(&task);
        let mut child = spawn_with_text_file_busy_retry(&mut command, &self.command).await?;
        tracing::debug!(task_id = %task.id, program = %self.command, "executor process spawned");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecutorError::Launch("executor stdout was not captured".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExecutorError::Launch("executor stderr was not captured".to_string()))?;
        let stderr_reader = tokio::spawn(async move {
            let mut buffer = Vec::new();
            let _ = stderr.read_to_end(&mut buffer).await;
            String::from_utf8_lossy(&buffer).into_owned()
        });

        let mut output = String::new();
        let mut link = None;
        let mut reader = BufReader::new(stdout);
        let mut raw_line = Vec::new();
        loop {
            raw_line.clear();
            let read = reader
                .read_until(b'\n', &mut raw_line)
                .await
                .map_err(|error| ExecutorError::Failed(format!("failed to read executor output: {error}")))?;
            if read == 0 {
                break;
            }
            // Invalid UTF-8 is replaced rather than ending the task.
            let decoded = String::from_utf8_lossy(&raw_line);
            let line = decoded.trim_end_matches(['\n', '\r']);
            if let Some(update) = parse_progress_line(&task.id, line) {
                self.progress.emit(update);
                continue;
            }
            if link.is_none() {
                link = find_pull_request_link(line);
            }
            output.push_str(line);
            output.push('\n');
        }

        let status = child
            .wait()
            .await
            .map_err(|error| ExecutorError::Failed(format!("executor process failed: {error}")))?;
        let stderr = stderr_reader.await.unwrap_or_default();
        let output = output.trim_end().to_string();

        if status.success() {
            return Ok(ExecutionResult {
                output,
                success: true,
                error: None,
                link,
            });
        }

        let code = status
            .code()
            .map(|code| code.to_string())
            .unwrap_or_else(|| "signal".to_string());
        tracing::debug!(task_id = %task.id, status = %code, "executor process failed");
        Ok(ExecutionResult {
            error: Some(summarize_failure(&code, &stderr, &output)),
            output,
            success: false,
            link,
        })
    }

    fn on_progress(&self, task_id: &str, callback: ProgressCallback) {
        self.progress.register(task_id, callback);
    }

    fn remove_progress(&self, task_id: &str) {
        self.progress.unregister(task_id);
    }
}
