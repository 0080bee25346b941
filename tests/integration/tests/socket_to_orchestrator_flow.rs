use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use relay_history::{HistoryConfig, HistoryStore};
use relay_orchestrator::{
    ExecutionResult, ExecutorError, ExecutorTask, MessageRef, Messenger, Orchestrator,
    OrchestratorConfig, OrchestratorParts, ProgressCallback, ProgressRegistry, ProgressUpdate,
    TaskExecutor, TaskOutcome, TaskStateService,
};
use relay_policy::{AdmissionPolicy, AllowList, RateLimitConfig, RateLimiter};
use relay_socket::{
    ConnectionManager, ConnectionStatus, HandshakeError, ManagerConfig, SocketHandshake,
};
use serde_json::{json, Value};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{mpsc, watch},
    time::timeout,
};
use tokio_tungstenite::{accept_async, tungstenite::Message as WsMessage, WebSocketStream};

const WAIT: Duration = Duration::from_secs(5);

type ServerSocket = WebSocketStream<TcpStream>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Sent {
    Text(String),
    Confirmation { task_id: String },
    Progress { phase: String, percent: u8 },
    Result { task_id: String, outcome: TaskOutcome },
}

#[derive(Default)]
struct RecordingMessenger {
    sent: Mutex<Vec<Sent>>,
}

impl RecordingMessenger {
    fn push(&self, sent: Sent) {
        self.sent.lock().expect("sent lock").push(sent);
    }

    fn snapshot(&self) -> Vec<Sent> {
        self.sent.lock().expect("sent lock").clone()
    }

    async fn wait_for<T>(&self, mut find: impl FnMut(&[Sent]) -> Option<T>) -> T {
        let deadline = Instant::now() + WAIT;
        loop {
            if let Some(found) = find(&self.snapshot()) {
                return found;
            }
            assert!(
                Instant::now() < deadline,
                "timed out waiting; sent so far: {:?}",
                self.snapshot()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_text(
        &self,
        _conversation_id: &str,
        _thread_id: Option<&str>,
        text: &str,
    ) -> anyhow::Result<()> {
        self.push(Sent::Text(text.to_string()));
        Ok(())
    }

    async fn send_confirmation(
        &self,
        _conversation_id: &str,
        _thread_id: Option<&str>,
        task_id: &str,
        _description: &str,
    ) -> anyhow::Result<MessageRef> {
        self.push(Sent::Confirmation {
            task_id: task_id.to_string(),
        });
        Ok(MessageRef(format!("confirm-{task_id}")))
    }

    async fn send_progress(
        &self,
        _conversation_id: &str,
        _thread_id: Option<&str>,
        _message_ref: Option<&MessageRef>,
        _task_id: &str,
        phase: &str,
        percent: u8,
        _detail: &str,
    ) -> anyhow::Result<MessageRef> {
        self.push(Sent::Progress {
            phase: phase.to_string(),
            percent,
        });
        Ok(MessageRef("progress".to_string()))
    }

    async fn send_result(
        &self,
        _conversation_id: &str,
        _thread_id: Option<&str>,
        task_id: &str,
        outcome: &TaskOutcome,
    ) -> anyhow::Result<()> {
        self.push(Sent::Result {
            task_id: task_id.to_string(),
            outcome: outcome.clone(),
        });
        Ok(())
    }

    async fn send_chunked(
        &self,
        conversation_id: &str,
        thread_id: Option<&str>,
        text: &str,
        _title: Option<&str>,
    ) -> anyhow::Result<()> {
        self.send_text(conversation_id, thread_id, text).await
    }

    fn max_message_length(&self) -> usize {
        3_000
    }
}

struct ScriptedExecutor {
    progress: ProgressRegistry,
    calls: Mutex<Vec<ExecutorTask>>,
}

#[async_trait]
impl TaskExecutor for ScriptedExecutor {
    async fn execute(&self, task: ExecutorTask) -> Result<ExecutionResult, ExecutorError> {
        self.calls.lock().expect("calls lock").push(task.clone());
        self.progress.emit(ProgressUpdate {
            task_id: task.id.clone(),
            phase: "Implementing".to_string(),
            percent: 60,
            detail: "editing files".to_string(),
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(ExecutionResult {
            output: "Added the logout button.".to_string(),
            success: true,
            error: None,
            link: Some("https://github.com/acme/web/pull/9".to_string()),
        })
    }

    fn on_progress(&self, task_id: &str, callback: ProgressCallback) {
        self.progress.register(task_id, callback);
    }

    fn remove_progress(&self, task_id: &str) {
        self.progress.unregister(task_id);
    }
}

struct FixedHandshake {
    url: String,
    calls: AtomicUsize,
}

#[async_trait]
impl SocketHandshake for FixedHandshake {
    async fn open_connection(&self) -> Result<String, HandshakeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.url.clone())
    }
}

async fn start_socket_server() -> (String, mpsc::UnboundedReceiver<ServerSocket>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
    let addr = listener.local_addr().expect("listener addr");
    let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let Ok(socket) = accept_async(stream).await else {
                continue;
            };
            if accepted_tx.send(socket).is_err() {
                break;
            }
        }
    });
    (format!("ws://{addr}"), accepted_rx)
}

async fn next_socket(accepted: &mut mpsc::UnboundedReceiver<ServerSocket>) -> ServerSocket {
    timeout(WAIT, accepted.recv())
        .await
        .expect("connection in time")
        .expect("server socket")
}

async fn send_json(server: &mut ServerSocket, value: Value) {
    server
        .send(WsMessage::Text(value.to_string().into()))
        .await
        .expect("server send");
}

async fn expect_ack(server: &mut ServerSocket, envelope_id: &str) {
    loop {
        let frame = timeout(WAIT, server.next())
            .await
            .expect("ack in time")
            .expect("stream open")
            .expect("frame ok");
        if let WsMessage::Text(text) = frame {
            let ack: Value = serde_json::from_str(text.as_str()).expect("json ack");
            assert_eq!(ack, json!({ "envelope_id": envelope_id }));
            return;
        }
    }
}

fn direct_message(envelope_id: &str, ts: &str, text: &str) -> Value {
    json!({
        "envelope_id": envelope_id,
        "type": "events_api",
        "payload": {
            "type": "event_callback",
            "event": {
                "type": "message",
                "channel": "D1",
                "user": "U1",
                "text": text,
                "ts": ts
            }
        }
    })
}

fn execute_button(envelope_id: &str, task_id: &str) -> Value {
    json!({
        "envelope_id": envelope_id,
        "type": "interactive",
        "payload": {
            "type": "block_actions",
            "user": { "id": "U1" },
            "channel": { "id": "D1" },
            "message": { "ts": "1700000001.000200" },
            "actions": [{ "action_id": "execute_task", "value": task_id }]
        }
    })
}

#[tokio::test]
async fn integration_socket_events_drive_confirmed_task_across_reconnect() {
    let (url, mut accepted) = start_socket_server().await;
    let handshake = Arc::new(FixedHandshake {
        url,
        calls: AtomicUsize::new(0),
    });
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (status_tx, mut status_rx) = mpsc::unbounded_channel();
    let manager = ConnectionManager::new(
        Arc::clone(&handshake) as Arc<dyn SocketHandshake>,
        ManagerConfig {
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
            ..ManagerConfig::default()
        },
    )
    .with_status_sink(status_tx);
    let (events, connection) = manager.start(shutdown_rx.clone());

    let messenger = Arc::new(RecordingMessenger::default());
    let executor = Arc::new(ScriptedExecutor {
        progress: ProgressRegistry::new(),
        calls: Mutex::new(Vec::new()),
    });
    let orchestrator = Orchestrator::new(
        OrchestratorParts {
            messenger: Arc::clone(&messenger) as Arc<dyn Messenger>,
            executor: Arc::clone(&executor) as Arc<dyn TaskExecutor>,
            state: Arc::new(TaskStateService::new()),
            limiter: Arc::new(RateLimiter::new(&RateLimitConfig::default())),
            history: Arc::new(HistoryStore::new(HistoryConfig::default())),
            policy: AdmissionPolicy::new(AllowList::default(), AllowList::default()),
            classifier: None,
            members: None,
        },
        OrchestratorConfig {
            task_id_prefix: "WEB".to_string(),
            ..OrchestratorConfig::default()
        },
    );
    let state = Arc::clone(orchestrator.state());
    let orchestrator_task = orchestrator.spawn(events, shutdown_rx);

    let mut first = next_socket(&mut accepted).await;
    send_json(&mut first, json!({ "type": "hello" })).await;
    send_json(
        &mut first,
        direct_message("env-1", "1700000000.000100", "add a logout button"),
    )
    .await;
    expect_ack(&mut first, "env-1").await;

    let task_id = messenger
        .wait_for(|sent| {
            sent.iter().find_map(|entry| match entry {
                Sent::Confirmation { task_id } => Some(task_id.clone()),
                _ => None,
            })
        })
        .await;
    assert!(task_id.starts_with("WEB-"), "{task_id}");
    assert_eq!(state.counts(), (0, 1));

    send_json(
        &mut first,
        json!({ "type": "disconnect", "reason": "refresh_requested" }),
    )
    .await;
    let mut second = next_socket(&mut accepted).await;
    assert_eq!(handshake.calls.load(Ordering::SeqCst), 2);

    send_json(&mut second, execute_button("env-2", &task_id)).await;
    expect_ack(&mut second, "env-2").await;

    let outcome = messenger
        .wait_for(|sent| {
            sent.iter().find_map(|entry| match entry {
                Sent::Result { task_id: id, outcome } if *id == task_id => Some(outcome.clone()),
                _ => None,
            })
        })
        .await;
    assert!(outcome.success);
    assert_eq!(outcome.output, "Added the logout button.");
    assert_eq!(
        outcome.link.as_deref(),
        Some("https://github.com/acme/web/pull/9")
    );

    let sent = messenger.snapshot();
    let progress = sent
        .iter()
        .filter_map(|entry| match entry {
            Sent::Progress { phase, percent } => Some((phase.as_str(), *percent)),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(progress, vec![("Starting", 0), ("Implementing", 60)]);
    assert!(!sent.iter().any(|entry| matches!(entry, Sent::Text(_))));

    let calls = executor.calls.lock().expect("calls lock").clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].description, "add a logout button");
    assert!(calls[0].wants_pr);
    assert_eq!(state.counts(), (0, 0));

    shutdown_tx.send(true).expect("shutdown");
    timeout(WAIT, connection)
        .await
        .expect("manager stops")
        .expect("manager join")
        .expect("clean shutdown");
    timeout(WAIT, orchestrator_task)
        .await
        .expect("orchestrator stops")
        .expect("orchestrator join");

    let mut connected = 0;
    while let Ok(status) = status_rx.try_recv() {
        if matches!(status, ConnectionStatus::Connected { .. }) {
            connected += 1;
        }
    }
    assert_eq!(connected, 2);
}
