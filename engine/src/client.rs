//! Engine client: owns one build-engine process and its JSON-RPC channel.
//!
//! Three background tasks serve each process. The writer task drains an mpsc
//! queue into stdin, the reader task routes stdout frames to pending callers,
//! and the watcher task owns the `Child` and reports its exit. Requests are
//! correlated by id through the pending map; once the process is gone the map
//! is closed and every caller, present or future, gets the closing error.

use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};
use std::time::Duration;

use quire_cache::BuildOutput;
use quire_config::{BuildConfig, ServerSettings};
use quire_types::{Diagnostic, DirectiveRecord, RoleRecord, Symbol};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};
use url::Url;

use crate::codec::{FrameReader, FrameWriter};
use crate::error::EngineError;
use crate::events::{EventHub, MessageLevel, Progress};
use crate::protocol::{
    self, ApplicationInfo, BuildParams, CreateApplicationParams, DocumentSymbolsParams,
    IncomingFrame, LogMessageParams, Notification, ProgressParams, Request,
};

const WRITER_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle of an engine client. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientState {
    /// Process spawned (or spawning), application not yet created.
    Starting,
    Running,
    /// Startup or a build failed. The process may still be alive.
    Errored,
    /// The process is gone.
    Exited,
}

impl ClientState {
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Starting, Self::Running | Self::Errored | Self::Exited)
                | (Self::Running, Self::Errored | Self::Exited)
                | (Self::Errored, Self::Exited)
        )
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Errored => "errored",
            Self::Exited => "exited",
        }
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

enum WriterCommand {
    Send(Value),
    Shutdown,
}

type Reply = Result<Value, EngineError>;

#[derive(Default)]
struct Pending {
    waiters: HashMap<u64, oneshot::Sender<Reply>>,
    /// Set once the process is gone; new requests fail with this error.
    closed: Option<EngineError>,
}

type PendingMap = Arc<tokio::sync::Mutex<Pending>>;

pub struct EngineClient {
    scope: Url,
    config: BuildConfig,
    request_timeout: Duration,
    shutdown_timeout: Duration,
    state: watch::Sender<ClientState>,
    exited: watch::Sender<bool>,
    info: OnceLock<ApplicationInfo>,
    last_error: Mutex<Option<EngineError>>,
    writer_tx: OnceLock<mpsc::Sender<WriterCommand>>,
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
    next_id: AtomicU64,
    pending: PendingMap,
    shutdown_requested: AtomicBool,
    events: EventHub,
}

impl fmt::Debug for EngineClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineClient")
            .field("scope", &self.scope.as_str())
            .field("state", &self.state())
            .field("builder", &self.builder_name())
            .finish_non_exhaustive()
    }
}

impl EngineClient {
    /// Create a client in `Starting`. Nothing is spawned until [`start`](Self::start).
    #[must_use]
    pub fn new(
        scope: Url,
        config: BuildConfig,
        server: &ServerSettings,
        events: EventHub,
    ) -> Arc<Self> {
        Arc::new(Self {
            scope,
            config,
            request_timeout: server.request_timeout(),
            shutdown_timeout: server.shutdown_timeout(),
            state: watch::Sender::new(ClientState::Starting),
            exited: watch::Sender::new(false),
            info: OnceLock::new(),
            last_error: Mutex::new(None),
            writer_tx: OnceLock::new(),
            kill_tx: Mutex::new(None),
            next_id: AtomicU64::new(1),
            pending: Arc::new(tokio::sync::Mutex::new(Pending::default())),
            shutdown_requested: AtomicBool::new(false),
            events,
        })
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn state(&self) -> ClientState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ClientState> {
        self.state.subscribe()
    }

    pub fn info(&self) -> Option<&ApplicationInfo> {
        self.info.get()
    }

    pub fn builder_name(&self) -> Option<&str> {
        self.info.get().map(|info| info.builder_name.as_str())
    }

    /// Whether this client ever reached `Running`.
    pub fn has_run(&self) -> bool {
        self.info.get().is_some()
    }

    pub fn last_error(&self) -> Option<EngineError> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn has_exited(&self) -> bool {
        *self.exited.borrow()
    }

    /// Resolves once the engine process is gone.
    pub async fn wait_for_exit(&self) {
        let mut exited = self.exited.subscribe();
        let _ = exited.wait_for(|exited| *exited).await;
    }

    fn transition(&self, next: ClientState) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                false
            }
        });
        if changed {
            tracing::debug!(scope = %self.scope, state = %next, "Engine client state changed");
        }
        changed
    }

    fn record_error(&self, error: EngineError) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    /// Spawn the engine and create its application.
    ///
    /// On failure the error is stored and the client is left `Errored` (or
    /// `Exited` if the process died first). Nothing is retried.
    pub async fn start(self: &Arc<Self>) -> Result<(), EngineError> {
        if let Err(e) = self.spawn() {
            tracing::warn!(scope = %self.scope, "{e}");
            self.record_error(e.clone());
            self.transition(ClientState::Errored);
            return Err(e);
        }

        match self.create_application().await {
            Ok(info) => {
                tracing::info!(
                    scope = %self.scope,
                    builder = %info.builder_name,
                    source_dir = %info.source_dir.display(),
                    "Build engine ready"
                );
                let _ = self.info.set(info);
                if self.transition(ClientState::Running) {
                    Ok(())
                } else {
                    Err(self.last_error().unwrap_or(EngineError::ProcessExited))
                }
            }
            Err(e) => {
                let e = match e {
                    EngineError::SpawnFailed(_) => e,
                    other => EngineError::SpawnFailed(other.to_string()),
                };
                tracing::warn!(scope = %self.scope, "{e}");
                if self.state() != ClientState::Exited {
                    self.record_error(e.clone());
                    self.transition(ClientState::Errored);
                }
                Err(e)
            }
        }
    }

    fn spawn(self: &Arc<Self>) -> Result<(), EngineError> {
        if self.writer_tx.get().is_some() {
            return Err(EngineError::SpawnFailed(String::from("engine already started")));
        }
        let (program, args) = self
            .config
            .engine_command
            .split_first()
            .ok_or_else(|| EngineError::SpawnFailed(String::from("engine command is empty")))?;
        let resolved = which::which(program)
            .map_err(|e| EngineError::SpawnFailed(format!("{program}: {e}")))?;

        let mut cmd = Command::new(&resolved);
        cmd.args(args)
            .current_dir(&self.config.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(python_path) = python_path(&self.config.engine_path) {
            cmd.env("PYTHONPATH", python_path);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| EngineError::SpawnFailed(format!("{}: {e}", resolved.display())))?;
        tracing::info!(
            scope = %self.scope,
            pid = child.id(),
            command = %resolved.display(),
            "Spawned build engine"
        );

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                return Err(EngineError::SpawnFailed(String::from(
                    "engine stdio was not captured",
                )));
            }
        };

        let (writer_tx, mut writer_rx) = mpsc::channel::<WriterCommand>(WRITER_CHANNEL_CAPACITY);
        let writer_scope = self.scope.clone();
        tokio::spawn(async move {
            let mut writer = FrameWriter::new(stdin);
            while let Some(cmd) = writer_rx.recv().await {
                match cmd {
                    WriterCommand::Send(frame) => {
                        if let Err(e) = writer.write_frame(&frame).await {
                            tracing::warn!(scope = %writer_scope, "Engine write error: {e:#}");
                            break;
                        }
                    }
                    WriterCommand::Shutdown => break,
                }
            }
        });

        let reader_pending = Arc::clone(&self.pending);
        let reader_writer_tx = writer_tx.clone();
        let reader_scope = self.scope.clone();
        let reader_events = self.events.clone();
        tokio::spawn(async move {
            let mut reader = FrameReader::new(stdout);
            loop {
                match reader.read_frame().await {
                    Ok(Some(frame)) => {
                        Self::dispatch_frame(
                            &frame,
                            &reader_pending,
                            &reader_writer_tx,
                            &reader_scope,
                            &reader_events,
                        )
                        .await;
                    }
                    Ok(None) => {
                        tracing::debug!(scope = %reader_scope, "Build engine closed stdout");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(scope = %reader_scope, "Engine reader error: {e:#}");
                        break;
                    }
                }
            }
        });

        if let Some(stderr) = child.stderr.take() {
            let stderr_scope = self.scope.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(scope = %stderr_scope, "engine: {line}");
                }
            });
        }

        let (kill_tx, kill_rx) = oneshot::channel();
        *self.kill_tx.lock().unwrap_or_else(PoisonError::into_inner) = Some(kill_tx);
        let _ = self.writer_tx.set(writer_tx);

        // The watcher only holds a weak reference: dropping the last client
        // handle drops `kill_tx`, which kills the process.
        let client = Arc::downgrade(self);
        tokio::spawn(Self::watch_process(child, kill_rx, client));

        Ok(())
    }

    async fn watch_process(mut child: Child, kill_rx: oneshot::Receiver<()>, client: Weak<Self>) {
        let status = tokio::select! {
            status = child.wait() => status,
            _ = kill_rx => {
                if let Err(e) = child.kill().await {
                    tracing::debug!("Failed to kill build engine: {e}");
                }
                child.wait().await
            }
        };
        if let Some(client) = client.upgrade() {
            client.on_exit(status).await;
        }
    }

    async fn on_exit(&self, status: std::io::Result<ExitStatus>) {
        let status = match status {
            Ok(status) => status.to_string(),
            Err(e) => format!("wait failed: {e}"),
        };
        let requested = self.shutdown_requested.load(Ordering::SeqCst);
        let reason = if requested {
            EngineError::ShuttingDown
        } else {
            EngineError::ProcessExited
        };
        close_pending(&self.pending, reason).await;

        let crash = (!requested).then(|| EngineError::Crashed { status: status.clone() });
        if let Some(error) = &crash {
            self.record_error(error.clone());
        }
        self.transition(ClientState::Exited);
        self.exited.send_replace(true);

        match crash {
            Some(error) => {
                tracing::warn!(scope = %self.scope, "{error}");
                self.events.user_message(
                    Some(&self.scope),
                    MessageLevel::Error,
                    format!("{error} for {}", self.scope),
                );
            }
            None => tracing::info!(scope = %self.scope, %status, "Build engine exited"),
        }
    }

    async fn dispatch_frame(
        frame: &Value,
        pending: &tokio::sync::Mutex<Pending>,
        writer_tx: &mpsc::Sender<WriterCommand>,
        scope: &Url,
        events: &EventHub,
    ) {
        let Some(incoming) = protocol::parse_incoming(frame) else {
            tracing::trace!(scope = %scope, "Ignoring malformed JSON-RPC frame");
            return;
        };

        match incoming {
            IncomingFrame::Response { id, body } => {
                let waiter = pending.lock().await.waiters.remove(&id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(Ok(body));
                    }
                    None => tracing::trace!(scope = %scope, request_id = id, "Response for unknown request"),
                }
            }
            IncomingFrame::EngineRequest { id, method } => {
                tracing::debug!(scope = %scope, %method, "Engine sent a request, replying method not found");
                let reply = protocol::method_not_found(&id, &method);
                let _ = writer_tx.send(WriterCommand::Send(reply)).await;
            }
            IncomingFrame::Notification { method, params } => {
                Self::handle_notification(scope, &method, params, events);
            }
        }
    }

    fn handle_notification(scope: &Url, method: &str, params: Option<Value>, events: &EventHub) {
        let params = params.unwrap_or(Value::Null);
        match method {
            "window/logMessage" => match serde_json::from_value::<LogMessageParams>(params) {
                Ok(log) => match log.kind {
                    1 => tracing::error!(scope = %scope, "{}", log.message),
                    2 => tracing::warn!(scope = %scope, "{}", log.message),
                    3 => tracing::info!(scope = %scope, "{}", log.message),
                    _ => tracing::debug!(scope = %scope, "{}", log.message),
                },
                Err(e) => tracing::debug!(scope = %scope, "Malformed logMessage: {e}"),
            },
            "$/progress" => match serde_json::from_value::<ProgressParams>(params) {
                Ok(progress) => events.progress(Progress {
                    scope: scope.clone(),
                    kind: progress.kind,
                    title: progress.title,
                    message: progress.message,
                    percentage: progress.percentage,
                }),
                Err(e) => tracing::debug!(scope = %scope, "Malformed progress notification: {e}"),
            },
            _ => tracing::trace!(scope = %scope, %method, "Ignoring engine notification"),
        }
    }

    async fn request(
        &self,
        method: &'static str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, EngineError> {
        let writer = self
            .writer_tx
            .get()
            .ok_or_else(|| EngineError::NotRunning(self.state()))?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = serde_json::to_value(Request::new(id, method, params))
            .map_err(|e| EngineError::Protocol(format!("serializing {method}: {e}")))?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if let Some(reason) = &pending.closed {
                return Err(reason.clone());
            }
            pending.waiters.insert(id, tx);
        }

        tracing::trace!(scope = %self.scope, method, request_id = id, "Sending engine request");
        if writer.send(WriterCommand::Send(frame)).await.is_err() {
            self.pending.lock().await.waiters.remove(&id);
            return Err(EngineError::Transport(String::from("writer channel closed")));
        }

        let reply = match timeout {
            Some(limit) => {
                if let Ok(reply) = tokio::time::timeout(limit, rx).await {
                    reply
                } else {
                    self.pending.lock().await.waiters.remove(&id);
                    return Err(EngineError::Timeout {
                        method,
                        secs: limit.as_secs(),
                    });
                }
            }
            None => rx.await,
        };
        let body = reply
            .map_err(|_| EngineError::Transport(String::from("response channel dropped")))??;
        protocol::response_result(body).map_err(|(code, message)| EngineError::Rpc { code, message })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &'static str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<T, EngineError> {
        let value = self.request(method, params, timeout).await?;
        serde_json::from_value(value).map_err(|e| EngineError::Protocol(format!("{method}: {e}")))
    }

    async fn notify(&self, method: &'static str, params: Option<Value>) -> Result<(), EngineError> {
        let writer = self
            .writer_tx
            .get()
            .ok_or_else(|| EngineError::NotRunning(self.state()))?;
        let frame = serde_json::to_value(Notification::new(method, params))
            .map_err(|e| EngineError::Protocol(format!("serializing {method}: {e}")))?;
        writer
            .send(WriterCommand::Send(frame))
            .await
            .map_err(|_| EngineError::Transport(String::from("writer channel closed")))
    }

    async fn create_application(&self) -> Result<ApplicationInfo, EngineError> {
        let params = to_params(&CreateApplicationParams::from(&self.config))?;
        self.call("createApplication", params, Some(self.request_timeout))
            .await
    }

    fn ensure_live(&self) -> Result<(), EngineError> {
        match self.state() {
            ClientState::Running | ClientState::Errored if !self.has_exited() => Ok(()),
            state => Err(EngineError::NotRunning(state)),
        }
    }

    /// Build the project with unsaved document contents applied.
    ///
    /// Only valid while `Running`. An error reported by the engine moves the
    /// client to `Errored`; the caller receives it exactly once.
    pub async fn build(
        &self,
        content_overrides: &BTreeMap<Url, String>,
    ) -> Result<BuildOutput, EngineError> {
        let state = self.state();
        if state != ClientState::Running {
            return Err(EngineError::NotRunning(state));
        }
        let params = to_params(&BuildParams { content_overrides })?;
        match self.call::<BuildOutput>("build", params, None).await {
            Ok(output) => Ok(output),
            Err(EngineError::Rpc { message, .. } | EngineError::Protocol(message)) => {
                let error = EngineError::BuildFailed(message);
                tracing::warn!(scope = %self.scope, "{error}");
                self.record_error(error.clone());
                self.transition(ClientState::Errored);
                Err(error)
            }
            Err(other) => Err(other),
        }
    }

    pub async fn get_diagnostics(&self) -> Result<BTreeMap<Url, Vec<Diagnostic>>, EngineError> {
        self.ensure_live()?;
        self.call("getDiagnostics", None, Some(self.request_timeout))
            .await
    }

    pub async fn get_roles(&self) -> Result<Vec<RoleRecord>, EngineError> {
        self.ensure_live()?;
        self.call("getRoles", None, Some(self.request_timeout)).await
    }

    pub async fn get_directives(&self) -> Result<Vec<DirectiveRecord>, EngineError> {
        self.ensure_live()?;
        self.call("getDirectives", None, Some(self.request_timeout))
            .await
    }

    pub async fn get_document_symbols(&self, uri: &Url) -> Result<Vec<Symbol>, EngineError> {
        self.ensure_live()?;
        let params = to_params(&DocumentSymbolsParams { uri })?;
        self.call("getDocumentSymbols", params, Some(self.request_timeout))
            .await
    }

    /// Stop the engine: a `shutdown` request and `exit` notification, then a
    /// kill if the process is still alive after the shutdown timeout.
    /// Idempotent; in-flight calls fail with [`EngineError::ShuttingDown`].
    pub async fn shutdown(&self) {
        let first = !self.shutdown_requested.swap(true, Ordering::SeqCst);

        let Some(writer) = self.writer_tx.get() else {
            // Never spawned: there is no process to wait for.
            self.exited.send_replace(true);
            self.transition(ClientState::Exited);
            return;
        };

        if first && !self.has_exited() {
            tracing::info!(scope = %self.scope, "Shutting down build engine");
            match self
                .request("shutdown", None, Some(self.shutdown_timeout))
                .await
            {
                Ok(_) => {
                    let _ = self.notify("exit", None).await;
                }
                Err(e) => tracing::debug!(scope = %self.scope, "Engine shutdown request failed: {e}"),
            }
            close_pending(&self.pending, EngineError::ShuttingDown).await;
            let _ = writer.send(WriterCommand::Shutdown).await;
        }

        let mut exited = self.exited.subscribe();
        if tokio::time::timeout(self.shutdown_timeout, exited.wait_for(|exited| *exited))
            .await
            .is_err()
        {
            tracing::debug!(scope = %self.scope, "Build engine didn't exit in time, killing");
            let kill = self
                .kill_tx
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(kill) = kill {
                let _ = kill.send(());
            }
            let _ = exited.wait_for(|exited| *exited).await;
        }
    }
}

async fn close_pending(pending: &tokio::sync::Mutex<Pending>, reason: EngineError) {
    let mut pending = pending.lock().await;
    if pending.closed.is_none() {
        pending.closed = Some(reason.clone());
    }
    for (_, waiter) in pending.waiters.drain() {
        let _ = waiter.send(Err(reason.clone()));
    }
}

fn to_params(params: &impl Serialize) -> Result<Option<Value>, EngineError> {
    serde_json::to_value(params)
        .map(Some)
        .map_err(|e| EngineError::Protocol(format!("serializing params: {e}")))
}

/// `engine_path` entries ahead of any inherited `PYTHONPATH`.
fn python_path(engine_path: &[PathBuf]) -> Option<OsString> {
    if engine_path.is_empty() {
        return None;
    }
    let inherited = std::env::var_os("PYTHONPATH");
    let inherited = inherited
        .iter()
        .flat_map(|value| std::env::split_paths(value));
    std::env::join_paths(engine_path.iter().cloned().chain(inherited)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_channels() -> (
        PendingMap,
        mpsc::Sender<WriterCommand>,
        mpsc::Receiver<WriterCommand>,
        EventHub,
    ) {
        let pending: PendingMap = Arc::new(tokio::sync::Mutex::new(Pending::default()));
        let (writer_tx, writer_rx) = mpsc::channel(32);
        (pending, writer_tx, writer_rx, EventHub::new())
    }

    fn scope() -> Url {
        Url::parse("file:///proj/").unwrap()
    }

    fn config(engine_command: Vec<String>) -> BuildConfig {
        BuildConfig {
            engine_command,
            build_command: vec!["sphinx-build".into(), "-M".into(), "html".into()],
            cwd: std::env::temp_dir(),
            engine_path: Vec::new(),
            fallback_env: None,
        }
    }

    #[test]
    fn transitions_only_move_forward() {
        use ClientState::{Errored, Exited, Running, Starting};
        assert!(Starting.can_transition_to(Running));
        assert!(Starting.can_transition_to(Errored));
        assert!(Running.can_transition_to(Errored));
        assert!(Running.can_transition_to(Exited));
        assert!(Errored.can_transition_to(Exited));

        assert!(!Running.can_transition_to(Starting));
        assert!(!Errored.can_transition_to(Running));
        assert!(!Exited.can_transition_to(Running));
        assert!(!Exited.can_transition_to(Exited));
        assert!(!Running.can_transition_to(Running));
    }

    #[tokio::test]
    async fn response_routes_to_pending_caller() {
        let (pending, writer_tx, _writer_rx, events) = test_channels();
        let (tx, rx) = oneshot::channel();
        pending.lock().await.waiters.insert(4, tx);

        let frame = serde_json::json!({"jsonrpc": "2.0", "id": 4, "result": [{"name": "ref"}]});
        EngineClient::dispatch_frame(&frame, &pending, &writer_tx, &scope(), &events).await;

        let body = rx.await.unwrap().unwrap();
        assert_eq!(body["result"][0]["name"], "ref");
        assert!(pending.lock().await.waiters.is_empty());
    }

    #[tokio::test]
    async fn engine_request_gets_method_not_found() {
        let (pending, writer_tx, mut writer_rx, events) = test_channels();
        let frame = serde_json::json!({"jsonrpc": "2.0", "id": 11, "method": "workspace/configuration"});

        EngineClient::dispatch_frame(&frame, &pending, &writer_tx, &scope(), &events).await;

        match writer_rx.try_recv().unwrap() {
            WriterCommand::Send(reply) => {
                assert_eq!(reply["id"], 11);
                assert_eq!(reply["error"]["code"], -32601);
            }
            WriterCommand::Shutdown => panic!("expected a reply frame"),
        }
    }

    #[tokio::test]
    async fn progress_notification_becomes_event() {
        let (pending, writer_tx, mut writer_rx, events) = test_channels();
        let mut progress = events.subscribe_progress();
        let frame = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "$/progress",
            "params": {"kind": "report", "message": "reading sources", "percentage": 40}
        });

        EngineClient::dispatch_frame(&frame, &pending, &writer_tx, &scope(), &events).await;

        let event = progress.try_recv().unwrap();
        assert_eq!(event.kind, protocol::ProgressKind::Report);
        assert_eq!(event.percentage, Some(40));
        assert_eq!(event.scope, scope());
        assert!(writer_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn log_message_is_not_an_event() {
        let (pending, writer_tx, mut writer_rx, events) = test_channels();
        let mut messages = events.subscribe_user_messages();
        let frame = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "window/logMessage",
            "params": {"type": 2, "message": "toctree contains reference to nonexisting document"}
        });

        EngineClient::dispatch_frame(&frame, &pending, &writer_tx, &scope(), &events).await;

        assert!(messages.try_recv().is_err());
        assert!(writer_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_pending_fails_waiters_and_new_requests() {
        let pending: PendingMap = Arc::new(tokio::sync::Mutex::new(Pending::default()));
        let (tx, rx) = oneshot::channel();
        pending.lock().await.waiters.insert(1, tx);

        close_pending(&pending, EngineError::ProcessExited).await;
        close_pending(&pending, EngineError::ShuttingDown).await;

        assert_eq!(rx.await.unwrap(), Err(EngineError::ProcessExited));
        assert_eq!(pending.lock().await.closed, Some(EngineError::ProcessExited));
    }

    #[tokio::test]
    async fn missing_command_leaves_client_errored() {
        let client = EngineClient::new(
            scope(),
            config(vec![String::from("/nonexistent/quire-engine")]),
            &ServerSettings::default(),
            EventHub::new(),
        );
        let err = client.start().await.unwrap_err();

        assert!(matches!(err, EngineError::SpawnFailed(_)));
        assert_eq!(client.state(), ClientState::Errored);
        assert_eq!(client.last_error(), Some(err));
        assert!(!client.has_run());
    }

    #[tokio::test]
    async fn empty_command_is_a_spawn_failure() {
        let client = EngineClient::new(
            scope(),
            config(Vec::new()),
            &ServerSettings::default(),
            EventHub::new(),
        );
        assert!(matches!(
            client.start().await,
            Err(EngineError::SpawnFailed(_))
        ));
    }

    #[tokio::test]
    async fn requests_before_spawn_are_rejected() {
        let client = EngineClient::new(
            scope(),
            config(vec![String::from("python")]),
            &ServerSettings::default(),
            EventHub::new(),
        );
        assert_eq!(
            client.get_roles().await,
            Err(EngineError::NotRunning(ClientState::Starting))
        );
        assert_eq!(
            client.build(&BTreeMap::new()).await.unwrap_err(),
            EngineError::NotRunning(ClientState::Starting)
        );
    }

    #[tokio::test]
    async fn shutdown_of_unspawned_client_exits() {
        let client = EngineClient::new(
            scope(),
            config(vec![String::from("/nonexistent/quire-engine")]),
            &ServerSettings::default(),
            EventHub::new(),
        );
        let _ = client.start().await;
        client.shutdown().await;
        client.shutdown().await;
        assert_eq!(client.state(), ClientState::Exited);
        assert!(client.has_exited());
    }

    #[test]
    fn python_path_puts_engine_path_first() {
        let joined = python_path(&[PathBuf::from("/proj/ext")]).unwrap();
        let first = std::env::split_paths(&joined).next().unwrap();
        assert_eq!(first, PathBuf::from("/proj/ext"));
        assert!(python_path(&[]).is_none());
    }
}
