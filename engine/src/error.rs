use crate::client::ClientState;

/// Failures surfaced by an engine client.
///
/// Cloneable so one failure can be stored as the client's `last_error` and
/// also handed to every in-flight caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("failed to start build engine: {0}")]
    SpawnFailed(String),
    #[error("build failed: {0}")]
    BuildFailed(String),
    #[error("build engine exited unexpectedly ({status})")]
    Crashed { status: String },
    #[error("build engine process exited")]
    ProcessExited,
    #[error("build engine is shutting down")]
    ShuttingDown,
    #[error("build engine is not running (state: {0})")]
    NotRunning(ClientState),
    #[error("engine error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("{method} timed out after {secs}s")]
    Timeout { method: &'static str, secs: u64 },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected engine response: {0}")]
    Protocol(String),
}

impl EngineError {
    /// Whether the process behind the client is gone.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Crashed { .. } | Self::ProcessExited | Self::ShuttingDown
        )
    }
}
