//! Typed event channels.
//!
//! One broadcast channel per event kind. Emitting never blocks and never
//! fails: with no subscribers the event is simply dropped.

use tokio::sync::broadcast;
use url::Url;

use crate::client::ClientState;
use crate::protocol::ProgressKind;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A creation cycle finished; the client is `Running` or failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientReady {
    pub scope: Url,
    pub state: ClientState,
    pub builder_name: Option<String>,
}

/// A build was applied to the scope's cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildFinished {
    pub scope: Url,
    pub diagnostics: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLevel {
    Error,
    Warning,
    Info,
}

/// Something the user should be told about, once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserMessage {
    pub scope: Option<Url>,
    pub level: MessageLevel,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub scope: Url,
    pub kind: ProgressKind,
    pub title: Option<String>,
    pub message: Option<String>,
    pub percentage: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct EventHub {
    client_ready: broadcast::Sender<ClientReady>,
    build_finished: broadcast::Sender<BuildFinished>,
    user_message: broadcast::Sender<UserMessage>,
    progress: broadcast::Sender<Progress>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client_ready: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
            build_finished: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
            user_message: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
            progress: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe_client_ready(&self) -> broadcast::Receiver<ClientReady> {
        self.client_ready.subscribe()
    }

    pub fn subscribe_build_finished(&self) -> broadcast::Receiver<BuildFinished> {
        self.build_finished.subscribe()
    }

    pub fn subscribe_user_messages(&self) -> broadcast::Receiver<UserMessage> {
        self.user_message.subscribe()
    }

    pub fn subscribe_progress(&self) -> broadcast::Receiver<Progress> {
        self.progress.subscribe()
    }

    pub fn client_ready(&self, event: ClientReady) {
        let _ = self.client_ready.send(event);
    }

    pub fn build_finished(&self, event: BuildFinished) {
        let _ = self.build_finished.send(event);
    }

    pub fn user_message(&self, scope: Option<&Url>, level: MessageLevel, text: impl Into<String>) {
        let _ = self.user_message.send(UserMessage {
            scope: scope.cloned(),
            level,
            text: text.into(),
        });
    }

    pub fn progress(&self, event: Progress) {
        let _ = self.progress.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> Url {
        Url::parse("file:///proj/").unwrap()
    }

    #[test]
    fn emitting_without_subscribers_is_silent() {
        let hub = EventHub::new();
        hub.user_message(None, MessageLevel::Info, "nobody listening");
        hub.build_finished(BuildFinished {
            scope: scope(),
            diagnostics: 0,
        });
    }

    #[tokio::test]
    async fn subscribers_only_see_their_kind() {
        let hub = EventHub::new();
        let mut messages = hub.subscribe_user_messages();
        let mut builds = hub.subscribe_build_finished();

        hub.user_message(Some(&scope()), MessageLevel::Error, "build failed");

        let message = messages.recv().await.unwrap();
        assert_eq!(message.level, MessageLevel::Error);
        assert_eq!(message.scope, Some(scope()));
        assert!(builds.try_recv().is_err());
    }

    #[tokio::test]
    async fn clones_share_channels() {
        let hub = EventHub::new();
        let mut ready = hub.subscribe_client_ready();
        hub.clone().client_ready(ClientReady {
            scope: scope(),
            state: ClientState::Running,
            builder_name: Some(String::from("html")),
        });
        assert_eq!(ready.recv().await.unwrap().builder_name.as_deref(), Some("html"));
    }
}
