use quire_config::{QuireConfig, ServerSettings, UserSettings};

use crate::events::EventHub;
use crate::listeners::BuildListeners;

/// Shared collaborators handed to the engine manager at construction.
#[derive(Clone, Default)]
pub struct EngineContext {
    /// Initial user settings; later changes go through
    /// [`EngineManager::update_settings`](crate::EngineManager::update_settings).
    pub settings: UserSettings,
    pub server: ServerSettings,
    pub events: EventHub,
    pub listeners: BuildListeners,
}

impl EngineContext {
    #[must_use]
    pub fn new(settings: UserSettings, server: ServerSettings) -> Self {
        Self {
            settings,
            server,
            events: EventHub::new(),
            listeners: BuildListeners::new(),
        }
    }

    #[must_use]
    pub fn from_config(config: &QuireConfig) -> Self {
        Self::new(config.engine.clone(), config.server.clone())
    }
}
