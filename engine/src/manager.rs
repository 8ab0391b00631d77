//! EngineManager: one engine client per project scope.
//!
//! The manager owns a `scope -> slot` map behind a single std mutex whose
//! critical sections never await. Inserting a slot and spawning its creation
//! task happen under that one lock, so any number of concurrent callers for a
//! scope produce exactly one process. A slot is "ready" once its creation
//! task finished, successfully or not; clients that never started stay in
//! their slot so later calls get the same failed client instead of spawning
//! again. A client that ran and then crashed or failed a build is replaced on
//! the next request for its scope.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use quire_cache::{BuildOutput, ProjectCache};
use quire_config::{BuildConfig, Unresolved, UserSettings, resolve, scope_for};
use tokio::sync::broadcast;
use tokio::task::{AbortHandle, JoinSet};
use url::Url;

use crate::client::{ClientState, EngineClient};
use crate::context::EngineContext;
use crate::error::EngineError;
use crate::events::{BuildFinished, ClientReady, MessageLevel};

/// What [`EngineManager::trigger_build`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    /// No running client for the scope (yet); nothing was built.
    Skipped,
    /// The cache now holds this build's snapshot.
    Completed { diagnostics: usize },
    /// The build failed; the previous snapshot is unchanged.
    Failed(String),
    /// The client was replaced while building; the result was dropped.
    Discarded,
}

struct Slot {
    client: Arc<EngineClient>,
    generation: u64,
    ready: bool,
    task: Option<AbortHandle>,
}

struct State {
    settings: UserSettings,
    roots: Vec<Url>,
    slots: HashMap<Url, Slot>,
    /// Scopes already warned about; `None` stands for every resource outside
    /// the workspace.
    warned: HashSet<Option<Url>>,
    next_generation: u64,
    closed: bool,
}

struct Inner {
    ctx: EngineContext,
    state: Mutex<State>,
    caches: Mutex<HashMap<Url, Arc<ProjectCache>>>,
    /// Held from a build's request through its cache sync.
    build_locks: Mutex<HashMap<Url, Arc<tokio::sync::Mutex<()>>>>,
}

#[derive(Clone)]
pub struct EngineManager {
    inner: Arc<Inner>,
}

impl EngineManager {
    #[must_use]
    pub fn new(ctx: EngineContext, workspace_roots: Vec<Url>) -> Self {
        let state = State {
            settings: ctx.settings.clone(),
            roots: workspace_roots,
            slots: HashMap::new(),
            warned: HashSet::new(),
            next_generation: 1,
            closed: false,
        };
        Self {
            inner: Arc::new(Inner {
                ctx,
                state: Mutex::new(state),
                caches: Mutex::new(HashMap::new()),
                build_locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn context(&self) -> &EngineContext {
        &self.inner.ctx
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// The scope `uri` belongs to under the current workspace roots.
    pub fn scope_for(&self, uri: &Url) -> Option<Url> {
        scope_for(uri, &self.lock().roots)
    }

    /// Every client currently held, ready or not.
    pub fn clients(&self) -> Vec<Arc<EngineClient>> {
        self.lock()
            .slots
            .values()
            .map(|slot| Arc::clone(&slot.client))
            .collect()
    }

    /// Return the ready client for `uri`'s scope, or start creating one.
    ///
    /// Never blocks. `None` means the resource has no usable configuration
    /// or its client is still being created. A client that failed to start is
    /// returned as is; inspect [`EngineClient::state`] and
    /// [`EngineClient::last_error`]. One that ran and has since exited or
    /// failed a build is replaced, and this call returns `None`.
    pub fn get_client(&self, uri: &Url) -> Option<Arc<EngineClient>> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }

        let config = match resolve(uri, &state.roots, &state.settings) {
            Ok(config) => config,
            Err(reason) => {
                self.warn_unresolved(&mut state, &reason);
                return None;
            }
        };
        let scope = scope_for(uri, &state.roots)?;

        let Some(slot) = state.slots.get(&scope) else {
            self.start_slot(&mut state, scope, config);
            return None;
        };
        if !slot.ready {
            return None;
        }
        if slot.client.config() != &config {
            tracing::info!(scope = %scope, "Build configuration changed, replacing engine");
            self.replace_slot(&mut state, &scope, Some(config));
            return None;
        }
        if slot.client.has_run() {
            match slot.client.state() {
                ClientState::Exited => {
                    tracing::info!(scope = %scope, "Build engine exited, starting a new one");
                    self.replace_slot(&mut state, &scope, Some(config));
                    return None;
                }
                ClientState::Errored => {
                    tracing::info!(scope = %scope, "Build engine failed a build, starting a new one");
                    self.replace_slot(&mut state, &scope, Some(config));
                    return None;
                }
                ClientState::Starting | ClientState::Running => {}
            }
        }
        Some(Arc::clone(&slot.client))
    }

    fn warn_unresolved(&self, state: &mut State, reason: &Unresolved) {
        let scope = match reason {
            Unresolved::OutsideWorkspace { .. } => None,
            Unresolved::NoEngineCommand { scope }
            | Unresolved::NoBuildCommand { scope }
            | Unresolved::NoWorkingDirectory { scope } => Some(scope),
        };
        if !state.warned.insert(scope.cloned()) {
            tracing::debug!("{reason}");
            return;
        }
        tracing::warn!("{reason}");
        self.inner
            .ctx
            .events
            .user_message(scope, MessageLevel::Warning, reason.to_string());
    }

    /// Insert a fresh slot and spawn its creation task. Caller holds the lock.
    fn start_slot(&self, state: &mut State, scope: Url, config: BuildConfig) {
        let generation = state.next_generation;
        state.next_generation += 1;

        let client = EngineClient::new(
            scope.clone(),
            config,
            &self.inner.ctx.server,
            self.inner.ctx.events.clone(),
        );
        tracing::debug!(scope = %scope, generation, "Creating build engine");

        let manager = self.clone();
        let task_client = Arc::clone(&client);
        let task_scope = scope.clone();
        let handle = tokio::spawn(async move {
            let result = task_client.start().await;
            manager.finish_creation(&task_scope, generation, result);
        });

        state.slots.insert(
            scope,
            Slot {
                client,
                generation,
                ready: false,
                task: Some(handle.abort_handle()),
            },
        );
    }

    fn finish_creation(&self, scope: &Url, generation: u64, result: Result<(), EngineError>) {
        let client = {
            let mut state = self.lock();
            match state.slots.get_mut(scope) {
                Some(slot) if slot.generation == generation => {
                    slot.ready = true;
                    slot.task = None;
                    Arc::clone(&slot.client)
                }
                _ => {
                    tracing::debug!(scope = %scope, generation, "Superseded engine finished starting");
                    return;
                }
            }
        };

        if let Err(e) = result {
            self.inner.ctx.events.user_message(
                Some(scope),
                MessageLevel::Error,
                format!("Unable to start the build engine for {scope}: {e}"),
            );
        }
        self.inner.ctx.events.client_ready(ClientReady {
            scope: scope.clone(),
            state: client.state(),
            builder_name: client.builder_name().map(String::from),
        });
    }

    /// Remove the scope's slot, shut its client down in the background and,
    /// given a config, start a replacement. Caller holds the lock.
    fn replace_slot(&self, state: &mut State, scope: &Url, config: Option<BuildConfig>) {
        if let Some(old) = state.slots.remove(scope) {
            if let Some(task) = old.task {
                task.abort();
            }
            let client = old.client;
            tokio::spawn(async move { client.shutdown().await });
        }
        match config {
            Some(config) => self.start_slot(state, scope.clone(), config),
            None => {
                self.inner
                    .caches
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(scope);
                self.inner
                    .build_locks
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(scope);
            }
        }
    }

    /// Re-resolve every known scope and replace clients whose config drifted.
    fn reconcile(&self, state: &mut State) {
        let scopes: Vec<Url> = state.slots.keys().cloned().collect();
        for scope in scopes {
            let desired = if state.roots.contains(&scope) {
                resolve(&scope, &state.roots, &state.settings).ok()
            } else {
                None
            };
            let current = state.slots.get(&scope).map(|slot| slot.client.config());
            if desired.as_ref() == current {
                continue;
            }
            match &desired {
                Some(_) => tracing::info!(scope = %scope, "Build configuration changed, replacing engine"),
                None => tracing::info!(scope = %scope, "Scope no longer resolvable, stopping engine"),
            }
            self.replace_slot(state, &scope, desired);
        }
    }

    pub fn update_settings(&self, settings: UserSettings) {
        let mut state = self.lock();
        if state.settings == settings {
            return;
        }
        state.settings = settings;
        state.warned.clear();
        self.reconcile(&mut state);
    }

    pub fn set_workspace_roots(&self, roots: Vec<Url>) {
        let mut state = self.lock();
        state.roots = roots;
        state.warned.clear();
        self.reconcile(&mut state);
    }

    pub fn remove_workspace(&self, root: &Url) {
        let mut state = self.lock();
        state.roots.retain(|known| known != root);
        state.warned.clear();
        self.reconcile(&mut state);
    }

    /// Wait up to `timeout` for `uri`'s client to become ready.
    pub async fn wait_for_client(&self, uri: &Url, timeout: Duration) -> Option<Arc<EngineClient>> {
        let mut ready = self.inner.ctx.events.subscribe_client_ready();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(client) = self.get_client(uri) {
                return Some(client);
            }
            if self.scope_for(uri).is_none() {
                return None;
            }
            match tokio::time::timeout_at(deadline, ready.recv()).await {
                Ok(Ok(_) | Err(broadcast::error::RecvError::Lagged(_))) => {}
                Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => return None,
            }
        }
    }

    /// The scope's cache, opened on first use.
    pub fn cache_for(&self, uri: &Url) -> anyhow::Result<Option<Arc<ProjectCache>>> {
        match self.scope_for(uri) {
            Some(scope) => self.cache_for_scope(&scope).map(Some),
            None => Ok(None),
        }
    }

    fn cache_for_scope(&self, scope: &Url) -> anyhow::Result<Arc<ProjectCache>> {
        let mut caches = self
            .inner
            .caches
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(cache) = caches.get(scope) {
            return Ok(Arc::clone(cache));
        }
        let dir = self.inner.ctx.server.cache.directory();
        let cache = Arc::new(ProjectCache::open_for_scope(dir.as_deref(), scope)?);
        caches.insert(scope.clone(), Arc::clone(&cache));
        Ok(cache)
    }

    fn build_lock(&self, scope: &Url) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .inner
            .build_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(scope.clone()).or_default())
    }

    fn is_current(&self, scope: &Url, client: &Arc<EngineClient>) -> bool {
        self.lock()
            .slots
            .get(scope)
            .is_some_and(|slot| Arc::ptr_eq(&slot.client, client))
    }

    /// Build `uri`'s project and replace its cached snapshot.
    ///
    /// Failures produce exactly one user message and are not retried. Builds
    /// of one scope run one at a time, so snapshots land in request order.
    pub async fn trigger_build(
        &self,
        uri: &Url,
        content_overrides: &BTreeMap<Url, String>,
    ) -> BuildOutcome {
        let Some(client) = self.get_client(uri) else {
            return BuildOutcome::Skipped;
        };
        if client.state() != ClientState::Running {
            return BuildOutcome::Skipped;
        }
        let scope = client.scope().clone();
        let build_lock = self.build_lock(&scope);
        let guard = build_lock.lock().await;
        if client.state() != ClientState::Running {
            return BuildOutcome::Skipped;
        }
        tracing::debug!(scope = %scope, builder = client.builder_name(), "Triggering build");

        let output = match Self::collect_build(&client, content_overrides).await {
            Ok(output) => output,
            Err(e) => {
                if !self.is_current(&scope, &client) {
                    tracing::debug!(scope = %scope, "Dropping failure from a superseded engine: {e}");
                    return BuildOutcome::Discarded;
                }
                if e.is_terminal() {
                    // The client already reported its own exit.
                    tracing::warn!(scope = %scope, "Build interrupted: {e}");
                    return BuildOutcome::Failed(e.to_string());
                }
                return self.build_failed(&scope, e.to_string());
            }
        };

        if !self.is_current(&scope, &client) {
            tracing::debug!(scope = %scope, "Discarding build from a superseded engine");
            return BuildOutcome::Discarded;
        }

        let cache = match self.cache_for_scope(&scope) {
            Ok(cache) => cache,
            Err(e) => return self.build_failed(&scope, format!("{e:#}")),
        };
        let diagnostics = output.diagnostic_count();
        let sync_cache = Arc::clone(&cache);
        let synced = tokio::task::spawn_blocking(move || sync_cache.sync(&output)).await;
        match synced {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return self.build_failed(&scope, format!("{e:#}")),
            Err(e) => return self.build_failed(&scope, format!("cache sync task failed: {e}")),
        }
        drop(guard);

        tracing::info!(scope = %scope, diagnostics, "Build applied");
        self.inner.ctx.events.build_finished(BuildFinished {
            scope: scope.clone(),
            diagnostics,
        });
        self.inner.ctx.listeners.notify(&scope, &cache).await;
        BuildOutcome::Completed { diagnostics }
    }

    async fn collect_build(
        client: &EngineClient,
        content_overrides: &BTreeMap<Url, String>,
    ) -> Result<BuildOutput, EngineError> {
        let mut output = client.build(content_overrides).await?;
        output.roles = client.get_roles().await?;
        output.directives = client.get_directives().await?;
        Ok(output)
    }

    fn build_failed(&self, scope: &Url, message: String) -> BuildOutcome {
        tracing::error!(scope = %scope, "Build failed: {message}");
        self.inner.ctx.events.user_message(
            Some(scope),
            MessageLevel::Error,
            format!("Build failed for {scope}: {message}"),
        );
        BuildOutcome::Failed(message)
    }

    /// Cancel pending creations and shut every client down.
    pub async fn shutdown(&self) {
        let slots: Vec<Slot> = {
            let mut state = self.lock();
            state.closed = true;
            state.slots.drain().map(|(_, slot)| slot).collect()
        };

        let mut tasks = JoinSet::new();
        for slot in slots {
            if let Some(task) = slot.task {
                task.abort();
            }
            let client = slot.client;
            tasks.spawn(async move { client.shutdown().await });
        }
        while tasks.join_next().await.is_some() {}
        tracing::debug!("Engine manager shut down");
    }
}
