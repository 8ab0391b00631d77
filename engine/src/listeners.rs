//! Post-build listener registry.
//!
//! Features that need to react to fresh build data (re-publishing
//! diagnostics, refreshing previews) register a [`BuildListener`]. After every
//! successful cache sync the manager runs all listeners concurrently; a
//! failing listener is logged by name and does not affect the others.

use std::sync::{Arc, PoisonError, RwLock};

use futures_util::future::BoxFuture;
use quire_cache::ProjectCache;
use tokio::task::JoinSet;
use url::Url;

pub trait BuildListener: Send + Sync {
    fn name(&self) -> &str;

    /// Called with the scope that was built and its freshly synced cache.
    fn on_build(&self, scope: Url, cache: Arc<ProjectCache>) -> BoxFuture<'static, anyhow::Result<()>>;
}

#[derive(Clone, Default)]
pub struct BuildListeners {
    listeners: Arc<RwLock<Vec<Arc<dyn BuildListener>>>>,
}

impl BuildListeners {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Arc<dyn BuildListener>) {
        tracing::debug!(listener = listener.name(), "Registered build listener");
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every listener and wait for all of them. Returns how many failed.
    pub async fn notify(&self, scope: &Url, cache: &Arc<ProjectCache>) -> usize {
        let listeners: Vec<Arc<dyn BuildListener>> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if listeners.is_empty() {
            return 0;
        }

        let mut tasks = JoinSet::new();
        for listener in listeners {
            let future = listener.on_build(scope.clone(), Arc::clone(cache));
            let name = listener.name().to_string();
            tasks.spawn(async move { (name, future.await) });
        }

        let mut failures = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((name, Err(e))) => {
                    failures += 1;
                    tracing::warn!(listener = %name, scope = %scope, "Build listener failed: {e:#}");
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(scope = %scope, "Build listener panicked: {e}");
                }
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Counting {
        name: &'static str,
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl BuildListener for Counting {
        fn name(&self) -> &str {
            self.name
        }

        fn on_build(&self, _scope: Url, cache: Arc<ProjectCache>) -> BoxFuture<'static, anyhow::Result<()>> {
            let calls = Arc::clone(&self.calls);
            let fail = self.fail;
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                cache.get_roles()?;
                if fail {
                    anyhow::bail!("listener refused");
                }
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn failing_listener_does_not_stop_others() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = BuildListeners::new();
        for (name, fail) in [("diagnostics", false), ("broken", true), ("preview", false)] {
            registry.register(Arc::new(Counting {
                name,
                calls: Arc::clone(&calls),
                fail,
            }));
        }
        assert_eq!(registry.len(), 3);

        let cache = Arc::new(ProjectCache::open_in_memory().unwrap());
        let scope = Url::parse("file:///proj/").unwrap();
        let failures = registry.notify(&scope, &cache).await;

        assert_eq!(failures, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn empty_registry_is_a_no_op() {
        let registry = BuildListeners::new();
        assert!(registry.is_empty());
        let cache = Arc::new(ProjectCache::open_in_memory().unwrap());
        let scope = Url::parse("file:///proj/").unwrap();
        assert_eq!(registry.notify(&scope, &cache).await, 0);
    }
}
