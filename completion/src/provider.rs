//! Completion providers and the registry that dispatches to them.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use quire_cache::{ObjectFilter, ProjectCache};
use quire_types::ObjectRecord;
use serde::Serialize;
use tokio::task::JoinSet;

use crate::context::CompletionContext;
use crate::trigger::{MYST_DIRECTIVE, MYST_ROLE, RST_DIRECTIVE, RST_ROLE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionKind {
    Role,
    Directive,
    Object,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionItem {
    pub label: String,
    pub kind: CompletionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub insert_text: String,
}

impl CompletionItem {
    pub fn new(label: impl Into<String>, kind: CompletionKind) -> Self {
        let label = label.into();
        Self {
            insert_text: label.clone(),
            label,
            kind,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// A source of completion items for some set of triggers.
pub trait CompletionProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Names of the triggers this provider answers.
    fn triggers(&self) -> &[&str];

    fn complete(
        &self,
        context: Arc<CompletionContext>,
        cache: Arc<ProjectCache>,
    ) -> BoxFuture<'static, anyhow::Result<Vec<CompletionItem>>>;
}

#[derive(Clone, Default)]
pub struct CompletionRegistry {
    providers: Vec<Arc<dyn CompletionProvider>>,
}

impl CompletionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the cache-backed role and directive providers.
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(RoleProvider));
        registry.register(Arc::new(DirectiveProvider));
        registry
    }

    pub fn register(&mut self, provider: Arc<dyn CompletionProvider>) {
        tracing::debug!(provider = provider.name(), "Registered completion provider");
        self.providers.push(provider);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Ask every provider serving the context's trigger, concurrently.
    ///
    /// Items come back in registration order. A failing provider is logged
    /// and contributes nothing.
    pub async fn complete(
        &self,
        context: CompletionContext,
        cache: Arc<ProjectCache>,
    ) -> Vec<CompletionItem> {
        let context = Arc::new(context);
        let mut tasks = JoinSet::new();
        for (index, provider) in self.providers.iter().enumerate() {
            if !provider.triggers().contains(&context.trigger()) {
                continue;
            }
            let future = provider.complete(Arc::clone(&context), Arc::clone(&cache));
            let name = provider.name().to_string();
            tasks.spawn(async move { (index, name, future.await) });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, _, Ok(items))) => results.push((index, items)),
                Ok((_, name, Err(e))) => {
                    tracing::warn!(provider = %name, trigger = context.trigger(), "Completion provider failed: {e:#}");
                }
                Err(e) => tracing::warn!(trigger = context.trigger(), "Completion provider panicked: {e}"),
            }
        }
        results.sort_by_key(|(index, _)| *index);
        results.into_iter().flat_map(|(_, items)| items).collect()
    }
}

/// Object types a cross-reference role can point at, for roles whose name
/// does not spell the type out.
const ROLE_TARGETS: &[(&str, &[&str])] = &[
    ("ref", &["label"]),
    ("numref", &["label"]),
    ("term", &["term"]),
    ("doc", &["doc"]),
    ("envvar", &["envvar"]),
    ("option", &["cmdoption"]),
    ("func", &["function"]),
    ("meth", &["method"]),
    ("class", &["class"]),
    ("mod", &["module"]),
    ("attr", &["attribute", "property"]),
    ("data", &["data"]),
    ("exc", &["exception"]),
    ("obj", &[]),
    ("any", &[]),
];

/// Role names, or the objects a role can reference once the cursor is in
/// its target.
pub struct RoleProvider;

impl RoleProvider {
    fn items(context: &CompletionContext, cache: &ProjectCache) -> anyhow::Result<Vec<CompletionItem>> {
        if !context.cursor_in_group("target") {
            return Ok(cache
                .get_roles()?
                .into_iter()
                .map(|role| {
                    let item = CompletionItem::new(role.name, CompletionKind::Role);
                    match role.implementation {
                        Some(implementation) => item.with_detail(implementation),
                        None => item,
                    }
                })
                .collect());
        }

        let Some(role) = context.group("name") else {
            return Ok(Vec::new());
        };
        let objects = cache.get_objects(&target_filter(role))?;
        Ok(objects.into_iter().map(object_item).collect())
    }
}

fn target_filter(role: &str) -> ObjectFilter {
    let (domain, short) = match role.split_once(':') {
        Some((domain, short)) => (Some(domain), short),
        None => (None, role),
    };
    let mut filter = ObjectFilter::new();
    match ROLE_TARGETS.iter().find(|(name, _)| *name == short) {
        Some((_, obj_types)) => {
            for obj_type in *obj_types {
                filter = filter.obj_type(*obj_type);
            }
            // Unqualified label-like roles live in the standard domain.
            let domain = domain.or(match short {
                "ref" | "numref" | "term" | "doc" | "envvar" | "option" => Some("std"),
                _ => None,
            });
            if let Some(domain) = domain {
                filter = filter.domain(domain);
            }
        }
        None => {
            if let Some(domain) = domain {
                filter = filter.domain(domain);
            }
            filter = filter.obj_type(short);
        }
    }
    filter
}

fn object_item(object: ObjectRecord) -> CompletionItem {
    let detail = if object.display.is_empty() || object.display == object.name {
        object.qualified_type()
    } else {
        format!("{} ({})", object.display, object.qualified_type())
    };
    CompletionItem::new(object.name, CompletionKind::Object).with_detail(detail)
}

impl CompletionProvider for RoleProvider {
    fn name(&self) -> &str {
        "roles"
    }

    fn triggers(&self) -> &[&str] {
        &[RST_ROLE, MYST_ROLE]
    }

    fn complete(
        &self,
        context: Arc<CompletionContext>,
        cache: Arc<ProjectCache>,
    ) -> BoxFuture<'static, anyhow::Result<Vec<CompletionItem>>> {
        Box::pin(async move {
            tokio::task::spawn_blocking(move || Self::items(&context, &cache)).await?
        })
    }
}

/// Directive names known to the project.
pub struct DirectiveProvider;

impl CompletionProvider for DirectiveProvider {
    fn name(&self) -> &str {
        "directives"
    }

    fn triggers(&self) -> &[&str] {
        &[RST_DIRECTIVE, MYST_DIRECTIVE]
    }

    fn complete(
        &self,
        _context: Arc<CompletionContext>,
        cache: Arc<ProjectCache>,
    ) -> BoxFuture<'static, anyhow::Result<Vec<CompletionItem>>> {
        Box::pin(async move {
            tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<CompletionItem>> {
                let directives = cache.get_directives()?;
                Ok(directives
                    .into_iter()
                    .map(|directive| {
                        let item = CompletionItem::new(directive.name, CompletionKind::Directive);
                        match directive.implementation {
                            Some(implementation) => item.with_detail(implementation),
                            None => item,
                        }
                    })
                    .collect())
            })
            .await?
        })
    }
}
