//! `check` and `complete`: one-shot runs of the engine manager.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use quire_cache::ProjectCache;
use quire_completion::{
    ClientCapabilities, CompletionRegistry, CompletionRequest, CompletionTrigger,
};
use quire_config::{QuireConfig, UserSettings};
use quire_engine::{
    BuildOutcome, ClientState, EngineClient, EngineContext, EngineManager, MessageLevel,
};
use quire_types::Position;
use url::Url;

use crate::args::{CheckArgs, CompleteArgs};

/// A workspace of one project root, ready to be built.
struct Session {
    manager: EngineManager,
    root: Url,
}

impl Session {
    fn open(config: &QuireConfig, path: &Path, builder: Option<&str>) -> Result<(Self, PathBuf)> {
        let path = path
            .canonicalize()
            .with_context(|| format!("resolving {}", path.display()))?;
        let start = if path.is_dir() {
            path.as_path()
        } else {
            path.parent()
                .with_context(|| format!("{} has no parent directory", path.display()))?
        };
        let root_dir = project_root(start, &config.engine.root_markers);
        let root = Url::from_directory_path(&root_dir)
            .map_err(|()| anyhow!("{} is not an absolute path", root_dir.display()))?;

        let mut settings = config.engine.clone();
        if let Some(builder) = builder {
            apply_builder(&mut settings, builder);
        }
        let ctx = EngineContext::new(settings, config.server.clone());
        forward_user_messages(&ctx);

        let manager = EngineManager::new(ctx, vec![root.clone()]);
        Ok((Self { manager, root }, path))
    }

    async fn ready_client(&self, uri: &Url) -> Result<Arc<EngineClient>> {
        let timeout = self.manager.context().server.request_timeout();
        let client = self
            .manager
            .wait_for_client(uri, timeout)
            .await
            .with_context(|| format!("no build engine became ready for {}", self.root))?;
        if client.state() != ClientState::Running {
            let reason = client
                .last_error()
                .map_or_else(|| client.state().to_string(), |e| e.to_string());
            bail!("build engine for {} is not running: {reason}", self.root);
        }
        Ok(client)
    }

    async fn build(&self, uri: &Url, overrides: &BTreeMap<Url, String>) -> Result<Arc<ProjectCache>> {
        let client = self.ready_client(uri).await?;
        tracing::info!(scope = %self.root, builder = client.builder_name(), "Building project");
        match self.manager.trigger_build(uri, overrides).await {
            BuildOutcome::Completed { .. } => {}
            BuildOutcome::Failed(message) => bail!("{message}"),
            BuildOutcome::Skipped | BuildOutcome::Discarded => {
                bail!("build for {} did not run", self.root)
            }
        }
        self.manager
            .cache_for(uri)?
            .with_context(|| format!("no project cache for {uri}"))
    }
}

/// The nearest directory at or above `start` holding a project marker, or
/// `start` itself when none does.
fn project_root(start: &Path, markers: &[String]) -> PathBuf {
    start
        .ancestors()
        .find(|dir| markers.iter().any(|marker| dir.join(marker).is_file()))
        .unwrap_or(start)
        .to_path_buf()
}

/// Point the build at `builder`, whether the command is explicit or inferred.
fn apply_builder(settings: &mut UserSettings, builder: &str) {
    settings.default_builder = builder.to_string();
    let flag = settings
        .build_command
        .iter()
        .position(|arg| arg == "-M" || arg == "-b");
    if let Some(value) = flag.and_then(|i| settings.build_command.get_mut(i + 1)) {
        *value = builder.to_string();
    }
}

fn forward_user_messages(ctx: &EngineContext) {
    let mut messages = ctx.events.subscribe_user_messages();
    tokio::spawn(async move {
        while let Ok(message) = messages.recv().await {
            let level = match message.level {
                MessageLevel::Error => "error",
                MessageLevel::Warning => "warning",
                MessageLevel::Info => "info",
            };
            eprintln!("{level}: {}", message.text);
        }
    });
}

fn display_location(uri: &Url) -> String {
    uri.to_file_path()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|()| uri.to_string())
}

fn language_for(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("md" | "markdown") => "markdown",
        _ => "restructuredtext",
    }
}

pub async fn check(config: &QuireConfig, args: CheckArgs) -> Result<ExitCode> {
    let (session, _) = Session::open(config, &args.path, args.builder.as_deref())?;
    let result = run_check(&session).await;
    session.manager.shutdown().await;
    result
}

async fn run_check(session: &Session) -> Result<ExitCode> {
    let cache = session.build(&session.root, &BTreeMap::new()).await?;
    let diagnostics = cache.get_diagnostics()?;

    let mut errors = 0;
    let mut total = 0;
    for (uri, items) in &diagnostics {
        let location = display_location(uri);
        for diagnostic in items {
            println!("{}", diagnostic.display_with_location(&location));
            total += 1;
            if diagnostic.severity.is_error() {
                errors += 1;
            }
        }
    }
    println!(
        "{total} diagnostic(s) in {} file(s), {errors} error(s)",
        diagnostics.len()
    );
    Ok(if errors > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

pub async fn complete(config: &QuireConfig, args: CompleteArgs) -> Result<ExitCode> {
    let (session, file) = Session::open(config, &args.path, args.builder.as_deref())?;
    let result = run_complete(config, &session, &file, &args).await;
    session.manager.shutdown().await;
    result
}

async fn run_complete(
    config: &QuireConfig,
    session: &Session,
    file: &Path,
    args: &CompleteArgs,
) -> Result<ExitCode> {
    if file.is_dir() {
        bail!("complete needs a file, got directory {}", file.display());
    }
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let uri = Url::from_file_path(file)
        .map_err(|()| anyhow!("{} is not an absolute path", file.display()))?;
    let language = args
        .language
        .clone()
        .unwrap_or_else(|| language_for(file).to_string());
    let capabilities = ClientCapabilities {
        position_encoding: args.encoding,
        ..ClientCapabilities::default()
    };

    let request = CompletionRequest::new(uri.clone(), Position::new(args.line, args.character));
    let triggers = CompletionTrigger::from_settings(&config.completion);
    let Some(context) = triggers.evaluate(&request, &text, &language, &capabilities) else {
        eprintln!("no completion context at {}:{}", args.line, args.character);
        return Ok(ExitCode::SUCCESS);
    };
    tracing::debug!(trigger = context.trigger(), "Completion context found");

    let overrides = BTreeMap::from([(uri.clone(), text.clone())]);
    let cache = session.build(&uri, &overrides).await?;
    let items = CompletionRegistry::with_builtin().complete(context, cache).await;
    for item in &items {
        println!("{}", serde_json::to_string(item)?);
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_override_rewrites_explicit_command() {
        let mut settings = UserSettings {
            build_command: vec!["sphinx-build".into(), "-M".into(), "dirhtml".into(), ".".into()],
            ..UserSettings::default()
        };
        apply_builder(&mut settings, "html");
        assert_eq!(settings.build_command[2], "html");
        assert_eq!(settings.default_builder, "html");
    }

    #[test]
    fn builder_override_without_command_sets_default() {
        let mut settings = UserSettings::default();
        apply_builder(&mut settings, "latex");
        assert!(settings.build_command.is_empty());
        assert_eq!(settings.default_builder, "latex");
    }

    #[test]
    fn language_follows_extension() {
        assert_eq!(language_for(Path::new("guide.md")), "markdown");
        assert_eq!(language_for(Path::new("index.rst")), "restructuredtext");
        assert_eq!(language_for(Path::new("README")), "restructuredtext");
    }

    #[tokio::test]
    async fn session_roots_at_the_file_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("index.rst");
        std::fs::write(&file, "Title\n=====\n").unwrap();
        std::fs::write(dir.path().join("conf.py"), "").unwrap();

        let (session, resolved) = Session::open(&QuireConfig::default(), &file, None).unwrap();
        let expected = Url::from_directory_path(dir.path().canonicalize().unwrap()).unwrap();
        assert_eq!(session.root, expected);
        assert_eq!(resolved, file.canonicalize().unwrap());
        assert_eq!(display_location(&session.root.join("index.rst").unwrap()), resolved.display().to_string());
    }

    #[tokio::test]
    async fn session_roots_at_the_nearest_project_marker() {
        let dir = tempfile::tempdir().unwrap();
        let docs = dir.path().join("docs");
        std::fs::create_dir_all(docs.join("sub")).unwrap();
        std::fs::write(docs.join("conf.py"), "project = 'Demo'\n").unwrap();
        let page = docs.join("sub").join("page.rst");
        std::fs::write(&page, "Page\n====\n").unwrap();

        let mut config = QuireConfig::default();
        config.engine.engine_command = vec![String::from("quire-engine")];
        let (session, _) = Session::open(&config, &page, None).unwrap();
        let expected = Url::from_directory_path(docs.canonicalize().unwrap()).unwrap();
        assert_eq!(session.root, expected);

        let page_uri = session.root.join("sub/page.rst").unwrap();
        let resolved = quire_config::resolve(&page_uri, &[session.root.clone()], &config.engine);
        let build_command = resolved.unwrap().build_command;
        assert!(
            build_command.iter().any(|arg| arg.ends_with("docs")),
            "{build_command:?}"
        );
    }

    #[test]
    fn project_root_falls_back_to_the_start() {
        let dir = tempfile::tempdir().unwrap();
        let start = dir.path().join("notes");
        std::fs::create_dir_all(&start).unwrap();
        let markers = vec![String::from("quire-test-marker.py")];
        assert_eq!(project_root(&start, &markers), start);

        std::fs::write(dir.path().join("quire-test-marker.py"), "").unwrap();
        assert_eq!(project_root(&start, &markers), dir.path());
    }
}
