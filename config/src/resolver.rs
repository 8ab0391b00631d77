//! Build-config resolution.
//!
//! Pure functions: given a resource, the open workspace roots and the user
//! settings, decide which project (scope) the resource belongs to and how the
//! build engine for that project must be launched. Only read-only filesystem
//! probing happens here, so calls are safe to repeat and to run concurrently.

use std::env;
use std::path::{Path, PathBuf};

use url::Url;

use crate::settings::{UserSettings, expand_variables};

/// Workspace-local environments probed for an engine interpreter, in order.
const LOCAL_ENV_DIRS: [&str; 2] = [".venv", "venv"];

/// Everything needed to launch and drive one engine instance.
///
/// Two configs are compared structurally to detect drift.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BuildConfig {
    pub engine_command: Vec<String>,
    pub build_command: Vec<String>,
    pub cwd: PathBuf,
    pub engine_path: Vec<PathBuf>,
    pub fallback_env: Option<PathBuf>,
}

impl BuildConfig {
    /// Builder requested by a `-M <builder>` / `-b <builder>` build command.
    #[must_use]
    pub fn requested_builder(&self) -> Option<&str> {
        self.build_command
            .windows(2)
            .find(|pair| pair[0] == "-M" || pair[0] == "-b")
            .map(|pair| pair[1].as_str())
    }
}

/// Why no [`BuildConfig`] could be produced.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Unresolved {
    #[error("{uri} is not inside any open workspace folder")]
    OutsideWorkspace { uri: Url },
    #[error("no engine command configured and no fallback environment available for {scope}")]
    NoEngineCommand { scope: Url },
    #[error("unable to determine a build command for {scope}")]
    NoBuildCommand { scope: Url },
    #[error("unable to determine the working directory for {scope}")]
    NoWorkingDirectory { scope: Url },
}

/// Find the workspace root containing `uri`. The deepest root wins.
#[must_use]
pub fn scope_for(uri: &Url, workspace_roots: &[Url]) -> Option<Url> {
    let candidate = uri.as_str();
    workspace_roots
        .iter()
        .filter(|root| root.scheme() == uri.scheme())
        .filter(|root| {
            let root = root.as_str().trim_end_matches('/');
            candidate == root
                || candidate
                    .strip_prefix(root)
                    .is_some_and(|rest| rest.starts_with('/'))
        })
        .max_by_key(|root| root.as_str().trim_end_matches('/').len())
        .cloned()
}

/// Resolve the build configuration for `uri`.
///
/// Precedence for each part: explicit settings, then what can be inferred
/// from the containing workspace root, then the fallback environment.
pub fn resolve(
    uri: &Url,
    workspace_roots: &[Url],
    settings: &UserSettings,
) -> Result<BuildConfig, Unresolved> {
    let scope = scope_for(uri, workspace_roots)
        .ok_or_else(|| Unresolved::OutsideWorkspace { uri: uri.clone() })?;
    // Collecting components drops the trailing separator of directory URIs.
    let root_path: Option<PathBuf> = scope
        .to_file_path()
        .ok()
        .map(|path| path.components().collect());
    let expand = |value: &str| expand_for_scope(value, &scope, root_path.as_deref());

    let fallback_env = settings
        .fallback_env
        .as_deref()
        .map(|env| absolutize(PathBuf::from(expand(env)), root_path.as_deref()));

    let engine_command = if settings.engine_command.is_empty() {
        infer_engine_command(root_path.as_deref(), fallback_env.as_deref(), settings)
            .ok_or_else(|| Unresolved::NoEngineCommand {
                scope: scope.clone(),
            })?
    } else {
        settings.engine_command.iter().map(|arg| expand(arg)).collect()
    };

    let build_command = if settings.build_command.is_empty() {
        root_path
            .as_deref()
            .and_then(|root| infer_build_command(root, settings))
            .ok_or_else(|| Unresolved::NoBuildCommand {
                scope: scope.clone(),
            })?
    } else {
        settings.build_command.iter().map(|arg| expand(arg)).collect()
    };

    let cwd = match (settings.cwd.as_deref(), root_path.as_deref()) {
        (Some(cwd), root) => {
            let cwd = PathBuf::from(expand(cwd));
            if cwd.is_absolute() {
                cwd
            } else if let Some(root) = root {
                root.join(cwd)
            } else {
                return Err(Unresolved::NoWorkingDirectory { scope: scope.clone() });
            }
        }
        (None, Some(root)) => root.to_path_buf(),
        (None, None) => return Err(Unresolved::NoWorkingDirectory { scope: scope.clone() }),
    };

    let engine_path = settings
        .engine_path
        .iter()
        .map(|entry| absolutize(PathBuf::from(expand(entry)), root_path.as_deref()))
        .collect();

    Ok(BuildConfig {
        engine_command,
        build_command,
        cwd,
        engine_path,
        fallback_env,
    })
}

/// `${scope}` is the root URI, `${scopePath}`/`${workspaceRoot}` its path;
/// anything else is looked up in the process environment.
fn expand_for_scope(value: &str, scope: &Url, root_path: Option<&Path>) -> String {
    expand_variables(value, |var| match var {
        "scope" => Some(scope.to_string()),
        "scopePath" | "workspaceRoot" => root_path.map(|p| p.display().to_string()),
        other => env::var(other).ok(),
    })
}

fn absolutize(path: PathBuf, root: Option<&Path>) -> PathBuf {
    match root {
        Some(root) if path.is_relative() => root.join(path),
        _ => path,
    }
}

fn interpreter_in(env: &Path) -> PathBuf {
    if cfg!(windows) {
        env.join("Scripts").join("python.exe")
    } else {
        env.join("bin").join("python")
    }
}

fn infer_engine_command(
    root: Option<&Path>,
    fallback_env: Option<&Path>,
    settings: &UserSettings,
) -> Option<Vec<String>> {
    let local = root.and_then(|root| {
        LOCAL_ENV_DIRS
            .iter()
            .map(|dir| interpreter_in(&root.join(dir)))
            .find(|python| python.is_file())
    });
    let python = local.or_else(|| fallback_env.map(interpreter_in))?;

    Some(vec![
        python.display().to_string(),
        String::from("-m"),
        settings.engine_module.clone(),
    ])
}

fn infer_build_command(root: &Path, settings: &UserSettings) -> Option<Vec<String>> {
    let marker = settings
        .root_markers
        .iter()
        .map(|marker| root.join(marker))
        .find(|candidate| candidate.is_file())?;
    let srcdir = marker.parent()?;

    tracing::debug!(srcdir = %srcdir.display(), "Inferred project source directory");
    Some(vec![
        String::from("sphinx-build"),
        String::from("-M"),
        settings.default_builder.clone(),
        srcdir.display().to_string(),
        srcdir.join("_build").display().to_string(),
    ])
}
