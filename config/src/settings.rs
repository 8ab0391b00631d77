use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use std::{env, fs};

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 2;

/// Top-level file configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct QuireConfig {
    /// Per-user build settings fed to the resolver.
    pub engine: UserSettings,
    pub server: ServerSettings,
    pub completion: CompletionSettings,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &PathBuf {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

/// Settings that decide how the build engine for a project is launched.
///
/// Editors send these as JSON with camelCase keys; the config file uses
/// snake_case. Both spellings are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    /// Command that starts the engine process. Overrides every inference.
    #[serde(alias = "engineCommand")]
    pub engine_command: Vec<String>,
    /// Command line the engine should build with.
    #[serde(alias = "buildCommand")]
    pub build_command: Vec<String>,
    /// Working directory for the engine, relative paths are joined to the
    /// workspace root.
    pub cwd: Option<String>,
    /// Extra import paths handed to the engine process.
    #[serde(alias = "enginePath")]
    pub engine_path: Vec<String>,
    /// Environment used when neither the settings nor the workspace supply an
    /// engine interpreter.
    #[serde(alias = "fallbackEnv")]
    pub fallback_env: Option<String>,
    /// Module run by an inferred interpreter.
    #[serde(alias = "engineModule")]
    pub engine_module: String,
    /// Builder used when the build command is inferred.
    #[serde(alias = "defaultBuilder")]
    pub default_builder: String,
    /// Files (relative to the workspace root) marking a project's source dir.
    #[serde(alias = "rootMarkers")]
    pub root_markers: Vec<String>,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            engine_command: Vec::new(),
            build_command: Vec::new(),
            cwd: None,
            engine_path: Vec::new(),
            fallback_env: None,
            engine_module: String::from("quire_agent"),
            default_builder: String::from("dirhtml"),
            root_markers: [
                "conf.py",
                "docs/conf.py",
                "doc/conf.py",
                "source/conf.py",
                "docs/source/conf.py",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// Tuning for the engine manager.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub request_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
    pub cache: CacheSettings,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            cache: CacheSettings::default(),
        }
    }
}

impl ServerSettings {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Keep project caches in memory only.
    pub in_memory: bool,
    /// Directory for on-disk caches. Defaults to the platform cache dir.
    pub dir: Option<PathBuf>,
}

impl CacheSettings {
    /// Directory holding the per-project cache files, `None` for in-memory caches.
    #[must_use]
    pub fn directory(&self) -> Option<PathBuf> {
        if self.in_memory {
            return None;
        }
        self.dir
            .clone()
            .or_else(|| dirs::cache_dir().map(|dir| dir.join("quire")))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CompletionSettings {
    /// Names of the completion triggers to enable. Empty enables all.
    pub enabled_triggers: Vec<String>,
}

impl CompletionSettings {
    #[must_use]
    pub fn is_enabled(&self, trigger: &str) -> bool {
        self.enabled_triggers.is_empty() || self.enabled_triggers.iter().any(|t| t == trigger)
    }
}

/// Expand `${NAME}` references, resolving each name through `lookup`.
///
/// Unknown names expand to an empty string. An unclosed `${` is kept verbatim.
pub fn expand_variables(value: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        let name = &after[..end];
        if name.is_empty() {
            out.push_str("${}");
        } else if let Some(replacement) = lookup(name) {
            out.push_str(&replacement);
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

pub fn expand_env_vars(value: &str) -> String {
    expand_variables(value, |var| env::var(var).ok())
}

impl QuireConfig {
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let path = match config_path() {
            Some(path) => path,
            None => return Ok(None),
        };
        if !path.exists() {
            return Ok(None);
        }
        Self::load_from(path).map(Some)
    }

    pub fn load_from(path: PathBuf) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read { path, source: err });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(config),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse { path, source: err })
            }
        }
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }
}

pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".quire").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(var: &str) -> Option<String> {
        match var {
            "HOME" => Some("/home/doc".to_string()),
            "EMPTY" => Some(String::new()),
            "ÜNI" => Some("ü".to_string()),
            _ => None,
        }
    }

    #[test]
    fn expand_no_vars() {
        assert_eq!(expand_variables("plain/path", lookup), "plain/path");
    }

    #[test]
    fn expand_single_var() {
        assert_eq!(expand_variables("${HOME}/docs", lookup), "/home/doc/docs");
    }

    #[test]
    fn expand_missing_var_becomes_empty() {
        assert_eq!(expand_variables("a${NOPE}b", lookup), "ab");
    }

    #[test]
    fn expand_adjacent_vars() {
        assert_eq!(expand_variables("${HOME}${EMPTY}${HOME}", lookup), "/home/doc/home/doc");
    }

    #[test]
    fn expand_unclosed_brace_preserved() {
        assert_eq!(expand_variables("x${HOME", lookup), "x${HOME");
    }

    #[test]
    fn expand_empty_var_name_preserved() {
        assert_eq!(expand_variables("x${}y", lookup), "x${}y");
    }

    #[test]
    fn expand_unicode_content() {
        assert_eq!(expand_variables("é/${ÜNI}/ß", lookup), "é/ü/ß");
    }

    #[test]
    fn config_defaults_from_empty_file() {
        let config: QuireConfig = toml::from_str("").unwrap();
        assert_eq!(config, QuireConfig::default());
        assert_eq!(config.engine.default_builder, "dirhtml");
        assert_eq!(config.server.request_timeout(), Duration::from_secs(30));
        assert!(config.engine.root_markers.iter().any(|m| m == "docs/conf.py"));
    }

    #[test]
    fn config_parses_sections() {
        let config: QuireConfig = toml::from_str(
            r#"
            [engine]
            build_command = ["sphinx-build", "-M", "html", "docs", "docs/_build"]
            fallback_env = "${HOME}/.venvs/docs"

            [server]
            shutdown_timeout_secs = 5

            [server.cache]
            in_memory = true

            [completion]
            enabled_triggers = ["rst-role"]
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.build_command[2], "html");
        assert_eq!(config.engine.fallback_env.as_deref(), Some("${HOME}/.venvs/docs"));
        assert_eq!(config.server.shutdown_timeout(), Duration::from_secs(5));
        assert_eq!(config.server.request_timeout_secs, 30);
        assert_eq!(config.server.cache.directory(), None);
        assert!(config.completion.is_enabled("rst-role"));
        assert!(!config.completion.is_enabled("rst-directive"));
    }

    #[test]
    fn user_settings_accept_editor_camel_case() {
        let settings: UserSettings = toml::from_str(
            r#"
            buildCommand = ["sphinx-build", "-M", "html", ".", "_build"]
            enginePath = ["/opt/ext"]
            "#,
        )
        .unwrap();
        assert_eq!(settings.build_command.len(), 5);
        assert_eq!(settings.engine_path, vec!["/opt/ext".to_string()]);
        assert_eq!(settings.engine_module, "quire_agent");
    }

    #[test]
    fn cache_dir_override_wins() {
        let cache = CacheSettings {
            in_memory: false,
            dir: Some(PathBuf::from("/tmp/quire-cache")),
        };
        assert_eq!(cache.directory(), Some(PathBuf::from("/tmp/quire-cache")));
    }

    #[test]
    fn load_from_reports_parse_errors_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[engine\nbroken").unwrap();
        let err = QuireConfig::load_from(path.clone()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert_eq!(err.path(), &path);
    }

    #[test]
    fn load_from_missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = QuireConfig::load_from(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
