//! Scriptable stand-in for the build engine.
//!
//! Speaks the same framed JSON-RPC as a real engine and answers with a small
//! fixed project. Behaviour is picked with flags:
//!
//! - `--fail-create`: reject `createApplication`
//! - `--fail-build`: reject every `build`
//! - `--fail-marker <name>`: reject `build` while `<cwd>/<name>` exists
//! - `--build-delay-ms <n>`: hold every `build` reply for `n` milliseconds
//! - `--crash-marker <name>`: exit with status 3 during `build` when
//!   `<cwd>/<name>` exists
//! - `--spawn-log <file>`: append one line per process start

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use quire_engine::codec::{FrameReader, FrameWriter};
use serde_json::{Value, json};
use url::Url;

#[derive(Default)]
struct Options {
    fail_create: bool,
    fail_build: bool,
    fail_marker: Option<PathBuf>,
    build_delay: Option<Duration>,
    crash_marker: Option<PathBuf>,
    spawn_log: Option<PathBuf>,
}

fn parse_args() -> Result<Options> {
    let mut options = Options::default();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--fail-create" => options.fail_create = true,
            "--fail-build" => options.fail_build = true,
            "--fail-marker" => {
                let name = args.next().context("--fail-marker needs a file name")?;
                options.fail_marker = Some(PathBuf::from(name));
            }
            "--build-delay-ms" => {
                let raw = args.next().context("--build-delay-ms needs a value")?;
                let millis = raw
                    .parse()
                    .with_context(|| format!("invalid delay: {raw}"))?;
                options.build_delay = Some(Duration::from_millis(millis));
            }
            "--crash-marker" => {
                let name = args.next().context("--crash-marker needs a file name")?;
                options.crash_marker = Some(PathBuf::from(name));
            }
            "--spawn-log" => {
                let path = args.next().context("--spawn-log needs a path")?;
                options.spawn_log = Some(PathBuf::from(path));
            }
            other => bail!("unknown argument: {other}"),
        }
    }
    Ok(options)
}

type Reply = std::result::Result<Value, (i64, String)>;

struct MockEngine {
    options: Options,
    cwd: PathBuf,
    builder: String,
    last_diagnostics: Value,
}

impl MockEngine {
    fn new(options: Options) -> Result<Self> {
        Ok(Self {
            options,
            cwd: std::env::current_dir().context("reading working directory")?,
            builder: String::from("html"),
            last_diagnostics: json!({}),
        })
    }

    fn index_uri(&self) -> String {
        file_uri(&self.cwd.join("index.rst"))
    }

    fn handle(&mut self, method: &str, params: &Value) -> Reply {
        match method {
            "createApplication" => self.create_application(params),
            "build" => self.build(params),
            "getDiagnostics" => Ok(self.last_diagnostics.clone()),
            "getRoles" => Ok(json!([
                {"name": "doc", "implementation": "sphinx.roles.XRefRole"},
                {"name": "py:func", "implementation": "sphinx.domains.python.PyXRefRole"},
                {"name": "ref", "implementation": "sphinx.roles.XRefRole"}
            ])),
            "getDirectives" => Ok(json!([
                {"name": "code-block", "implementation": "sphinx.directives.code.CodeBlock"},
                {"name": "note", "implementation": "docutils.parsers.rst.directives.admonitions.Note"},
                {"name": "py:function", "implementation": "sphinx.domains.python.PyFunction"}
            ])),
            "getDocumentSymbols" => Ok(self.symbols()),
            "shutdown" => Ok(Value::Null),
            other => Err((-32601, format!("Method not found: {other}"))),
        }
    }

    fn create_application(&mut self, params: &Value) -> Reply {
        if self.options.fail_create {
            return Err((-32000, String::from("Unable to find conf.py")));
        }
        if let Some(cwd) = params.get("cwd").and_then(Value::as_str) {
            self.cwd = PathBuf::from(cwd);
        }
        let build_command: Vec<&str> = params
            .get("buildCommand")
            .and_then(Value::as_array)
            .map(|args| args.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        if let Some(pair) = build_command
            .windows(2)
            .find(|pair| pair[0] == "-M" || pair[0] == "-b")
        {
            self.builder = pair[1].to_string();
        }
        Ok(json!({
            "builderName": self.builder,
            "sourceDir": self.cwd,
            "configDir": self.cwd,
            "buildDir": self.cwd.join("_build").join(&self.builder),
        }))
    }

    fn build(&mut self, params: &Value) -> Reply {
        if let Some(marker) = &self.options.crash_marker
            && self.cwd.join(marker).exists()
        {
            std::process::exit(3);
        }
        if self.options.fail_build {
            return Err((-32000, String::from("Could not import extension missing_ext")));
        }
        if let Some(marker) = &self.options.fail_marker
            && self.cwd.join(marker).exists()
        {
            return Err((-32000, String::from("conf.py: invalid syntax")));
        }

        let index = self.index_uri();
        let mut diagnostics = serde_json::Map::new();
        diagnostics.insert(
            index.clone(),
            json!([{
                "range": range(4, 0, 4, 12),
                "severity": 2,
                "message": "undefined label: 'missing'",
                "source": "sphinx"
            }]),
        );
        if let Some(overrides) = params.get("contentOverrides").and_then(Value::as_object) {
            for uri in overrides.keys() {
                diagnostics.insert(
                    uri.clone(),
                    json!([{
                        "range": range(0, 0, 0, 1),
                        "severity": 3,
                        "message": "built from unsaved content",
                        "source": "mock"
                    }]),
                );
            }
        }
        let diagnostics = Value::Object(diagnostics);
        self.last_diagnostics = diagnostics.clone();

        let mut symbols = serde_json::Map::new();
        symbols.insert(index.clone(), self.symbols());

        let output_path = self
            .cwd
            .join("_build")
            .join(&self.builder)
            .join("index.html");
        Ok(json!({
            "diagnostics": diagnostics,
            "files": [{"uri": index, "docId": "index", "outputPath": output_path}],
            "objects": [
                {"domain": "std", "name": "intro", "display": "Introduction", "objType": "label", "docId": "index"},
                {"domain": "py", "name": "os.path.join", "display": "os.path.join", "objType": "function", "docId": "library/os.path", "project": "python"}
            ],
            "symbols": symbols,
            "config": {"project": "Mock", "builder": self.builder}
        }))
    }

    fn symbols(&self) -> Value {
        json!([
            {"id": 1, "name": "Welcome", "kind": 15, "range": range(0, 0, 1, 7), "orderId": 0},
            {"id": 2, "name": "Installation", "kind": 15, "range": range(3, 0, 4, 12), "parentId": 1, "orderId": 0}
        ])
    }
}

fn range(start_line: u32, start_char: u32, end_line: u32, end_char: u32) -> Value {
    json!({
        "start": {"line": start_line, "character": start_char},
        "end": {"line": end_line, "character": end_char}
    })
}

fn file_uri(path: &Path) -> String {
    Url::from_file_path(path).map_or_else(|()| format!("file://{}", path.display()), String::from)
}

fn progress(kind: &str, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "$/progress",
        "params": {"kind": kind, "title": "Building", "message": message}
    })
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let options = parse_args()?;
    if let Some(log) = &options.spawn_log {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log)
            .with_context(|| format!("opening spawn log {}", log.display()))?;
        writeln!(file, "{}", std::process::id()).context("writing spawn log")?;
    }

    let mut engine = MockEngine::new(options)?;
    let mut reader = FrameReader::new(tokio::io::stdin());
    let mut writer = FrameWriter::new(tokio::io::stdout());

    while let Some(frame) = reader.read_frame().await? {
        let method = frame
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if method == "exit" {
            break;
        }
        // Notifications and responses from the client need no answer.
        let Some(id) = frame.get("id").cloned() else {
            continue;
        };
        if method.is_empty() {
            continue;
        }
        let params = frame.get("params").cloned().unwrap_or(Value::Null);

        if method == "build" {
            writer.write_frame(&progress("begin", "reading sources")).await?;
            writer
                .write_frame(&json!({
                    "jsonrpc": "2.0",
                    "method": "window/logMessage",
                    "params": {"type": 3, "message": format!("building [{}]", engine.builder)}
                }))
                .await?;
            if let Some(delay) = engine.options.build_delay {
                tokio::time::sleep(delay).await;
            }
        }

        let reply = match engine.handle(&method, &params) {
            Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
            Err((code, message)) => {
                json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
            }
        };
        if method == "build" {
            writer.write_frame(&progress("end", "build finished")).await?;
        }
        writer.write_frame(&reply).await?;
    }
    Ok(())
}
