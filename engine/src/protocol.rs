//! Wire types for the engine's JSON-RPC methods.

use std::collections::BTreeMap;
use std::path::PathBuf;

use quire_config::BuildConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

/// JSON-RPC "method not found".
pub(crate) const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, Serialize)]
pub(crate) struct Request {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: u64, method: &'static str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Notification {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: &'static str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

pub(crate) fn method_not_found(id: &Value, method: &str) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": METHOD_NOT_FOUND,
            "message": format!("Method not found: {method}")
        }
    })
}

pub(crate) enum IncomingFrame {
    Response { id: u64, body: Value },
    EngineRequest { id: Value, method: String },
    Notification { method: String, params: Option<Value> },
}

pub(crate) fn parse_incoming(frame: &Value) -> Option<IncomingFrame> {
    let id = frame.get("id");
    let method = frame
        .get("method")
        .and_then(Value::as_str)
        .map(String::from);
    let has_result_or_error = frame.get("result").is_some() || frame.get("error").is_some();

    match (id, method, has_result_or_error) {
        (Some(id), None, true) => Some(IncomingFrame::Response {
            id: id.as_u64()?,
            body: frame.clone(),
        }),
        (Some(id), Some(method), _) => Some(IncomingFrame::EngineRequest {
            id: id.clone(),
            method,
        }),
        (None, Some(method), _) => Some(IncomingFrame::Notification {
            method,
            params: frame.get("params").cloned(),
        }),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// Split a response frame into its result or its error.
pub(crate) fn response_result(body: Value) -> Result<Value, (i64, String)> {
    let Value::Object(mut map) = body else {
        return Ok(Value::Null);
    };
    if let Some(error) = map.remove("error") {
        return match serde_json::from_value::<RpcErrorBody>(error) {
            Ok(err) => Err((err.code, err.message)),
            Err(_) => Err((0, String::from("malformed error response"))),
        };
    }
    Ok(map.remove("result").unwrap_or(Value::Null))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateApplicationParams {
    pub build_command: Vec<String>,
    pub engine_command: Vec<String>,
    pub cwd: PathBuf,
    pub engine_path: Vec<PathBuf>,
}

impl From<&BuildConfig> for CreateApplicationParams {
    fn from(config: &BuildConfig) -> Self {
        Self {
            build_command: config.build_command.clone(),
            engine_command: config.engine_command.clone(),
            cwd: config.cwd.clone(),
            engine_path: config.engine_path.clone(),
        }
    }
}

/// What the engine reported after creating its application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationInfo {
    pub builder_name: String,
    pub source_dir: PathBuf,
    pub config_dir: PathBuf,
    pub build_dir: PathBuf,
}

impl ApplicationInfo {
    #[must_use]
    pub fn source_uri(&self) -> Option<Url> {
        Url::from_directory_path(&self.source_dir).ok()
    }

    #[must_use]
    pub fn config_uri(&self) -> Option<Url> {
        Url::from_directory_path(&self.config_dir).ok()
    }

    #[must_use]
    pub fn build_uri(&self) -> Option<Url> {
        Url::from_directory_path(&self.build_dir).ok()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BuildParams<'a> {
    pub content_overrides: &'a BTreeMap<Url, String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct DocumentSymbolsParams<'a> {
    pub uri: &'a Url,
}

/// `window/logMessage` payload. `kind` follows the editor-protocol levels:
/// 1 error, 2 warning, 3 info, 4 log.
#[derive(Debug, Deserialize)]
pub(crate) struct LogMessageParams {
    #[serde(rename = "type")]
    pub kind: u8,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressKind {
    Begin,
    Report,
    End,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProgressParams {
    pub kind: ProgressKind,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub percentage: Option<u32>,
}
