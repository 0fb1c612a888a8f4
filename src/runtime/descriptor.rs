// Runner descriptor (<target>/runner.json)
//
// Accepted shapes:
//   {"kind": "process", "command": "python server.py", "endpointPath": "/messages/"}
//   {"kind": "process", "command": ["node", "index.js", "--port", "{port}"]}
//   {"type": "python", "entry": "server.py", "python": {"venv": ".venv"}}
//   {"kind": "connector", "url": "http://127.0.0.1:6289/sse"}
// The endpoint may also come from transport.endpoint, sse.endpoint,
// a flat "endpoint", or env.ENDPOINT / env.MCP_SSE_ENDPOINT.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::registry::RuntimeKind;
use crate::errors::{MatrixError, Result};

pub const RUNNER_FILE: &str = "runner.json";
pub const DEFAULT_HEALTH_PATH: &str = "/health";

/// Wire protocol transport a server speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// HTTP + Server-Sent Events
    #[default]
    Sse,
    /// WebSocket frames
    Ws,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerDescriptor {
    pub kind: RuntimeKind,
    /// Argv for process runners; `{port}` is substituted at start
    pub command: Vec<String>,
    /// Remote endpoint for connector runners
    pub url: Option<String>,
    pub endpoint_path: Option<String>,
    pub transport: TransportKind,
    pub env: BTreeMap<String, String>,
    pub health_path: String,
    /// Fixed port the server always binds
    pub port: Option<u16>,
    /// Tool names the package declares up front
    pub tools: Vec<String>,
}

impl RunnerDescriptor {
    /// Read `<target>/runner.json`
    pub fn load(target: &Path) -> Result<Self> {
        let path = target.join(RUNNER_FILE);
        let text = fs::read_to_string(&path).map_err(|e| invalid(&path, e.to_string()))?;
        let value: Value =
            serde_json::from_str(&text).map_err(|e| invalid(&path, e.to_string()))?;
        Self::from_value(&value, target).map_err(|reason| invalid(&path, reason))
    }

    /// Persist in the canonical shape
    pub fn save(&self, target: &Path) -> Result<PathBuf> {
        fs::create_dir_all(target)?;
        let path = target.join(RUNNER_FILE);
        fs::write(&path, serde_json::to_vec_pretty(self)?)?;
        Ok(path)
    }

    pub fn connector(url: &str) -> Self {
        Self {
            kind: RuntimeKind::Connector,
            command: Vec::new(),
            url: Some(url.to_string()),
            endpoint_path: None,
            transport: transport_for_url(url),
            env: BTreeMap::new(),
            health_path: DEFAULT_HEALTH_PATH.to_string(),
            port: None,
            tools: Vec::new(),
        }
    }

    pub fn process(command: Vec<String>) -> Self {
        Self {
            kind: RuntimeKind::Process,
            command,
            url: None,
            endpoint_path: None,
            transport: TransportKind::Sse,
            env: BTreeMap::new(),
            health_path: DEFAULT_HEALTH_PATH.to_string(),
            port: None,
            tools: Vec::new(),
        }
    }

    /// Build from parsed JSON. `target` resolves relative venv paths.
    pub fn from_value(value: &Value, target: &Path) -> std::result::Result<Self, String> {
        let obj = value
            .as_object()
            .ok_or_else(|| "expected a JSON object".to_string())?;

        let kind_field = str_field(obj, "kind").or_else(|| str_field(obj, "type"));
        let url = str_field(obj, "url");
        let kind = match kind_field.as_deref() {
            Some("connector") | Some("remote") => RuntimeKind::Connector,
            None if url.is_some() && !obj.contains_key("command") => RuntimeKind::Connector,
            _ => RuntimeKind::Process,
        };

        let env = obj
            .get("env")
            .and_then(Value::as_object)
            .map(|env| {
                env.iter()
                    .map(|(k, v)| (k.clone(), scalar_to_string(v)))
                    .collect::<BTreeMap<_, _>>()
            })
            .unwrap_or_default();

        let transport = match transport_type(obj).as_deref() {
            Some("ws") | Some("websocket") => TransportKind::Ws,
            Some(_) => TransportKind::Sse,
            None => url.as_deref().map(transport_for_url).unwrap_or_default(),
        };

        let command = match kind {
            RuntimeKind::Connector => Vec::new(),
            RuntimeKind::Process => command_from(obj, kind_field.as_deref(), target)?,
        };
        if kind == RuntimeKind::Connector && url.is_none() {
            return Err("connector runner requires 'url'".to_string());
        }

        let port = obj
            .get("port")
            .and_then(Value::as_u64)
            .and_then(|p| u16::try_from(p).ok());

        let health_path = str_field(obj, "healthPath")
            .or_else(|| str_field(obj, "health_path"))
            .or_else(|| {
                obj.get("health")
                    .and_then(Value::as_object)
                    .and_then(|h| str_field(h, "path"))
            })
            .map(|p| ensure_leading_slash(&p))
            .unwrap_or_else(|| DEFAULT_HEALTH_PATH.to_string());

        let tools = obj
            .get("tools")
            .and_then(Value::as_array)
            .map(|tools| {
                tools
                    .iter()
                    .filter_map(|t| match t {
                        Value::String(name) => Some(name.clone()),
                        Value::Object(o) => str_field(o, "name"),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            kind,
            command,
            url,
            endpoint_path: endpoint_from(obj, &env),
            transport,
            env,
            health_path,
            port,
            tools,
        })
    }
}

fn invalid(path: &Path, reason: String) -> MatrixError {
    MatrixError::InvalidDescriptor {
        path: path.display().to_string(),
        reason,
    }
}

fn str_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn transport_type(obj: &Map<String, Value>) -> Option<String> {
    match obj.get("transport") {
        Some(Value::String(t)) => Some(t.to_lowercase()),
        Some(Value::Object(t)) => str_field(t, "type").map(|t| t.to_lowercase()),
        _ => None,
    }
}

fn transport_for_url(url: &str) -> TransportKind {
    if url.starts_with("ws://") || url.starts_with("wss://") {
        TransportKind::Ws
    } else {
        TransportKind::Sse
    }
}

fn endpoint_from(obj: &Map<String, Value>, env: &BTreeMap<String, String>) -> Option<String> {
    let nested = |key: &str| {
        obj.get(key).and_then(Value::as_object).and_then(|section| {
            str_field(section, "endpoint").or_else(|| str_field(section, "path"))
        })
    };

    nested("transport")
        .or_else(|| nested("sse"))
        .or_else(|| str_field(obj, "endpointPath"))
        .or_else(|| str_field(obj, "endpoint"))
        .or_else(|| env.get("ENDPOINT").cloned())
        .or_else(|| env.get("MCP_SSE_ENDPOINT").cloned())
        .filter(|ep| !ep.trim().is_empty())
}

fn command_from(
    obj: &Map<String, Value>,
    kind: Option<&str>,
    target: &Path,
) -> std::result::Result<Vec<String>, String> {
    match obj.get("command") {
        Some(Value::String(line)) => {
            let argv = shlex::split(line)
                .ok_or_else(|| "'command' has unmatched quotes".to_string())?;
            if argv.is_empty() {
                return Err("'command' is empty".to_string());
            }
            return Ok(argv);
        }
        Some(Value::Array(items)) => {
            let argv: Vec<String> = items.iter().map(scalar_to_string).collect();
            if argv.is_empty() {
                return Err("'command' is empty".to_string());
            }
            return Ok(argv);
        }
        Some(_) => return Err("'command' must be a string or an array".to_string()),
        None => {}
    }

    let entry = str_field(obj, "entry").ok_or_else(|| {
        "process runner requires 'command' (or 'type' plus 'entry')".to_string()
    })?;

    let interpreter = match kind {
        Some("python") => {
            let venv = obj
                .get("python")
                .and_then(Value::as_object)
                .and_then(|p| str_field(p, "venv"))
                .unwrap_or_else(|| ".venv".to_string());
            let bin = target.join(&venv).join("bin").join("python");
            if bin.exists() {
                bin.display().to_string()
            } else {
                "python3".to_string()
            }
        }
        Some("node") => "node".to_string(),
        Some(other) => return Err(format!("unsupported runner type '{}'", other)),
        None => return Err("process runner requires 'command'".to_string()),
    };
    Ok(vec![interpreter, entry])
}

/// `messages` -> `/messages/`
pub fn normalize_endpoint_path(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{}/", trimmed)
    }
}

fn ensure_leading_slash(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}
