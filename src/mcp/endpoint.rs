// Endpoint resolution: alias or explicit URL -> bridge URL
//
// Reads the structured lock record, never CLI output.

use tracing::debug;

use crate::errors::{MatrixError, Result};
use crate::runtime::descriptor::normalize_endpoint_path;
use crate::runtime::{Registry, RunnerDescriptor, RuntimeKind, TransportKind};

pub const DEFAULT_ENDPOINT_PATH: &str = "/messages/";

#[derive(Clone)]
pub struct EndpointResolver {
    registry: Registry,
    host: String,
}

impl EndpointResolver {
    pub fn new(registry: Registry, host: impl Into<String>) -> Self {
        Self {
            registry,
            host: host.into(),
        }
    }

    /// An explicit URL is used verbatim; otherwise the alias must be running
    pub fn resolve(&self, alias: Option<&str>, explicit_url: Option<&str>) -> Result<String> {
        if let Some(url) = explicit_url.map(str::trim).filter(|u| !u.is_empty()) {
            return Ok(url.to_string());
        }
        let alias = alias.ok_or_else(|| {
            MatrixError::InvalidArguments("give an alias or an explicit --url".to_string())
        })?;

        let record = self.registry.get(alias)?;
        if !record.is_live() {
            return Err(MatrixError::NotRunning {
                alias: alias.to_string(),
            });
        }

        let url = match record.kind {
            RuntimeKind::Connector => record.url.clone().ok_or_else(|| {
                MatrixError::Protocol(format!("connector '{}' has no url", alias))
            })?,
            RuntimeKind::Process => {
                let port = record.port.ok_or_else(|| {
                    MatrixError::Protocol(format!("alias '{}' has no port recorded", alias))
                })?;
                // A missing or unreadable descriptor falls back to the defaults
                let descriptor = RunnerDescriptor::load(&record.target_path).ok();
                self.process_url(port, descriptor.as_ref())
            }
        };
        debug!(alias = %alias, url = %url, "Resolved endpoint");
        Ok(url)
    }

    fn process_url(&self, port: u16, descriptor: Option<&RunnerDescriptor>) -> String {
        let endpoint = descriptor.and_then(|d| d.endpoint_path.as_deref());
        match descriptor.map(|d| d.transport) {
            Some(TransportKind::Ws) => {
                let path = endpoint.unwrap_or("/");
                let path = if path.starts_with('/') {
                    path.to_string()
                } else {
                    format!("/{}", path)
                };
                format!("ws://{}:{}{}", self.host, port, path)
            }
            _ => {
                let path = endpoint
                    .map(normalize_endpoint_path)
                    .unwrap_or_else(|| DEFAULT_ENDPOINT_PATH.to_string());
                format!("http://{}:{}{}", self.host, port, path)
            }
        }
    }
}
