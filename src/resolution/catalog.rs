// Catalog hub client
//
// Only the two calls the core needs: search (for resolution) and
// materialize (for install).

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::runtime::RunnerDescriptor;

#[derive(Debug, Error)]
pub enum CatalogError {
    /// Network layer: connect refused, DNS, timeout
    #[error("{hub} unreachable: {reason}")]
    Unreachable { hub: String, reason: String },

    #[error("{hub} returned {status}: {body}")]
    Status {
        hub: String,
        status: u16,
        body: String,
    },

    #[error("unexpected response from {hub}: {reason}")]
    Decode { hub: String, reason: String },
}

impl CatalogError {
    /// Failures that justify trying another hub
    pub fn is_network(&self) -> bool {
        matches!(self, CatalogError::Unreachable { .. })
    }
}

#[async_trait]
pub trait Catalog: Send + Sync {
    /// Ids matching `query`, optionally restricted to one entity type
    async fn search(
        &self,
        hub: &str,
        query: &str,
        type_filter: Option<&str>,
    ) -> Result<Vec<String>, CatalogError>;

    /// Ask the hub for the install plan of `fqid` and return its runner
    async fn materialize(
        &self,
        hub: &str,
        fqid: &str,
        target: &Path,
    ) -> Result<RunnerDescriptor, CatalogError>;
}

pub struct HubClient {
    client: reqwest::Client,
    token: Option<String>,
    timeout: Duration,
    limit: usize,
}

impl HubClient {
    pub fn new(token: Option<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            token,
            timeout,
            limit: 50,
        }
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = builder.timeout(self.timeout);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

fn endpoint(hub: &str, path: &str) -> String {
    format!("{}{}", hub.trim_end_matches('/'), path)
}

fn unreachable(hub: &str, e: reqwest::Error) -> CatalogError {
    CatalogError::Unreachable {
        hub: hub.to_string(),
        reason: e.to_string(),
    }
}

fn decode(hub: &str, reason: impl ToString) -> CatalogError {
    CatalogError::Decode {
        hub: hub.to_string(),
        reason: reason.to_string(),
    }
}

#[async_trait]
impl Catalog for HubClient {
    async fn search(
        &self,
        hub: &str,
        query: &str,
        type_filter: Option<&str>,
    ) -> Result<Vec<String>, CatalogError> {
        let mut params = vec![
            ("q", query.to_string()),
            ("limit", self.limit.to_string()),
        ];
        if let Some(kind) = type_filter {
            params.push(("type", kind.to_string()));
        }

        let url = endpoint(hub, "/catalog/search");
        debug!(url = %url, query = %query, type_filter = ?type_filter, "Catalog search");
        let resp = self
            .request(self.client.get(&url).query(&params))
            .send()
            .await
            .map_err(|e| unreachable(hub, e))?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(CatalogError::Status {
                hub: hub.to_string(),
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }

        let body: Value = resp.json().await.map_err(|e| decode(hub, e))?;
        let items = body
            .get("items")
            .or_else(|| body.get("results"))
            .unwrap_or(&body)
            .as_array()
            .ok_or_else(|| decode(hub, "search result has no items array"))?;

        Ok(items
            .iter()
            .filter_map(|item| match item {
                Value::String(id) => Some(id.clone()),
                other => other.get("id").and_then(Value::as_str).map(String::from),
            })
            .collect())
    }

    async fn materialize(
        &self,
        hub: &str,
        fqid: &str,
        target: &Path,
    ) -> Result<RunnerDescriptor, CatalogError> {
        let url = endpoint(hub, "/catalog/install");
        debug!(url = %url, id = %fqid, target = %target.display(), "Requesting install plan");
        let resp = self
            .request(self.client.post(&url).json(&json!({
                "id": fqid,
                "target": target.display().to_string(),
            })))
            .send()
            .await
            .map_err(|e| unreachable(hub, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(CatalogError::Status {
                hub: hub.to_string(),
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }

        let body: Value = resp.json().await.map_err(|e| decode(hub, e))?;
        let runner = body
            .pointer("/plan/runner")
            .or_else(|| body.get("runner"))
            .ok_or_else(|| decode(hub, format!("install plan for {} has no runner", fqid)))?;

        RunnerDescriptor::from_value(runner, target).map_err(|reason| decode(hub, reason))
    }
}
