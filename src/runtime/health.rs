// Doctor checks
//
// Process aliases: the pid must be alive and the descriptor's health path
// must answer 2xx. Connector aliases: the remote host must accept TCP.

use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use super::registry::{AliasRecord, Liveness, RuntimeKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub status: Status,
    pub reason: String,
}

impl HealthStatus {
    pub fn ok(reason: impl Into<String>) -> Self {
        Self {
            status: Status::Ok,
            reason: reason.into(),
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            status: Status::Fail,
            reason: reason.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }
}

pub struct HealthChecker {
    client: reqwest::Client,
    host: String,
    timeout: Duration,
}

impl HealthChecker {
    pub fn new(host: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            host: host.into(),
            timeout,
        }
    }

    /// Check a record fresh from the registry
    pub async fn check(&self, record: &AliasRecord, health_path: &str) -> HealthStatus {
        match record.kind {
            RuntimeKind::Connector => self.check_connector(record).await,
            RuntimeKind::Process => self.check_process(record, health_path).await,
        }
    }

    async fn check_process(&self, record: &AliasRecord, health_path: &str) -> HealthStatus {
        if record.status == Liveness::Dead {
            return HealthStatus::fail(format!("process {} is not running", record.pid));
        }
        let Some(port) = record.port else {
            return HealthStatus::fail("no port recorded");
        };

        let url = format!("http://{}:{}{}", self.host, port, health_path);
        debug!(url = %url, "Health probe");
        match self.client.get(&url).timeout(self.timeout).send().await {
            Ok(resp) if resp.status().is_success() => {
                HealthStatus::ok(format!("{} {}", resp.status().as_u16(), health_path))
            }
            Ok(resp) => HealthStatus::fail(format!("{} {}", resp.status().as_u16(), health_path)),
            Err(e) if e.is_timeout() => {
                HealthStatus::fail(format!("timeout after {}s", self.timeout.as_secs()))
            }
            Err(e) => HealthStatus::fail(e.to_string()),
        }
    }

    async fn check_connector(&self, record: &AliasRecord) -> HealthStatus {
        let Some(url) = record.url.as_deref() else {
            return HealthStatus::fail("connector has no url");
        };
        let parsed = match reqwest::Url::parse(url) {
            Ok(parsed) => parsed,
            Err(e) => return HealthStatus::fail(format!("invalid url: {}", e)),
        };
        let (Some(host), Some(port)) = (parsed.host_str(), parsed.port_or_known_default()) else {
            return HealthStatus::fail(format!("cannot derive host and port from {}", url));
        };

        let connect = tokio::net::TcpStream::connect((host, port));
        match tokio::time::timeout(self.timeout, connect).await {
            Ok(Ok(_)) => HealthStatus::ok(format!("reachable {}:{}", host, port)),
            Ok(Err(e)) => HealthStatus::fail(format!("{}:{} {}", host, port, e)),
            Err(_) => HealthStatus::fail(format!("{}:{} timed out", host, port)),
        }
    }
}
