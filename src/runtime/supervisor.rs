// Process supervisor
//
// Starts process runners as detached children whose output goes to the alias
// log, waits for them to become reachable, then publishes the lock. Connector
// runners only publish the lock.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::descriptor::RunnerDescriptor;
use super::logs::LogSink;
use super::process::{self, process_exists};
use super::registry::{validate_alias, AliasRecord, Registry, RuntimeKind};
use crate::errors::{MatrixError, Result};

/// "listening on port 52305", "Port: 52305", "http://0.0.0.0:52305", "listening on 127.0.0.1:52305"
static PORT_ANNOUNCEMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:\bport\b\s*[:=]?\s*|https?://[^\s/]+:|\blistening\s+on\s+\S*:)(\d{2,5})\b")
        .expect("port announcement regex is valid")
});

/// Bounded wait with exponential backoff
#[derive(Debug, Clone)]
pub struct ReadinessPolicy {
    pub timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
        }
    }
}

/// What `stop` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopOutcome {
    pub alias: String,
    pub kind: RuntimeKind,
    /// SIGTERM was sent
    pub signalled: bool,
    /// The grace period ran out and SIGKILL followed
    pub forced: bool,
}

#[derive(Clone)]
pub struct Supervisor {
    registry: Registry,
    logs: LogSink,
    host: String,
    readiness: ReadinessPolicy,
    stop_grace: Duration,
}

impl Supervisor {
    pub fn new(registry: Registry, logs: LogSink, host: impl Into<String>) -> Self {
        Self {
            registry,
            logs,
            host: host.into(),
            readiness: ReadinessPolicy::default(),
            stop_grace: Duration::from_secs(5),
        }
    }

    pub fn with_readiness(mut self, readiness: ReadinessPolicy) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Start `alias` from the installation at `target`
    pub async fn start(
        &self,
        alias: &str,
        target: &Path,
        descriptor: &RunnerDescriptor,
        port_override: Option<u16>,
    ) -> Result<AliasRecord> {
        validate_alias(alias)?;
        match descriptor.kind {
            RuntimeKind::Connector => self.start_connector(alias, target, descriptor),
            RuntimeKind::Process => {
                self.start_process(alias, target, descriptor, port_override)
                    .await
            }
        }
    }

    fn start_connector(
        &self,
        alias: &str,
        target: &Path,
        descriptor: &RunnerDescriptor,
    ) -> Result<AliasRecord> {
        let url = descriptor
            .url
            .as_deref()
            .ok_or_else(|| MatrixError::InvalidDescriptor {
                path: target.display().to_string(),
                reason: "connector runner requires 'url'".to_string(),
            })?;

        let handle = self
            .registry
            .acquire(AliasRecord::connector(alias, url, target.to_path_buf()))?;
        info!(alias = %alias, url = %url, "Connector registered");
        Ok(handle.record)
    }

    async fn start_process(
        &self,
        alias: &str,
        target: &Path,
        descriptor: &RunnerDescriptor,
        port_override: Option<u16>,
    ) -> Result<AliasRecord> {
        // Fail fast before spawning anything
        if let Ok(existing) = self.registry.get(alias) {
            if existing.is_live() {
                return Err(MatrixError::AlreadyRunning {
                    alias: alias.to_string(),
                    pid: existing.pid,
                });
            }
        }

        let port = match port_override.or(descriptor.port) {
            Some(port) => port,
            None => free_port()?,
        };
        let argv: Vec<String> = descriptor
            .command
            .iter()
            .map(|arg| arg.replace("{port}", &port.to_string()))
            .collect();
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| MatrixError::InvalidDescriptor {
                path: target.display().to_string(),
                reason: "empty command".to_string(),
            })?;

        let log_path = self.logs.path(alias);
        let mut log_file = self.logs.open_append(alias)?;
        writeln!(
            log_file,
            "--- {} starting {}: {} ---",
            chrono::Utc::now().to_rfc3339(),
            alias,
            argv.join(" ")
        )?;
        let log_offset = log_file.metadata()?.len();

        info!(
            alias = %alias,
            command = %argv.join(" "),
            port,
            log = %log_path.display(),
            "Spawning server process"
        );

        let mut child = Command::new(program)
            .args(args)
            .current_dir(target)
            .envs(&descriptor.env)
            .env("PORT", port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file.try_clone()?))
            .stderr(Stdio::from(log_file))
            .spawn()
            .map_err(|e| MatrixError::ProcessExited {
                alias: alias.to_string(),
                status: format!("failed to spawn '{}': {}", program, e),
            })?;

        let pid = child.id().ok_or_else(|| MatrixError::ProcessExited {
            alias: alias.to_string(),
            status: "exited immediately".to_string(),
        })?;

        let ready = tokio::select! {
            ready = self.wait_ready(alias, &mut child, &log_path, log_offset, port) => ready,
            _ = tokio::signal::ctrl_c() => Err(MatrixError::Interrupted { alias: alias.to_string() }),
        };

        let port = match ready {
            Ok(port) => port,
            Err(e) => {
                warn!(alias = %alias, pid, error = %e, "Startup failed, killing child");
                discard(&mut child).await;
                return Err(e);
            }
        };

        let record = AliasRecord::process(alias, pid, Some(port), target.to_path_buf());
        let handle = match self.registry.acquire(record) {
            Ok(handle) => handle,
            Err(e) => {
                // Lost the race to a concurrent run of the same alias
                discard(&mut child).await;
                return Err(e);
            }
        };

        // Reap the child if it exits while this process is still around
        tokio::spawn(async move {
            let _ = child.wait().await;
        });

        info!(alias = %alias, pid, port, "Server ready");
        Ok(handle.record)
    }

    async fn wait_ready(
        &self,
        alias: &str,
        child: &mut Child,
        log_path: &Path,
        log_offset: u64,
        expected_port: u16,
    ) -> Result<u16> {
        let started = Instant::now();
        let deadline = started + self.readiness.timeout;
        let mut backoff = self.readiness.initial_backoff;
        let mut announced: Option<u16> = None;

        loop {
            if let Some(status) = child.try_wait()? {
                return Err(MatrixError::ProcessExited {
                    alias: alias.to_string(),
                    status: status.to_string(),
                });
            }

            if announced.is_none() {
                announced = scan_for_port(log_path, log_offset);
                if let Some(port) = announced {
                    debug!(alias = %alias, port, "Server announced its port");
                }
            }

            let port = announced.unwrap_or(expected_port);
            if port_accepting(&self.host, port).await {
                return Ok(port);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(MatrixError::StartupTimeout {
                    alias: alias.to_string(),
                    waited: now - started,
                });
            }
            tokio::time::sleep(backoff.min(deadline - now)).await;
            backoff = (backoff * 2).min(self.readiness.max_backoff);
        }
    }

    /// Stop `alias`. The lock is released whatever the child's fate.
    pub async fn stop(&self, alias: &str) -> Result<StopOutcome> {
        let record = self.registry.get(alias)?;
        let mut outcome = StopOutcome {
            alias: alias.to_string(),
            kind: record.kind,
            signalled: false,
            forced: false,
        };

        if record.kind == RuntimeKind::Process && record.pid > 0 && process_exists(record.pid) {
            let pid = record.pid;
            info!(alias = %alias, pid, "Sending SIGTERM");
            match process::terminate(pid) {
                Ok(()) => outcome.signalled = true,
                Err(e) => warn!(alias = %alias, pid, error = %e, "SIGTERM failed"),
            }

            if !wait_for_exit(pid, self.stop_grace).await {
                warn!(alias = %alias, pid, "Grace period expired, sending SIGKILL");
                if let Err(e) = process::kill(pid) {
                    warn!(alias = %alias, pid, error = %e, "SIGKILL failed");
                }
                outcome.forced = true;
                wait_for_exit(pid, Duration::from_secs(1)).await;
            }
        }

        self.registry.release(alias)?;
        info!(alias = %alias, "Stopped");
        Ok(outcome)
    }
}

/// Kill and reap a child that will not be published
async fn discard(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "Child already gone");
    }
    let _ = tokio::time::timeout(Duration::from_secs(2), child.wait()).await;
}

async fn wait_for_exit(pid: u32, grace: Duration) -> bool {
    let deadline = Instant::now() + grace;
    loop {
        if !process_exists(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

async fn port_accepting(host: &str, port: u16) -> bool {
    matches!(
        tokio::time::timeout(
            Duration::from_millis(500),
            tokio::net::TcpStream::connect((host, port)),
        )
        .await,
        Ok(Ok(_))
    )
}

fn free_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

/// First port announced in the log after `offset`
fn scan_for_port(log_path: &Path, offset: u64) -> Option<u16> {
    let mut file = File::open(log_path).ok()?;
    file.seek(SeekFrom::Start(offset)).ok()?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).ok()?;
    parse_port_announcement(&String::from_utf8_lossy(&bytes))
}

pub fn parse_port_announcement(text: &str) -> Option<u16> {
    PORT_ANNOUNCEMENT
        .captures_iter(text)
        .filter_map(|caps| caps.get(1)?.as_str().parse::<u16>().ok())
        .find(|port| *port > 0)
}
