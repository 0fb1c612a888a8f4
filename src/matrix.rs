// Facade wiring config, state, runtime, bridge and resolution together
//
// Every CLI subcommand is one method here.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::MatrixConfig;
use crate::errors::{MatrixError, Result};
use crate::mcp::{Bridge, CallOutcome, Connector, DefaultConnector, EndpointResolver, ProbeReport};
use crate::resolution::{
    suggest_alias, Catalog, Clock, HubClient, Resolution, ResolutionCache, Resolver, SystemClock,
};
use crate::runtime::descriptor::DEFAULT_HEALTH_PATH;
use crate::runtime::{
    validate_alias, AliasEntry, AliasRecord, AliasStore, FsStateStore, HealthChecker,
    HealthStatus, LogSink, ReadinessPolicy, Registry, RunnerDescriptor, StateStore, StopOutcome,
    Supervisor,
};
use crate::tools::{find_tool, infer, plan_call, CallInput};

/// Injected collaborators
pub struct Parts {
    /// One key per running alias
    pub locks: Arc<dyn StateStore>,
    /// Alias map
    pub state: Arc<dyn StateStore>,
    /// Resolution cache
    pub cache: Arc<dyn StateStore>,
    pub catalog: Arc<dyn Catalog>,
    pub connector: Arc<dyn Connector>,
    pub clock: Arc<dyn Clock>,
}

impl Parts {
    /// Filesystem state under the configured home, real hub and transports
    pub fn from_config(config: &MatrixConfig) -> Result<Self> {
        Ok(Self {
            locks: Arc::new(FsStateStore::new(config.locks_dir())?),
            state: Arc::new(FsStateStore::new(config.home().join("state"))?),
            cache: Arc::new(FsStateStore::new(config.cache_dir())?),
            catalog: Arc::new(HubClient::new(
                config.hub.token.clone(),
                Duration::from_secs(config.hub.timeout_seconds),
            )),
            connector: Arc::new(DefaultConnector::new()),
            clock: Arc::new(SystemClock),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallReport {
    pub alias: String,
    pub fqid: String,
    pub target: PathBuf,
    pub runner_path: PathBuf,
    pub resolution: Resolution,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PsEntry {
    #[serde(flatten)]
    pub record: AliasRecord,
    /// URL the bridge would use for this alias
    pub endpoint: Option<String>,
    pub uptime_seconds: i64,
}

pub struct Matrix {
    config: MatrixConfig,
    registry: Registry,
    aliases: AliasStore,
    supervisor: Supervisor,
    logs: LogSink,
    endpoints: EndpointResolver,
    bridge: Bridge,
    resolver: Resolver,
    health: HealthChecker,
}

impl Matrix {
    pub fn from_config(config: MatrixConfig) -> Result<Self> {
        let parts = Parts::from_config(&config)?;
        Ok(Self::with_parts(config, parts))
    }

    pub fn with_parts(config: MatrixConfig, parts: Parts) -> Self {
        let registry = Registry::new(parts.locks);
        let logs = LogSink::new(config.logs_dir());
        let host = config.runtime.host.clone();

        let supervisor = Supervisor::new(registry.clone(), logs.clone(), host.clone())
            .with_readiness(ReadinessPolicy {
                timeout: config.runtime.startup_timeout(),
                ..ReadinessPolicy::default()
            })
            .with_stop_grace(config.runtime.stop_grace());

        let cache = ResolutionCache::new(
            parts.cache,
            parts.clock,
            config.cache.ttl(),
            config.cache.negative_ttl(),
        );

        Self {
            aliases: AliasStore::new(parts.state),
            endpoints: EndpointResolver::new(registry.clone(), host.clone()),
            bridge: Bridge::new(parts.connector),
            resolver: Resolver::new(parts.catalog, cache, config.hub.local_url.clone()),
            health: HealthChecker::new(host, config.runtime.health_timeout()),
            supervisor,
            registry,
            logs,
            config,
        }
    }

    pub fn config(&self) -> &MatrixConfig {
        &self.config
    }

    /// Resolve a specifier against the configured hub
    pub async fn resolve(&self, specifier: &str, force: bool) -> Result<Resolution> {
        self.resolver
            .resolve(&self.config.hub.base_url, specifier, force)
            .await
    }

    /// Resolve, materialize into `target`, write runner.json, bind the alias
    pub async fn install(
        &self,
        specifier: &str,
        alias: Option<&str>,
        target: Option<PathBuf>,
        force: bool,
    ) -> Result<InstallReport> {
        let resolution = self.resolve(specifier, force).await?;
        let alias = alias
            .map(String::from)
            .unwrap_or_else(|| suggest_alias(&resolution.fqid));
        validate_alias(&alias)?;
        let target = target.unwrap_or_else(|| self.config.runners_dir().join(&alias));

        let descriptor = self
            .resolver
            .catalog()
            .materialize(&resolution.source_hub, &resolution.fqid, &target)
            .await
            .map_err(|e| MatrixError::Catalog(e.to_string()))?;
        let runner_path = descriptor.save(&target)?;

        self.aliases.set(
            &alias,
            AliasEntry {
                id: resolution.fqid.clone(),
                target: target.clone(),
            },
        )?;
        info!(alias = %alias, fqid = %resolution.fqid, target = %target.display(), "Installed");

        Ok(InstallReport {
            alias,
            fqid: resolution.fqid.clone(),
            target,
            runner_path,
            resolution,
        })
    }

    /// Start an installed alias
    pub async fn run(&self, alias: &str, port: Option<u16>) -> Result<AliasRecord> {
        let entry = self.aliases.require(alias)?;
        let descriptor = RunnerDescriptor::load(&entry.target)?;
        self.supervisor
            .start(alias, &entry.target, &descriptor, port)
            .await
    }

    /// Live aliases; dead ones are pruned on the way
    pub fn ps(&self) -> Result<Vec<PsEntry>> {
        Ok(self
            .registry
            .list()?
            .into_iter()
            .map(|record| PsEntry {
                endpoint: self.endpoints.resolve(Some(&record.alias), None).ok(),
                uptime_seconds: record.uptime_seconds(),
                record,
            })
            .collect())
    }

    pub async fn stop(&self, alias: &str) -> Result<StopOutcome> {
        self.supervisor.stop(alias).await
    }

    pub async fn doctor(&self, alias: &str) -> Result<HealthStatus> {
        let record = match self.registry.get(alias) {
            Ok(record) => record,
            Err(MatrixError::NotRunning { .. }) => return Ok(HealthStatus::fail("not running")),
            Err(e) => return Err(e),
        };
        let health_path = RunnerDescriptor::load(&record.target_path)
            .map(|d| d.health_path)
            .unwrap_or_else(|_| DEFAULT_HEALTH_PATH.to_string());
        Ok(self.health.check(&record, &health_path).await)
    }

    pub fn logs(&self, alias: &str, lines: usize) -> Result<Vec<String>> {
        validate_alias(alias)?;
        self.logs.tail(alias, lines)
    }

    pub async fn probe(
        &self,
        alias: Option<&str>,
        url: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<ProbeReport> {
        let url = self.endpoints.resolve(alias, url)?;
        self.bridge.probe(&url, self.timeout(timeout)).await
    }

    /// Call a named tool, inferring arguments from its schema
    pub async fn call(
        &self,
        tool: &str,
        alias: Option<&str>,
        url: Option<&str>,
        input: &CallInput,
        timeout: Option<Duration>,
    ) -> Result<CallOutcome> {
        let url = self.endpoints.resolve(alias, url)?;
        self.bridge
            .call_with(&url, self.timeout(timeout), |tools| {
                let found = find_tool(tools, tool)?;
                Ok((found.name.clone(), infer(&found.input_schema, input)?))
            })
            .await
    }

    /// One-shot task: pick the tool, infer its arguments, call it
    pub async fn do_task(
        &self,
        alias: Option<&str>,
        url: Option<&str>,
        input: &CallInput,
        tool: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<CallOutcome> {
        let url = self.endpoints.resolve(alias, url)?;
        let hints = self.declared_tools(alias);
        self.bridge
            .call_with(&url, self.timeout(timeout), |tools| {
                plan_call(tools, tool, &hints, input)
            })
            .await
    }

    pub fn alias_add(&self, alias: &str, id: &str, target: PathBuf) -> Result<()> {
        self.aliases.set(
            alias,
            AliasEntry {
                id: id.to_string(),
                target,
            },
        )
    }

    pub fn alias_rm(&self, alias: &str) -> Result<bool> {
        self.aliases.remove(alias)
    }

    pub fn alias_list(&self) -> Result<Vec<(String, AliasEntry)>> {
        Ok(self.aliases.all()?.into_iter().collect())
    }

    pub fn alias_show(&self, alias: &str) -> Result<AliasEntry> {
        self.aliases.require(alias)
    }

    /// Tool names the running alias's descriptor declares, if any
    fn declared_tools(&self, alias: Option<&str>) -> Vec<String> {
        alias
            .and_then(|alias| self.registry.get(alias).ok())
            .and_then(|record| RunnerDescriptor::load(&record.target_path).ok())
            .map(|descriptor| descriptor.tools)
            .unwrap_or_default()
    }

    fn timeout(&self, requested: Option<Duration>) -> Duration {
        requested.unwrap_or_else(|| self.config.runtime.protocol_timeout())
    }
}
