// Configuration structs

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_HUB: &str = "https://api.matrixhub.io";
pub const DEFAULT_LOCAL_HUB: &str = "http://localhost:443";
pub const DEFAULT_PS_HOST: &str = "127.0.0.1";

#[derive(Debug, Clone)]
pub struct MatrixConfig {
    /// Root of all local state (~/.matrix by default)
    pub home: PathBuf,

    pub hub: HubConfig,

    pub runtime: RuntimeConfig,

    pub cache: CacheConfig,
}

/// Catalog hub settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Primary hub base URL
    pub base_url: String,

    /// Bearer token sent to the hub
    pub token: Option<String>,

    /// Local development hub used when the primary is unreachable
    pub local_url: String,

    /// Catalog request timeout in seconds
    pub timeout_seconds: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_HUB.to_string(),
            token: None,
            local_url: DEFAULT_LOCAL_HUB.to_string(),
            timeout_seconds: 15,
        }
    }
}

/// Local runtime settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Host used to reach locally started servers
    pub host: String,

    /// Upper bound on the readiness wait after spawning
    pub startup_timeout_seconds: u64,

    /// Time between SIGTERM and SIGKILL on stop
    pub stop_grace_seconds: u64,

    /// Default handshake/list/call timeout for the protocol bridge
    pub protocol_timeout_seconds: u64,

    /// Timeout for doctor health requests
    pub health_timeout_seconds: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_PS_HOST.to_string(),
            startup_timeout_seconds: 30,
            stop_grace_seconds: 5,
            protocol_timeout_seconds: 20,
            health_timeout_seconds: 5,
        }
    }
}

/// Resolution cache settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_seconds: u64,
    pub negative_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 300,
            negative_ttl_seconds: 60,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn negative_ttl(&self) -> Duration {
        Duration::from_secs(self.negative_ttl_seconds)
    }
}

impl RuntimeConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_seconds)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_seconds)
    }

    pub fn protocol_timeout(&self) -> Duration {
        Duration::from_secs(self.protocol_timeout_seconds)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_seconds)
    }
}

impl MatrixConfig {
    /// Defaults rooted at `home`
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            hub: HubConfig::default(),
            runtime: RuntimeConfig::default(),
            cache: CacheConfig::default(),
        }
    }

    /// Directory holding one lock file per running alias
    pub fn locks_dir(&self) -> PathBuf {
        self.home.join("state").join("locks")
    }

    /// Directory holding one log file per alias
    pub fn logs_dir(&self) -> PathBuf {
        self.home.join("logs")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.home.join("cache")
    }

    /// Default install location for an alias
    pub fn runners_dir(&self) -> PathBuf {
        self.home.join("runners")
    }

    pub fn config_path(&self) -> PathBuf {
        self.home.join("config.toml")
    }

    pub fn home(&self) -> &Path {
        &self.home
    }
}
