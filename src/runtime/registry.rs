// Alias registry and lock store
//
// A lock file per alias is the proof that the alias is running. Whoever
// creates it owns the alias; a lock whose pid is gone is repaired by the next
// acquire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::process::process_exists;
use super::state::StateStore;
use crate::errors::{MatrixError, Result};

/// How an alias is realized at runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// A local subprocess owned by this machine
    Process,
    /// A pointer to an already running remote endpoint
    Connector,
}

/// Derived liveness, recomputed on every read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Liveness {
    Running,
    Dead,
    #[default]
    Remote,
}

/// Lock file contents plus derived status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AliasRecord {
    pub alias: String,
    pub kind: RuntimeKind,
    /// 0 for connectors
    pub pid: u32,
    pub port: Option<u16>,
    pub url: Option<String>,
    pub target_path: PathBuf,
    pub started_at: DateTime<Utc>,
    #[serde(skip)]
    pub status: Liveness,
}

impl AliasRecord {
    pub fn process(alias: &str, pid: u32, port: Option<u16>, target: PathBuf) -> Self {
        Self {
            alias: alias.to_string(),
            kind: RuntimeKind::Process,
            pid,
            port,
            url: None,
            target_path: target,
            started_at: Utc::now(),
            status: Liveness::Running,
        }
    }

    pub fn connector(alias: &str, url: &str, target: PathBuf) -> Self {
        Self {
            alias: alias.to_string(),
            kind: RuntimeKind::Connector,
            pid: 0,
            port: None,
            url: Some(url.to_string()),
            target_path: target,
            started_at: Utc::now(),
            status: Liveness::Remote,
        }
    }

    /// Recompute `status` from the process table
    fn refresh(&mut self) {
        self.status = match self.kind {
            RuntimeKind::Connector => Liveness::Remote,
            RuntimeKind::Process if self.pid > 0 && process_exists(self.pid) => Liveness::Running,
            RuntimeKind::Process => Liveness::Dead,
        };
    }

    pub fn is_live(&self) -> bool {
        self.status != Liveness::Dead
    }

    /// Seconds since the record was published
    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds().max(0)
    }
}

/// Proof of a successful acquire
#[derive(Debug, Clone)]
pub struct LockHandle {
    pub record: AliasRecord,
    /// A dead owner's lock was removed before this acquire succeeded
    pub repaired_stale: bool,
}

/// Reject names that could escape the lock directory
pub fn validate_alias(alias: &str) -> Result<()> {
    let valid = !alias.is_empty()
        && !alias.starts_with('.')
        && alias
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(MatrixError::InvalidAlias(alias.to_string()))
    }
}

#[derive(Clone)]
pub struct Registry {
    store: Arc<dyn StateStore>,
}

impl Registry {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Publish `record` as the running instance of its alias
    pub fn acquire(&self, record: AliasRecord) -> Result<LockHandle> {
        validate_alias(&record.alias)?;
        let alias = record.alias.clone();
        let bytes = serde_json::to_vec_pretty(&record)?;

        if self.store.create_exclusive(&alias, &bytes)? {
            info!(alias = %alias, pid = record.pid, "Lock acquired");
            return Ok(LockHandle {
                record,
                repaired_stale: false,
            });
        }

        let (existing_bytes, existing) = match self.read_raw(&alias)? {
            Some(found) => found,
            // Released between our create and our read: one more try
            None => (Vec::new(), None),
        };

        if let Some(existing) = &existing {
            if existing.is_live() {
                return Err(MatrixError::AlreadyRunning {
                    alias,
                    pid: existing.pid,
                });
            }
        }

        if !existing_bytes.is_empty() {
            let stale_pid = existing.as_ref().map(|r| r.pid).unwrap_or(0);
            if self.store.remove_if_unchanged(&alias, &existing_bytes)? {
                warn!(alias = %alias, stale_pid, "Removed stale lock left by a dead process");
            }
        }

        if self.store.create_exclusive(&alias, &bytes)? {
            info!(alias = %alias, pid = record.pid, "Lock acquired after stale repair");
            return Ok(LockHandle {
                record,
                repaired_stale: !existing_bytes.is_empty(),
            });
        }

        let pid = self
            .read_raw(&alias)?
            .and_then(|(_, r)| r)
            .map(|r| r.pid)
            .unwrap_or(0);
        Err(MatrixError::AlreadyRunning { alias, pid })
    }

    /// Remove the lock. Returns `false` if there was none.
    pub fn release(&self, alias: &str) -> Result<bool> {
        validate_alias(alias)?;
        let removed = self.store.remove(alias)?;
        if removed {
            info!(alias = %alias, "Lock released");
        }
        Ok(removed)
    }

    /// Current record, with liveness refreshed
    pub fn get(&self, alias: &str) -> Result<AliasRecord> {
        validate_alias(alias)?;
        match self.read_raw(alias)? {
            Some((_, Some(record))) => Ok(record),
            _ => Err(MatrixError::NotRunning {
                alias: alias.to_string(),
            }),
        }
    }

    /// Records whose owner is still alive. Locks of dead processes are
    /// deleted on the way.
    pub fn list(&self) -> Result<Vec<AliasRecord>> {
        let mut records = Vec::new();
        for key in self.store.keys()? {
            let Some((bytes, record)) = self.read_raw(&key)? else {
                continue;
            };
            match record {
                Some(record) if record.is_live() => records.push(record),
                Some(record) => {
                    debug!(alias = %record.alias, pid = record.pid, "Pruning dead alias");
                    self.store.remove_if_unchanged(&key, &bytes)?;
                }
                None => warn!(key = %key, "Ignoring unreadable lock file"),
            }
        }
        records.sort_by(|a, b| a.alias.cmp(&b.alias));
        Ok(records)
    }

    /// Raw bytes plus parsed record (None when the contents are corrupt)
    fn read_raw(&self, alias: &str) -> Result<Option<(Vec<u8>, Option<AliasRecord>)>> {
        let Some(bytes) = self.store.read(alias)? else {
            return Ok(None);
        };
        let record = match serde_json::from_slice::<AliasRecord>(&bytes) {
            Ok(mut record) => {
                record.refresh();
                Some(record)
            }
            Err(e) => {
                warn!(alias = %alias, error = %e, "Corrupt lock file");
                None
            }
        };
        Ok(Some((bytes, record)))
    }
}
