// Alias map: which installation an alias points at
//
// Written by install, read by run. Stored as one JSON object under the
// `aliases` key of the home state store.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use super::registry::validate_alias;
use super::state::StateStore;
use crate::errors::{MatrixError, Result};

const ALIASES_KEY: &str = "aliases";

/// One installed alias
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasEntry {
    /// Fully-qualified catalog id
    pub id: String,
    /// Install directory holding runner.json
    pub target: PathBuf,
}

#[derive(Clone)]
pub struct AliasStore {
    store: Arc<dyn StateStore>,
}

impl AliasStore {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    pub fn set(&self, alias: &str, entry: AliasEntry) -> Result<()> {
        validate_alias(alias)?;
        self.store.update(ALIASES_KEY, &mut |current| {
            let mut map = decode(current)?;
            map.insert(alias.to_string(), entry.clone());
            Ok(serde_json::to_vec_pretty(&map)?)
        })?;
        tracing::debug!(alias = %alias, "Alias saved");
        Ok(())
    }

    pub fn get(&self, alias: &str) -> Result<Option<AliasEntry>> {
        Ok(self.all()?.remove(alias))
    }

    /// Like `get`, but a missing alias is an error
    pub fn require(&self, alias: &str) -> Result<AliasEntry> {
        self.get(alias)?
            .ok_or_else(|| MatrixError::UnknownAlias(alias.to_string()))
    }

    /// Returns `false` if the alias was not present
    pub fn remove(&self, alias: &str) -> Result<bool> {
        let mut removed = false;
        self.store.update(ALIASES_KEY, &mut |current| {
            let mut map = decode(current)?;
            removed = map.remove(alias).is_some();
            Ok(serde_json::to_vec_pretty(&map)?)
        })?;
        Ok(removed)
    }

    pub fn all(&self) -> Result<BTreeMap<String, AliasEntry>> {
        decode(self.store.read(ALIASES_KEY)?.as_deref())
    }
}

fn decode(bytes: Option<&[u8]>) -> Result<BTreeMap<String, AliasEntry>> {
    match bytes {
        Some(bytes) if !bytes.is_empty() => Ok(serde_json::from_slice(bytes)?),
        _ => Ok(BTreeMap::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::state::MemoryStateStore;

    #[test]
    fn test_alias_crud() {
        let aliases = AliasStore::new(Arc::new(MemoryStateStore::new()));
        let entry = AliasEntry {
            id: "mcp_server:hello@0.1.0".into(),
            target: PathBuf::from("/tmp/t1"),
        };

        aliases.set("a1", entry.clone()).unwrap();
        assert_eq!(aliases.get("a1").unwrap(), Some(entry));
        assert!(aliases.all().unwrap().contains_key("a1"));

        assert!(aliases.remove("a1").unwrap());
        assert!(!aliases.remove("a1").unwrap());
        assert!(matches!(
            aliases.require("a1"),
            Err(MatrixError::UnknownAlias(_))
        ));
    }

    #[test]
    fn test_rejects_path_like_alias() {
        let aliases = AliasStore::new(Arc::new(MemoryStateStore::new()));
        let entry = AliasEntry {
            id: "x".into(),
            target: PathBuf::from("/tmp"),
        };
        assert!(aliases.set("../evil", entry).is_err());
    }
}
