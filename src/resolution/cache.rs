// Resolution cache
//
// One JSON map keyed "<hub>|<specifier>". Positive entries hold the resolved
// id, negative entries hold null and live for a shorter TTL. Writes go
// through StateStore::update, so concurrent invocations never lose entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::runtime::StateStore;

const CACHE_KEY: &str = "resolve";

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Resolved id, or null for a negative entry
    pub result: Option<String>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    Hit(String),
    /// Known not to exist until the entry expires
    NegativeHit,
    Miss,
}

type CacheMap = BTreeMap<String, CacheEntry>;

#[derive(Clone)]
pub struct ResolutionCache {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    negative_ttl: Duration,
}

impl ResolutionCache {
    pub fn new(
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        negative_ttl: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            ttl,
            negative_ttl,
        }
    }

    pub fn key(hub: &str, specifier: &str) -> String {
        format!("{}|{}", hub.trim_end_matches('/'), specifier)
    }

    pub fn lookup(&self, hub: &str, specifier: &str) -> Result<CacheLookup> {
        let key = Self::key(hub, specifier);
        let now = self.clock.now();
        let lookup = match self.load()?.remove(&key) {
            Some(entry) if entry.expires_at > now => match entry.result {
                Some(fqid) => CacheLookup::Hit(fqid),
                None => CacheLookup::NegativeHit,
            },
            _ => CacheLookup::Miss,
        };
        debug!(key = %key, lookup = ?lookup, "Resolution cache lookup");
        Ok(lookup)
    }

    pub fn put_positive(&self, hub: &str, specifier: &str, fqid: &str) -> Result<()> {
        self.put(hub, specifier, Some(fqid.to_string()), self.ttl)
    }

    pub fn put_negative(&self, hub: &str, specifier: &str) -> Result<()> {
        self.put(hub, specifier, None, self.negative_ttl)
    }

    pub fn invalidate(&self, hub: &str, specifier: &str) -> Result<()> {
        let key = Self::key(hub, specifier);
        self.store.update(CACHE_KEY, &mut |current| {
            let mut map = decode(current);
            map.remove(&key);
            Ok(serde_json::to_vec_pretty(&map)?)
        })
    }

    fn put(&self, hub: &str, specifier: &str, result: Option<String>, ttl: Duration) -> Result<()> {
        let key = Self::key(hub, specifier);
        let now = self.clock.now();
        let expires_at = now + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero());
        let entry = CacheEntry { result, expires_at };

        self.store.update(CACHE_KEY, &mut |current| {
            let mut map = decode(current);
            map.retain(|_, e| e.expires_at > now);
            map.insert(key.clone(), entry.clone());
            Ok(serde_json::to_vec_pretty(&map)?)
        })
    }

    fn load(&self) -> Result<CacheMap> {
        Ok(decode(self.store.read(CACHE_KEY)?.as_deref()))
    }
}

/// A corrupt cache file is treated as empty and rewritten on the next put
fn decode(bytes: Option<&[u8]>) -> CacheMap {
    match bytes {
        Some(bytes) if !bytes.is_empty() => serde_json::from_slice(bytes).unwrap_or_else(|e| {
            warn!(error = %e, "Discarding corrupt resolution cache");
            CacheMap::new()
        }),
        _ => CacheMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MemoryStateStore;

    fn cache(clock: Arc<ManualClock>) -> ResolutionCache {
        ResolutionCache::new(
            Arc::new(MemoryStateStore::new()),
            clock,
            Duration::from_secs(300),
            Duration::from_secs(60),
        )
    }

    #[test]
    fn test_positive_entry_expires() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = cache(clock.clone());

        assert_eq!(cache.lookup("https://hub", "hello").unwrap(), CacheLookup::Miss);
        cache
            .put_positive("https://hub/", "hello", "mcp_server:hello@0.1.0")
            .unwrap();
        assert_eq!(
            cache.lookup("https://hub", "hello").unwrap(),
            CacheLookup::Hit("mcp_server:hello@0.1.0".into())
        );

        clock.advance(Duration::from_secs(301));
        assert_eq!(cache.lookup("https://hub", "hello").unwrap(), CacheLookup::Miss);
    }

    #[test]
    fn test_negative_expires_before_positive() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = cache(clock.clone());
        cache.put_positive("h", "found", "t:found@1").unwrap();
        cache.put_negative("h", "missing").unwrap();
        assert_eq!(cache.lookup("h", "missing").unwrap(), CacheLookup::NegativeHit);

        clock.advance(Duration::from_secs(61));
        assert_eq!(cache.lookup("h", "missing").unwrap(), CacheLookup::Miss);
        assert!(matches!(cache.lookup("h", "found").unwrap(), CacheLookup::Hit(_)));
    }

    #[test]
    fn test_invalidate_and_hub_isolation() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = cache(clock);
        cache.put_positive("hub-a", "x", "t:x@1").unwrap();
        assert_eq!(cache.lookup("hub-b", "x").unwrap(), CacheLookup::Miss);

        cache.invalidate("hub-a", "x").unwrap();
        assert_eq!(cache.lookup("hub-a", "x").unwrap(), CacheLookup::Miss);
    }

    #[test]
    fn test_file_shape() {
        let store = Arc::new(MemoryStateStore::new());
        let cache = ResolutionCache::new(
            store.clone(),
            Arc::new(SystemClock),
            Duration::from_secs(300),
            Duration::from_secs(60),
        );
        cache.put_negative("h", "nope").unwrap();

        let raw: serde_json::Value = serde_json::from_slice(&store.read("resolve").unwrap().unwrap()).unwrap();
        assert!(raw["h|nope"]["result"].is_null());
        assert!(raw["h|nope"]["expiresAt"].is_string());
    }
}
