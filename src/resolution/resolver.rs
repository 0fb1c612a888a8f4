// Specifier -> fully-qualified catalog id
//
// Order of business: fully-qualified short circuit, cache, primary hub,
// local hub on network failure. Only answers from the requested hub are
// cached, so a fallback result never masks the primary once it recovers.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::cache::{CacheLookup, ResolutionCache};
use super::catalog::{Catalog, CatalogError};
use super::version::{pick_preferred, Specifier, DEFAULT_KIND};
use crate::errors::{MatrixError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub fqid: String,
    /// Hub that produced the answer
    pub source_hub: String,
    pub used_local_fallback: bool,
    /// The type filter found nothing and the search was retried without it
    pub broadened: bool,
    pub from_cache: bool,
}

/// What one hub said about a specifier
struct Found {
    fqid: String,
    broadened: bool,
}

#[derive(Clone)]
pub struct Resolver {
    catalog: Arc<dyn Catalog>,
    cache: ResolutionCache,
    local_hub: String,
}

impl Resolver {
    pub fn new(catalog: Arc<dyn Catalog>, cache: ResolutionCache, local_hub: impl Into<String>) -> Self {
        Self {
            catalog,
            cache,
            local_hub: local_hub.into(),
        }
    }

    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    pub async fn resolve(&self, hub: &str, specifier: &str, force: bool) -> Result<Resolution> {
        let spec = Specifier::parse(specifier)?;
        let cache_key = spec.to_string();

        if spec.is_fully_qualified() {
            return Ok(Resolution {
                fqid: cache_key,
                source_hub: hub.to_string(),
                used_local_fallback: false,
                broadened: false,
                from_cache: false,
            });
        }

        if force {
            self.cache.invalidate(hub, &cache_key)?;
        } else {
            match self.cache.lookup(hub, &cache_key)? {
                CacheLookup::Hit(fqid) => {
                    return Ok(Resolution {
                        fqid,
                        source_hub: hub.to_string(),
                        used_local_fallback: false,
                        broadened: false,
                        from_cache: true,
                    })
                }
                CacheLookup::NegativeHit => {
                    debug!(specifier = %cache_key, "Negative cache hit");
                    return Err(MatrixError::NotFound {
                        specifier: cache_key,
                        hub: hub.to_string(),
                    });
                }
                CacheLookup::Miss => {}
            }
        }

        let (found, source_hub, used_local_fallback) = match self.lookup(hub, &spec).await {
            Ok(found) => (found, hub.to_string(), false),
            Err(e) if e.is_network() && self.local_hub.trim_end_matches('/') != hub.trim_end_matches('/') => {
                warn!(primary = %hub, fallback = %self.local_hub, error = %e, "Primary hub unreachable, trying local hub");
                match self.lookup(&self.local_hub, &spec).await {
                    Ok(found) => (found, self.local_hub.clone(), true),
                    Err(e) if e.is_network() => {
                        return Err(MatrixError::HubUnreachable {
                            primary: hub.to_string(),
                            fallback: self.local_hub.clone(),
                        })
                    }
                    Err(e) => return Err(MatrixError::Catalog(e.to_string())),
                }
            }
            Err(e) if e.is_network() => {
                return Err(MatrixError::HubUnreachable {
                    primary: hub.to_string(),
                    fallback: self.local_hub.clone(),
                })
            }
            Err(e) => return Err(MatrixError::Catalog(e.to_string())),
        };

        match found {
            Some(Found { fqid, broadened }) => {
                if !used_local_fallback {
                    self.cache.put_positive(hub, &cache_key, &fqid)?;
                }
                info!(specifier = %cache_key, fqid = %fqid, hub = %source_hub, "Resolved");
                Ok(Resolution {
                    fqid,
                    source_hub,
                    used_local_fallback,
                    broadened,
                    from_cache: false,
                })
            }
            None => {
                if !used_local_fallback {
                    self.cache.put_negative(hub, &cache_key)?;
                }
                Err(MatrixError::NotFound {
                    specifier: cache_key,
                    hub: source_hub,
                })
            }
        }
    }

    /// Typed search first; an untyped specifier is broadened to any type
    /// when the typed search finds nothing
    async fn lookup(&self, hub: &str, spec: &Specifier) -> std::result::Result<Option<Found>, CatalogError> {
        let type_filter = spec.kind.as_deref().unwrap_or(DEFAULT_KIND);
        let ids = self.catalog.search(hub, &spec.name, Some(type_filter)).await?;
        if let Some(fqid) = choose(&ids, spec) {
            return Ok(Some(Found {
                fqid,
                broadened: false,
            }));
        }

        if spec.kind.is_some() {
            return Ok(None);
        }
        debug!(name = %spec.name, "Broadening search to all types");
        let ids = self.catalog.search(hub, &spec.name, None).await?;
        Ok(choose(&ids, spec).map(|fqid| Found {
            fqid,
            broadened: true,
        }))
    }
}

fn choose(ids: &[String], spec: &Specifier) -> Option<String> {
    let parsed: Vec<Specifier> = ids
        .iter()
        .filter_map(|id| Specifier::parse(id).ok())
        .filter(|id| id.kind.is_some())
        .collect();
    let candidates: Vec<&Specifier> = parsed.iter().filter(|id| spec.matches(id)).collect();
    pick_preferred(&candidates).map(ToString::to_string)
}
