// Specifier resolution against the catalog hub

pub mod cache;
pub mod catalog;
pub mod resolver;
pub mod version;

pub use cache::{CacheLookup, Clock, ManualClock, ResolutionCache, SystemClock};
pub use catalog::{Catalog, CatalogError, HubClient};
pub use resolver::{Resolution, Resolver};
pub use version::{suggest_alias, Specifier};
