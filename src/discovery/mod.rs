//! Service discovery: which catalog entries match a query, and which of
//! those are alive right now.

pub mod catalog;
pub mod registry;
pub mod resolver;

pub use catalog::{CatalogSearch, HttpCatalog};
pub use registry::{ConsulRegistry, LiveService, ServiceRegistry};
pub use resolver::{reconcile, registry_entry, ServiceSnapshot, ServiceSnapshotResolver};

use std::time::Duration;

/// Upper bound for a single registry or catalog round trip.
pub(crate) const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);
