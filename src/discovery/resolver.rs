//! Reconciles semantic-search candidates with the live registry.

use super::{CatalogSearch, LiveService, ServiceRegistry};
use crate::config::EndpointRewrite;
use crate::error::ControlError;
use crate::types::{ServiceDescriptor, ServicePreamble};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Services eligible for planning in one request, in relevance order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ServiceSnapshot {
    pub services: Vec<ServiceDescriptor>,
}

impl ServiceSnapshot {
    pub fn preambles(&self) -> Vec<ServicePreamble> {
        self.services.iter().map(ServiceDescriptor::preamble).collect()
    }

    pub fn capabilities(&self) -> Vec<&BTreeMap<String, String>> {
        self.services.iter().map(|s| &s.capabilities).collect()
    }

    pub fn endpoints(&self) -> Vec<&BTreeMap<String, String>> {
        self.services.iter().map(|s| &s.endpoints).collect()
    }

    pub fn contains(&self, service_id: &str) -> bool {
        self.services.iter().any(|s| s.id == service_id)
    }
}

/// Splits candidates into live ones and orphans, keeping candidate order.
pub fn reconcile(
    candidates: Vec<ServiceDescriptor>,
    live: &[LiveService],
) -> (Vec<ServiceDescriptor>, Vec<ServiceDescriptor>) {
    candidates
        .into_iter()
        .partition(|candidate| registry_entry(live, &candidate.id).is_some())
}

/// The registry entry a catalog identifier refers to, if it is live.
pub fn registry_entry<'a>(live: &'a [LiveService], catalog_id: &str) -> Option<&'a LiveService> {
    live.iter().find(|service| service.matches(catalog_id))
}

pub struct ServiceSnapshotResolver {
    registry: Arc<dyn ServiceRegistry>,
    catalog: Arc<dyn CatalogSearch>,
    self_registration_key: String,
    endpoint_rewrite: Option<EndpointRewrite>,
}

impl ServiceSnapshotResolver {
    pub fn new(
        registry: Arc<dyn ServiceRegistry>,
        catalog: Arc<dyn CatalogSearch>,
        self_registration_key: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            catalog,
            self_registration_key: self_registration_key.into(),
            endpoint_rewrite: None,
        }
    }

    pub fn with_endpoint_rewrite(mut self, rewrite: Option<EndpointRewrite>) -> Self {
        self.endpoint_rewrite = rewrite;
        self
    }

    #[instrument(skip(self, query), fields(query_len = query.len()))]
    pub async fn resolve(&self, query: &str) -> Result<ServiceSnapshot, ControlError> {
        let live = self
            .registry
            .live_services()
            .await
            .map_err(|e| ControlError::DiscoveryUnavailable(format!("{:#}", e)))?;

        let candidates = self
            .catalog
            .search(query)
            .await
            .map_err(|e| ControlError::DiscoveryUnavailable(format!("{:#}", e)))?;

        if candidates.is_empty() {
            info!("Catalog search returned no candidates.");
            return Err(ControlError::NoMatch);
        }

        let candidate_count = candidates.len();
        let (mut services, orphaned) = reconcile(candidates, &live);

        if !orphaned.is_empty() {
            warn!(
                orphaned_count = orphaned.len(),
                "Services found via semantic search are no longer in the registry."
            );
            for service in &orphaned {
                warn!(service_id = %service.id, name = %service.name, "Orphaned catalog entry.");
            }
        }

        if services.is_empty() {
            info!(candidate_count, "No candidate is currently live.");
            return Err(ControlError::NoLiveMatch);
        }

        for service in &mut services {
            service.strip_operation(&self.self_registration_key);
            if let Some(rewrite) = &self.endpoint_rewrite {
                for endpoint in service.endpoints.values_mut() {
                    *endpoint = rewrite.apply(endpoint);
                }
            }
            let registry_service = registry_entry(&live, &service.id).map(|l| l.service.as_str());
            debug!(
                service_id = %service.id,
                name = %service.name,
                registry_service = registry_service.unwrap_or_default(),
                operations = service.endpoints.len(),
                "Service eligible for planning."
            );
        }

        info!(candidate_count, eligible_count = services.len(), "Service snapshot resolved.");
        Ok(ServiceSnapshot { services })
    }
}
