use std::collections::HashMap;
use std::sync::RwLock;

use crate::config::{EndpointConfig, StreamConfig};
use crate::provider::Provider;

/// In-memory table of endpoint and stream configs. Durable storage is owned
/// by an external admin system; this store is seeded at startup and mutated
/// through the admin API.
///
/// The store synchronizes its own state and is shared by reference: the
/// gateway resolves endpoints per request, the stream supervisor re-reads
/// stream configs on every scan.
#[derive(Default)]
pub struct ConfigStore {
    endpoints: RwLock<HashMap<String, EndpointConfig>>,
    streams: RwLock<HashMap<String, StreamConfig>>,
}

impl ConfigStore {
    pub fn new() -> ConfigStore {
        ConfigStore::default()
    }

    pub fn upsert_endpoint(&self, config: EndpointConfig) {
        self.endpoints
            .write()
            .expect("config store poisoned")
            .insert(config.endpoint_id.clone(), config);
    }

    pub fn get_endpoint(&self, endpoint_id: &str) -> Option<EndpointConfig> {
        self.endpoints
            .read()
            .expect("config store poisoned")
            .get(endpoint_id)
            .cloned()
    }

    pub fn remove_endpoint(&self, endpoint_id: &str) -> Option<EndpointConfig> {
        self.endpoints
            .write()
            .expect("config store poisoned")
            .remove(endpoint_id)
    }

    pub fn list_endpoints(&self) -> Vec<EndpointConfig> {
        self.endpoints
            .read()
            .expect("config store poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.read().expect("config store poisoned").len()
    }

    /// Resolve the endpoint handling (provider, organization). Returns `None`
    /// when no endpoint is registered; callers fall back to the generic
    /// unauthenticated mode.
    pub fn resolve_endpoint(
        &self,
        provider: Provider,
        organization_id: &str,
    ) -> Option<EndpointConfig> {
        self.endpoints
            .read()
            .expect("config store poisoned")
            .values()
            .find(|c| c.provider == provider && c.organization_id == organization_id)
            .cloned()
    }

    pub fn upsert_stream(&self, config: StreamConfig) {
        self.streams
            .write()
            .expect("config store poisoned")
            .insert(config.stream_id.clone(), config);
    }

    pub fn get_stream(&self, stream_id: &str) -> Option<StreamConfig> {
        self.streams
            .read()
            .expect("config store poisoned")
            .get(stream_id)
            .cloned()
    }

    pub fn remove_stream(&self, stream_id: &str) -> Option<StreamConfig> {
        self.streams
            .write()
            .expect("config store poisoned")
            .remove(stream_id)
    }

    pub fn list_streams(&self) -> Vec<StreamConfig> {
        self.streams
            .read()
            .expect("config store poisoned")
            .values()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_matches_provider_and_org() {
        let store = ConfigStore::new();
        let mut config = EndpointConfig::generic("acme");
        config.endpoint_id = "ep-1".to_string();
        config.provider = Provider::Stripe;
        store.upsert_endpoint(config);

        assert!(store.resolve_endpoint(Provider::Stripe, "acme").is_some());
        assert!(store.resolve_endpoint(Provider::Stripe, "other").is_none());
        assert!(store.resolve_endpoint(Provider::Shopify, "acme").is_none());
    }

    #[test]
    fn upsert_replaces_by_id() {
        let store = ConfigStore::new();
        let mut config = EndpointConfig::generic("acme");
        config.endpoint_id = "ep-1".to_string();
        store.upsert_endpoint(config.clone());
        config.active = false;
        store.upsert_endpoint(config);

        assert_eq!(store.endpoint_count(), 1);
        assert!(!store.get_endpoint("ep-1").unwrap().active);
    }
}
