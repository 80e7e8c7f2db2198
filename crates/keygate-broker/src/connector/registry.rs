//! Connector registry.

use std::sync::Arc;

use dashmap::DashMap;

use super::Connector;

/// Configured connectors, keyed by ID.
///
/// Lookups happen at every step of a login rather than being cached on the
/// request, so a connector removed at runtime stops accepting callbacks.
#[derive(Debug, Default)]
pub struct ConnectorRegistry {
    connectors: DashMap<String, Arc<Connector>>,
}

impl ConnectorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connector, replacing any previous one with the same ID.
    pub fn register(&self, connector: Connector) {
        tracing::info!(
            connector_id = %connector.id,
            kind = connector.kind.as_str(),
            "Registered connector"
        );
        self.connectors
            .insert(connector.id.clone(), Arc::new(connector));
    }

    /// Resolves a connector by ID.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Connector>> {
        self.connectors.get(id).map(|c| c.value().clone())
    }

    /// Removes a connector. Returns `true` if it was registered.
    pub fn remove(&self, id: &str) -> bool {
        self.connectors.remove(id).is_some()
    }

    /// Lists connectors ordered by ID.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<Connector>> {
        let mut connectors: Vec<Arc<Connector>> =
            self.connectors.iter().map(|c| c.value().clone()).collect();
        connectors.sort_by(|a, b| a.id.cmp(&b.id));
        connectors
    }

    /// Number of registered connectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    /// Returns `true` if no connector is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::ConnectorKind;
    use crate::connector::mock::MockCallbackConnector;

    fn mock(id: &str) -> Connector {
        Connector::new(
            id,
            format!("Mock {id}"),
            ConnectorKind::RedirectCallback(Arc::new(MockCallbackConnector::default())),
        )
    }

    #[test]
    fn test_register_get_remove() {
        let registry = ConnectorRegistry::new();
        assert!(registry.is_empty());

        registry.register(mock("b"));
        registry.register(mock("a"));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("a").unwrap().name, "Mock a");

        let ids: Vec<String> = registry.list().iter().map(|c| c.id.clone()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        assert!(registry.remove("a"));
        assert!(registry.get("a").is_none());
        assert!(!registry.remove("a"));
    }
}
