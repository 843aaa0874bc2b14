// ── Environment registry ──
//
// One manager per environment ID, created on first use and disposed when
// the environment goes away.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use crate::config::EnvironmentConfig;
use crate::error::CoreError;
use crate::manager::EnvironmentManager;
use crate::transport::{Connector, MqttConnector};

/// Cache of live environment managers keyed by environment ID.
pub struct EnvironmentRegistry {
    managers: DashMap<String, EnvironmentManager>,
    connector: Arc<dyn Connector>,
}

impl Default for EnvironmentRegistry {
    fn default() -> Self {
        Self::new(Arc::new(MqttConnector))
    }
}

impl EnvironmentRegistry {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            managers: DashMap::new(),
            connector,
        }
    }

    /// The manager for `config.id`, connecting one if none exists yet.
    pub fn get_or_connect(&self, config: &EnvironmentConfig) -> Result<EnvironmentManager, CoreError> {
        match self.managers.entry(config.id.clone()) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                debug!(environment = %config.id, "creating environment manager");
                let manager = EnvironmentManager::connect(config.clone(), self.connector.as_ref())?;
                entry.insert(manager.clone());
                Ok(manager)
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<EnvironmentManager> {
        self.managers.get(id).map(|m| m.value().clone())
    }

    /// Like [`get`](Self::get), but an unknown ID is an error.
    pub fn require(&self, id: &str) -> Result<EnvironmentManager, CoreError> {
        self.get(id)
            .ok_or_else(|| CoreError::EnvironmentNotFound { id: id.to_owned() })
    }

    /// Dispose and forget the manager for `id`. Returns `false` if there
    /// was none.
    pub fn dispose(&self, id: &str) -> bool {
        match self.managers.remove(id) {
            Some((_, manager)) => {
                manager.dispose();
                true
            }
            None => false,
        }
    }

    /// Dispose every manager whose ID fails `keep`. Used to follow
    /// removals in the profile store.
    pub fn retain(&self, mut keep: impl FnMut(&str) -> bool) {
        let stale: Vec<String> = self
            .managers
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|id| !keep(id))
            .collect();
        for id in stale {
            self.dispose(&id);
        }
    }

    pub fn ids(&self) -> Vec<String> {
        self.managers.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.managers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }

    /// Dispose everything.
    pub fn clear(&self) {
        for id in self.ids() {
            self.dispose(&id);
        }
    }

    /// Shut every manager down, giving each up to `grace` to flush.
    pub async fn shutdown(&self, grace: Duration) {
        let managers: Vec<EnvironmentManager> = self
            .ids()
            .into_iter()
            .filter_map(|id| self.managers.remove(&id).map(|(_, m)| m))
            .collect();
        futures::future::join_all(managers.iter().map(|m| m.shutdown(grace))).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::transport::recording::RecordingConnector;

    fn config(id: &str) -> EnvironmentConfig {
        EnvironmentConfig::new(id, "mqtt://localhost".parse().unwrap())
    }

    fn registry() -> EnvironmentRegistry {
        EnvironmentRegistry::new(Arc::new(RecordingConnector::default()))
    }

    #[tokio::test]
    async fn caches_by_environment_id() {
        let registry = registry();
        let a = registry.get_or_connect(&config("a")).unwrap();
        let again = registry.get_or_connect(&config("a")).unwrap();
        a.handle_event(crate::transport::TransportEvent::Message {
            topic: "homie/5/d/$state".into(),
            payload: "ready".into(),
        });
        assert!(again.snapshot().ptr_eq(&a.snapshot()));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn require_reports_unknown_environment() {
        let registry = registry();
        let err = registry.require("missing").unwrap_err();
        assert!(matches!(err, CoreError::EnvironmentNotFound { id } if id == "missing"));
    }

    #[tokio::test]
    async fn dispose_and_retain() {
        let registry = registry();
        let a = registry.get_or_connect(&config("a")).unwrap();
        registry.get_or_connect(&config("b")).unwrap();
        registry.get_or_connect(&config("c")).unwrap();

        assert!(registry.dispose("a"));
        assert!(a.is_disposed());
        assert!(!registry.dispose("a"));

        registry.retain(|id| id == "b");
        assert_eq!(registry.ids(), vec!["b".to_string()]);

        registry.clear();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn shutdown_empties_registry() {
        let registry = registry();
        let a = registry.get_or_connect(&config("a")).unwrap();
        registry.shutdown(Duration::from_millis(100)).await;
        assert!(a.is_disposed());
        assert!(registry.is_empty());
    }
}
