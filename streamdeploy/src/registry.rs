//! Application registry: maps `(app name, role)` to a runnable artifact.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::core::{ResourceCoordinate, StageRole};

/// Resolves registered applications to artifact coordinates.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AppRegistry: Send + Sync {
    /// Looks up the artifact registered for `app_name` under `role`.
    async fn resolve(&self, app_name: &str, role: StageRole) -> Option<ResourceCoordinate>;
}

/// In-memory registry keyed by `(app name, role)`.
#[derive(Debug, Default)]
pub struct InMemoryAppRegistry {
    apps: DashMap<(String, StageRole), ResourceCoordinate>,
}

impl InMemoryAppRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) an application.
    pub fn register(&self, app_name: impl Into<String>, role: StageRole, coordinate: ResourceCoordinate) {
        self.apps.insert((app_name.into(), role), coordinate);
    }

    /// Adds a registration and returns the registry.
    #[must_use]
    pub fn with_app(self, app_name: impl Into<String>, role: StageRole, coordinate: ResourceCoordinate) -> Self {
        self.register(app_name, role, coordinate);
        self
    }

    /// Removes a registration, returning true if it existed.
    pub fn unregister(&self, app_name: &str, role: StageRole) -> bool {
        self.apps.remove(&(app_name.to_string(), role)).is_some()
    }

    /// Returns the number of registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.apps.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }
}

#[async_trait]
impl AppRegistry for InMemoryAppRegistry {
    async fn resolve(&self, app_name: &str, role: StageRole) -> Option<ResourceCoordinate> {
        self.apps
            .get(&(app_name.to_string(), role))
            .map(|entry| entry.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_is_keyed_by_role() {
        let registry = InMemoryAppRegistry::new().with_app(
            "log",
            StageRole::Sink,
            ResourceCoordinate::new("log", "maven", "1.0.0", "maven://apps:log-sink:1.0.0"),
        );

        assert!(registry.resolve("log", StageRole::Sink).await.is_some());
        assert!(registry.resolve("log", StageRole::Processor).await.is_none());
        assert!(registry.resolve("time", StageRole::Source).await.is_none());
    }

    #[tokio::test]
    async fn test_unregister() {
        let registry = InMemoryAppRegistry::new();
        registry.register("time", StageRole::Source, ResourceCoordinate::new("time", "docker", "2", "docker:time:2"));
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister("time", StageRole::Source));
        assert!(!registry.unregister("time", StageRole::Source));
        assert!(registry.is_empty());
    }
}
