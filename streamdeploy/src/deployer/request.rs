//! Translation of a pipeline definition into per-stage deployment requests.

use std::sync::Arc;

use crate::core::{DeploymentProperties, DeploymentRequest, PipelineDefinition};
use crate::errors::{AppNotRegisteredError, Result, UnresolvedStage};
use crate::registry::AppRegistry;

use super::partition::{PartitionPropagator, ResolvedStage};
use super::properties::PropertyResolver;
use super::typing::StageTyper;

/// Builds one [`DeploymentRequest`] per stage, all or nothing.
#[derive(Clone)]
pub struct DeploymentRequestBuilder {
    registry: Arc<dyn AppRegistry>,
}

impl std::fmt::Debug for DeploymentRequestBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentRequestBuilder").finish_non_exhaustive()
    }
}

impl DeploymentRequestBuilder {
    /// Creates a builder backed by `registry`.
    #[must_use]
    pub fn new(registry: Arc<dyn AppRegistry>) -> Self {
        Self { registry }
    }

    /// Classifies, resolves and partitions every stage, then resolves
    /// artifacts.
    ///
    /// Requests come back in deployment order (most upstream first).
    ///
    /// # Errors
    ///
    /// - `InvalidDefinition` for untypeable stages or bad partition counts.
    /// - `AppNotRegistered` listing every stage without a registered
    ///   artifact. No requests are returned in that case.
    pub async fn build(
        &self,
        definition: &PipelineDefinition,
        properties: &DeploymentProperties,
    ) -> Result<Vec<DeploymentRequest>> {
        let roles = StageTyper::classify(definition)?;

        let mut resolved: Vec<ResolvedStage> = definition
            .stages()
            .iter()
            .map(|stage| {
                ResolvedStage::new(
                    stage.clone(),
                    PropertyResolver::app_properties(properties, &stage.label),
                    PropertyResolver::deployer_properties(properties, &stage.label),
                )
            })
            .collect();
        PartitionPropagator::propagate(definition.name(), &mut resolved)?;

        let mut requests = Vec::with_capacity(resolved.len());
        let mut unresolved = Vec::new();

        for (stage, role) in resolved.into_iter().zip(roles) {
            let Some(coordinate) = self.registry.resolve(&stage.stage.app_name, role).await else {
                unresolved.push(UnresolvedStage {
                    label: stage.stage.label.clone(),
                    app_name: stage.stage.app_name.clone(),
                    role: role.to_string(),
                });
                continue;
            };

            let version_override = PropertyResolver::version_override(properties, &stage.stage.label);
            let coordinate = match &version_override {
                Some(version) => coordinate.with_version(version),
                None => coordinate,
            };

            requests.push(DeploymentRequest {
                stage: stage.stage,
                role,
                coordinate,
                app_properties: stage.app_properties,
                deployer_properties: stage.deployer_properties,
                version_override,
            });
        }

        if !unresolved.is_empty() {
            tracing::warn!(
                pipeline = %definition.name(),
                unresolved = unresolved.len(),
                "Pipeline references unregistered apps"
            );
            return Err(AppNotRegisteredError::new(definition.name(), unresolved).into());
        }

        tracing::debug!(
            pipeline = %definition.name(),
            stages = requests.len(),
            "Built deployment requests"
        );
        Ok(requests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ResourceCoordinate, StageRole};
    use crate::errors::{DeployError, ErrorKind};
    use crate::registry::{InMemoryAppRegistry, MockAppRegistry};
    use mockall::predicate::eq;
    use pretty_assertions::assert_eq;

    fn coordinate(name: &str) -> ResourceCoordinate {
        ResourceCoordinate::new(name, "maven", "1.0.0", format!("maven://apps:{name}:1.0.0"))
    }

    fn ticktock() -> PipelineDefinition {
        PipelineDefinition::builder("ticktock", "time | log")
            .app("time")
            .app("log")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_builds_requests_in_order() {
        let registry = InMemoryAppRegistry::new()
            .with_app("time", StageRole::Source, coordinate("time"))
            .with_app("log", StageRole::Sink, coordinate("log"));
        let builder = DeploymentRequestBuilder::new(Arc::new(registry));

        let props = DeploymentProperties::new()
            .with("app.*.level", "INFO")
            .with("app.log.level", "DEBUG")
            .with("deployer.log.memory", "1g")
            .with("version.log", "1.1.0");
        let requests = builder.build(&ticktock(), &props).await.unwrap();

        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].label(), "time");
        assert_eq!(requests[0].role, StageRole::Source);
        assert_eq!(requests[0].app_properties.get("level").map(String::as_str), Some("INFO"));
        assert_eq!(requests[1].role, StageRole::Sink);
        assert_eq!(requests[1].app_properties.get("level").map(String::as_str), Some("DEBUG"));
        assert_eq!(requests[1].deployer_properties.get("memory").map(String::as_str), Some("1g"));
        assert_eq!(requests[1].coordinate.version, "1.1.0");
        assert_eq!(requests[1].coordinate.locator, "maven://apps:log:1.1.0");
        assert_eq!(requests[1].version_override.as_deref(), Some("1.1.0"));
    }

    #[tokio::test]
    async fn test_partition_keys_reach_requests() {
        let registry = InMemoryAppRegistry::new()
            .with_app("time", StageRole::Source, coordinate("time"))
            .with_app("log", StageRole::Sink, coordinate("log"));
        let builder = DeploymentRequestBuilder::new(Arc::new(registry));

        let props = DeploymentProperties::new()
            .with("app.time.producer.partitionKeyExpression", "payload")
            .with("app.log.count", "2");
        let requests = builder.build(&ticktock(), &props).await.unwrap();

        let time = &requests[0].app_properties;
        assert_eq!(time.get("output.partitionCount").map(String::as_str), Some("2"));
        assert_eq!(time.get("output.partitionKeyExpression").map(String::as_str), Some("payload"));
    }

    #[tokio::test]
    async fn test_unregistered_apps_are_all_reported() {
        let mut registry = MockAppRegistry::new();
        registry
            .expect_resolve()
            .with(eq("time"), eq(StageRole::Source))
            .times(1)
            .returning(|_, _| None);
        registry
            .expect_resolve()
            .with(eq("log"), eq(StageRole::Sink))
            .times(1)
            .returning(|_, _| None);
        let builder = DeploymentRequestBuilder::new(Arc::new(registry));

        let err = builder.build(&ticktock(), &DeploymentProperties::new()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::AppNotRegistered);
        let DeployError::AppNotRegistered(inner) = err else {
            panic!("expected AppNotRegistered");
        };
        let labels: Vec<_> = inner.unresolved.iter().map(|u| u.label.as_str()).collect();
        assert_eq!(labels, vec!["time", "log"]);
    }

    #[tokio::test]
    async fn test_single_miss_yields_no_requests() {
        let registry = InMemoryAppRegistry::new().with_app("time", StageRole::Source, coordinate("time"));
        let builder = DeploymentRequestBuilder::new(Arc::new(registry));

        let result = builder.build(&ticktock(), &DeploymentProperties::new()).await;
        match result {
            Err(DeployError::AppNotRegistered(err)) => {
                assert_eq!(err.unresolved.len(), 1);
                assert_eq!(err.unresolved[0].role, "sink");
            }
            other => panic!("expected AppNotRegistered, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_typing_error_skips_registry() {
        let mut registry = MockAppRegistry::new();
        registry.expect_resolve().never();
        let builder = DeploymentRequestBuilder::new(Arc::new(registry));

        // Two stages with no wiring at all: the upstream one cannot be typed.
        let def: PipelineDefinition = serde_json::from_value(serde_json::json!({
            "name": "broken",
            "dsl_text": "a | b",
            "stages": [
                {"label": "a", "app_name": "a"},
                {"label": "b", "app_name": "b"}
            ]
        }))
        .unwrap();

        let err = builder.build(&def, &DeploymentProperties::new()).await.unwrap_err();
        assert!(matches!(err, DeployError::Typing(ref e) if e.label == "a"));
        assert_eq!(err.kind(), ErrorKind::InvalidDefinition);
    }
}
