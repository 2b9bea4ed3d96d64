//! Partition metadata propagation between adjacent stages.
//!
//! A stage is a partitioned consumer when its upstream neighbour declares a
//! partition key (expression or extractor), or when it declares
//! `consumer.partitioned=true` itself and has an input binding. A partitioned
//! consumer receives `input.*` keys, and its upstream neighbour receives
//! `output.*` keys sized to the consumer's instance count.
//!
//! The pass is strictly left to right and only ever touches the current
//! stage and its immediate predecessor.

use crate::core::{keys, Stage};
use crate::errors::{DeployError, InvalidDefinitionError};
use std::collections::BTreeMap;

/// Property keys read and written by the propagator.
pub mod partition_keys {
    /// Producer partition key expression (read).
    pub const PRODUCER_KEY_EXPRESSION: &str = "producer.partitionKeyExpression";
    /// Producer partition key extractor class (read).
    pub const PRODUCER_KEY_EXTRACTOR: &str = "producer.partitionKeyExtractorClass";
    /// Producer partition selector class (read).
    pub const PRODUCER_SELECTOR_CLASS: &str = "producer.partitionSelectorClass";
    /// Producer partition selector expression (read).
    pub const PRODUCER_SELECTOR_EXPRESSION: &str = "producer.partitionSelectorExpression";
    /// Consumer opt-in flag (read).
    pub const CONSUMER_PARTITIONED: &str = "consumer.partitioned";

    /// Injected on partitioned consumers.
    pub const INPUT_PARTITIONED: &str = "input.partitioned";
    /// Injected on partitioned consumers with an explicit count.
    pub const INPUT_INSTANCE_COUNT: &str = "input.instanceCount";
    /// Injected on producers feeding a partitioned consumer.
    pub const OUTPUT_PARTITION_COUNT: &str = "output.partitionCount";
    /// Injected on producers feeding a partitioned consumer.
    pub const OUTPUT_KEY_EXPRESSION: &str = "output.partitionKeyExpression";
    /// Copied through to producers when declared.
    pub const OUTPUT_KEY_EXTRACTOR: &str = "output.partitionKeyExtractorClass";
    /// Copied through to producers when declared.
    pub const OUTPUT_SELECTOR_CLASS: &str = "output.partitionSelectorClass";
    /// Copied through to producers when declared.
    pub const OUTPUT_SELECTOR_EXPRESSION: &str = "output.partitionSelectorExpression";

    /// Deployer flag asking the platform for instance indexes.
    pub const DEPLOYER_INDEXED: &str = "indexed";

    /// Key expression used when a producer declares no key at all.
    pub const DEFAULT_KEY_EXPRESSION: &str = "payload";

    /// Returns true for keys this module writes.
    #[must_use]
    pub fn is_injected(key: &str) -> bool {
        matches!(
            key,
            INPUT_PARTITIONED
                | INPUT_INSTANCE_COUNT
                | OUTPUT_PARTITION_COUNT
                | OUTPUT_KEY_EXPRESSION
                | OUTPUT_KEY_EXTRACTOR
                | OUTPUT_SELECTOR_CLASS
                | OUTPUT_SELECTOR_EXPRESSION
        )
    }
}

use partition_keys as pk;

/// A stage together with its resolved deploy-time properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStage {
    /// The stage definition.
    pub stage: Stage,
    /// Resolved app properties.
    pub app_properties: BTreeMap<String, String>,
    /// Resolved deployer properties.
    pub deployer_properties: BTreeMap<String, String>,
}

impl ResolvedStage {
    /// Creates a resolved stage.
    #[must_use]
    pub fn new(
        stage: Stage,
        app_properties: BTreeMap<String, String>,
        deployer_properties: BTreeMap<String, String>,
    ) -> Self {
        Self {
            stage,
            app_properties,
            deployer_properties,
        }
    }

    /// Looks up an app property, deploy-time values first.
    #[must_use]
    pub fn app_property(&self, key: &str) -> Option<&str> {
        self.app_properties
            .get(key)
            .or_else(|| self.stage.properties.get(key))
            .map(String::as_str)
    }

    fn flag(&self, key: &str) -> bool {
        self.app_property(key)
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
    }

    fn declares_partition_key(&self) -> bool {
        self.app_property(pk::PRODUCER_KEY_EXPRESSION).is_some()
            || self.app_property(pk::PRODUCER_KEY_EXTRACTOR).is_some()
    }

    fn explicit_count(&self) -> Option<&str> {
        self.app_property(keys::COUNT)
            .or_else(|| self.deployer_properties.get(keys::COUNT).map(String::as_str))
    }
}

/// Injects consumer and producer partition properties.
#[derive(Debug, Clone, Copy, Default)]
pub struct PartitionPropagator;

impl PartitionPropagator {
    /// Returns the instance count of a stage, defaulting to 1.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDefinition` for a count that is not a positive integer.
    pub fn instance_count(pipeline: &str, stage: &ResolvedStage) -> Result<u32, DeployError> {
        match stage.explicit_count() {
            None => Ok(1),
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(n) if n > 0 => Ok(n),
                _ => Err(InvalidDefinitionError::new(
                    pipeline,
                    format!("stage '{}' has invalid count '{raw}'", stage.stage.label),
                )
                .into()),
            },
        }
    }

    /// Runs the propagation pass over `stages` in deployment order.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDefinition` when a partitioned consumer has an
    /// unparseable instance count.
    pub fn propagate(pipeline: &str, stages: &mut [ResolvedStage]) -> Result<(), DeployError> {
        for i in 0..stages.len() {
            let upstream_produces_key = i > 0 && stages[i - 1].declares_partition_key();
            let declared = stages[i].stage.has_input_binding() && stages[i].flag(pk::CONSUMER_PARTITIONED);

            if !(upstream_produces_key || declared) {
                continue;
            }

            let count = Self::instance_count(pipeline, &stages[i])?;
            Self::inject_consumer(&mut stages[i]);
            if i > 0 {
                Self::inject_producer(&mut stages[i - 1], count);
            }

            tracing::debug!(
                pipeline = %pipeline,
                stage = %stages[i].stage.label,
                instances = count,
                "Stage is a partitioned consumer"
            );
        }
        Ok(())
    }

    fn inject_consumer(stage: &mut ResolvedStage) {
        let explicit = stage.explicit_count().map(ToString::to_string);
        stage
            .app_properties
            .insert(pk::INPUT_PARTITIONED.to_string(), "true".to_string());
        if let Some(count) = explicit {
            stage
                .app_properties
                .insert(pk::INPUT_INSTANCE_COUNT.to_string(), count.trim().to_string());
        }
        stage
            .deployer_properties
            .insert(pk::DEPLOYER_INDEXED.to_string(), "true".to_string());
    }

    fn inject_producer(stage: &mut ResolvedStage, partition_count: u32) {
        let expression = stage.app_property(pk::PRODUCER_KEY_EXPRESSION).map(ToString::to_string);
        let extractor = stage.app_property(pk::PRODUCER_KEY_EXTRACTOR).map(ToString::to_string);
        let selector_class = stage.app_property(pk::PRODUCER_SELECTOR_CLASS).map(ToString::to_string);
        let selector_expression = stage
            .app_property(pk::PRODUCER_SELECTOR_EXPRESSION)
            .map(ToString::to_string);

        let props = &mut stage.app_properties;
        props.insert(pk::OUTPUT_PARTITION_COUNT.to_string(), partition_count.to_string());

        match (expression, &extractor) {
            (Some(expr), _) => {
                props.insert(pk::OUTPUT_KEY_EXPRESSION.to_string(), expr);
            }
            (None, None) => {
                props.insert(pk::OUTPUT_KEY_EXPRESSION.to_string(), pk::DEFAULT_KEY_EXPRESSION.to_string());
            }
            (None, Some(_)) => {}
        }
        if let Some(v) = extractor {
            props.insert(pk::OUTPUT_KEY_EXTRACTOR.to_string(), v);
        }
        if let Some(v) = selector_class {
            props.insert(pk::OUTPUT_SELECTOR_CLASS.to_string(), v);
        }
        if let Some(v) = selector_expression {
            props.insert(pk::OUTPUT_SELECTOR_EXPRESSION.to_string(), v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DeploymentProperties, PipelineDefinition};
    use crate::deployer::PropertyResolver;
    use pretty_assertions::assert_eq;

    fn resolve(def: &PipelineDefinition, props: &DeploymentProperties) -> Vec<ResolvedStage> {
        let mut stages: Vec<_> = def
            .stages()
            .iter()
            .map(|s| {
                ResolvedStage::new(
                    s.clone(),
                    PropertyResolver::app_properties(props, &s.label),
                    PropertyResolver::deployer_properties(props, &s.label),
                )
            })
            .collect();
        PartitionPropagator::propagate(def.name(), &mut stages).unwrap();
        stages
    }

    fn ticktock() -> PipelineDefinition {
        PipelineDefinition::builder("ticktock", "time | log")
            .app("time")
            .app("log")
            .build()
            .unwrap()
    }

    fn get<'a>(stage: &'a ResolvedStage, key: &str) -> Option<&'a str> {
        stage.app_properties.get(key).map(String::as_str)
    }

    #[test]
    fn test_time_log_producer_properties() {
        let props = DeploymentProperties::new()
            .with("app.time.producer.partitionKeyExpression", "payload")
            .with("app.log.count", "2");

        let stages = resolve(&ticktock(), &props);
        let time = &stages[0];
        let log = &stages[1];

        assert_eq!(get(time, pk::OUTPUT_PARTITION_COUNT), Some("2"));
        assert_eq!(get(time, pk::OUTPUT_KEY_EXPRESSION), Some("payload"));
        assert_eq!(get(time, pk::INPUT_PARTITIONED), None);

        // The upstream key makes log a partitioned consumer.
        assert_eq!(get(log, pk::INPUT_PARTITIONED), Some("true"));
        assert_eq!(get(log, pk::INPUT_INSTANCE_COUNT), Some("2"));
        assert_eq!(log.deployer_properties.get(pk::DEPLOYER_INDEXED).map(String::as_str), Some("true"));
        assert_eq!(get(log, pk::OUTPUT_PARTITION_COUNT), None);
    }

    #[test]
    fn test_count_alone_does_not_partition() {
        let props = DeploymentProperties::new().with("app.log.count", "3");
        let stages = resolve(&ticktock(), &props);

        assert_eq!(stages[0].app_properties.len(), 0);
        assert_eq!(get(&stages[1], pk::INPUT_PARTITIONED), None);
    }

    #[test]
    fn test_declared_consumer_gets_default_key() {
        let props = DeploymentProperties::new()
            .with("app.log.consumer.partitioned", "true")
            .with("deployer.log.count", "4");
        let stages = resolve(&ticktock(), &props);

        assert_eq!(get(&stages[0], pk::OUTPUT_PARTITION_COUNT), Some("4"));
        assert_eq!(get(&stages[0], pk::OUTPUT_KEY_EXPRESSION), Some(pk::DEFAULT_KEY_EXPRESSION));
        assert_eq!(get(&stages[1], pk::INPUT_INSTANCE_COUNT), Some("4"));
    }

    #[test]
    fn test_extractor_and_selectors_copied_without_default_expression() {
        let props = DeploymentProperties::new()
            .with("app.time.producer.partitionKeyExtractorClass", "com.acme.KeyFn")
            .with("app.time.producer.partitionSelectorClass", "com.acme.Selector")
            .with("app.time.producer.partitionSelectorExpression", "hashCode()");
        let stages = resolve(&ticktock(), &props);
        let time = &stages[0];

        assert_eq!(get(time, pk::OUTPUT_PARTITION_COUNT), Some("1"));
        assert_eq!(get(time, pk::OUTPUT_KEY_EXPRESSION), None);
        assert_eq!(get(time, pk::OUTPUT_KEY_EXTRACTOR), Some("com.acme.KeyFn"));
        assert_eq!(get(time, pk::OUTPUT_SELECTOR_CLASS), Some("com.acme.Selector"));
        assert_eq!(get(time, pk::OUTPUT_SELECTOR_EXPRESSION), Some("hashCode()"));
        assert_eq!(get(&stages[1], pk::INPUT_INSTANCE_COUNT), None);
    }

    #[test]
    fn test_window_only_reaches_immediate_neighbour() {
        let def = PipelineDefinition::builder("chain", "http | filter | log")
            .app("http")
            .app("filter")
            .app("log")
            .build()
            .unwrap();
        let props = DeploymentProperties::new()
            .with("app.filter.producer.partitionKeyExpression", "headers['id']")
            .with("app.log.count", "3");
        let stages = resolve(&def, &props);

        assert_eq!(get(&stages[0], pk::OUTPUT_PARTITION_COUNT), None);
        assert_eq!(get(&stages[1], pk::INPUT_PARTITIONED), None);
        assert_eq!(get(&stages[1], pk::OUTPUT_PARTITION_COUNT), Some("3"));
        assert_eq!(get(&stages[1], pk::OUTPUT_KEY_EXPRESSION), Some("headers['id']"));
        assert_eq!(get(&stages[2], pk::INPUT_PARTITIONED), Some("true"));
    }

    #[test]
    fn test_key_declared_in_definition_counts() {
        let def = PipelineDefinition::builder("ticktock", "time --producer.partitionKeyExpression=payload | log")
            .stage(Stage::new("time").with_property(pk::PRODUCER_KEY_EXPRESSION, "payload"))
            .app("log")
            .build()
            .unwrap();
        let stages = resolve(&def, &DeploymentProperties::new());

        assert_eq!(get(&stages[0], pk::OUTPUT_PARTITION_COUNT), Some("1"));
        assert_eq!(get(&stages[1], pk::INPUT_PARTITIONED), Some("true"));
    }

    #[test]
    fn test_invalid_count_is_rejected() {
        let def = ticktock();
        let props = DeploymentProperties::new()
            .with("app.log.consumer.partitioned", "true")
            .with("app.log.count", "many");
        let mut stages: Vec<_> = def
            .stages()
            .iter()
            .map(|s| {
                ResolvedStage::new(
                    s.clone(),
                    PropertyResolver::app_properties(&props, &s.label),
                    BTreeMap::new(),
                )
            })
            .collect();

        let err = PartitionPropagator::propagate("ticktock", &mut stages).unwrap_err();
        assert!(err.to_string().contains("invalid count"));
    }

    #[test]
    fn test_consumer_flag_needs_input_binding() {
        let def = PipelineDefinition::builder("solo", "time > :out")
            .app("time")
            .to_destination("out")
            .build()
            .unwrap();
        let props = DeploymentProperties::new().with("app.time.consumer.partitioned", "true");
        let stages = resolve(&def, &props);

        assert_eq!(get(&stages[0], pk::INPUT_PARTITIONED), None);
    }
}
