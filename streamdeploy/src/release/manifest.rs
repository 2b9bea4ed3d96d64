//! Release manifests and the config values applied on upgrade.
//!
//! A [`Manifest`] is the fully resolved per-stage configuration of one
//! release, rendered as one YAML document per stage.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::package::{Package, PackageKind, PackageMetadata, StageConfig, StageSpec};
use crate::core::{DeploymentProperties, ResourceCoordinate, Stage, StageRole};
use crate::deployer::{partition_keys, PartitionPropagator, PropertyResolver, ResolvedStage};
use crate::errors::{DeployError, Result};

/// Identity section of a manifest entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// Stage label.
    pub name: String,
    /// Registered app name.
    pub app: String,
    /// Stage role.
    pub role: StageRole,
}

/// One stage of a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Identity.
    pub metadata: EntryMetadata,
    /// Resolved configuration.
    pub spec: StageSpec,
}

impl ManifestEntry {
    /// Returns the stage label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.metadata.name
    }
}

/// The ordered per-stage configuration of a release.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Creates a manifest from entries in deployment order.
    #[must_use]
    pub fn new(entries: Vec<ManifestEntry>) -> Self {
        Self { entries }
    }

    /// Derives the manifest of a packaged pipeline.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` when a stage package lacks identity or carries
    /// an unparseable config block.
    pub fn from_package(package: &Package) -> Result<Self> {
        let entries = package
            .stage_configs()?
            .into_iter()
            .map(|(meta, config)| {
                let (Some(app), Some(role)) = (meta.app_name.clone(), meta.role) else {
                    return Err(DeployError::Serialization(format!(
                        "stage package '{}' is missing its app name or role",
                        meta.name
                    )));
                };
                Ok(ManifestEntry {
                    metadata: EntryMetadata {
                        name: meta.name.clone(),
                        app,
                        role,
                    },
                    spec: config.spec,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { entries })
    }

    /// Returns the entries in deployment order.
    #[must_use]
    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// Looks up an entry by stage label.
    #[must_use]
    pub fn entry(&self, label: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.label() == label)
    }

    /// Returns the stage labels in deployment order.
    #[must_use]
    pub fn labels(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.label().to_string()).collect()
    }

    /// Returns true if the manifest has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Renders the manifest as multi-document YAML.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if encoding fails.
    pub fn to_yaml(&self) -> Result<String> {
        let docs = self
            .entries
            .iter()
            .map(serde_yaml::to_string)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(docs.join("---\n"))
    }

    /// Parses a manifest rendered by [`Manifest::to_yaml`].
    ///
    /// # Errors
    ///
    /// Returns `Serialization` for malformed documents.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let mut entries = Vec::new();
        for doc in serde_yaml::Deserializer::from_str(yaml) {
            entries.push(ManifestEntry::deserialize(doc)?);
        }
        Ok(Self { entries })
    }

    /// Returns a copy with `values` applied.
    ///
    /// Property overrides are laid over each entry's maps. A version override
    /// rewrites the resource when it ends in the old version; a coordinate
    /// override replaces resource and version outright.
    #[must_use]
    pub fn merge(&self, values: &ConfigValues) -> Self {
        let entries = self
            .entries
            .iter()
            .map(|entry| match values.stages.get(entry.label()) {
                Some(overrides) => apply(entry, overrides),
                None => entry.clone(),
            })
            .collect();
        Self { entries }
    }

    /// Rebuilds a package carrying this manifest under `parent`.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if a config block cannot be encoded.
    pub fn to_package(&self, parent: PackageMetadata) -> Result<Package> {
        let dependencies = self
            .entries
            .iter()
            .map(|entry| {
                let config = StageConfig {
                    spec: entry.spec.clone(),
                };
                Ok(Package {
                    metadata: PackageMetadata {
                        name: entry.metadata.name.clone(),
                        version: parent.version.clone(),
                        repository: parent.repository.clone(),
                        kind: PackageKind::App,
                        description: String::new(),
                        app_name: Some(entry.metadata.app.clone()),
                        role: Some(entry.metadata.role),
                    },
                    config: Some(config.to_yaml()?),
                    dependencies: Vec::new(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Package {
            metadata: parent,
            config: None,
            dependencies,
        })
    }

    /// Recomputes partition metadata from the entries' current properties.
    ///
    /// Injected keys are stripped and the propagation pass is re-run, so a
    /// changed consumer count reaches both the consumer and its producer.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDefinition` for an unparseable instance count.
    pub fn repartition(&self, pipeline: &str) -> Result<Self> {
        let mut stages: Vec<ResolvedStage> = self
            .entries
            .iter()
            .map(|entry| {
                let app = &entry.spec.application_properties;
                let was_consumer = app.contains_key(partition_keys::INPUT_PARTITIONED);
                let properties = app
                    .iter()
                    .filter(|(k, _)| !partition_keys::is_injected(k))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                let mut deployer = entry.spec.deployment_properties.clone();
                if was_consumer {
                    deployer.remove(partition_keys::DEPLOYER_INDEXED);
                }
                let stage = Stage {
                    label: entry.metadata.name.clone(),
                    app_name: entry.metadata.app.clone(),
                    properties,
                };
                ResolvedStage::new(stage, BTreeMap::new(), deployer)
            })
            .collect();
        PartitionPropagator::propagate(pipeline, &mut stages)?;

        let entries = self
            .entries
            .iter()
            .zip(stages)
            .map(|(entry, resolved)| {
                let mut spec = entry.spec.clone();
                let mut app = resolved.stage.properties;
                app.extend(resolved.app_properties);
                spec.application_properties = app;
                spec.deployment_properties = resolved.deployer_properties;
                ManifestEntry {
                    metadata: entry.metadata.clone(),
                    spec,
                }
            })
            .collect();
        Ok(Self { entries })
    }

    /// Per-stage app properties to write back into the stored definition.
    ///
    /// Partition keys injected at deploy time are dropped so a later deploy
    /// recomputes them.
    #[must_use]
    pub fn reconciled_properties(&self) -> BTreeMap<String, BTreeMap<String, String>> {
        self.entries
            .iter()
            .map(|entry| {
                let props = entry
                    .spec
                    .application_properties
                    .iter()
                    .filter(|(k, _)| !partition_keys::is_injected(k))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                (entry.label().to_string(), props)
            })
            .collect()
    }
}

fn apply(entry: &ManifestEntry, overrides: &StageOverrides) -> ManifestEntry {
    let mut spec = entry.spec.clone();
    spec.application_properties.extend(
        overrides
            .application_properties
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );
    spec.deployment_properties.extend(
        overrides
            .deployment_properties
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );

    if let Some(coordinate) = &overrides.coordinate {
        spec.resource = coordinate.locator.clone();
        spec.version = coordinate.version.clone();
    } else if let Some(version) = &overrides.version {
        let suffix = format!(":{}", spec.version);
        if let Some(base) = spec.resource.strip_suffix(&suffix) {
            spec.resource = format!("{base}:{version}");
        }
        spec.version = version.clone();
        spec.version_override = Some(version.clone());
    }

    ManifestEntry {
        metadata: entry.metadata.clone(),
        spec,
    }
}

/// Overrides for one stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageOverrides {
    /// App properties to set.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub application_properties: BTreeMap<String, String>,
    /// Platform properties to set.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub deployment_properties: BTreeMap<String, String>,
    /// Pinned artifact version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Replacement artifact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinate: Option<ResourceCoordinate>,
}

impl StageOverrides {
    /// Returns true if nothing would change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.application_properties.is_empty()
            && self.deployment_properties.is_empty()
            && self.version.is_none()
            && self.coordinate.is_none()
    }
}

/// Config values applied by an upgrade, keyed by stage label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigValues {
    stages: BTreeMap<String, StageOverrides>,
}

impl ConfigValues {
    /// Creates empty config values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Derives overrides for `labels` from update-time properties.
    ///
    /// Wildcard keys expand to every label given.
    #[must_use]
    pub fn from_properties(properties: &DeploymentProperties, labels: &[String]) -> Self {
        let stages = labels
            .iter()
            .filter_map(|label| {
                let overrides = StageOverrides {
                    application_properties: PropertyResolver::app_properties(properties, label),
                    deployment_properties: PropertyResolver::deployer_properties(properties, label),
                    version: PropertyResolver::version_override(properties, label),
                    coordinate: None,
                };
                (!overrides.is_empty()).then(|| (label.clone(), overrides))
            })
            .collect();
        Self { stages }
    }

    /// Replaces the artifact of `label`.
    pub fn set_coordinate(&mut self, label: impl Into<String>, coordinate: ResourceCoordinate) {
        self.stages.entry(label.into()).or_default().coordinate = Some(coordinate);
    }

    /// Returns the overrides of `label`.
    #[must_use]
    pub fn stage(&self, label: &str) -> Option<&StageOverrides> {
        self.stages.get(label)
    }

    /// Keeps only the stages in `labels`.
    pub fn retain(&mut self, labels: &[String]) {
        self.stages.retain(|label, _| labels.contains(label));
    }

    /// Returns true if there are no overrides.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Renders the values as YAML.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if encoding fails.
    pub fn to_yaml(&self) -> Result<String> {
        if self.stages.is_empty() {
            return Ok(String::new());
        }
        Ok(serde_yaml::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(label: &str, role: StageRole) -> ManifestEntry {
        ManifestEntry {
            metadata: EntryMetadata {
                name: label.to_string(),
                app: label.to_string(),
                role,
            },
            spec: StageSpec {
                resource: format!("maven://apps:{label}:1.0.0"),
                version: "1.0.0".to_string(),
                version_override: None,
                application_properties: BTreeMap::from([("level".to_string(), "INFO".to_string())]),
                deployment_properties: BTreeMap::new(),
            },
        }
    }

    fn ticktock() -> Manifest {
        Manifest::new(vec![entry("time", StageRole::Source), entry("log", StageRole::Sink)])
    }

    #[test]
    fn test_yaml_documents() {
        let manifest = ticktock();
        let yaml = manifest.to_yaml().unwrap();

        assert_eq!(yaml.matches("---\n").count(), 1);
        assert!(yaml.contains("name: time"));
        assert!(yaml.contains("role: sink"));
        assert_eq!(Manifest::from_yaml(&yaml).unwrap(), manifest);
    }

    #[test]
    fn test_merge_properties_and_version() {
        let props = DeploymentProperties::new()
            .with("app.log.level", "DEBUG")
            .with("deployer.log.memory", "2g")
            .with("version.log", "1.1.0");
        let labels = ticktock().labels();
        let values = ConfigValues::from_properties(&props, &labels);

        assert!(values.stage("time").is_none());
        let merged = ticktock().merge(&values);

        let log = merged.entry("log").unwrap();
        assert_eq!(log.spec.application_properties.get("level").map(String::as_str), Some("DEBUG"));
        assert_eq!(log.spec.deployment_properties.get("memory").map(String::as_str), Some("2g"));
        assert_eq!(log.spec.version, "1.1.0");
        assert_eq!(log.spec.resource, "maven://apps:log:1.1.0");
        assert_eq!(merged.entry("time"), ticktock().entry("time"));
    }

    #[test]
    fn test_wildcard_expands_to_all_labels() {
        let props = DeploymentProperties::new().with("app.*.level", "WARN");
        let values = ConfigValues::from_properties(&props, &ticktock().labels());

        let merged = ticktock().merge(&values);
        for entry in merged.entries() {
            assert_eq!(entry.spec.application_properties.get("level").map(String::as_str), Some("WARN"));
        }
    }

    #[test]
    fn test_coordinate_override_and_retain() {
        let mut values = ConfigValues::new();
        values.set_coordinate("time", ResourceCoordinate::new("time", "docker", "3.0", "docker:apps/time:3.0"));
        values.set_coordinate("log", ResourceCoordinate::new("log", "docker", "3.0", "docker:apps/log:3.0"));
        values.retain(&["time".to_string()]);

        let merged = ticktock().merge(&values);
        assert_eq!(merged.entry("time").unwrap().spec.resource, "docker:apps/time:3.0");
        assert_eq!(merged.entry("log"), ticktock().entry("log"));
    }

    #[test]
    fn test_unchanged_merge_is_equal() {
        let props = DeploymentProperties::new().with("app.log.level", "INFO");
        let values = ConfigValues::from_properties(&props, &ticktock().labels());
        assert_eq!(ticktock().merge(&values), ticktock());
    }

    #[test]
    fn test_reconciled_properties_drop_partition_keys() {
        let mut manifest = ticktock();
        manifest.entries[0]
            .spec
            .application_properties
            .insert("output.partitionCount".to_string(), "2".to_string());
        manifest.entries[0]
            .spec
            .application_properties
            .insert("producer.partitionKeyExpression".to_string(), "payload".to_string());

        let props = manifest.reconciled_properties();
        let time = &props["time"];
        assert!(!time.contains_key("output.partitionCount"));
        assert_eq!(time.get("producer.partitionKeyExpression").map(String::as_str), Some("payload"));
    }

    fn partitioned(consumer_count: &str) -> Manifest {
        let mut manifest = ticktock();
        let time = &mut manifest.entries[0].spec;
        time.application_properties
            .insert("producer.partitionKeyExpression".to_string(), "payload".to_string());
        time.application_properties
            .insert("output.destination".to_string(), "ticktock.time".to_string());
        let log = &mut manifest.entries[1].spec;
        log.application_properties
            .insert("input.destination".to_string(), "ticktock.time".to_string());
        log.deployment_properties
            .insert("count".to_string(), consumer_count.to_string());
        manifest.repartition("ticktock").unwrap()
    }

    #[test]
    fn test_repartition_follows_changed_count() {
        let installed = partitioned("2");
        let time = &installed.entry("time").unwrap().spec;
        assert_eq!(time.application_properties.get("output.partitionCount").map(String::as_str), Some("2"));

        let props = DeploymentProperties::new().with("deployer.log.count", "3");
        let values = ConfigValues::from_properties(&props, &installed.labels());
        let upgraded = installed.merge(&values).repartition("ticktock").unwrap();

        let time = &upgraded.entry("time").unwrap().spec;
        let log = &upgraded.entry("log").unwrap().spec;
        assert_eq!(time.application_properties.get("output.partitionCount").map(String::as_str), Some("3"));
        assert_eq!(time.application_properties.get("output.partitionKeyExpression").map(String::as_str), Some("payload"));
        assert_eq!(log.application_properties.get("input.instanceCount").map(String::as_str), Some("3"));
        assert_eq!(log.application_properties.get("input.partitioned").map(String::as_str), Some("true"));
        assert_eq!(log.deployment_properties.get("indexed").map(String::as_str), Some("true"));
        assert_eq!(upgraded, partitioned("3"));
    }

    #[test]
    fn test_repartition_is_stable() {
        assert_eq!(ticktock().repartition("ticktock").unwrap(), ticktock());
        let installed = partitioned("2");
        assert_eq!(installed.repartition("ticktock").unwrap(), installed);
    }

    #[test]
    fn test_repackaged_manifest_is_preserved() {
        let parent = PackageMetadata {
            name: "ticktock".to_string(),
            version: "1.0.1".to_string(),
            repository: "local".to_string(),
            kind: PackageKind::Stream,
            description: "time | log".to_string(),
            app_name: None,
            role: None,
        };
        let package = ticktock().to_package(parent).unwrap();

        assert_eq!(package.dependencies[1].metadata.version, "1.0.1");
        assert_eq!(Manifest::from_package(&package).unwrap(), ticktock());
    }

    #[test]
    fn test_config_values_yaml() {
        assert_eq!(ConfigValues::new().to_yaml().unwrap(), "");
        let props = DeploymentProperties::new().with("app.log.level", "DEBUG");
        let yaml = ConfigValues::from_properties(&props, &["log".to_string()]).to_yaml().unwrap();
        assert!(yaml.contains("applicationProperties"));
        assert!(yaml.contains("level: DEBUG"));
    }
}
