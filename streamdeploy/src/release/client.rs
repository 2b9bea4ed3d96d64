//! Release lifecycle protocol: install, upgrade, rollback, history, uninstall.
//!
//! Every transition that changes the running manifest (upgrade, rollback) is
//! followed by reconciliation: the stored definition's stage properties are
//! rewritten from the new manifest with a single upsert.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::backend::{InstallRequest, Release, ReleaseBackend, UpgradeRequest};
use super::manifest::{ConfigValues, Manifest};
use super::package::{next_patch, validate_version, Package, PackageMetadata, ReleasePackager};
use crate::core::{
    DeploymentProperties, DeploymentRequest, LifecycleState, PipelineDefinition, PlatformDescriptor,
    ResourceCoordinate, StageStatus,
};
use crate::errors::{
    ConflictError, ConflictKind, DeployError, InvalidDefinitionError, NotFoundError, Resource, Result,
};
use crate::state::{ensure_deployable, PipelineStatus, StatusSource};
use crate::store::DefinitionStore;

/// Options of [`ReleaseLifecycleClient::upgrade`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpgradeOptions {
    /// Package version of the new release; defaults to current patch + 1.
    pub package_version: Option<String>,
    /// Replacement artifacts keyed by stage label.
    pub coordinate_overrides: BTreeMap<String, ResourceCoordinate>,
    /// Upgrade even when the manifest would not change.
    pub force: bool,
    /// Restrict the upgrade to these stage labels.
    pub app_names: Option<Vec<String>>,
}

impl UpgradeOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the package version.
    #[must_use]
    pub fn with_package_version(mut self, version: impl Into<String>) -> Self {
        self.package_version = Some(version.into());
        self
    }

    /// Replaces the artifact of one stage.
    #[must_use]
    pub fn with_coordinate(mut self, label: impl Into<String>, coordinate: ResourceCoordinate) -> Self {
        self.coordinate_overrides.insert(label.into(), coordinate);
        self
    }

    /// Sets the force flag.
    #[must_use]
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Restricts the upgrade to the given labels.
    #[must_use]
    pub fn with_app_names(mut self, labels: Vec<String>) -> Self {
        self.app_names = Some(labels);
        self
    }
}

/// Drives a [`ReleaseBackend`] through the release lifecycle.
#[derive(Clone)]
pub struct ReleaseLifecycleClient {
    backend: Arc<dyn ReleaseBackend>,
    store: Arc<dyn DefinitionStore>,
    packager: ReleasePackager,
    default_platform: String,
}

impl std::fmt::Debug for ReleaseLifecycleClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseLifecycleClient")
            .field("packager", &self.packager)
            .field("default_platform", &self.default_platform)
            .finish_non_exhaustive()
    }
}

impl ReleaseLifecycleClient {
    /// Creates a client.
    #[must_use]
    pub fn new(backend: Arc<dyn ReleaseBackend>, store: Arc<dyn DefinitionStore>) -> Self {
        Self {
            backend,
            store,
            packager: ReleasePackager::default(),
            default_platform: "default".to_string(),
        }
    }

    /// Sets the packager used for installs.
    #[must_use]
    pub fn with_packager(mut self, packager: ReleasePackager) -> Self {
        self.packager = packager;
        self
    }

    /// Sets the platform used when `release.platform` is absent.
    #[must_use]
    pub fn with_default_platform(mut self, platform: impl Into<String>) -> Self {
        self.default_platform = platform.into();
        self
    }

    /// Aggregated state of the live release; `undeployed` if there is none.
    ///
    /// # Errors
    ///
    /// Propagates backend failures other than `ReleaseNotFound`.
    pub async fn state(&self, name: &str) -> Result<LifecycleState> {
        match self.backend.status(name).await {
            Ok(stages) => Ok(PipelineStatus::from_stages(stages).state),
            Err(err) if err.is_release_not_found() => Ok(LifecycleState::Undeployed),
            Err(err) => Err(err),
        }
    }

    /// Packages `requests`, uploads the package if needed and installs it.
    ///
    /// # Errors
    ///
    /// - `Conflict` when the pipeline is deploying or deployed.
    /// - `NotFound` for an unknown platform.
    /// - `InvalidDefinition` for a bad package version.
    /// - Backend failures.
    pub async fn install(
        &self,
        definition: &PipelineDefinition,
        requests: &[DeploymentRequest],
        properties: &DeploymentProperties,
    ) -> Result<Release> {
        let name = definition.name();
        ensure_deployable(name, self.state(name).await?)?;

        let platform = properties.platform().unwrap_or(&self.default_platform).to_string();
        let platforms = self.backend.list_platforms().await?;
        if !platforms.iter().any(|p| p.name == platform) {
            return Err(NotFoundError::new(Resource::Platform, platform).into());
        }

        let package = self.packager.package(definition, requests, properties)?;
        self.upload_if_changed(&package).await?;

        let config_values = ConfigValues::from_properties(properties, &definition.labels()).to_yaml()?;
        let release = self
            .backend
            .install(InstallRequest {
                release_name: name.to_string(),
                package_name: package.metadata.name.clone(),
                package_version: package.metadata.version.clone(),
                platform_name: platform,
                config_values,
            })
            .await?;

        info!(
            pipeline = %name,
            release_version = release.version,
            platform = %release.platform_name,
            "Installed release"
        );
        Ok(release)
    }

    /// Applies update-time properties to the live release.
    ///
    /// # Errors
    ///
    /// - `ReleaseNotFound` when nothing is installed.
    /// - `InvalidDefinition` for unknown labels, a bad package version or an
    ///   invalid partitioned consumer count.
    /// - `Conflict` (nothing to upgrade) when the manifest would not change
    ///   and `force` is off.
    pub async fn upgrade(
        &self,
        name: &str,
        properties: &DeploymentProperties,
        options: &UpgradeOptions,
    ) -> Result<Release> {
        let current = self.backend.info(name).await?;
        if !current.is_deployed() {
            return Err(DeployError::release_not_found(name));
        }

        let labels = current.manifest.labels();
        let targets = match &options.app_names {
            Some(subset) => {
                if let Some(unknown) = subset.iter().find(|l| !labels.contains(l)) {
                    return Err(InvalidDefinitionError::new(name, format!("no stage labelled '{unknown}'")).into());
                }
                subset.clone()
            }
            None => labels.clone(),
        };
        for label in options.coordinate_overrides.keys() {
            if !labels.contains(label) {
                return Err(InvalidDefinitionError::new(name, format!("no stage labelled '{label}'")).into());
            }
        }

        let mut values = ConfigValues::from_properties(properties, &labels);
        for (label, coordinate) in &options.coordinate_overrides {
            values.set_coordinate(label.clone(), coordinate.clone());
        }
        values.retain(&targets);

        let manifest = current.manifest.merge(&values).repartition(name)?;
        if !options.force && manifest == current.manifest {
            return Err(ConflictError::new(ConflictKind::NothingToUpgrade, name).into());
        }

        let version = match options.package_version.as_deref().or(properties.package_version()) {
            Some(v) => validate_version(name, v)?,
            None => next_patch(name, &current.package.version)?,
        };
        let package = manifest.to_package(PackageMetadata {
            version,
            ..current.package.clone()
        })?;
        self.upload_if_changed(&package).await?;

        let release = self
            .backend
            .upgrade(UpgradeRequest {
                release_name: name.to_string(),
                package_name: package.metadata.name.clone(),
                package_version: package.metadata.version.clone(),
                config_values: values.to_yaml()?,
                force: options.force,
            })
            .await?;

        info!(
            pipeline = %name,
            release_version = release.version,
            package_version = %release.package.version,
            "Upgraded release"
        );
        self.reconcile(name, &release.manifest).await?;
        Ok(release)
    }

    /// Re-applies `version` (0 = previous) as a new release version.
    ///
    /// # Errors
    ///
    /// `ReleaseNotFound` for an unknown release, `NotFound` for an unknown
    /// version.
    pub async fn rollback(&self, name: &str, version: u32) -> Result<Release> {
        let release = self.backend.rollback(name, version).await?;
        info!(
            pipeline = %name,
            release_version = release.version,
            target_version = version,
            "Rolled back release"
        );
        self.reconcile(name, &release.manifest).await?;
        Ok(release)
    }

    /// Every release version, most recent first.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub async fn history(&self, name: &str) -> Result<Vec<Release>> {
        self.backend.history(name).await
    }

    /// Manifest of `version`, or of the latest version.
    ///
    /// # Errors
    ///
    /// `ReleaseNotFound` or `NotFound` for unknown releases or versions.
    pub async fn manifest(&self, name: &str, version: Option<u32>) -> Result<Manifest> {
        self.backend.manifest(name, version).await
    }

    /// Latest release, or `None` if the name was never installed.
    ///
    /// # Errors
    ///
    /// Propagates backend failures other than `ReleaseNotFound`.
    pub async fn info(&self, name: &str) -> Result<Option<Release>> {
        match self.backend.info(name).await {
            Ok(release) => Ok(Some(release)),
            Err(err) if err.is_release_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Deletes the live release and its uploaded package; history stays.
    ///
    /// # Errors
    ///
    /// `ReleaseNotFound` when nothing is installed.
    pub async fn uninstall(&self, name: &str) -> Result<Release> {
        let release = self.backend.delete(name).await?;
        self.backend.delete_package(&release.package.name).await?;
        info!(pipeline = %name, release_version = release.version, "Uninstalled release");
        Ok(release)
    }

    /// Platforms the backend can install on.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub async fn platforms(&self) -> Result<Vec<PlatformDescriptor>> {
        self.backend.list_platforms().await
    }

    async fn upload_if_changed(&self, package: &Package) -> Result<()> {
        let digest = package.digest()?;
        let existing = self
            .backend
            .find_package(&package.metadata.name, &package.metadata.version)
            .await?;
        if existing.is_some_and(|p| p.digest == digest) {
            debug!(
                package = %package.metadata.name,
                version = %package.metadata.version,
                "Package already uploaded"
            );
            return Ok(());
        }
        self.backend.upload(package.to_bytes()?).await?;
        Ok(())
    }

    async fn reconcile(&self, name: &str, manifest: &Manifest) -> Result<()> {
        let Some(definition) = self.store.find(name).await? else {
            warn!(pipeline = %name, "No stored definition to reconcile");
            return Ok(());
        };
        let updated = definition.with_stage_properties(&manifest.reconciled_properties());
        debug!(pipeline = %name, dsl = %updated.dsl_text(), "Reconciled definition");
        self.store.upsert(updated).await
    }
}

#[async_trait]
impl StatusSource for ReleaseLifecycleClient {
    async fn stage_statuses(&self, name: &str) -> Result<Vec<StageStatus>> {
        self.backend.status(name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{keys, StageRole};
    use crate::deployer::DeploymentRequestBuilder;
    use crate::errors::ErrorKind;
    use crate::registry::InMemoryAppRegistry;
    use crate::release::backend::MockReleaseBackend;
    use crate::release::memory::InMemoryReleaseBackend;
    use crate::store::InMemoryDefinitionStore;
    use pretty_assertions::assert_eq;

    struct Harness {
        backend: Arc<InMemoryReleaseBackend>,
        store: Arc<InMemoryDefinitionStore>,
        client: ReleaseLifecycleClient,
        builder: DeploymentRequestBuilder,
    }

    fn harness() -> Harness {
        let backend = Arc::new(InMemoryReleaseBackend::new());
        let store = Arc::new(InMemoryDefinitionStore::new());
        let client = ReleaseLifecycleClient::new(backend.clone(), store.clone());
        let registry = InMemoryAppRegistry::new()
            .with_app("time", StageRole::Source, ResourceCoordinate::new("time", "maven", "1.0.0", "maven://apps:time:1.0.0"))
            .with_app("log", StageRole::Sink, ResourceCoordinate::new("log", "maven", "1.0.0", "maven://apps:log:1.0.0"));
        Harness {
            backend,
            store,
            client,
            builder: DeploymentRequestBuilder::new(Arc::new(registry)),
        }
    }

    fn ticktock() -> PipelineDefinition {
        PipelineDefinition::builder("ticktock", "time | log")
            .app("time")
            .app("log")
            .build()
            .unwrap()
    }

    async fn install(h: &Harness, props: &DeploymentProperties) -> Result<Release> {
        let def = ticktock();
        h.store.upsert(def.clone()).await?;
        let requests = h.builder.build(&def, props).await?;
        h.client.install(&def, &requests, props).await
    }

    #[tokio::test]
    async fn test_install_then_guard() {
        let h = harness();
        let release = install(&h, &DeploymentProperties::new()).await.unwrap();

        assert_eq!(release.version, 1);
        assert_eq!(release.platform_name, "default");
        assert_eq!(release.manifest.labels(), vec!["time", "log"]);
        assert_eq!(h.client.state("ticktock").await.unwrap(), LifecycleState::Deployed);

        let err = install(&h, &DeploymentProperties::new()).await.unwrap_err();
        assert!(matches!(err, DeployError::Conflict(ref c) if c.kind == ConflictKind::AlreadyDeployed));
    }

    #[tokio::test]
    async fn test_guard_reports_deploying() {
        let h = harness();
        install(&h, &DeploymentProperties::new()).await.unwrap();
        h.backend.set_stage_state("ticktock", "log", LifecycleState::Deploying);

        let err = install(&h, &DeploymentProperties::new()).await.unwrap_err();
        assert!(matches!(err, DeployError::Conflict(ref c) if c.kind == ConflictKind::AlreadyDeploying));
    }

    #[tokio::test]
    async fn test_unknown_platform() {
        let h = harness();
        let props = DeploymentProperties::new().with(keys::PLATFORM, "k8s");
        let err = install(&h, &props).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(h.client.info("ticktock").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_identical_package_not_reuploaded() {
        let h = harness();
        install(&h, &DeploymentProperties::new()).await.unwrap();
        assert_eq!(h.backend.upload_count(), 1);

        // Undeploy keeps history but drops the package, so redeploy uploads again.
        h.client.uninstall("ticktock").await.unwrap();
        let release = install(&h, &DeploymentProperties::new()).await.unwrap();
        assert_eq!(release.version, 2);
        assert_eq!(h.backend.upload_count(), 2);
    }

    #[tokio::test]
    async fn test_upload_skipped_for_same_digest() {
        let h = harness();
        let def = ticktock();
        let requests = h.builder.build(&def, &DeploymentProperties::new()).await.unwrap();
        let package = ReleasePackager::default()
            .package(&def, &requests, &DeploymentProperties::new())
            .unwrap();
        h.backend.upload(package.to_bytes().unwrap()).await.unwrap();

        h.client.install(&def, &requests, &DeploymentProperties::new()).await.unwrap();
        assert_eq!(h.backend.upload_count(), 1);
    }

    #[tokio::test]
    async fn test_history_is_append_only() {
        let h = harness();
        let v1 = install(&h, &DeploymentProperties::new()).await.unwrap();

        let props = DeploymentProperties::new().with("app.log.level", "DEBUG");
        let v2 = h.client.upgrade("ticktock", &props, &UpgradeOptions::new()).await.unwrap();
        assert_eq!(v2.version, 2);
        assert_eq!(v2.package.version, "1.0.1");

        let v3 = h.client.rollback("ticktock", 1).await.unwrap();
        assert_eq!(v3.version, 3);

        let history = h.client.history("ticktock").await.unwrap();
        let versions: Vec<_> = history.iter().map(|r| r.version).collect();
        assert_eq!(versions, vec![3, 2, 1]);
        assert_eq!(h.client.manifest("ticktock", None).await.unwrap(), v1.manifest);
    }

    #[tokio::test]
    async fn test_install_leaves_definition_alone() {
        let h = harness();
        install(&h, &DeploymentProperties::new().with("app.log.level", "DEBUG"))
            .await
            .unwrap();

        let stored = h.store.find("ticktock").await.unwrap().unwrap();
        assert_eq!(stored, ticktock());
        assert_eq!(stored.dsl_text(), "time | log");
    }

    #[tokio::test]
    async fn test_upgrade_reconciles_definition() {
        let h = harness();
        install(&h, &DeploymentProperties::new()).await.unwrap();

        let props = DeploymentProperties::new().with("app.log.level", "DEBUG");
        h.client.upgrade("ticktock", &props, &UpgradeOptions::new()).await.unwrap();

        let stored = h.store.find("ticktock").await.unwrap().unwrap();
        assert_eq!(stored.dsl_text(), "time | log --level=DEBUG");
        assert_eq!(stored.stage("log").unwrap().input_destination(), Some("ticktock.time"));

        h.client.rollback("ticktock", 0).await.unwrap();
        let stored = h.store.find("ticktock").await.unwrap().unwrap();
        assert_eq!(stored.dsl_text(), "time | log");
    }

    #[tokio::test]
    async fn test_upgrade_resizes_partitions() {
        let h = harness();
        let props = DeploymentProperties::new()
            .with("app.time.producer.partitionKeyExpression", "payload")
            .with("deployer.log.count", "2");
        install(&h, &props).await.unwrap();

        let resize = DeploymentProperties::new().with("deployer.log.count", "3");
        let release = h.client.upgrade("ticktock", &resize, &UpgradeOptions::new()).await.unwrap();

        let time = &release.manifest.entry("time").unwrap().spec;
        let log = &release.manifest.entry("log").unwrap().spec;
        assert_eq!(log.deployment_properties.get("count").map(String::as_str), Some("3"));
        assert_eq!(log.application_properties.get("input.instanceCount").map(String::as_str), Some("3"));
        assert_eq!(time.application_properties.get("output.partitionCount").map(String::as_str), Some("3"));

        let err = h
            .client
            .upgrade("ticktock", &DeploymentProperties::new().with("deployer.log.count", "zero"), &UpgradeOptions::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidDefinition);
    }

    #[tokio::test]
    async fn test_upgrade_without_changes() {
        let h = harness();
        install(&h, &DeploymentProperties::new()).await.unwrap();

        let err = h
            .client
            .upgrade("ticktock", &DeploymentProperties::new(), &UpgradeOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Conflict(ref c) if c.kind == ConflictKind::NothingToUpgrade));

        let forced = h
            .client
            .upgrade("ticktock", &DeploymentProperties::new(), &UpgradeOptions::new().with_force(true))
            .await
            .unwrap();
        assert_eq!(forced.version, 2);
    }

    #[tokio::test]
    async fn test_upgrade_subset_and_coordinates() {
        let h = harness();
        install(&h, &DeploymentProperties::new()).await.unwrap();

        let props = DeploymentProperties::new().with("app.*.level", "WARN");
        let options = UpgradeOptions::new()
            .with_app_names(vec!["log".to_string()])
            .with_coordinate("log", ResourceCoordinate::new("log", "docker", "2.0.0", "docker:apps/log:2.0.0"))
            .with_package_version("3.0.0");
        let release = h.client.upgrade("ticktock", &props, &options).await.unwrap();

        let time = release.manifest.entry("time").unwrap();
        let log = release.manifest.entry("log").unwrap();
        assert!(!time.spec.application_properties.contains_key("level"));
        assert_eq!(log.spec.application_properties.get("level").map(String::as_str), Some("WARN"));
        assert_eq!(log.spec.resource, "docker:apps/log:2.0.0");
        assert_eq!(release.package.version, "3.0.0");

        let bad = UpgradeOptions::new().with_app_names(vec!["nope".to_string()]);
        let err = h.client.upgrade("ticktock", &props, &bad).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidDefinition);
    }

    #[tokio::test]
    async fn test_upgrade_requires_release() {
        let h = harness();
        let err = h
            .client
            .upgrade("ticktock", &DeploymentProperties::new(), &UpgradeOptions::new())
            .await
            .unwrap_err();
        assert!(err.is_release_not_found());
    }

    #[tokio::test]
    async fn test_state_propagates_backend_outage() {
        let mut backend = MockReleaseBackend::new();
        backend
            .expect_status()
            .returning(|_| Err(DeployError::UpstreamUnavailable("down".to_string())));
        backend.expect_install().never();
        let client = ReleaseLifecycleClient::new(Arc::new(backend), Arc::new(InMemoryDefinitionStore::new()));

        let err = client.state("ticktock").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
        let err = client.install(&ticktock(), &[], &DeploymentProperties::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
    }
}
