//! Deployment backends.
//!
//! [`StreamDeployer`] is the seam between the service and the platform. Two
//! implementations consume the same [`DeploymentRequest`]s:
//!
//! - [`ReleaseStreamDeployer`] packages the pipeline as a release and drives
//!   a release manager.
//! - [`DirectStreamDeployer`] launches each stage on a [`PlatformLauncher`],
//!   one at a time in deployment order. It keeps no release history, so the
//!   release operations report `Unsupported`.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::core::{
    DeploymentProperties, DeploymentRequest, LifecycleState, PipelineDefinition, PlatformDescriptor, StageStatus,
};
use crate::errors::{DeployError, Result};
use crate::release::{Manifest, Release, ReleaseLifecycleClient, UpgradeOptions};
use crate::state::{ensure_deployable, PipelineStatus, StatusSource};

/// Result of a successful deploy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployOutcome {
    /// Release version, for release-backed deploys.
    pub release_version: Option<u32>,
    /// Platform deployment ids in deployment order.
    pub deployment_ids: Vec<String>,
}

/// Deploys pipelines and answers lifecycle queries about them.
#[async_trait]
pub trait StreamDeployer: StatusSource {
    /// Short name used in logs and errors.
    fn kind(&self) -> &'static str;

    /// Deploys `requests`, which must be in deployment order.
    async fn deploy(
        &self,
        definition: &PipelineDefinition,
        requests: &[DeploymentRequest],
        properties: &DeploymentProperties,
    ) -> Result<DeployOutcome>;

    /// Stops every stage of `name`; a no-op if nothing is deployed.
    async fn undeploy(&self, name: &str) -> Result<()>;

    /// Aggregated state of `name`.
    async fn state(&self, name: &str) -> Result<LifecycleState> {
        match self.stage_statuses(name).await {
            Ok(stages) => Ok(PipelineStatus::from_stages(stages).state),
            Err(err) if err.is_release_not_found() => Ok(LifecycleState::Undeployed),
            Err(err) => Err(err),
        }
    }

    /// Applies update-time properties to the running pipeline.
    async fn upgrade(
        &self,
        _name: &str,
        _properties: &DeploymentProperties,
        _options: &UpgradeOptions,
    ) -> Result<Release> {
        Err(DeployError::unsupported(self.kind(), "upgrade"))
    }

    /// Re-applies an earlier release version.
    async fn rollback(&self, _name: &str, _version: u32) -> Result<Release> {
        Err(DeployError::unsupported(self.kind(), "rollback"))
    }

    /// Release history, most recent first.
    async fn history(&self, _name: &str) -> Result<Vec<Release>> {
        Err(DeployError::unsupported(self.kind(), "history"))
    }

    /// Manifest of a release version.
    async fn manifest(&self, _name: &str, _version: Option<u32>) -> Result<Manifest> {
        Err(DeployError::unsupported(self.kind(), "manifest"))
    }

    /// Latest release, if any.
    async fn info(&self, _name: &str) -> Result<Option<Release>> {
        Err(DeployError::unsupported(self.kind(), "info"))
    }

    /// Platforms pipelines can be deployed to.
    async fn platforms(&self) -> Result<Vec<PlatformDescriptor>>;
}

/// Release-manager backed deployer.
#[derive(Debug, Clone)]
pub struct ReleaseStreamDeployer {
    client: ReleaseLifecycleClient,
}

impl ReleaseStreamDeployer {
    /// Wraps a lifecycle client.
    #[must_use]
    pub fn new(client: ReleaseLifecycleClient) -> Self {
        Self { client }
    }

    /// Returns the lifecycle client.
    #[must_use]
    pub fn client(&self) -> &ReleaseLifecycleClient {
        &self.client
    }
}

#[async_trait]
impl StatusSource for ReleaseStreamDeployer {
    async fn stage_statuses(&self, name: &str) -> Result<Vec<StageStatus>> {
        self.client.stage_statuses(name).await
    }
}

#[async_trait]
impl StreamDeployer for ReleaseStreamDeployer {
    fn kind(&self) -> &'static str {
        "release"
    }

    async fn deploy(
        &self,
        definition: &PipelineDefinition,
        requests: &[DeploymentRequest],
        properties: &DeploymentProperties,
    ) -> Result<DeployOutcome> {
        let release = self.client.install(definition, requests, properties).await?;
        let deployment_ids = match self.client.stage_statuses(definition.name()).await {
            Ok(stages) => stages.into_iter().map(|s| s.deployment_id).collect(),
            Err(_) => Vec::new(),
        };
        Ok(DeployOutcome {
            release_version: Some(release.version),
            deployment_ids,
        })
    }

    async fn undeploy(&self, name: &str) -> Result<()> {
        match self.client.uninstall(name).await {
            Ok(_) => Ok(()),
            Err(err) if err.is_release_not_found() => {
                debug!(pipeline = %name, "Nothing to undeploy");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn state(&self, name: &str) -> Result<LifecycleState> {
        self.client.state(name).await
    }

    async fn upgrade(&self, name: &str, properties: &DeploymentProperties, options: &UpgradeOptions) -> Result<Release> {
        self.client.upgrade(name, properties, options).await
    }

    async fn rollback(&self, name: &str, version: u32) -> Result<Release> {
        self.client.rollback(name, version).await
    }

    async fn history(&self, name: &str) -> Result<Vec<Release>> {
        self.client.history(name).await
    }

    async fn manifest(&self, name: &str, version: Option<u32>) -> Result<Manifest> {
        self.client.manifest(name, version).await
    }

    async fn info(&self, name: &str) -> Result<Option<Release>> {
        self.client.info(name).await
    }

    async fn platforms(&self) -> Result<Vec<PlatformDescriptor>> {
        self.client.platforms().await
    }
}

/// Launches individual stages on an execution platform.
#[async_trait]
pub trait PlatformLauncher: Send + Sync {
    /// Describes the platform.
    fn platform(&self) -> PlatformDescriptor;

    /// Starts one stage and returns its deployment id.
    async fn launch(&self, request: &DeploymentRequest) -> Result<String>;

    /// Stops a deployment.
    async fn undeploy(&self, deployment_id: &str) -> Result<()>;

    /// Reports the state of a deployment.
    async fn status(&self, deployment_id: &str) -> Result<LifecycleState>;
}

/// One stage of a direct deployment; `None` until its launch returns.
#[derive(Debug, Clone)]
struct Launched {
    label: String,
    deployment_id: Option<String>,
}

/// Deployer that launches stages directly, without a release manager.
pub struct DirectStreamDeployer {
    launcher: Arc<dyn PlatformLauncher>,
    deployments: DashMap<String, Vec<Launched>>,
}

impl std::fmt::Debug for DirectStreamDeployer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectStreamDeployer")
            .field("pipelines", &self.deployments.len())
            .finish_non_exhaustive()
    }
}

impl DirectStreamDeployer {
    /// Creates a deployer on top of `launcher`.
    #[must_use]
    pub fn new(launcher: Arc<dyn PlatformLauncher>) -> Self {
        Self {
            launcher,
            deployments: DashMap::new(),
        }
    }

    fn launched(&self, name: &str) -> Option<Vec<Launched>> {
        self.deployments.get(name).map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl StatusSource for DirectStreamDeployer {
    async fn stage_statuses(&self, name: &str) -> Result<Vec<StageStatus>> {
        let Some(launched) = self.launched(name) else {
            return Err(DeployError::release_not_found(name));
        };

        let mut statuses = Vec::with_capacity(launched.len());
        for stage in launched {
            let status = match stage.deployment_id {
                Some(id) => {
                    let state = self.launcher.status(&id).await?;
                    StageStatus::new(stage.label, id, state)
                }
                None => StageStatus::new(stage.label, String::new(), LifecycleState::Deploying),
            };
            statuses.push(status);
        }
        Ok(statuses)
    }
}

#[async_trait]
impl StreamDeployer for DirectStreamDeployer {
    fn kind(&self) -> &'static str {
        "direct"
    }

    async fn deploy(
        &self,
        definition: &PipelineDefinition,
        requests: &[DeploymentRequest],
        _properties: &DeploymentProperties,
    ) -> Result<DeployOutcome> {
        let name = definition.name();
        ensure_deployable(name, self.state(name).await?)?;

        let pending = requests
            .iter()
            .map(|r| Launched {
                label: r.label().to_string(),
                deployment_id: None,
            })
            .collect();
        self.deployments.insert(name.to_string(), pending);
        let mut deployment_ids = Vec::with_capacity(requests.len());

        for (position, request) in requests.iter().enumerate() {
            match self.launcher.launch(request).await {
                Ok(deployment_id) => {
                    debug!(pipeline = %name, stage = %request.label(), deployment_id = %deployment_id, "Launched stage");
                    if let Some(mut launched) = self.deployments.get_mut(name) {
                        if let Some(stage) = launched.get_mut(position) {
                            stage.deployment_id = Some(deployment_id.clone());
                        }
                    }
                    deployment_ids.push(deployment_id);
                }
                Err(err) => {
                    error!(pipeline = %name, stage = %request.label(), error = %err, "Stage launch failed");
                    if deployment_ids.is_empty() {
                        self.deployments.remove(name);
                    } else if let Some(mut launched) = self.deployments.get_mut(name) {
                        launched.retain(|stage| stage.deployment_id.is_some());
                    }
                    return Err(err);
                }
            }
        }

        info!(pipeline = %name, stages = deployment_ids.len(), "Launched pipeline");
        Ok(DeployOutcome {
            release_version: None,
            deployment_ids,
        })
    }

    async fn undeploy(&self, name: &str) -> Result<()> {
        let Some((_, launched)) = self.deployments.remove(name) else {
            debug!(pipeline = %name, "Nothing to undeploy");
            return Ok(());
        };
        for id in launched.iter().rev().filter_map(|stage| stage.deployment_id.as_deref()) {
            self.launcher.undeploy(id).await?;
        }
        info!(pipeline = %name, stages = launched.len(), "Undeployed pipeline");
        Ok(())
    }

    async fn platforms(&self) -> Result<Vec<PlatformDescriptor>> {
        Ok(vec![self.launcher.platform()])
    }
}
