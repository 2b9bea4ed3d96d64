//! The pipeline lifecycle facade.
//!
//! [`StreamService`] ties the definition store, request building, the
//! deployer and status polling together. Mutating operations on one
//! pipeline are serialized by a per-pipeline lock held from the deploy
//! guard through to the deployer call, so two concurrent deploys of the
//! same pipeline cannot both pass the guard. A lock entry is dropped from
//! the map only once no caller holds or waits on it.

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};

use crate::config::EngineConfig;
use crate::core::{DeploymentProperties, LifecycleState, PipelineDefinition, PlatformDescriptor};
use crate::deployer::{DeployOutcome, DeploymentRequestBuilder, ReleaseStreamDeployer, StreamDeployer};
use crate::errors::{DeployError, NotFoundError, Result};
use crate::events::{event_types, EventSink, LifecycleEvent, NoOpEventSink};
use crate::registry::AppRegistry;
use crate::release::{Manifest, Release, ReleaseBackend, ReleaseLifecycleClient, UpgradeOptions};
use crate::state::{ensure_deployable, PipelineStatus, StatusPoller};
use crate::store::DefinitionStore;


/// Upward-facing entry point for pipeline lifecycle operations.
pub struct StreamService {
    store: Arc<dyn DefinitionStore>,
    builder: DeploymentRequestBuilder,
    deployer: Arc<dyn StreamDeployer>,
    poller: StatusPoller,
    events: Arc<dyn EventSink>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for StreamService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamService")
            .field("deployer", &self.deployer.kind())
            .field("poller", &self.poller)
            .finish_non_exhaustive()
    }
}

impl StreamService {
    /// Creates a service with a default poller and no event sink.
    #[must_use]
    pub fn new(
        store: Arc<dyn DefinitionStore>,
        registry: Arc<dyn AppRegistry>,
        deployer: Arc<dyn StreamDeployer>,
    ) -> Self {
        Self {
            store,
            builder: DeploymentRequestBuilder::new(registry),
            deployer,
            poller: StatusPoller::default(),
            events: Arc::new(NoOpEventSink),
            locks: DashMap::new(),
        }
    }

    /// Creates a release-backed service configured from `config`.
    pub fn release_backed(
        config: &EngineConfig,
        store: Arc<dyn DefinitionStore>,
        registry: Arc<dyn AppRegistry>,
        backend: Arc<dyn ReleaseBackend>,
    ) -> Result<Self> {
        config.validate()?;
        let client = ReleaseLifecycleClient::new(backend, Arc::clone(&store))
            .with_packager(config.packager())
            .with_default_platform(config.default_platform.clone());
        let deployer = Arc::new(ReleaseStreamDeployer::new(client));
        Ok(Self::new(store, registry, deployer).with_poller(config.poller()))
    }

    /// Replaces the status poller.
    #[must_use]
    pub fn with_poller(mut self, poller: StatusPoller) -> Self {
        self.poller = poller;
        self
    }

    /// Sets the sink receiving lifecycle events.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Returns the deployer.
    #[must_use]
    pub fn deployer(&self) -> &Arc<dyn StreamDeployer> {
        &self.deployer
    }

    /// Stores a new definition.
    ///
    /// # Errors
    ///
    /// `Conflict` (duplicate name) if the name is taken.
    #[instrument(skip(self, definition), fields(pipeline = %definition.name()))]
    pub async fn create(&self, definition: PipelineDefinition) -> Result<()> {
        self.store.save(definition).await?;
        debug!("Created pipeline definition");
        Ok(())
    }

    /// Looks up a stored definition.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown pipeline.
    pub async fn definition(&self, name: &str) -> Result<PipelineDefinition> {
        self.store
            .find(name)
            .await?
            .ok_or_else(|| NotFoundError::pipeline(name).into())
    }

    /// Every stored definition, ordered by name.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn definitions(&self) -> Result<Vec<PipelineDefinition>> {
        self.store.find_all().await
    }

    /// Undeploys the pipeline if needed, then deletes its definition.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown pipeline; deployer failures.
    #[instrument(skip(self))]
    pub async fn delete(&self, name: &str) -> Result<PipelineDefinition> {
        let _guard = self.acquire(name).await;

        self.definition(name).await?;
        if self.deployer.state(name).await? != LifecycleState::Undeployed {
            self.deployer.undeploy(name).await?;
            self.events.try_emit(LifecycleEvent::new(event_types::UNDEPLOYED, name));
        }
        let deleted = self
            .store
            .delete(name)
            .await?
            .ok_or_else(|| DeployError::from(NotFoundError::pipeline(name)))?;
        info!("Deleted pipeline");
        Ok(deleted)
    }

    /// Deploys a stored pipeline with `properties`.
    ///
    /// # Errors
    ///
    /// - `NotFound` for an unknown pipeline.
    /// - `Conflict` when it is deploying or deployed.
    /// - `InvalidDefinition` or `AppNotRegistered` from request building;
    ///   nothing reaches the deployer in that case.
    /// - Deployer failures.
    #[instrument(skip(self, properties), fields(properties = properties.len()))]
    pub async fn deploy(&self, name: &str, properties: &DeploymentProperties) -> Result<DeployOutcome> {
        let _guard = self.acquire(name).await;

        let definition = self.definition(name).await?;
        self.events.try_emit(
            LifecycleEvent::new(event_types::DEPLOY_REQUESTED, name).with("stages", definition.len()),
        );

        let started = Instant::now();
        match self.deploy_locked(&definition, properties).await {
            Ok(outcome) => {
                let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
                info!(
                    release_version = ?outcome.release_version,
                    stages = outcome.deployment_ids.len(),
                    duration_ms,
                    "Deployed pipeline"
                );
                self.events.try_emit(
                    LifecycleEvent::new(event_types::DEPLOYED, name)
                        .with("deployer", self.deployer.kind())
                        .with("release_version", outcome.release_version)
                        .with("deployment_ids", outcome.deployment_ids.clone())
                        .with("duration_ms", duration_ms),
                );
                Ok(outcome)
            }
            Err(err) => {
                warn!(error = %err, "Deploy failed");
                self.events.try_emit(
                    LifecycleEvent::new(event_types::DEPLOY_FAILED, name)
                        .with("error_type", err.kind().to_string())
                        .with("error", err.to_string()),
                );
                Err(err)
            }
        }
    }

    async fn deploy_locked(
        &self,
        definition: &PipelineDefinition,
        properties: &DeploymentProperties,
    ) -> Result<DeployOutcome> {
        let name = definition.name();
        ensure_deployable(name, self.deployer.state(name).await?)?;
        let requests = self.builder.build(definition, properties).await?;
        self.deployer.deploy(definition, &requests, properties).await
    }

    /// Stops every stage of a stored pipeline.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown pipeline; deployer failures.
    #[instrument(skip(self))]
    pub async fn undeploy(&self, name: &str) -> Result<()> {
        let _guard = self.acquire(name).await;

        self.definition(name).await?;
        self.deployer.undeploy(name).await?;
        self.events.try_emit(LifecycleEvent::new(event_types::UNDEPLOYED, name));
        info!("Undeployed pipeline");
        Ok(())
    }

    /// Polls the state of `names` concurrently.
    ///
    /// A pipeline whose query fails is reported with no data and does not
    /// affect the others.
    #[instrument(skip(self, names), fields(pipelines = names.len()))]
    pub async fn state(&self, names: &[String]) -> BTreeMap<String, PipelineStatus> {
        self.poller.poll(names, Arc::clone(&self.deployer)).await
    }

    /// Polls the state of every stored pipeline.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn state_all(&self) -> Result<BTreeMap<String, PipelineStatus>> {
        let names: Vec<String> = self
            .store
            .find_all()
            .await?
            .iter()
            .map(|d| d.name().to_string())
            .collect();
        Ok(self.state(&names).await)
    }

    /// Applies update-time properties to a deployed pipeline.
    ///
    /// # Errors
    ///
    /// - `NotFound` for an unknown pipeline.
    /// - `ReleaseNotFound` when it is not deployed.
    /// - `Conflict` when nothing would change and `force` is off.
    /// - `Unsupported` on the direct deployer.
    #[instrument(skip(self, properties, options), fields(force = options.force))]
    pub async fn update(
        &self,
        name: &str,
        properties: &DeploymentProperties,
        options: &UpgradeOptions,
    ) -> Result<Release> {
        let _guard = self.acquire(name).await;

        self.definition(name).await?;
        let release = self.deployer.upgrade(name, properties, options).await?;
        self.events.try_emit(
            LifecycleEvent::new(event_types::UPGRADED, name)
                .with("release_version", release.version)
                .with("package_version", release.package.version.clone()),
        );
        Ok(release)
    }

    /// Re-applies release `version` (0 = previous).
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown pipeline or version; `Unsupported` on the
    /// direct deployer.
    #[instrument(skip(self))]
    pub async fn rollback(&self, name: &str, version: u32) -> Result<Release> {
        let _guard = self.acquire(name).await;

        self.definition(name).await?;
        let release = self.deployer.rollback(name, version).await?;
        self.events.try_emit(
            LifecycleEvent::new(event_types::ROLLED_BACK, name)
                .with("release_version", release.version)
                .with("requested_version", version),
        );
        Ok(release)
    }

    /// Release history, most recent first.
    ///
    /// # Errors
    ///
    /// `Unsupported` on the direct deployer.
    pub async fn history(&self, name: &str) -> Result<Vec<Release>> {
        self.deployer.history(name).await
    }

    /// Manifest of `version`, or of the latest release.
    ///
    /// # Errors
    ///
    /// `ReleaseNotFound`/`NotFound` for unknown releases or versions.
    pub async fn manifest(&self, name: &str, version: Option<u32>) -> Result<Manifest> {
        self.deployer.manifest(name, version).await
    }

    /// Latest release, if any.
    ///
    /// # Errors
    ///
    /// `Unsupported` on the direct deployer.
    pub async fn info(&self, name: &str) -> Result<Option<Release>> {
        self.deployer.info(name).await
    }

    /// Platforms pipelines can be deployed to.
    ///
    /// # Errors
    ///
    /// Propagates deployer failures.
    pub async fn platforms(&self) -> Result<Vec<PlatformDescriptor>> {
        self.deployer.platforms().await
    }

    fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(name.to_string()).or_default().value())
    }

    async fn acquire(&self, name: &str) -> PipelineLock<'_> {
        let guard = self.lock_for(name).lock_owned().await;
        PipelineLock {
            locks: &self.locks,
            name: name.to_string(),
            guard: Some(guard),
        }
    }
}

/// Holds one pipeline's lock and prunes its map entry on release.
struct PipelineLock<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    name: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for PipelineLock<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold clones; the entry stays until the last one is done.
        self.locks
            .remove_if(&self.name, |_, lock| Arc::strong_count(lock) == 1);
    }
}
