//! In-memory and fault-injecting collaborators.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::core::{DeploymentRequest, LifecycleState, PlatformDescriptor, StageStatus};
use crate::deployer::PlatformLauncher;
use crate::errors::{DeployError, Result};
use crate::release::{InstallRequest, Manifest, PackageMetadata, Release, ReleaseBackend, UpgradeRequest, UploadedPackage};

#[derive(Debug, Clone)]
struct LaunchRecord {
    label: String,
    state: LifecycleState,
}

/// A [`PlatformLauncher`] that records launches in memory.
#[derive(Debug)]
pub struct InMemoryLauncher {
    platform: PlatformDescriptor,
    deployments: Mutex<BTreeMap<String, LaunchRecord>>,
    launch_order: Mutex<Vec<String>>,
    fail_labels: HashSet<String>,
    launch_delay: Option<Duration>,
}

impl Default for InMemoryLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLauncher {
    /// Creates a launcher for a `local` platform.
    #[must_use]
    pub fn new() -> Self {
        Self {
            platform: PlatformDescriptor::new("default", "local", "In-process launcher"),
            deployments: Mutex::new(BTreeMap::new()),
            launch_order: Mutex::new(Vec::new()),
            fail_labels: HashSet::new(),
            launch_delay: None,
        }
    }

    /// Makes launches of `label` fail.
    #[must_use]
    pub fn failing_on(mut self, label: impl Into<String>) -> Self {
        self.fail_labels.insert(label.into());
        self
    }

    /// Delays every launch by `delay`.
    #[must_use]
    pub fn with_launch_delay(mut self, delay: Duration) -> Self {
        self.launch_delay = Some(delay);
        self
    }

    /// Labels launched so far, in launch order.
    #[must_use]
    pub fn launched_labels(&self) -> Vec<String> {
        self.launch_order.lock().clone()
    }

    /// Number of deployments currently running.
    #[must_use]
    pub fn running(&self) -> usize {
        self.deployments.lock().len()
    }

    /// Overrides the state of every deployment of `label`.
    pub fn set_state(&self, label: &str, state: LifecycleState) {
        for record in self.deployments.lock().values_mut() {
            if record.label == label {
                record.state = state;
            }
        }
    }
}

#[async_trait]
impl PlatformLauncher for InMemoryLauncher {
    fn platform(&self) -> PlatformDescriptor {
        self.platform.clone()
    }

    async fn launch(&self, request: &DeploymentRequest) -> Result<String> {
        let label = request.label().to_string();
        if let Some(delay) = self.launch_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_labels.contains(&label) {
            return Err(DeployError::Internal(format!("launch of '{label}' failed")));
        }
        let deployment_id = format!("{label}-{}", Uuid::new_v4().simple());
        self.deployments.lock().insert(
            deployment_id.clone(),
            LaunchRecord {
                label: label.clone(),
                state: LifecycleState::Deployed,
            },
        );
        self.launch_order.lock().push(label);
        Ok(deployment_id)
    }

    async fn undeploy(&self, deployment_id: &str) -> Result<()> {
        self.deployments.lock().remove(deployment_id);
        Ok(())
    }

    async fn status(&self, deployment_id: &str) -> Result<LifecycleState> {
        Ok(self
            .deployments
            .lock()
            .get(deployment_id)
            .map_or(LifecycleState::Undeployed, |r| r.state))
    }
}

/// Wraps a [`ReleaseBackend`] with call counting, latency and failures.
pub struct FlakyReleaseBackend {
    inner: Arc<dyn ReleaseBackend>,
    unavailable: Mutex<HashSet<String>>,
    status_delay: Mutex<Option<Duration>>,
    install_delay: Option<Duration>,
    status_calls: AtomicUsize,
    install_calls: AtomicUsize,
}

impl std::fmt::Debug for FlakyReleaseBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlakyReleaseBackend")
            .field("status_calls", &self.status_calls.load(Ordering::SeqCst))
            .field("install_calls", &self.install_calls.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl FlakyReleaseBackend {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn ReleaseBackend>) -> Self {
        Self {
            inner,
            unavailable: Mutex::new(HashSet::new()),
            status_delay: Mutex::new(None),
            install_delay: None,
            status_calls: AtomicUsize::new(0),
            install_calls: AtomicUsize::new(0),
        }
    }

    /// Delays every install by `delay`.
    #[must_use]
    pub fn with_install_delay(mut self, delay: Duration) -> Self {
        self.install_delay = Some(delay);
        self
    }

    /// Makes status queries for `name` fail with `UpstreamUnavailable`.
    pub fn make_unavailable(&self, name: impl Into<String>) {
        self.unavailable.lock().insert(name.into());
    }

    /// Delays every status query by `delay`.
    pub fn set_status_delay(&self, delay: Option<Duration>) {
        *self.status_delay.lock() = delay;
    }

    /// Number of status queries received.
    #[must_use]
    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    /// Number of installs received.
    #[must_use]
    pub fn install_calls(&self) -> usize {
        self.install_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReleaseBackend for FlakyReleaseBackend {
    async fn upload(&self, bytes: Vec<u8>) -> Result<PackageMetadata> {
        self.inner.upload(bytes).await
    }

    async fn find_package(&self, name: &str, version: &str) -> Result<Option<UploadedPackage>> {
        self.inner.find_package(name, version).await
    }

    async fn delete_package(&self, name: &str) -> Result<()> {
        self.inner.delete_package(name).await
    }

    async fn install(&self, request: InstallRequest) -> Result<Release> {
        self.install_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.install_delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.install(request).await
    }

    async fn upgrade(&self, request: UpgradeRequest) -> Result<Release> {
        self.inner.upgrade(request).await
    }

    async fn rollback(&self, name: &str, version: u32) -> Result<Release> {
        self.inner.rollback(name, version).await
    }

    async fn delete(&self, name: &str) -> Result<Release> {
        self.inner.delete(name).await
    }

    async fn info(&self, name: &str) -> Result<Release> {
        self.inner.info(name).await
    }

    async fn status(&self, name: &str) -> Result<Vec<StageStatus>> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.status_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.unavailable.lock().contains(name) {
            return Err(DeployError::UpstreamUnavailable(format!("status of '{name}'")));
        }
        self.inner.status(name).await
    }

    async fn history(&self, name: &str) -> Result<Vec<Release>> {
        self.inner.history(name).await
    }

    async fn manifest(&self, name: &str, version: Option<u32>) -> Result<Manifest> {
        self.inner.manifest(name, version).await
    }

    async fn list_platforms(&self) -> Result<Vec<PlatformDescriptor>> {
        self.inner.list_platforms().await
    }
}
