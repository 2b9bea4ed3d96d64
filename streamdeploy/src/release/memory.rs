//! In-memory [`ReleaseBackend`].
//!
//! Keeps packages, release history and simulated stage states in process.
//! Used for local runs and throughout the test suite.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use super::backend::{
    InstallRequest, Release, ReleaseBackend, ReleaseInfo, ReleaseStatusCode, UpgradeRequest, UploadedPackage,
};
use super::manifest::Manifest;
use super::package::{Package, PackageMetadata};
use crate::core::{LifecycleState, PlatformDescriptor, StageStatus};
use crate::errors::{ConflictError, ConflictKind, DeployError, NotFoundError, Resource, Result};

#[derive(Debug)]
struct StoredPackage {
    package: Package,
    digest: String,
}

#[derive(Debug, Default)]
struct Inner {
    packages: HashMap<(String, String), StoredPackage>,
    /// Release versions per name, oldest first.
    releases: HashMap<String, Vec<Release>>,
    stage_states: HashMap<String, BTreeMap<String, LifecycleState>>,
}

impl Inner {
    fn package(&self, name: &str, version: &str) -> Result<&StoredPackage> {
        self.packages
            .get(&(name.to_string(), version.to_string()))
            .ok_or_else(|| NotFoundError::new(Resource::Package, format!("{name}:{version}")).into())
    }

    fn live(&mut self, name: &str) -> Result<&mut Release> {
        self.releases
            .get_mut(name)
            .and_then(|history| history.last_mut())
            .filter(|release| release.is_deployed())
            .ok_or_else(|| DeployError::release_not_found(name))
    }

    fn next_version(&self, name: &str) -> u32 {
        self.releases
            .get(name)
            .and_then(|history| history.last())
            .map_or(1, |release| release.version + 1)
    }

    fn push(&mut self, release: Release) -> Release {
        self.stage_states.remove(&release.name);
        self.releases
            .entry(release.name.clone())
            .or_default()
            .push(release.clone());
        release
    }

    fn first_deployed(&self, name: &str) -> Option<chrono::DateTime<Utc>> {
        self.releases
            .get(name)
            .and_then(|history| history.first())
            .map(|release| release.info.first_deployed)
    }
}

/// In-process release manager.
#[derive(Debug)]
pub struct InMemoryReleaseBackend {
    inner: Mutex<Inner>,
    platforms: Vec<PlatformDescriptor>,
    initial_state: LifecycleState,
    uploads: AtomicUsize,
}

impl Default for InMemoryReleaseBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryReleaseBackend {
    /// Creates a backend with a single `default` local platform.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            platforms: vec![PlatformDescriptor::new("default", "local", "In-process platform")],
            initial_state: LifecycleState::Deployed,
            uploads: AtomicUsize::new(0),
        }
    }

    /// Adds a platform.
    #[must_use]
    pub fn with_platform(mut self, platform: PlatformDescriptor) -> Self {
        self.platforms.push(platform);
        self
    }

    /// Sets the state newly installed stages report.
    #[must_use]
    pub fn with_initial_state(mut self, state: LifecycleState) -> Self {
        self.initial_state = state;
        self
    }

    /// Overrides the reported state of one stage of the live release.
    pub fn set_stage_state(&self, name: &str, label: &str, state: LifecycleState) {
        self.inner
            .lock()
            .stage_states
            .entry(name.to_string())
            .or_default()
            .insert(label.to_string(), state);
    }

    /// Number of packages uploaded so far.
    #[must_use]
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    fn check_platform(&self, name: &str) -> Result<()> {
        if self.platforms.iter().any(|p| p.name == name) {
            Ok(())
        } else {
            Err(NotFoundError::new(Resource::Platform, name).into())
        }
    }
}

fn release_info(
    first_deployed: Option<chrono::DateTime<Utc>>,
    description: impl Into<String>,
) -> ReleaseInfo {
    let now = Utc::now();
    ReleaseInfo {
        status: ReleaseStatusCode::Deployed,
        first_deployed: first_deployed.unwrap_or(now),
        last_deployed: now,
        description: description.into(),
    }
}

#[async_trait]
impl ReleaseBackend for InMemoryReleaseBackend {
    async fn upload(&self, bytes: Vec<u8>) -> Result<PackageMetadata> {
        let package = Package::from_bytes(&bytes)?;
        let digest = hex::encode(Sha256::digest(&bytes));
        let metadata = package.metadata.clone();

        self.inner.lock().packages.insert(
            (metadata.name.clone(), metadata.version.clone()),
            StoredPackage { package, digest },
        );
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(metadata)
    }

    async fn find_package(&self, name: &str, version: &str) -> Result<Option<UploadedPackage>> {
        let inner = self.inner.lock();
        Ok(inner
            .packages
            .get(&(name.to_string(), version.to_string()))
            .map(|stored| UploadedPackage {
                metadata: stored.package.metadata.clone(),
                digest: stored.digest.clone(),
            }))
    }

    async fn delete_package(&self, name: &str) -> Result<()> {
        self.inner.lock().packages.retain(|(n, _), _| n != name);
        Ok(())
    }

    async fn install(&self, request: InstallRequest) -> Result<Release> {
        self.check_platform(&request.platform_name)?;
        let mut inner = self.inner.lock();

        if inner.live(&request.release_name).is_ok() {
            return Err(ConflictError::new(ConflictKind::AlreadyDeployed, &request.release_name).into());
        }
        let stored = inner.package(&request.package_name, &request.package_version)?;
        let manifest = Manifest::from_package(&stored.package)?;
        let package = stored.package.metadata.clone();

        let release = Release {
            name: request.release_name.clone(),
            version: inner.next_version(&request.release_name),
            manifest,
            platform_name: request.platform_name,
            package,
            info: release_info(inner.first_deployed(&request.release_name), "Install complete"),
            config_values: request.config_values,
        };
        Ok(inner.push(release))
    }

    async fn upgrade(&self, request: UpgradeRequest) -> Result<Release> {
        let mut inner = self.inner.lock();

        let platform_name = inner.live(&request.release_name)?.platform_name.clone();
        let stored = inner.package(&request.package_name, &request.package_version)?;
        let manifest = Manifest::from_package(&stored.package)?;
        let package = stored.package.metadata.clone();
        let version = inner.next_version(&request.release_name);

        let previous = inner.live(&request.release_name)?;
        previous.info.status = ReleaseStatusCode::Deleted;
        previous.info.description = format!("Superseded by version {version}");

        let release = Release {
            name: request.release_name.clone(),
            version,
            manifest,
            platform_name,
            package,
            info: release_info(inner.first_deployed(&request.release_name), "Upgrade complete"),
            config_values: request.config_values,
        };
        Ok(inner.push(release))
    }

    async fn rollback(&self, name: &str, version: u32) -> Result<Release> {
        let mut inner = self.inner.lock();

        let history = inner.releases.get(name).ok_or_else(|| DeployError::release_not_found(name))?;
        let latest = history.last().map_or(0, |r| r.version);
        let target_version = if version == 0 { latest.saturating_sub(1) } else { version };
        let target = history
            .iter()
            .find(|r| r.version == target_version)
            .cloned()
            .ok_or_else(|| NotFoundError::new(Resource::ReleaseVersion, format!("{name}:{version}")))?;

        let next = latest + 1;
        if let Ok(previous) = inner.live(name) {
            previous.info.status = ReleaseStatusCode::Deleted;
            previous.info.description = format!("Superseded by version {next}");
        }

        let release = Release {
            version: next,
            info: release_info(
                inner.first_deployed(name),
                format!("Rollback to version {target_version} complete"),
            ),
            ..target
        };
        Ok(inner.push(release))
    }

    async fn delete(&self, name: &str) -> Result<Release> {
        let mut inner = self.inner.lock();
        let release = inner.live(name)?;
        release.info.status = ReleaseStatusCode::Deleted;
        release.info.description = "Delete complete".to_string();
        let deleted = release.clone();
        inner.stage_states.remove(name);
        Ok(deleted)
    }

    async fn info(&self, name: &str) -> Result<Release> {
        self.inner
            .lock()
            .releases
            .get(name)
            .and_then(|history| history.last())
            .cloned()
            .ok_or_else(|| DeployError::release_not_found(name))
    }

    async fn status(&self, name: &str) -> Result<Vec<StageStatus>> {
        let mut inner = self.inner.lock();
        let release = inner.live(name)?.clone();
        let overrides = inner.stage_states.get(name);

        Ok(release
            .manifest
            .entries()
            .iter()
            .map(|entry| {
                let state = overrides
                    .and_then(|states| states.get(entry.label()))
                    .copied()
                    .unwrap_or(self.initial_state);
                StageStatus::new(
                    entry.label(),
                    format!("{name}.{}-v{}", entry.label(), release.version),
                    state,
                )
            })
            .collect())
    }

    async fn history(&self, name: &str) -> Result<Vec<Release>> {
        let inner = self.inner.lock();
        Ok(inner
            .releases
            .get(name)
            .map(|history| history.iter().rev().cloned().collect())
            .unwrap_or_default())
    }

    async fn manifest(&self, name: &str, version: Option<u32>) -> Result<Manifest> {
        let inner = self.inner.lock();
        let history = inner.releases.get(name).ok_or_else(|| DeployError::release_not_found(name))?;
        let release = match version {
            Some(v) => history
                .iter()
                .find(|r| r.version == v)
                .ok_or_else(|| NotFoundError::new(Resource::ReleaseVersion, format!("{name}:{v}")))?,
            None => history.last().ok_or_else(|| DeployError::release_not_found(name))?,
        };
        Ok(release.manifest.clone())
    }

    async fn list_platforms(&self) -> Result<Vec<PlatformDescriptor>> {
        Ok(self.platforms.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageRole;
    use crate::errors::ErrorKind;
    use crate::release::manifest::{EntryMetadata, ManifestEntry};
    use crate::release::package::{PackageKind, StageSpec};
    use pretty_assertions::assert_eq;

    fn package(version: &str, level: &str) -> Package {
        let mut spec = StageSpec {
            resource: "maven://apps:log:1.0.0".to_string(),
            version: "1.0.0".to_string(),
            version_override: None,
            application_properties: BTreeMap::new(),
            deployment_properties: BTreeMap::new(),
        };
        spec.application_properties.insert("level".to_string(), level.to_string());
        let manifest = Manifest::new(vec![ManifestEntry {
            metadata: EntryMetadata {
                name: "log".to_string(),
                app: "log".to_string(),
                role: StageRole::Sink,
            },
            spec,
        }]);
        manifest
            .to_package(PackageMetadata {
                name: "p".to_string(),
                version: version.to_string(),
                repository: "local".to_string(),
                kind: PackageKind::Stream,
                description: String::new(),
                app_name: None,
                role: None,
            })
            .unwrap()
    }

    fn install_request(version: &str) -> InstallRequest {
        InstallRequest {
            release_name: "p".to_string(),
            package_name: "p".to_string(),
            package_version: version.to_string(),
            platform_name: "default".to_string(),
            config_values: String::new(),
        }
    }

    #[tokio::test]
    async fn test_install_requires_package_and_platform() {
        let backend = InMemoryReleaseBackend::new();
        let err = backend.install(install_request("1.0.0")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        backend.upload(package("1.0.0", "INFO").to_bytes().unwrap()).await.unwrap();
        let mut request = install_request("1.0.0");
        request.platform_name = "k8s".to_string();
        let err = backend.install(request).await.unwrap_err();
        assert!(err.to_string().contains("platform"));

        let release = backend.install(install_request("1.0.0")).await.unwrap();
        assert_eq!(release.version, 1);
        assert!(release.is_deployed());

        let again = backend.install(install_request("1.0.0")).await.unwrap_err();
        assert_eq!(again.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_upgrade_rollback_history() {
        let backend = InMemoryReleaseBackend::new();
        backend.upload(package("1.0.0", "INFO").to_bytes().unwrap()).await.unwrap();
        backend.upload(package("1.0.1", "DEBUG").to_bytes().unwrap()).await.unwrap();
        backend.install(install_request("1.0.0")).await.unwrap();

        let upgraded = backend
            .upgrade(UpgradeRequest {
                release_name: "p".to_string(),
                package_name: "p".to_string(),
                package_version: "1.0.1".to_string(),
                config_values: String::new(),
                force: false,
            })
            .await
            .unwrap();
        assert_eq!(upgraded.version, 2);

        let rolled = backend.rollback("p", 0).await.unwrap();
        assert_eq!(rolled.version, 3);
        assert_eq!(rolled.manifest, backend.manifest("p", Some(1)).await.unwrap());

        let history = backend.history("p").await.unwrap();
        let versions: Vec<_> = history.iter().map(|r| r.version).collect();
        assert_eq!(versions, vec![3, 2, 1]);
        assert_eq!(history.iter().filter(|r| r.is_deployed()).count(), 1);
        assert_eq!(history[2].info.first_deployed, history[0].info.first_deployed);
    }

    #[tokio::test]
    async fn test_delete_keeps_history_and_allows_reinstall() {
        let backend = InMemoryReleaseBackend::new();
        backend.upload(package("1.0.0", "INFO").to_bytes().unwrap()).await.unwrap();
        backend.install(install_request("1.0.0")).await.unwrap();

        let deleted = backend.delete("p").await.unwrap();
        assert_eq!(deleted.info.status, ReleaseStatusCode::Deleted);
        assert!(backend.status("p").await.unwrap_err().is_release_not_found());
        assert_eq!(backend.history("p").await.unwrap().len(), 1);

        let reinstalled = backend.install(install_request("1.0.0")).await.unwrap();
        assert_eq!(reinstalled.version, 2);
    }

    #[tokio::test]
    async fn test_status_reports_overrides() {
        let backend = InMemoryReleaseBackend::new().with_initial_state(LifecycleState::Deploying);
        backend.upload(package("1.0.0", "INFO").to_bytes().unwrap()).await.unwrap();
        backend.install(install_request("1.0.0")).await.unwrap();

        let status = backend.status("p").await.unwrap();
        assert_eq!(status[0].state, LifecycleState::Deploying);
        assert_eq!(status[0].deployment_id, "p.log-v1");

        backend.set_stage_state("p", "log", LifecycleState::Failed);
        assert_eq!(backend.status("p").await.unwrap()[0].state, LifecycleState::Failed);
    }

    #[tokio::test]
    async fn test_unknown_release() {
        let backend = InMemoryReleaseBackend::new();
        assert!(backend.info("nope").await.unwrap_err().is_release_not_found());
        assert!(backend.history("nope").await.unwrap().is_empty());
        assert!(backend.rollback("nope", 1).await.unwrap_err().is_release_not_found());
    }

    #[tokio::test]
    async fn test_package_digest_and_delete() {
        let backend = InMemoryReleaseBackend::new();
        let pkg = package("1.0.0", "INFO");
        backend.upload(pkg.to_bytes().unwrap()).await.unwrap();

        let found = backend.find_package("p", "1.0.0").await.unwrap().unwrap();
        assert_eq!(found.digest, pkg.digest().unwrap());
        assert_eq!(backend.upload_count(), 1);

        backend.delete_package("p").await.unwrap();
        assert!(backend.find_package("p", "1.0.0").await.unwrap().is_none());
    }
}
