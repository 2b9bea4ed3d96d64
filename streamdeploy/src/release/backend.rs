//! Release-management backend interface and release records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::manifest::Manifest;
use super::package::PackageMetadata;
use crate::core::{PlatformDescriptor, StageStatus};
use crate::errors::Result;

/// Status code of a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseStatusCode {
    /// The release is (or was last) running.
    Deployed,
    /// The release was deleted or superseded.
    Deleted,
    /// The release failed to install.
    Failed,
}

impl fmt::Display for ReleaseStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deployed => write!(f, "deployed"),
            Self::Deleted => write!(f, "deleted"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Bookkeeping attached to a [`Release`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    /// Current status.
    pub status: ReleaseStatusCode,
    /// When version 1 of this release name was installed.
    pub first_deployed: DateTime<Utc>,
    /// When this version was installed.
    pub last_deployed: DateTime<Utc>,
    /// Free-text description of the last transition.
    pub description: String,
}

/// One version of an installed pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    /// Release name (the pipeline name).
    pub name: String,
    /// Version, starting at 1 and increasing by one per transition.
    pub version: u32,
    /// Resolved per-stage configuration.
    pub manifest: Manifest,
    /// Platform the release runs on.
    pub platform_name: String,
    /// Package the release was installed from.
    pub package: PackageMetadata,
    /// Status and timestamps.
    pub info: ReleaseInfo,
    /// YAML of the config values applied to produce this version.
    #[serde(default)]
    pub config_values: String,
}

impl Release {
    /// Returns true if this version is the running one.
    #[must_use]
    pub fn is_deployed(&self) -> bool {
        self.info.status == ReleaseStatusCode::Deployed
    }
}

/// A stored package and its content digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedPackage {
    /// Package identity.
    pub metadata: PackageMetadata,
    /// Hex SHA-256 of the uploaded bytes.
    pub digest: String,
}

/// Parameters of [`ReleaseBackend::install`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallRequest {
    /// Release name.
    pub release_name: String,
    /// Uploaded package name.
    pub package_name: String,
    /// Uploaded package version.
    pub package_version: String,
    /// Target platform.
    pub platform_name: String,
    /// YAML of the config values applied.
    pub config_values: String,
}

/// Parameters of [`ReleaseBackend::upgrade`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeRequest {
    /// Release name.
    pub release_name: String,
    /// Uploaded package name.
    pub package_name: String,
    /// Uploaded package version.
    pub package_version: String,
    /// YAML of the config values applied.
    pub config_values: String,
    /// Replace every stage even if its config is unchanged.
    pub force: bool,
}

/// A release-management service.
///
/// Lookups by release name return `ReleaseNotFound` when no release (or no
/// live release, for mutating calls) exists under that name.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReleaseBackend: Send + Sync {
    /// Stores an encoded package and returns its identity.
    async fn upload(&self, bytes: Vec<u8>) -> Result<PackageMetadata>;

    /// Finds an uploaded package by name and version.
    async fn find_package(&self, name: &str, version: &str) -> Result<Option<UploadedPackage>>;

    /// Deletes every uploaded version of a package.
    async fn delete_package(&self, name: &str) -> Result<()>;

    /// Installs an uploaded package as a new release version.
    async fn install(&self, request: InstallRequest) -> Result<Release>;

    /// Replaces the live release with a new version built from a package.
    async fn upgrade(&self, request: UpgradeRequest) -> Result<Release>;

    /// Re-applies `version` (0 = the one before the latest) as a new version.
    async fn rollback(&self, name: &str, version: u32) -> Result<Release>;

    /// Deletes the live release, keeping its history.
    async fn delete(&self, name: &str) -> Result<Release>;

    /// Latest release version, live or not.
    async fn info(&self, name: &str) -> Result<Release>;

    /// Per-stage status of the live release.
    async fn status(&self, name: &str) -> Result<Vec<StageStatus>>;

    /// Every version, most recent first; empty for unknown names.
    async fn history(&self, name: &str) -> Result<Vec<Release>>;

    /// Manifest of `version`, or of the latest version.
    async fn manifest(&self, name: &str, version: Option<u32>) -> Result<Manifest>;

    /// Platforms releases can be installed on.
    async fn list_platforms(&self) -> Result<Vec<PlatformDescriptor>>;
}
