//! Resolved artifacts, deployment requests and platform-reported status.

use super::{LifecycleState, Stage, StageRole};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Resolved pointer to a runnable artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceCoordinate {
    /// Artifact name.
    pub name: String,
    /// Artifact type (e.g. `maven`, `docker`).
    pub kind: String,
    /// Artifact version.
    pub version: String,
    /// Fully qualified locator, usually ending in `:<version>`.
    pub locator: String,
}

impl ResourceCoordinate {
    /// Creates a new coordinate.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        kind: impl Into<String>,
        version: impl Into<String>,
        locator: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            version: version.into(),
            locator: locator.into(),
        }
    }

    /// Returns a copy pinned to `version`.
    ///
    /// A locator ending in `:<old version>` is rewritten to the new version.
    #[must_use]
    pub fn with_version(&self, version: &str) -> Self {
        let suffix = format!(":{}", self.version);
        let locator = match self.locator.strip_suffix(&suffix) {
            Some(base) => format!("{base}:{version}"),
            None => self.locator.clone(),
        };
        Self {
            name: self.name.clone(),
            kind: self.kind.clone(),
            version: version.to_string(),
            locator,
        }
    }
}

/// Everything needed to launch one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRequest {
    /// The stage being deployed, with its definition-time properties.
    pub stage: Stage,
    /// The derived role.
    pub role: StageRole,
    /// The artifact to run.
    pub coordinate: ResourceCoordinate,
    /// Merged app properties, including injected partition keys.
    pub app_properties: BTreeMap<String, String>,
    /// Merged platform properties.
    pub deployer_properties: BTreeMap<String, String>,
    /// Version pinned via `version.<label>`, if any.
    pub version_override: Option<String>,
}

impl DeploymentRequest {
    /// Returns the stage label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.stage.label
    }

    /// Returns the full property set handed to the app: definition
    /// properties overlaid with deploy-time properties.
    #[must_use]
    pub fn effective_app_properties(&self) -> BTreeMap<String, String> {
        let mut props = self.stage.properties.clone();
        props.extend(self.app_properties.iter().map(|(k, v)| (k.clone(), v.clone())));
        props
    }
}

/// Per-stage status as reported by a platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageStatus {
    /// The stage label.
    pub label: String,
    /// Platform deployment identifier.
    pub deployment_id: String,
    /// Reported state.
    pub state: LifecycleState,
}

impl StageStatus {
    /// Creates a new stage status.
    #[must_use]
    pub fn new(label: impl Into<String>, deployment_id: impl Into<String>, state: LifecycleState) -> Self {
        Self {
            label: label.into(),
            deployment_id: deployment_id.into(),
            state,
        }
    }
}

/// A platform a release can be installed on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformDescriptor {
    /// Platform account name.
    pub name: String,
    /// Platform kind (e.g. `local`, `kubernetes`).
    pub kind: String,
    /// Free-text description.
    pub description: String,
}

impl PlatformDescriptor {
    /// Creates a new descriptor.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            description: description.into(),
        }
    }
}
