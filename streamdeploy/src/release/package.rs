//! Hierarchical release packages.
//!
//! A pipeline is packaged as a parent [`Package`] whose dependencies are one
//! sub-package per stage. Each sub-package carries a YAML config block:
//!
//! ```yaml
//! spec:
//!   resource: maven://apps:log-sink:1.0.0
//!   version: 1.0.0
//!   applicationProperties:
//!     level: DEBUG
//!   deploymentProperties:
//!     memory: 1g
//! ```
//!
//! Maps are `BTreeMap`s so the rendered YAML has a stable key order and two
//! releases can be diffed line by line.

use semver::Version;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

use crate::core::{DeploymentProperties, DeploymentRequest, PipelineDefinition, StageRole};
use crate::errors::{DeployError, InvalidDefinitionError, Result};

/// Default version of a freshly packaged pipeline.
pub const DEFAULT_PACKAGE_VERSION: &str = "1.0.0";
/// Default package repository.
pub const DEFAULT_REPOSITORY: &str = "local";

/// What a package describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageKind {
    /// A whole pipeline (parent package).
    Stream,
    /// A single stage (sub-package).
    App,
}

impl fmt::Display for PackageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream => write!(f, "stream"),
            Self::App => write!(f, "app"),
        }
    }
}

/// Package identity and description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageMetadata {
    /// Package name (pipeline name or stage label).
    pub name: String,
    /// Semantic version.
    pub version: String,
    /// Repository the package is uploaded to.
    pub repository: String,
    /// Parent or stage package.
    pub kind: PackageKind,
    /// Free text; the DSL for parent packages.
    #[serde(default)]
    pub description: String,
    /// Registered app name, stage packages only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
    /// Stage role, stage packages only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<StageRole>,
}

/// The `spec` section of a stage config block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageSpec {
    /// Artifact locator.
    pub resource: String,
    /// Artifact version in effect.
    pub version: String,
    /// Version pinned out of band, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_override: Option<String>,
    /// App-level properties.
    #[serde(default)]
    pub application_properties: BTreeMap<String, String>,
    /// Platform-level properties.
    #[serde(default)]
    pub deployment_properties: BTreeMap<String, String>,
}

/// A stage config block as stored in a sub-package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    /// The stage spec.
    pub spec: StageSpec,
}

impl StageConfig {
    /// Renders the block as YAML.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if encoding fails.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Parses a block from YAML.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` for malformed YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}

/// A versioned package, possibly with stage sub-packages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    /// Identity.
    pub metadata: PackageMetadata,
    /// YAML config block, stage packages only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
    /// Stage sub-packages in deployment order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Package>,
}

impl Package {
    /// Encodes the package for upload.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_yaml::to_string(self)?.into_bytes())
    }

    /// Decodes an uploaded package.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` for bytes that are not a package.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes).map_err(|e| DeployError::Serialization(e.to_string()))?;
        Ok(serde_yaml::from_str(text)?)
    }

    /// Hex SHA-256 of the encoded package.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if encoding fails.
    pub fn digest(&self) -> Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(self.to_bytes()?);
        Ok(hex::encode(hasher.finalize()))
    }

    /// Parsed config blocks of all stage sub-packages.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` when a block cannot be parsed.
    pub fn stage_configs(&self) -> Result<Vec<(&PackageMetadata, StageConfig)>> {
        self.dependencies
            .iter()
            .map(|dep| {
                let yaml = dep.config.as_deref().unwrap_or_default();
                Ok((&dep.metadata, StageConfig::from_yaml(yaml)?))
            })
            .collect()
    }
}

/// Serializes deployment requests into a [`Package`].
#[derive(Debug, Clone)]
pub struct ReleasePackager {
    default_version: String,
    default_repository: String,
}

impl Default for ReleasePackager {
    fn default() -> Self {
        Self::new(DEFAULT_PACKAGE_VERSION, DEFAULT_REPOSITORY)
    }
}

impl ReleasePackager {
    /// Creates a packager with the given defaults.
    #[must_use]
    pub fn new(default_version: impl Into<String>, default_repository: impl Into<String>) -> Self {
        Self {
            default_version: default_version.into(),
            default_repository: default_repository.into(),
        }
    }

    /// Builds the parent package and one sub-package per request.
    ///
    /// Name, version and repository come from the reserved `release.*`
    /// properties when present.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDefinition` for a version that is not semver.
    pub fn package(
        &self,
        definition: &PipelineDefinition,
        requests: &[DeploymentRequest],
        properties: &DeploymentProperties,
    ) -> Result<Package> {
        let name = properties.package_name().unwrap_or(definition.name()).to_string();
        let version = properties.package_version().unwrap_or(&self.default_version);
        let version = validate_version(definition.name(), version)?;
        let repository = properties.repository().unwrap_or(&self.default_repository).to_string();

        let dependencies = requests
            .iter()
            .map(|request| stage_package(request, &version, &repository))
            .collect::<Result<Vec<_>>>()?;

        Ok(Package {
            metadata: PackageMetadata {
                name,
                version,
                repository,
                kind: PackageKind::Stream,
                description: definition.dsl_text().to_string(),
                app_name: None,
                role: None,
            },
            config: None,
            dependencies,
        })
    }
}

/// Checks that `version` is semver and returns it normalised.
///
/// # Errors
///
/// Returns `InvalidDefinition` naming `pipeline`.
pub fn validate_version(pipeline: &str, version: &str) -> Result<String> {
    Version::parse(version.trim())
        .map(|v| v.to_string())
        .map_err(|e| InvalidDefinitionError::new(pipeline, format!("invalid package version '{version}': {e}")).into())
}

/// Returns `version` with its patch component incremented.
///
/// # Errors
///
/// Returns `InvalidDefinition` naming `pipeline` for a non-semver input.
pub fn next_patch(pipeline: &str, version: &str) -> Result<String> {
    let mut parsed = Version::parse(version.trim())
        .map_err(|e| InvalidDefinitionError::new(pipeline, format!("invalid package version '{version}': {e}")))?;
    parsed.patch += 1;
    parsed.pre = semver::Prerelease::EMPTY;
    parsed.build = semver::BuildMetadata::EMPTY;
    Ok(parsed.to_string())
}

fn stage_package(request: &DeploymentRequest, version: &str, repository: &str) -> Result<Package> {
    let config = StageConfig {
        spec: StageSpec {
            resource: request.coordinate.locator.clone(),
            version: request.coordinate.version.clone(),
            version_override: request.version_override.clone(),
            application_properties: request.effective_app_properties(),
            deployment_properties: request.deployer_properties.clone(),
        },
    };

    Ok(Package {
        metadata: PackageMetadata {
            name: request.label().to_string(),
            version: version.to_string(),
            repository: repository.to_string(),
            kind: PackageKind::App,
            description: String::new(),
            app_name: Some(request.stage.app_name.clone()),
            role: Some(request.role),
        },
        config: Some(config.to_yaml()?),
        dependencies: Vec::new(),
    })
}
