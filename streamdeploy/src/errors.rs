//! Error types for the deployment engine.
//!
//! Every fallible operation returns [`DeployError`]. The variants follow the
//! engine's error taxonomy; [`DeployError::kind`] exposes it as a flat enum so
//! an API layer can map errors to status codes without matching on payloads.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DeployError>;

/// The main error type for deployment operations.
#[derive(Debug, Error)]
pub enum DeployError {
    /// An unknown pipeline, release version, or platform was referenced.
    #[error("{0}")]
    NotFound(#[from] NotFoundError),

    /// The operation conflicts with the current state of the pipeline.
    #[error("{0}")]
    Conflict(#[from] ConflictError),

    /// The pipeline topology or its properties are malformed.
    #[error("{0}")]
    InvalidDefinition(#[from] InvalidDefinitionError),

    /// A stage was classified from a topology that cannot be typed.
    #[error("{0}")]
    Typing(#[from] TypingError),

    /// One or more stages have no resolvable artifact.
    #[error("{0}")]
    AppNotRegistered(#[from] AppNotRegisteredError),

    /// The release backend or platform could not be reached.
    #[error("Release backend unavailable: {0}")]
    UpstreamUnavailable(String),

    /// No release exists under the given name.
    #[error("Release not found: {name}")]
    ReleaseNotFound {
        /// The release name.
        name: String,
    },

    /// The configured deployer does not support the operation.
    #[error("Operation '{operation}' is not supported by the {deployer} deployer")]
    Unsupported {
        /// The deployer kind.
        deployer: String,
        /// The rejected operation.
        operation: String,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Flat classification of [`DeployError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Unknown pipeline/release/version/platform.
    NotFound,
    /// Duplicate name or illegal lifecycle transition.
    Conflict,
    /// Malformed topology or properties.
    InvalidDefinition,
    /// Unresolvable stage artifact.
    AppNotRegistered,
    /// Backend unreachable.
    UpstreamUnavailable,
    /// No release under that name.
    ReleaseNotFound,
    /// Operation not offered by the deployer.
    Unsupported,
    /// Encoding failure.
    Serialization,
    /// Anything else.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::InvalidDefinition => "invalid_definition",
            Self::AppNotRegistered => "app_not_registered",
            Self::UpstreamUnavailable => "upstream_unavailable",
            Self::ReleaseNotFound => "release_not_found",
            Self::Unsupported => "unsupported",
            Self::Serialization => "serialization",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

impl DeployError {
    /// Creates a release-not-found error.
    #[must_use]
    pub fn release_not_found(name: impl Into<String>) -> Self {
        Self::ReleaseNotFound { name: name.into() }
    }

    /// Creates an unsupported-operation error.
    #[must_use]
    pub fn unsupported(deployer: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Unsupported {
            deployer: deployer.into(),
            operation: operation.into(),
        }
    }

    /// Returns the taxonomy bucket of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::InvalidDefinition(_) | Self::Typing(_) => ErrorKind::InvalidDefinition,
            Self::AppNotRegistered(_) => ErrorKind::AppNotRegistered,
            Self::UpstreamUnavailable(_) => ErrorKind::UpstreamUnavailable,
            Self::ReleaseNotFound { .. } => ErrorKind::ReleaseNotFound,
            Self::Unsupported { .. } => ErrorKind::Unsupported,
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns true if the error means "no release exists yet".
    #[must_use]
    pub fn is_release_not_found(&self) -> bool {
        matches!(self, Self::ReleaseNotFound { .. })
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("type".to_string(), serde_json::json!(self.kind().to_string()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));

        match self {
            Self::NotFound(err) => {
                map.insert("resource".to_string(), serde_json::json!(err.resource.to_string()));
                map.insert("name".to_string(), serde_json::json!(err.name));
            }
            Self::Conflict(err) => {
                map.insert("reason".to_string(), serde_json::json!(err.kind.to_string()));
                map.insert("name".to_string(), serde_json::json!(err.name));
            }
            Self::Typing(err) => {
                map.insert("stage".to_string(), serde_json::json!(err.label));
            }
            Self::AppNotRegistered(err) => {
                let stages: Vec<_> = err
                    .unresolved
                    .iter()
                    .map(|u| serde_json::json!({"label": u.label, "app": u.app_name, "role": u.role}))
                    .collect();
                map.insert("unresolved".to_string(), serde_json::Value::Array(stages));
            }
            _ => {}
        }

        map
    }
}

impl From<serde_yaml::Error> for DeployError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for DeployError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// The kind of resource a [`NotFoundError`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    /// A pipeline definition.
    Pipeline,
    /// A specific release version.
    ReleaseVersion,
    /// A deployment platform.
    Platform,
    /// An uploaded package.
    Package,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pipeline => write!(f, "pipeline"),
            Self::ReleaseVersion => write!(f, "release version"),
            Self::Platform => write!(f, "platform"),
            Self::Package => write!(f, "package"),
        }
    }
}

/// Error raised when a referenced resource does not exist.
#[derive(Debug, Clone, Error)]
#[error("No {resource} named '{name}'")]
pub struct NotFoundError {
    /// What was looked up.
    pub resource: Resource,
    /// The name (or name:version) that was looked up.
    pub name: String,
}

impl NotFoundError {
    /// Creates a new not found error.
    #[must_use]
    pub fn new(resource: Resource, name: impl Into<String>) -> Self {
        Self {
            resource,
            name: name.into(),
        }
    }

    /// Shorthand for a missing pipeline definition.
    #[must_use]
    pub fn pipeline(name: impl Into<String>) -> Self {
        Self::new(Resource::Pipeline, name)
    }
}

/// Why a [`ConflictError`] was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// A definition with this name already exists.
    DuplicateName,
    /// The pipeline is already deployed.
    AlreadyDeployed,
    /// The pipeline is being deployed.
    AlreadyDeploying,
    /// The requested upgrade would not change the manifest.
    NothingToUpgrade,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateName => write!(f, "duplicate_name"),
            Self::AlreadyDeployed => write!(f, "already_deployed"),
            Self::AlreadyDeploying => write!(f, "already_deploying"),
            Self::NothingToUpgrade => write!(f, "nothing_to_upgrade"),
        }
    }
}

/// Error raised when an operation conflicts with existing state.
#[derive(Debug, Clone, Error)]
#[error("Conflict on '{name}': {}", describe_conflict(*kind))]
pub struct ConflictError {
    /// The conflict reason.
    pub kind: ConflictKind,
    /// The pipeline name.
    pub name: String,
}

fn describe_conflict(kind: ConflictKind) -> &'static str {
    match kind {
        ConflictKind::DuplicateName => "a pipeline with this name already exists",
        ConflictKind::AlreadyDeployed => "pipeline is already deployed",
        ConflictKind::AlreadyDeploying => "pipeline is currently being deployed",
        ConflictKind::NothingToUpgrade => "upgrade would not change the deployed manifest",
    }
}

impl ConflictError {
    /// Creates a new conflict error.
    #[must_use]
    pub fn new(kind: ConflictKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

/// Error raised when a pipeline definition or its properties are malformed.
#[derive(Debug, Clone, Error)]
#[error("Invalid definition for '{pipeline}': {message}")]
pub struct InvalidDefinitionError {
    /// The pipeline name.
    pub pipeline: String,
    /// What is wrong.
    pub message: String,
}

impl InvalidDefinitionError {
    /// Creates a new invalid definition error.
    #[must_use]
    pub fn new(pipeline: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            pipeline: pipeline.into(),
            message: message.into(),
        }
    }
}

/// Error raised when a stage has neither an input nor an output binding
/// and is not the most downstream stage.
#[derive(Debug, Clone, Error)]
#[error("Stage '{label}' in pipeline '{pipeline}' has neither an input nor an output binding")]
pub struct TypingError {
    /// The pipeline name.
    pub pipeline: String,
    /// The offending stage label.
    pub label: String,
}

impl TypingError {
    /// Creates a new typing error.
    #[must_use]
    pub fn new(pipeline: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            pipeline: pipeline.into(),
            label: label.into(),
        }
    }
}

/// A stage whose `(app, role)` pair could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedStage {
    /// The stage label.
    pub label: String,
    /// The registered app name.
    pub app_name: String,
    /// The role it was looked up under.
    pub role: String,
}

/// Error raised when request building cannot resolve every stage.
#[derive(Debug, Clone, Error)]
#[error(
    "Pipeline '{pipeline}' references unregistered apps: {}",
    unresolved.iter().map(|u| format!("{}:{}", u.role, u.app_name)).collect::<Vec<_>>().join(", ")
)]
pub struct AppNotRegisteredError {
    /// The pipeline name.
    pub pipeline: String,
    /// Every stage that failed resolution.
    pub unresolved: Vec<UnresolvedStage>,
}

impl AppNotRegisteredError {
    /// Creates a new app-not-registered error.
    #[must_use]
    pub fn new(pipeline: impl Into<String>, unresolved: Vec<UnresolvedStage>) -> Self {
        Self {
            pipeline: pipeline.into(),
            unresolved,
        }
    }
}
