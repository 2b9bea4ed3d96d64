//! Lifecycle state and stage role enums.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The role a stage plays within its pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageRole {
    /// Produces data; has no upstream.
    Source,
    /// Consumes and produces data.
    Processor,
    /// Consumes data; has no downstream.
    Sink,
}

impl fmt::Display for StageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Processor => write!(f, "processor"),
            Self::Sink => write!(f, "sink"),
        }
    }
}

/// Lifecycle state of a stage or, when aggregated, of a whole pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// The platform has no information.
    Unknown,
    /// Deployment is in progress.
    Deploying,
    /// Deployed and running.
    Deployed,
    /// Deployment failed.
    Failed,
    /// The platform reported an error.
    Error,
    /// Some but not all stages are deployed.
    Partial,
    /// Not deployed.
    Undeployed,
}

impl Default for LifecycleState {
    fn default() -> Self {
        Self::Unknown
    }
}

impl LifecycleState {
    /// Every state, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::Unknown,
        Self::Deploying,
        Self::Deployed,
        Self::Failed,
        Self::Error,
        Self::Partial,
        Self::Undeployed,
    ];

    /// Returns true if a new deployment may start from this aggregate state.
    #[must_use]
    pub fn allows_deploy(&self) -> bool {
        matches!(self, Self::Undeployed | Self::Unknown)
    }

    /// Returns true if the pipeline has running stages in this state.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Deploying | Self::Deployed | Self::Partial)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Deploying => write!(f, "deploying"),
            Self::Deployed => write!(f, "deployed"),
            Self::Failed => write!(f, "failed"),
            Self::Error => write!(f, "error"),
            Self::Partial => write!(f, "partial"),
            Self::Undeployed => write!(f, "undeployed"),
        }
    }
}

impl FromStr for LifecycleState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.to_string() == s)
            .ok_or_else(|| format!("unknown lifecycle state '{s}'"))
    }
}
