//! Translation of pipeline definitions into deployments.
//!
//! Request building is a pure pipeline over the definition:
//! 1. [`StageTyper`] derives each stage's role
//! 2. [`PropertyResolver`] resolves per-stage properties
//! 3. [`PartitionPropagator`] injects partitioning between neighbours
//! 4. [`DeploymentRequestBuilder`] resolves artifacts and assembles requests
//!
//! The requests are then handed to a [`StreamDeployer`].

mod backend;
mod partition;
mod properties;
mod request;
mod typing;

pub use backend::{DeployOutcome, DirectStreamDeployer, PlatformLauncher, ReleaseStreamDeployer, StreamDeployer};
pub use partition::{partition_keys, PartitionPropagator, ResolvedStage};
pub use properties::PropertyResolver;
pub use request::DeploymentRequestBuilder;
pub use typing::StageTyper;
