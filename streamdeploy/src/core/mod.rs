//! Core domain model types.
//!
//! This module contains the fundamental types used throughout the engine:
//! - Stage role and lifecycle state enums
//! - Pipeline definitions and their stages
//! - Deployment properties, resource coordinates and deployment requests

mod definition;
mod properties;
mod request;
mod status;

pub use definition::{binding, PipelineDefinition, PipelineDefinitionBuilder, Stage};
pub use properties::{keys, DeploymentProperties};
pub use request::{DeploymentRequest, PlatformDescriptor, ResourceCoordinate, StageStatus};
pub use status::{LifecycleState, StageRole};
