//! # Streamdeploy
//!
//! A deployment orchestration engine for multi-stage streaming pipelines.
//!
//! Given a parsed pipeline definition and a flat bag of deployment
//! properties, the engine:
//!
//! - **Types stages**: derives each stage's source/processor/sink role
//! - **Resolves properties**: merges wildcard and per-stage overrides
//! - **Propagates partitioning**: wires partition keys between neighbours
//! - **Manages releases**: packages the pipeline and installs, upgrades or
//!   rolls it back through a release backend
//! - **Aggregates state**: reduces per-stage states to a pipeline state,
//!   polling many pipelines concurrently
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use streamdeploy::prelude::*;
//!
//! let service = StreamService::release_backed(
//!     &EngineConfig::default(),
//!     Arc::new(InMemoryDefinitionStore::new()),
//!     Arc::new(registry),
//!     Arc::new(InMemoryReleaseBackend::new()),
//! )?;
//!
//! let ticktock = PipelineDefinition::builder("ticktock", "time | log")
//!     .app("time")
//!     .app("log")
//!     .build()?;
//! service.create(ticktock).await?;
//! service.deploy("ticktock", &DeploymentProperties::new().with("app.log.level", "DEBUG")).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod core;
pub mod deployer;
pub mod errors;
pub mod events;
pub mod observability;
pub mod registry;
pub mod release;
pub mod service;
pub mod state;
pub mod store;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{EngineConfig, LoggingConfig};
    pub use crate::core::{
        keys, DeploymentProperties, DeploymentRequest, LifecycleState, PipelineDefinition, PlatformDescriptor,
        ResourceCoordinate, Stage, StageRole, StageStatus,
    };
    pub use crate::deployer::{
        DeployOutcome, DeploymentRequestBuilder, DirectStreamDeployer, PlatformLauncher, ReleaseStreamDeployer,
        StreamDeployer,
    };
    pub use crate::errors::{DeployError, ErrorKind, Result};
    pub use crate::events::{CollectingEventSink, EventSink, LifecycleEvent, LoggingEventSink, NoOpEventSink};
    pub use crate::registry::{AppRegistry, InMemoryAppRegistry};
    pub use crate::release::{
        InMemoryReleaseBackend, Manifest, Release, ReleaseBackend, ReleaseLifecycleClient, UpgradeOptions,
    };
    pub use crate::service::StreamService;
    pub use crate::state::{aggregate, PipelineStatus, StatusPoller};
    pub use crate::store::{DefinitionStore, InMemoryDefinitionStore};
}
