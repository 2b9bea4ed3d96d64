//! Testing utilities for the deployment engine.
//!
//! This module provides:
//! - Sample pipelines and registries
//! - An in-memory platform launcher and a fault-injecting release backend
//! - Assertions for conflicts and release history

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_conflict, assert_error_kind, assert_versions};
pub use fixtures::{
    coordinate, named_ticktock, sample_registry, three_stage, ticktock, ticktock_requests,
};
pub use mocks::{FlakyReleaseBackend, InMemoryLauncher};
