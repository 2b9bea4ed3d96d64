//! Canned pipelines, registries and requests.

use std::collections::BTreeMap;

use crate::core::{DeploymentRequest, PipelineDefinition, ResourceCoordinate, Stage, StageRole};
use crate::registry::InMemoryAppRegistry;

/// Maven coordinate for a sample app at `version`.
#[must_use]
pub fn coordinate(app_name: &str, version: &str) -> ResourceCoordinate {
    ResourceCoordinate::new(
        app_name,
        "maven",
        version,
        format!("maven://apps:{app_name}:{version}"),
    )
}

/// The `time | log` pipeline named `ticktock`.
#[must_use]
pub fn ticktock() -> PipelineDefinition {
    named_ticktock("ticktock")
}

/// A `time | log` pipeline under another name.
///
/// # Panics
///
/// Panics if `name` is not a valid pipeline name.
#[must_use]
pub fn named_ticktock(name: &str) -> PipelineDefinition {
    PipelineDefinition::builder(name, "time | log")
        .app("time")
        .app("log")
        .build()
        .unwrap_or_else(|e| panic!("fixture pipeline '{name}' is invalid: {e}"))
}

/// The `http | transform | log` pipeline named `httpflow`.
///
/// # Panics
///
/// Never in practice; the fixture is static.
#[must_use]
pub fn three_stage() -> PipelineDefinition {
    PipelineDefinition::builder("httpflow", "http | transform | log")
        .app("http")
        .app("transform")
        .app("log")
        .build()
        .unwrap_or_else(|e| panic!("fixture pipeline is invalid: {e}"))
}

/// A registry knowing the sample apps at version `1.0.0`.
#[must_use]
pub fn sample_registry() -> InMemoryAppRegistry {
    InMemoryAppRegistry::new()
        .with_app("time", StageRole::Source, coordinate("time", "1.0.0"))
        .with_app("http", StageRole::Source, coordinate("http", "1.0.0"))
        .with_app("transform", StageRole::Processor, coordinate("transform", "1.0.0"))
        .with_app("log", StageRole::Sink, coordinate("log", "1.0.0"))
}

/// Ready-made requests for [`ticktock`], without partitioning.
#[must_use]
pub fn ticktock_requests() -> Vec<DeploymentRequest> {
    vec![
        request(Stage::new("time").with_output("ticktock.time"), StageRole::Source),
        request(Stage::new("log").with_input("ticktock.time"), StageRole::Sink),
    ]
}

fn request(stage: Stage, role: StageRole) -> DeploymentRequest {
    DeploymentRequest {
        coordinate: coordinate(&stage.app_name, "1.0.0"),
        stage,
        role,
        app_properties: BTreeMap::new(),
        deployer_properties: BTreeMap::new(),
        version_override: None,
    }
}
