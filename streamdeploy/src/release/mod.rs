//! Release packaging and the release lifecycle.
//!
//! A deployed pipeline is a release: a versioned package of per-stage
//! config installed through a [`ReleaseBackend`]. Upgrades and rollbacks
//! append new versions; nothing in a release's history is rewritten.

mod backend;
mod client;
mod manifest;
mod memory;
mod package;

pub use backend::{
    InstallRequest, Release, ReleaseBackend, ReleaseInfo, ReleaseStatusCode, UpgradeRequest, UploadedPackage,
};
#[cfg(test)]
pub use backend::MockReleaseBackend;
pub use client::{ReleaseLifecycleClient, UpgradeOptions};
pub use manifest::{ConfigValues, EntryMetadata, Manifest, ManifestEntry, StageOverrides};
pub use memory::InMemoryReleaseBackend;
pub use package::{
    next_patch, validate_version, Package, PackageKind, PackageMetadata, ReleasePackager, StageConfig, StageSpec,
    DEFAULT_PACKAGE_VERSION, DEFAULT_REPOSITORY,
};
