//! Deploy-time property bag.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Namespaces and reserved keys of [`DeploymentProperties`].
pub mod keys {
    /// Prefix of app-level properties (`app.<label>.<key>`).
    pub const APP_PREFIX: &str = "app.";
    /// Prefix of platform-level properties (`deployer.<label>.<key>`).
    pub const DEPLOYER_PREFIX: &str = "deployer.";
    /// Prefix of artifact version pins (`version.<label>`).
    pub const VERSION_PREFIX: &str = "version.";
    /// Label segment that applies to every stage.
    pub const WILDCARD: &str = "*";

    /// Overrides the release package name.
    pub const PACKAGE_NAME: &str = "release.package.name";
    /// Overrides the release package version.
    pub const PACKAGE_VERSION: &str = "release.package.version";
    /// Selects the package repository.
    pub const REPOSITORY: &str = "release.repository";
    /// Selects the target platform.
    pub const PLATFORM: &str = "release.platform";

    /// Stage-local instance count.
    pub const COUNT: &str = "count";
}

/// Flat, namespaced property map supplied at deploy or update time.
///
/// Consumed once per call; only the resulting manifest is persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeploymentProperties {
    entries: BTreeMap<String, String>,
}

impl DeploymentProperties {
    /// Creates an empty property bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a property.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Inserts a property, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Gets a property.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Iterates over all properties in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the number of properties.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no properties.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Target platform requested by the caller.
    #[must_use]
    pub fn platform(&self) -> Option<&str> {
        self.get(keys::PLATFORM)
    }

    /// Package name override.
    #[must_use]
    pub fn package_name(&self) -> Option<&str> {
        self.get(keys::PACKAGE_NAME)
    }

    /// Package version override.
    #[must_use]
    pub fn package_version(&self) -> Option<&str> {
        self.get(keys::PACKAGE_VERSION)
    }

    /// Repository override.
    #[must_use]
    pub fn repository(&self) -> Option<&str> {
        self.get(keys::REPOSITORY)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for DeploymentProperties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

impl From<BTreeMap<String, String>> for DeploymentProperties {
    fn from(entries: BTreeMap<String, String>) -> Self {
        Self { entries }
    }
}
