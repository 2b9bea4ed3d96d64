//! Per-stage property resolution from wildcard and targeted keys.
//!
//! `app.*.k` applies to every stage; `app.<label>.k` applies to one stage and
//! always wins over the wildcard, regardless of the order keys were supplied
//! in. The `deployer.` family resolves the same way into a separate map.

use crate::core::{keys, DeploymentProperties};
use std::collections::BTreeMap;

/// Resolves stage-scoped views of a [`DeploymentProperties`] bag.
#[derive(Debug, Clone, Copy, Default)]
pub struct PropertyResolver;

impl PropertyResolver {
    /// App-level properties for `label`, prefixes stripped.
    #[must_use]
    pub fn app_properties(props: &DeploymentProperties, label: &str) -> BTreeMap<String, String> {
        Self::scoped(props, keys::APP_PREFIX, label)
    }

    /// Platform-level properties for `label`, prefixes stripped.
    #[must_use]
    pub fn deployer_properties(props: &DeploymentProperties, label: &str) -> BTreeMap<String, String> {
        Self::scoped(props, keys::DEPLOYER_PREFIX, label)
    }

    /// Artifact version pinned for `label` via `version.<label>`.
    #[must_use]
    pub fn version_override(props: &DeploymentProperties, label: &str) -> Option<String> {
        props
            .get(&format!("{}{label}", keys::VERSION_PREFIX))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(ToString::to_string)
    }

    /// Returns true if `props` carries any key targeting `label` directly.
    #[must_use]
    pub fn targets_label(props: &DeploymentProperties, label: &str) -> bool {
        let app = format!("{}{label}.", keys::APP_PREFIX);
        let deployer = format!("{}{label}.", keys::DEPLOYER_PREFIX);
        let version = format!("{}{label}", keys::VERSION_PREFIX);
        props
            .iter()
            .any(|(k, _)| k.starts_with(&app) || k.starts_with(&deployer) || k == version)
    }

    fn scoped(props: &DeploymentProperties, family: &str, label: &str) -> BTreeMap<String, String> {
        let wildcard = format!("{family}{}.", keys::WILDCARD);
        let targeted = format!("{family}{label}.");

        let mut resolved = BTreeMap::new();
        for (key, value) in props.iter() {
            if let Some(suffix) = key.strip_prefix(&wildcard) {
                if !suffix.is_empty() {
                    resolved.insert(suffix.to_string(), value.to_string());
                }
            }
        }
        // Second pass so targeted keys overwrite wildcard ones.
        for (key, value) in props.iter() {
            if let Some(suffix) = key.strip_prefix(&targeted) {
                if !suffix.is_empty() {
                    resolved.insert(suffix.to_string(), value.to_string());
                }
            }
        }
        resolved
    }
}
