//! Lifecycle events.
//!
//! The service reports what happened to each pipeline through an injected
//! [`EventSink`]. Events carry a dotted type from [`event_types`], the
//! pipeline name and a JSON payload.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event type names.
pub mod event_types {
    /// A deploy was accepted and requests are being built.
    pub const DEPLOY_REQUESTED: &str = "stream.deploy.requested";
    /// All stages were handed to the platform.
    pub const DEPLOYED: &str = "stream.deployed";
    /// The deploy was rejected or failed.
    pub const DEPLOY_FAILED: &str = "stream.deploy.failed";
    /// The pipeline was undeployed.
    pub const UNDEPLOYED: &str = "stream.undeployed";
    /// A new release version was applied by an update.
    pub const UPGRADED: &str = "stream.upgraded";
    /// A previous release version was re-applied.
    pub const ROLLED_BACK: &str = "stream.rolled_back";
}

/// One lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// Dotted event type.
    pub event_type: String,
    /// The pipeline concerned.
    pub pipeline: String,
    /// When the event was raised.
    pub timestamp: DateTime<Utc>,
    /// Event payload, always a JSON object.
    pub data: serde_json::Value,
}

impl LifecycleEvent {
    /// Creates an event with an empty payload.
    #[must_use]
    pub fn new(event_type: impl Into<String>, pipeline: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            pipeline: pipeline.into(),
            timestamp: Utc::now(),
            data: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    /// Adds a payload field.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        if let serde_json::Value::Object(map) = &mut self.data {
            map.insert(key.into(), value.into());
        }
        self
    }

    /// Returns a payload field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_payload() {
        let event = LifecycleEvent::new(event_types::UPGRADED, "ticktock")
            .with("release_version", 2)
            .with("package_version", "1.0.1");

        assert_eq!(event.get("release_version"), Some(&serde_json::json!(2)));
        assert_eq!(event.get("package_version"), Some(&serde_json::json!("1.0.1")));
        assert!(event.get("missing").is_none());

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "stream.upgraded");
        assert_eq!(json["pipeline"], "ticktock");
    }
}
