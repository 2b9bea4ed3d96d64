//! Concurrent status polling across pipelines.
//!
//! Each pipeline costs one backend round-trip. Round-trips run on spawned
//! tasks, at most `pool_size` at a time. A pipeline whose query errors,
//! times out or panics is reported with no data; the others are unaffected.

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::aggregate::aggregate;
use crate::core::{LifecycleState, StageStatus};
use crate::errors::{DeployError, Result};

/// Anything that can report per-stage status for a pipeline.
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Per-stage status of the running pipeline `name`.
    ///
    /// `ReleaseNotFound` means the pipeline is not deployed.
    async fn stage_statuses(&self, name: &str) -> Result<Vec<StageStatus>>;
}

/// Polled status of one pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStatus {
    /// Aggregated state.
    pub state: LifecycleState,
    /// Per-stage status, empty when nothing is deployed or on failure.
    pub stages: Vec<StageStatus>,
    /// Why no data could be obtained, if so.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PipelineStatus {
    /// Status derived from reported stages.
    ///
    /// A backend reporting no stages has nothing running, so an empty list
    /// reads as `undeployed` rather than the aggregator's `error`.
    #[must_use]
    pub fn from_stages(stages: Vec<StageStatus>) -> Self {
        let states: Vec<LifecycleState> = stages.iter().map(|s| s.state).collect();
        let state = if states.is_empty() {
            LifecycleState::Undeployed
        } else {
            aggregate(&states)
        };
        Self {
            state,
            stages,
            error: None,
        }
    }

    /// Status of a pipeline with no release.
    #[must_use]
    pub fn undeployed() -> Self {
        Self {
            state: LifecycleState::Undeployed,
            stages: Vec::new(),
            error: None,
        }
    }

    /// Status of a pipeline whose query failed.
    #[must_use]
    pub fn no_data(error: impl Into<String>) -> Self {
        Self {
            state: aggregate(&[LifecycleState::Unknown]),
            stages: Vec::new(),
            error: Some(error.into()),
        }
    }

    /// Maps a status query result to a pipeline status.
    #[must_use]
    pub fn from_result(result: Result<Vec<StageStatus>>) -> Self {
        match result {
            Ok(stages) => Self::from_stages(stages),
            Err(DeployError::ReleaseNotFound { .. }) => Self::undeployed(),
            Err(err) => Self::no_data(err.to_string()),
        }
    }
}

/// Returns the machine's available parallelism, or 4 if unknown.
#[must_use]
pub fn default_pool_size() -> usize {
    std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get)
}

/// Bounded concurrent poller.
#[derive(Debug, Clone)]
pub struct StatusPoller {
    pool_size: usize,
    timeout: Duration,
}

impl Default for StatusPoller {
    fn default() -> Self {
        Self::new(default_pool_size(), Duration::from_secs(10))
    }
}

impl StatusPoller {
    /// Creates a poller running at most `pool_size` queries at once.
    #[must_use]
    pub fn new(pool_size: usize, timeout: Duration) -> Self {
        Self {
            pool_size: pool_size.max(1),
            timeout,
        }
    }

    /// Returns the concurrency bound.
    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Polls every pipeline in `names` and aggregates its state.
    ///
    /// Always returns one entry per distinct name.
    pub async fn poll<S>(&self, names: &[String], source: Arc<S>) -> BTreeMap<String, PipelineStatus>
    where
        S: StatusSource + ?Sized + 'static,
    {
        let distinct: BTreeSet<String> = names.iter().cloned().collect();
        let semaphore = Arc::new(Semaphore::new(self.pool_size));
        let timeout = self.timeout;

        let mut tasks = FuturesUnordered::new();
        for name in distinct {
            let source = Arc::clone(&source);
            let semaphore = Arc::clone(&semaphore);
            let query_name = name.clone();

            let handle = tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return PipelineStatus::no_data("poller shut down");
                };
                match tokio::time::timeout(timeout, source.stage_statuses(&query_name)).await {
                    Ok(result) => PipelineStatus::from_result(result),
                    Err(_) => PipelineStatus::no_data(format!("status query timed out after {timeout:?}")),
                }
            });
            tasks.push(async move { (name, handle.await) });
        }

        let mut results = BTreeMap::new();
        while let Some((name, joined)) = tasks.next().await {
            let status = match joined {
                Ok(status) => status,
                Err(err) => PipelineStatus::no_data(format!("status query aborted: {err}")),
            };
            if let Some(error) = &status.error {
                warn!(pipeline = %name, error = %error, "No status data for pipeline");
            }
            results.insert(name, status);
        }

        debug!(pipelines = results.len(), "Polled pipeline status");
        results
    }
}
