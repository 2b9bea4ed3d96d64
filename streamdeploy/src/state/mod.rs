//! Pipeline lifecycle state.
//!
//! - [`aggregate`] reduces stage states to one pipeline state
//! - [`StatusPoller`] queries many pipelines concurrently

mod aggregate;
mod poller;

pub use aggregate::{aggregate, ensure_deployable};
pub use poller::{default_pool_size, PipelineStatus, StatusPoller, StatusSource};
