//! rprtd - parallel-run coordinator.
//!
//! Merges the runner events of several worker processes into one launch and
//! serves the local relay workers use to attach logs by name.

pub mod agent;
pub mod errors;
pub mod launch;
pub mod relay;
pub mod relay_client;

pub use agent::{AGENT_NAME, AGENT_VERSION, ParallelAgent};
pub use errors::RelayError;
pub use launch::{InfoKind, LaunchData, SuiteInfo, TestInfo};
pub use relay::{RelayHandle, create_router, start_server};
pub use relay_client::RelayClient;
