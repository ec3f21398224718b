mod callbacks;
mod socket;

use async_trait::async_trait;
use overuse_core::{ResourceOveruseAction, ResourceOveruseConfiguration};
use thiserror::Error;

pub use callbacks::{ServiceRequest, ServiceResponse, handle_service_request, serve_callbacks};
pub use socket::{DaemonRequest, DaemonResponse, UnixSocketDaemonClient};

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("daemon is not connected")]
    Disconnected,
    #[error("daemon io: {0}")]
    Io(#[from] std::io::Error),
    #[error("daemon protocol: {0}")]
    Protocol(#[from] serde_json::Error),
    #[error("daemon rejected request: {0}")]
    Rejected(String),
    #[error("daemon did not answer in time")]
    Timeout,
}

/// Outbound calls into the I/O measurement daemon.
#[async_trait]
pub trait DaemonClient: Send + Sync {
    async fn update_resource_overuse_configurations(
        &self,
        configs: Vec<ResourceOveruseConfiguration>,
    ) -> Result<(), DaemonError>;

    async fn get_resource_overuse_configurations(
        &self,
    ) -> Result<Vec<ResourceOveruseConfiguration>, DaemonError>;

    async fn action_taken_on_resource_overuse(
        &self,
        actions: Vec<ResourceOveruseAction>,
    ) -> Result<(), DaemonError>;

    async fn reset_resource_overuse_stats(
        &self,
        package_names: Vec<String>,
    ) -> Result<(), DaemonError>;
}
