use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use overuse_core::{ResourceOveruseAction, ResourceOveruseConfiguration};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

use super::{DaemonClient, DaemonError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum DaemonRequest {
    UpdateResourceOveruseConfigurations {
        configs: Vec<ResourceOveruseConfiguration>,
    },
    GetResourceOveruseConfigurations,
    ActionTakenOnResourceOveruse {
        actions: Vec<ResourceOveruseAction>,
    },
    ResetResourceOveruseStats {
        package_names: Vec<String>,
    },
    Ping,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub ok: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub configs: Vec<ResourceOveruseConfiguration>,
}

impl DaemonResponse {
    pub fn ok() -> Self {
        Self {
            ok: true,
            ..Self::default()
        }
    }
}

/// Talks to the daemon with one JSON line per request over a Unix socket.
#[derive(Debug, Clone)]
pub struct UnixSocketDaemonClient {
    path: PathBuf,
    timeout: Duration,
}

impl UnixSocketDaemonClient {
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
        }
    }

    pub async fn ping(&self) -> Result<(), DaemonError> {
        self.call(&DaemonRequest::Ping).await.map(|_| ())
    }

    async fn call(&self, request: &DaemonRequest) -> Result<DaemonResponse, DaemonError> {
        tokio::time::timeout(self.timeout, self.round_trip(request))
            .await
            .map_err(|_| DaemonError::Timeout)?
    }

    async fn round_trip(&self, request: &DaemonRequest) -> Result<DaemonResponse, DaemonError> {
        let stream = UnixStream::connect(&self.path).await.map_err(|err| {
            debug!(path = %self.path.display(), error = %err, "daemon socket unreachable");
            match err.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused => {
                    DaemonError::Disconnected
                }
                _ => DaemonError::Io(err),
            }
        })?;
        let (reader, mut writer) = stream.into_split();
        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;

        let mut reader = BufReader::new(reader);
        let mut reply = String::new();
        if reader.read_line(&mut reply).await? == 0 {
            return Err(DaemonError::Disconnected);
        }
        let response: DaemonResponse = serde_json::from_str(reply.trim_end())?;
        if !response.ok {
            return Err(DaemonError::Rejected(response.message));
        }
        Ok(response)
    }
}

#[async_trait]
impl DaemonClient for UnixSocketDaemonClient {
    async fn update_resource_overuse_configurations(
        &self,
        configs: Vec<ResourceOveruseConfiguration>,
    ) -> Result<(), DaemonError> {
        self.call(&DaemonRequest::UpdateResourceOveruseConfigurations { configs })
            .await
            .map(|_| ())
    }

    async fn get_resource_overuse_configurations(
        &self,
    ) -> Result<Vec<ResourceOveruseConfiguration>, DaemonError> {
        let response = self
            .call(&DaemonRequest::GetResourceOveruseConfigurations)
            .await?;
        Ok(response.configs)
    }

    async fn action_taken_on_resource_overuse(
        &self,
        actions: Vec<ResourceOveruseAction>,
    ) -> Result<(), DaemonError> {
        self.call(&DaemonRequest::ActionTakenOnResourceOveruse { actions })
            .await
            .map(|_| ())
    }

    async fn reset_resource_overuse_stats(
        &self,
        package_names: Vec<String>,
    ) -> Result<(), DaemonError> {
        self.call(&DaemonRequest::ResetResourceOveruseStats { package_names })
            .await
            .map(|_| ())
    }
}
