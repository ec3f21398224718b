use overuse_core::{PackageIoOveruseStats, UserPackageIoUsageStats};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, warn};

use super::DaemonError;
use crate::app::OveruseService;

/// Calls the daemon makes into the handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServiceRequest {
    LatestIoOveruseStats { samples: Vec<PackageIoOveruseStats> },
    TodayIoUsageStats,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceResponse {
    pub ok: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub today_io_usage_stats: Vec<UserPackageIoUsageStats>,
}

impl ServiceResponse {
    fn error(message: String) -> Self {
        Self {
            ok: false,
            message,
            ..Self::default()
        }
    }
}

pub async fn handle_service_request(
    service: &OveruseService,
    request: ServiceRequest,
) -> ServiceResponse {
    match request {
        ServiceRequest::LatestIoOveruseStats { samples } => {
            debug!(count = samples.len(), "received io overuse stats");
            service.latest_io_overuse_stats(samples);
            ServiceResponse {
                ok: true,
                ..ServiceResponse::default()
            }
        }
        ServiceRequest::TodayIoUsageStats => ServiceResponse {
            ok: true,
            today_io_usage_stats: service.today_io_usage_stats().await,
            ..ServiceResponse::default()
        },
    }
}

/// Serves newline-delimited JSON requests until accepting fails.
pub async fn serve_callbacks(listener: UnixListener, service: OveruseService) -> std::io::Result<()> {
    loop {
        let (stream, _) = listener.accept().await?;
        let service = service.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, &service).await {
                warn!(error = %err, "daemon callback connection failed");
            }
        });
    }
}

async fn handle_connection(stream: UnixStream, service: &OveruseService) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<ServiceRequest>(&line) {
            Ok(request) => handle_service_request(service, request).await,
            Err(err) => ServiceResponse::error(format!("invalid request: {}", err)),
        };
        let mut reply = serde_json::to_string(&response)?;
        reply.push('\n');
        writer.write_all(reply.as_bytes()).await?;
    }
    Ok(())
}
