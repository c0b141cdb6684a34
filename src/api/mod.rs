//! REST API for video analysis submission and polling.

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use crate::fetch::MediaFetcher;
use crate::pipeline::PipelineOrchestrator;

pub mod handlers;
pub mod models;
pub mod server;

/// API server owning the orchestrator and the media fetcher
pub struct ApiServer {
    orchestrator: Arc<PipelineOrchestrator>,
    fetcher: Arc<MediaFetcher>,
    host: String,
    port: u16,
}

impl ApiServer {
    pub fn new(
        orchestrator: Arc<PipelineOrchestrator>,
        fetcher: Arc<MediaFetcher>,
        host: String,
        port: u16,
    ) -> Self {
        Self {
            orchestrator,
            fetcher,
            host,
            port,
        }
    }

    /// Start the API server and block until it exits
    pub async fn start(self) -> Result<()> {
        info!("Starting API server on {}:{}", self.host, self.port);
        server::start_http_server(self.orchestrator, self.fetcher, &self.host, self.port).await
    }
}
