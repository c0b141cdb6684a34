use anyhow::Result;
use clap::{Arg, Command};
use std::sync::Arc;
use tracing::{info, warn};

use video_insight::api::ApiServer;
use video_insight::config::Config;
use video_insight::fetch::MediaFetcher;
use video_insight::pipeline::PipelineOrchestrator;
use video_insight::store::JsonFileStore;
use video_insight::tracker::TaskTracker;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("Video Insight")
        .version("0.1.0")
        .about("Asynchronous video analysis service")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Path to a TOML configuration file"),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .help("Override the configured listen port"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let default_filter = if matches.get_flag("verbose") {
        "video_insight=debug,info"
    } else {
        "video_insight=info,warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    let mut config = match matches.get_one::<String>("config") {
        Some(path) => Config::from_file(path)?,
        None => Config::load().unwrap_or_else(|e| {
            warn!("Failed to load config, using defaults: {}", e);
            Config::default()
        }),
    };
    if let Some(port) = matches.get_one::<String>("port") {
        config.server.port = port.parse()?;
    }
    config.validate()?;

    if let Some(parent) = config.store.data_file.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let store = Arc::new(JsonFileStore::new(config.store.data_file.clone()));
    let tracker = Arc::new(TaskTracker::new(store, config.store.durability));
    let restored = tracker.restore().await?;
    info!("Task tracker ready ({} tasks restored)", restored);

    let orchestrator = Arc::new(PipelineOrchestrator::from_config(&config, tracker)?);
    let fetcher = Arc::new(MediaFetcher::new(&config.fetch));

    let server = ApiServer::new(
        orchestrator,
        fetcher,
        config.server.host.clone(),
        config.server.port,
    );
    server.start().await
}
