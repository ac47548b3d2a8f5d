use anyhow::{Context, Result};
use clap::Parser;
use dictation_stream::clients::{
    HttpCategorizer, HttpReviewStore, MemoryReviewStore, WhisperTranscriber,
};
use dictation_stream::pipeline::ReviewStore;
use dictation_stream::{create_router, spawn_reaper, AppState, Config, NatsTransport, StreamService};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "dictation-stream", about = "Streaming dictation service")]
struct Args {
    /// Config file path (extension optional)
    #[arg(long, default_value = "config/dictation-stream")]
    config: String,

    /// Override the HTTP bind address
    #[arg(long)]
    bind: Option<String>,

    /// Override the HTTP port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let args = Args::parse();
    let mut cfg = Config::load(&args.config)?;
    if let Some(bind) = args.bind {
        cfg.service.http.bind = bind;
    }
    if let Some(port) = args.port {
        cfg.service.http.port = port;
    }

    info!("Dictation Stream v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);
    info!(
        "Streaming limits: {} sessions, {}ms idle timeout",
        cfg.streaming.max_sessions, cfg.streaming.idle_timeout_ms
    );

    let transcriber = Arc::new(WhisperTranscriber::new(&cfg.transcription)?);
    if let Err(e) = transcriber.health().await {
        warn!("Whisper service not reachable yet: {:#}", e);
    }
    let categorizer = Arc::new(HttpCategorizer::new(&cfg.categorization)?);
    let store: Arc<dyn ReviewStore> = match cfg.review.base_url.as_deref() {
        Some(url) => Arc::new(HttpReviewStore::new(url)),
        None => {
            warn!("No review queue configured; review items are kept in memory");
            Arc::new(MemoryReviewStore::new())
        }
    };

    let service = Arc::new(StreamService::new(&cfg, transcriber, categorizer, store));
    spawn_reaper(Arc::clone(&service), cfg.streaming.reaper_interval());

    if cfg.nats.enabled {
        let transport = NatsTransport::connect(&cfg.nats.url, Arc::clone(&service)).await?;
        tokio::spawn(async move {
            if let Err(e) = transport.run().await {
                error!("NATS transport stopped: {:#}", e);
            }
        });
    }

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, create_router(AppState::new(service)))
        .await
        .context("HTTP server failed")?;

    Ok(())
}
