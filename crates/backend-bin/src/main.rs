// ============================
// crates/backend-bin/src/main.rs
// ============================
use anyhow::Context;
use clap::Parser;
use eventroom_backend::{
    config::{LogFormat, Settings},
    ws_router, AppState,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Event room server: RSVPs, waitlists and live event rooms
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Config file; defaults to ./eventroom.toml when present
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the bind address from the config
    #[arg(short, long)]
    bind: Option<SocketAddr>,
}

fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match settings.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings = Settings::load_from(args.config.as_deref())
        .context("failed to load configuration")?;
    if let Some(bind) = args.bind {
        settings.bind_addr = bind;
    }
    init_tracing(&settings);

    let addr = settings.bind_addr;
    let state = Arc::new(AppState::from_settings(settings)?);
    let app = ws_router::create_router(state);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app).await?;
    Ok(())
}
