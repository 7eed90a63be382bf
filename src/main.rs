use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use digit_corpus::{
    create_router, AppState, CaptureConfig, Config, DeviceSource, MicCapture, RestStore,
    SessionController,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "digit-corpus",
    about = "Spoken digit corpus collection agent",
    version
)]
struct Args {
    /// Configuration file (without extension)
    #[arg(short, long, default_value = "config/digit-corpus")]
    config: String,

    /// List input devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Capture a generated tone instead of the microphone
    #[arg(long)]
    synthetic: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    if args.list_devices {
        for name in MicCapture::list_devices().context("Failed to enumerate input devices")? {
            println!("{name}");
        }
        return Ok(());
    }

    let cfg = Config::load(&args.config)?;
    info!("{} starting", cfg.service.name);

    let store = Arc::new(RestStore::new(&cfg.store).context("Failed to build store client")?);

    let source = if args.synthetic {
        DeviceSource::Synthetic { tone_hz: 440.0 }
    } else {
        DeviceSource::Microphone {
            preferred: cfg.capture.input_device.clone(),
        }
    };
    let capture_config = CaptureConfig {
        sample_rate: cfg.capture.sample_rate,
        channels: cfg.capture.channels,
    };
    // An empty preview_dir disables local preview copies.
    let preview_dir = (!cfg.capture.preview_dir.is_empty())
        .then(|| PathBuf::from(&cfg.capture.preview_dir));

    let controller = Arc::new(SessionController::new(
        store,
        source,
        capture_config,
        preview_dir,
    ));
    let app = create_router(AppState::new(controller));

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .await
        .context("HTTP server failed")?;

    Ok(())
}
