//! zedshm: stereo camera frames published into shared memory

use clap::Parser;
use color_eyre::Result;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use zedshm::cli::Cli;
use zedshm::pipeline::{self, ShutdownToken};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "zedshm=debug" } else { "zedshm=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .with_writer(std::io::stderr)
        .init();

    // Profile and names are validated here, before any segment exists
    let config = cli.resolve()?;
    info!(
        "zedshm launching: {} {:?} view, base name '{}'",
        config.capture.profile, config.capture.view, config.publish.name
    );

    let shutdown = ShutdownToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    let stats = tokio::task::spawn_blocking(move || pipeline::launch(config, shutdown)).await??;

    info!("zedshm shutting down after publishing {} frames", stats.published);
    Ok(())
}

/// Cancels `shutdown` on SIGINT or SIGTERM. A second signal exits at once,
/// for when the camera never returns a frame.
async fn watch_signals(shutdown: ShutdownToken) {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => Some(s),
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            None
        }
    };

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminated(&mut terminate) => {}
        }
        if shutdown.cancel() {
            info!("Shutdown signal received, finishing current frame");
        } else {
            warn!("Second shutdown signal, exiting without cleanup");
            std::process::exit(1);
        }
    }
}

async fn terminated(terminate: &mut Option<Signal>) {
    match terminate {
        Some(s) => {
            s.recv().await;
        }
        None => std::future::pending().await,
    }
}
