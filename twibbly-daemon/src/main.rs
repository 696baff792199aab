use anyhow::Context;
use tokio_util::sync::CancellationToken;
use twibbly_daemon::utils::logger::init_logger_with_file;
use twibbly_daemon::{Config, Daemon, LogConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Environment (.env is optional)
    dotenv::dotenv().ok();

    let log = LogConfig::from_env();
    init_logger_with_file(Some(&log.level), log.dir.as_deref());

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Twibbly starting");

    // 2. Configuration
    let config = Config::from_env().context("invalid configuration")?;

    // 3. Shutdown on Ctrl-C
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Interrupt received, shutting down"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for interrupt"),
        }
        signal.cancel();
    });

    // 4. Build and run the pipeline
    let daemon = Daemon::start(config)
        .await
        .context("failed to start print pipeline")?;
    daemon.run(shutdown).await;

    Ok(())
}
