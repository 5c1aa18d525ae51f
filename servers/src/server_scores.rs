use std::sync::Arc;

use anyhow::Result;
use lib_scores::MockScoresProvider;
use tokio::signal;

mod scores_logic;
use scores_logic::{broadcast, config, downstream, logger, state};

#[tokio::main]
async fn main() -> Result<()> {
    // Explicitly install the default crypto provider for rustls
    let _ = rustls::crypto::ring::default_provider().install_default();

    let settings = config::load_settings();
    logger::setup_logging(&settings.log_dir, &settings.log_level)?;
    log::info!("Starting with {:?}", settings);

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

    // Until a real upstream is wired in, the provider is the mock external
    // API with simulated latency.
    let provider = Arc::new(MockScoresProvider::new(settings.mock_latency));
    let app_state = state::AppState::new(&settings, provider);

    let driver_handle = tokio::spawn(broadcast::run(
        settings.clone(),
        app_state.clone(),
        shutdown_tx.subscribe(),
    ));

    let downstream_handle = tokio::spawn(downstream::run(
        settings.clone(),
        app_state.clone(),
        shutdown_tx.subscribe(),
    ));

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = terminate_signal() => {
            log::info!("SIGTERM received, initiating shutdown.");
        }
    }

    // Send shutdown signal to all components
    let _ = shutdown_tx.send(());

    // Wait for components to shut down
    let (_, downstream_result) = tokio::try_join!(driver_handle, downstream_handle)?;
    if let Err(e) = downstream_result {
        log::error!("Downstream server exited with error: {}", e);
    }

    log::info!("Shutdown complete.");
    Ok(())
}

async fn terminate_signal() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term_signal) => {
                term_signal.recv().await;
            }
            Err(e) => {
                log::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        // On non-unix platforms, just wait forever.
        std::future::pending::<()>().await;
    }
}
