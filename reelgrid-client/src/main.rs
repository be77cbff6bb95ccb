//! Upload client: one task streams the three CSV files to the data
//! cleaner, another collects the five result streams into per-query
//! CSV files. If the results side dies mid-session the whole session
//! restarts after a pause.

mod receiver;
mod sender;

use std::time::{Duration, Instant};

use anyhow::Context;
use reelgrid_config::{ClientSettings, Settings};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use receiver::ResultsReceiver;
use sender::DataSender;

const RESTART_DELAY: Duration = Duration::from_secs(5);

async fn run_session(
    settings: &ClientSettings,
    shutdown: &CancellationToken,
) -> anyhow::Result<()> {
    let mut data_socket = sender::connect_with_retry(
        &settings.server_ip_data,
        settings.server_port_data,
        "data socket",
    )
    .await?;
    let client_id = reelgrid_core::comm::read_frame(&mut data_socket)
        .await
        .context("receiving the issued client id")?;
    info!(client_id = %client_id, "session started");

    let receiver = ResultsReceiver::new(
        client_id.clone(),
        settings.server_ip_results.clone(),
        settings.server_port_results,
        settings.results_dir.clone(),
        shutdown.clone(),
    );
    let receiver_task = tokio::spawn(receiver.run());

    let sender = DataSender::new(settings, data_socket);
    let send_result = sender.send_all(&receiver_task).await;

    let receive_result = receiver_task
        .await
        .context("results receiver task panicked")?;
    send_result?;
    receive_result?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("loading configuration")?;
    let client_settings =
        ClientSettings::from_settings(&settings).context("loading client settings")?;
    let filter = EnvFilter::try_new(settings.get_or("LOGGING_LEVEL", "info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let shutdown = CancellationToken::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    error!(error = %e, "cannot install SIGTERM handler");
                    return;
                }
            };
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = tokio::signal::ctrl_c() => {}
        }
        info!("shutdown requested");
        signal_shutdown.cancel();
    });

    let started = Instant::now();
    loop {
        match run_session(&client_settings, &shutdown).await {
            Ok(()) => break,
            Err(e) => {
                if shutdown.is_cancelled() {
                    info!("stopped before completion");
                    return Ok(());
                }
                warn!(error = %e, "session failed; restarting");
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("stopped before completion");
                        return Ok(());
                    }
                    _ = tokio::time::sleep(RESTART_DELAY) => {}
                }
            }
        }
    }
    info!(
        elapsed_seconds = started.elapsed().as_secs_f64(),
        "all queries resolved"
    );
    Ok(())
}
