//! Liveness listener: every long-running worker accepts TCP
//! connections on the health port; a successful accept is the whole
//! protocol.

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Result;

pub async fn run_health_listener(port: u16, shutdown: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    debug!(port, "health listener started");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "health check received");
                    drop(stream);
                }
                Err(e) => {
                    warn!(error = %e, "health listener accept failed");
                }
            },
        }
    }
    Ok(())
}
