//! Streams the three CSV files in the fixed order, batching lines and
//! terminating each file with the literal EOF frame.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use reelgrid_config::ClientSettings;
use reelgrid_core::comm;
use reelgrid_model::lines;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const ATTEMPTS_TO_CONNECT: u32 = 5;

pub(crate) async fn connect_with_retry(
    host: &str,
    port: u16,
    socket_name: &str,
) -> anyhow::Result<TcpStream> {
    let mut attempts = 0;
    loop {
        info!(host, port, attempt = attempts + 1, "connecting to {socket_name}");
        match TcpStream::connect((host, port)).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                attempts += 1;
                if attempts == ATTEMPTS_TO_CONNECT {
                    bail!("cannot connect to {socket_name} after {attempts} attempts: {e}");
                }
                let backoff = Duration::from_secs(1 << attempts);
                warn!(error = %e, retry_in_seconds = backoff.as_secs(), "connect failed");
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

pub(crate) struct DataSender<'a> {
    settings: &'a ClientSettings,
    socket: TcpStream,
}

impl<'a> DataSender<'a> {
    pub(crate) fn new(settings: &'a ClientSettings, socket: TcpStream) -> Self {
        Self { settings, socket }
    }

    /// Send movies, ratings and credits; abort if the results receiver
    /// dies while the upload is still running.
    pub(crate) async fn send_all(
        mut self,
        receiver_task: &JoinHandle<anyhow::Result<()>>,
    ) -> anyhow::Result<()> {
        let files = [
            self.settings.movies_path.clone(),
            self.settings.ratings_path.clone(),
            self.settings.credits_path.clone(),
        ];
        for path in files {
            self.send_file(&path, receiver_task)
                .await
                .with_context(|| format!("sending {}", path.display()))?;
        }
        info!("all files sent");
        Ok(())
    }

    async fn send_file(
        &mut self,
        path: &Path,
        receiver_task: &JoinHandle<anyhow::Result<()>>,
    ) -> anyhow::Result<()> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file).lines();
        // The first line is the CSV header; the pipeline never sees it.
        let _ = reader.next().transpose()?;

        let mut batch: Vec<String> = Vec::with_capacity(self.settings.batch_max_lines);
        for line in reader {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            batch.push(line);
            if batch.len() >= self.settings.batch_max_lines {
                self.send_batch(&batch, receiver_task).await?;
                batch.clear();
            }
        }
        if !batch.is_empty() {
            self.send_batch(&batch, receiver_task).await?;
        }
        comm::write_frame(&mut self.socket, comm::EOF_MESSAGE).await?;
        info!(path = %path.display(), "file sent");
        Ok(())
    }

    async fn send_batch(
        &mut self,
        batch: &[String],
        receiver_task: &JoinHandle<anyhow::Result<()>>,
    ) -> anyhow::Result<()> {
        if receiver_task.is_finished() {
            bail!("results receiver ended mid-upload");
        }
        let message = lines::join_lines(batch)?;
        comm::write_frame(&mut self.socket, &message).await?;
        Ok(())
    }
}
