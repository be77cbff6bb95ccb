//! Per-client ingress session: issue the id, then parse the three
//! files in order until EOFs or disconnection.

use std::time::Duration;

use reelgrid_model::{
    lines, ClientDisconnected, ClientId, CreditsBatch, Eof, MoviesBatch, Packet, RatingsBatch,
};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ConnectedClients;
use crate::comm;
use crate::error::Result;

/// A client that stays silent longer than this is gone.
const CLIENT_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// The fixed upload order: movies, ratings, credits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Movies,
    Ratings,
    Credits,
    Finished,
}

impl FileKind {
    pub fn next(self) -> Self {
        match self {
            FileKind::Movies => FileKind::Ratings,
            FileKind::Ratings => FileKind::Credits,
            FileKind::Credits | FileKind::Finished => FileKind::Finished,
        }
    }
}

pub struct ClientHandler {
    client_id: ClientId,
    stream: TcpStream,
    queue: mpsc::Sender<Packet>,
    connected: ConnectedClients,
    shutdown: CancellationToken,
    current_file: FileKind,
}

impl ClientHandler {
    pub(crate) fn new(
        client_id: ClientId,
        stream: TcpStream,
        queue: mpsc::Sender<Packet>,
        connected: ConnectedClients,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            client_id,
            stream,
            queue,
            connected,
            shutdown,
            current_file: FileKind::Movies,
        }
    }

    pub async fn run(mut self) {
        if let Err(e) = self.serve().await {
            warn!(client_id = %self.client_id, error = %e, "client session ended with error");
        }
        if let Err(e) = self.connected.remove(&self.client_id) {
            warn!(client_id = %self.client_id, error = %e, "failed to persist client removal");
        }
    }

    async fn serve(&mut self) -> Result<()> {
        comm::write_frame(&mut self.stream, &self.client_id.to_string()).await?;

        loop {
            let message = tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                received = tokio::time::timeout(
                    CLIENT_DISCONNECT_TIMEOUT,
                    comm::read_frame(&mut self.stream),
                ) => received,
            };
            match message {
                Ok(Ok(message)) => self.handle_message(&message).await?,
                Ok(Err(_)) | Err(_) => {
                    // Timeout or broken socket: before FINISHED this is a
                    // mid-upload disconnect the pipeline must clean up.
                    info!(client_id = %self.client_id, "client disconnected");
                    if self.current_file != FileKind::Finished {
                        self.push(ClientDisconnected::new(self.client_id).into())
                            .await;
                    }
                    return Ok(());
                }
            }
        }
    }

    async fn handle_message(&mut self, message: &str) -> Result<()> {
        if message == comm::EOF_MESSAGE {
            self.push(Eof::new(self.client_id).into()).await;
            self.current_file = self.current_file.next();
            debug!(client_id = %self.client_id, next = ?self.current_file, "file finished");
            return Ok(());
        }

        let csv_lines = lines::split_lines(message)?;
        let packet = match self.current_file {
            FileKind::Movies => Some(self.movies_batch(&csv_lines)),
            FileKind::Ratings => Some(self.ratings_batch(&csv_lines)),
            FileKind::Credits => Some(self.credits_batch(&csv_lines)),
            FileKind::Finished => {
                warn!(client_id = %self.client_id, "data received after the last file");
                None
            }
        };
        if let Some(packet) = packet {
            self.push(packet).await;
        }
        Ok(())
    }

    fn movies_batch(&self, csv_lines: &[String]) -> Packet {
        let movies = csv_lines
            .iter()
            .filter_map(|line| match reelgrid_model::Movie::from_csv_line(line) {
                Ok(movie) => Some(movie),
                Err(e) => {
                    debug!(client_id = %self.client_id, error = %e, "dropping invalid movie line");
                    None
                }
            })
            .collect();
        MoviesBatch::new(self.client_id, movies).into()
    }

    fn ratings_batch(&self, csv_lines: &[String]) -> Packet {
        let ratings = csv_lines
            .iter()
            .filter_map(|line| match reelgrid_model::Rating::from_csv_line(line) {
                Ok(rating) => Some(rating),
                Err(e) => {
                    debug!(client_id = %self.client_id, error = %e, "dropping invalid rating line");
                    None
                }
            })
            .collect();
        RatingsBatch::new(self.client_id, ratings).into()
    }

    fn credits_batch(&self, csv_lines: &[String]) -> Packet {
        let credits = csv_lines
            .iter()
            .filter_map(|line| match reelgrid_model::Credit::from_csv_line(line) {
                Ok(credit) => Some(credit),
                Err(e) => {
                    debug!(client_id = %self.client_id, error = %e, "dropping invalid credit line");
                    None
                }
            })
            .collect();
        CreditsBatch::new(self.client_id, credits).into()
    }

    async fn push(&self, packet: Packet) {
        if self.queue.send(packet).await.is_err() {
            warn!(client_id = %self.client_id, "outbound queue closed");
        }
    }
}
