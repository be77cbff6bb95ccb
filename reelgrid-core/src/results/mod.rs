//! Results sink: multiplexes the five query output streams onto each
//! client's results socket.

pub mod query;

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use dashmap::DashMap;
use reelgrid_config::ResultsSettings;
use reelgrid_model::ClientId;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpSocket, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::MessageBus;
use crate::comm;
use crate::error::Result;
use crate::stage::{run_stage, QueueBinding};

use query::QueryResultsWorker;

/// One result row bound for one client: the query number followed by
/// its CSV lines.
pub(crate) type ResultRow = (ClientId, Vec<String>);

type ClientSockets = Arc<DashMap<ClientId, Arc<Mutex<OwnedWriteHalf>>>>;

pub struct ResultsHandler {
    settings: ResultsSettings,
    bus: Arc<dyn MessageBus>,
}

impl ResultsHandler {
    pub fn new(bus: Arc<dyn MessageBus>, settings: ResultsSettings) -> Self {
        Self { settings, bus }
    }

    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let sockets: ClientSockets = Arc::new(DashMap::new());
        let (rows_tx, rows_rx) = mpsc::channel::<ResultRow>(10_000);

        let mut worker_tasks = Vec::new();
        for (index, spec) in self.settings.input_queues.iter().enumerate() {
            let num_query = index + 1;
            let binding = QueueBinding::from_spec(spec);
            let bus = Arc::clone(&self.bus);
            let rows = rows_tx.clone();
            let worker_shutdown = shutdown.clone();
            worker_tasks.push(tokio::spawn(async move {
                let mut worker = QueryResultsWorker::new(num_query, rows);
                if let Err(e) =
                    run_stage(&bus, &[binding], &mut worker, 0.0, &worker_shutdown).await
                {
                    error!(num_query, error = %e, "query results worker failed");
                }
            }));
        }
        drop(rows_tx);

        let sender_sockets = Arc::clone(&sockets);
        let sender_task = tokio::spawn(send_rows(sender_sockets, rows_rx, shutdown.clone()));

        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.settings.port));
        let socket = TcpSocket::new_v4()?;
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(self.settings.listen_backlog)?;
        info!(port = self.settings.port, "results handler accepting clients");

        loop {
            let (stream, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!(error = %e, "accept failed");
                        continue;
                    }
                },
            };
            debug!(peer = %peer, "results connection accepted");
            register_client(stream, Arc::clone(&sockets), shutdown.clone());
        }

        for task in worker_tasks {
            let _ = task.await;
        }
        let _ = sender_task.await;
        Ok(())
    }
}

/// The first frame from the client is its echoed id; everything after
/// that flows server-to-client only.
fn register_client(stream: TcpStream, sockets: ClientSockets, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let (mut read_half, write_half) = stream.into_split();
        let client_id = tokio::select! {
            _ = shutdown.cancelled() => return,
            id = comm::read_frame(&mut read_half) => id,
        };
        match client_id.and_then(|raw| {
            raw.parse::<ClientId>()
                .map_err(crate::error::CoreError::from)
        }) {
            Ok(client_id) => {
                info!(client_id = %client_id, "results socket registered");
                sockets.insert(client_id, Arc::new(Mutex::new(write_half)));
            }
            Err(e) => {
                warn!(error = %e, "rejecting results connection without a valid id");
            }
        }
    });
}

async fn send_rows(
    sockets: ClientSockets,
    mut rows: mpsc::Receiver<ResultRow>,
    shutdown: CancellationToken,
) {
    loop {
        let (client_id, row) = tokio::select! {
            _ = shutdown.cancelled() => break,
            row = rows.recv() => match row {
                Some(row) => row,
                None => break,
            },
        };
        let Some(socket) = sockets.get(&client_id).map(|s| Arc::clone(s.value())) else {
            debug!(client_id = %client_id, "dropping row for unknown client");
            continue;
        };
        let mut writer = socket.lock().await;
        if let Err(e) = comm::write_lines(&mut *writer, &row).await {
            warn!(client_id = %client_id, error = %e, "results socket broken; evicting");
            drop(writer);
            sockets.remove(&client_id);
        }
    }
}
