//! TCP ingress: accepts clients, issues ids, parses CSV uploads into
//! typed batches, and tracks connected clients so a crash can be
//! translated into per-client cleanup downstream.

pub mod handler;
pub mod sender;

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use reelgrid_config::CleanerSettings;
use reelgrid_model::{ClientDisconnected, ClientId, Packet};
use tokio::net::TcpSocket;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::bus::MessageBus;
use crate::error::Result;
use crate::storage::StorageAdapter;

use handler::ClientHandler;
use sender::MessagesSender;

const MESSAGES_QUEUE_SIZE: usize = 10_000;
const CONNECTED_CLIENTS_FILE_KEY: &str = "connected_clients";

/// Connected-clients set with its persistent shadow; every update runs
/// under one lock together with the snapshot write.
#[derive(Clone)]
pub(crate) struct ConnectedClients {
    inner: Arc<Mutex<HashSet<ClientId>>>,
    storage: Arc<StorageAdapter>,
}

impl ConnectedClients {
    fn new(storage: Arc<StorageAdapter>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashSet::new())),
            storage,
        }
    }

    pub(crate) fn insert(&self, client_id: ClientId) -> Result<()> {
        let mut clients = self.inner.lock().expect("connected clients lock");
        clients.insert(client_id);
        self.storage
            .update(CONNECTED_CLIENTS_FILE_KEY, None, &*clients)
    }

    pub(crate) fn remove(&self, client_id: &ClientId) -> Result<()> {
        let mut clients = self.inner.lock().expect("connected clients lock");
        clients.remove(client_id);
        self.storage
            .update(CONNECTED_CLIENTS_FILE_KEY, None, &*clients)
    }
}

pub struct DataCleaner {
    settings: CleanerSettings,
    bus: Arc<dyn MessageBus>,
}

impl DataCleaner {
    pub fn new(bus: Arc<dyn MessageBus>, settings: CleanerSettings) -> Self {
        Self { settings, bus }
    }

    /// Every client that was connected when the previous incarnation
    /// died never finished its session; synthesize the disconnects.
    fn replay_disconnects(
        storage: &StorageAdapter,
        queue: &mpsc::Sender<Packet>,
    ) -> Result<Vec<ClientId>> {
        let previous: Option<HashSet<ClientId>> = storage.load(CONNECTED_CLIENTS_FILE_KEY, None)?;
        let previous = previous.unwrap_or_default();
        for client_id in &previous {
            info!(client_id = %client_id, "notifying disconnection of previous client");
            let _ = queue.try_send(ClientDisconnected::new(*client_id).into());
        }
        storage.delete(CONNECTED_CLIENTS_FILE_KEY, None)?;
        Ok(previous.into_iter().collect())
    }

    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let storage = Arc::new(StorageAdapter::new(&self.settings.storage_path)?);
        let connected = ConnectedClients::new(Arc::clone(&storage));

        let (queue_tx, queue_rx) = mpsc::channel::<Packet>(MESSAGES_QUEUE_SIZE);
        Self::replay_disconnects(&storage, &queue_tx)?;

        let exchanges = [
            self.settings.movies_exchange.clone(),
            self.settings.ratings_exchange.clone(),
            self.settings.credits_exchange.clone(),
        ];
        let sender = MessagesSender::new(Arc::clone(&self.bus), exchanges, queue_rx);
        let sender_task = tokio::spawn(sender.run(shutdown.clone()));

        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.settings.port));
        let socket = TcpSocket::new_v4()?;
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(self.settings.listen_backlog)?;
        info!(port = self.settings.port, "data cleaner accepting clients");

        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent_clients));
        let mut handler_tasks = Vec::new();
        loop {
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => {
                    permit.expect("client semaphore closed")
                }
            };
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

            let client_id = ClientId::new();
            connected.insert(client_id)?;
            info!(client_id = %client_id, peer = %peer, "client connected");

            let handler = ClientHandler::new(
                client_id,
                stream,
                queue_tx.clone(),
                connected.clone(),
                shutdown.clone(),
            );
            handler_tasks.push(tokio::spawn(async move {
                handler.run().await;
                drop(permit);
            }));
            handler_tasks.retain(|task| !task.is_finished());
        }

        for task in handler_tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "client handler task failed");
            }
        }
        drop(queue_tx);
        if let Err(e) = sender_task.await {
            warn!(error = %e, "sender task failed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn restart_synthesizes_disconnects_for_unfinished_clients() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageAdapter::new(dir.path()).unwrap();
        let mut previous = HashSet::new();
        let lost = ClientId::new();
        previous.insert(lost);
        storage
            .update(CONNECTED_CLIENTS_FILE_KEY, None, &previous)
            .unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let replayed = DataCleaner::replay_disconnects(&storage, &tx).unwrap();
        assert_eq!(replayed, vec![lost]);

        let packet = rx.recv().await.unwrap();
        let Packet::ClientDisconnected(cd) = packet else {
            panic!("expected a disconnect");
        };
        assert_eq!(cd.client_id, lost);

        // The snapshot is cleared so the replay happens once.
        let reloaded: Option<HashSet<ClientId>> =
            storage.load(CONNECTED_CLIENTS_FILE_KEY, None).unwrap();
        assert!(reloaded.is_none());
    }
}
