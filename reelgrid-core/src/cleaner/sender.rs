//! Single bus writer for the ingress: data batches are routed to the
//! exchange matching each client's current file, control is broadcast.

use std::collections::HashMap;
use std::sync::Arc;

use reelgrid_model::{ClientId, Packet, PacketKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::MessageBus;
use crate::error::Result;

pub struct MessagesSender {
    bus: Arc<dyn MessageBus>,
    exchanges: [String; 3],
    queue: mpsc::Receiver<Packet>,
    /// Per-client index into `exchanges`, advanced on each EOF.
    current_exchange: HashMap<ClientId, usize>,
}

impl MessagesSender {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        exchanges: [String; 3],
        queue: mpsc::Receiver<Packet>,
    ) -> Self {
        Self {
            bus,
            exchanges,
            queue,
            current_exchange: HashMap::new(),
        }
    }

    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        for exchange in &self.exchanges {
            self.bus.declare_exchange(exchange).await?;
        }
        loop {
            let packet = tokio::select! {
                _ = shutdown.cancelled() => break,
                packet = self.queue.recv() => match packet {
                    Some(packet) => packet,
                    None => break,
                },
            };
            if let Err(e) = self.dispatch(&packet).await {
                warn!(error = %e, "failed to publish; dropping message");
            }
        }
        info!("messages sender stopped");
        Ok(())
    }

    async fn dispatch(&mut self, packet: &Packet) -> Result<()> {
        if packet.kind() == PacketKind::ClientDisconnected {
            for exchange in self.exchanges.clone() {
                self.bus.publish(&exchange, packet.encode()?).await?;
            }
            return Ok(());
        }

        let client_id = packet.client_id();
        let index = *self.current_exchange.entry(client_id).or_insert(0);
        let exchange = self.exchanges[index].clone();
        self.bus.publish(&exchange, packet.encode()?).await?;
        debug!(client_id = %client_id, exchange = %exchange, kind = ?packet.kind(), "published");

        if packet.kind() == PacketKind::Eof {
            let next = index + 1;
            if next >= self.exchanges.len() {
                self.current_exchange.remove(&client_id);
                info!(client_id = %client_id, "all files forwarded");
            } else {
                self.current_exchange.insert(client_id, next);
            }
        }
        Ok(())
    }
}
