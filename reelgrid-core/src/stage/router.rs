//! Stateless sharding router: every item lands in exactly one
//! destination shard per configured output, with deterministic
//! sub-batch ids so replays collapse downstream.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use reelgrid_config::RouterSettings;
use reelgrid_model::{
    ClientDisconnected, ClientId, CreditsBatch, Eof, MessageId, MoviesBatch, Packet, RatingsBatch,
};
use tracing::{debug, warn};

use super::{publish_packet, reenqueue_packet, PacketHandler, QueueBinding};
use crate::bus::MessageBus;
use crate::error::{CoreError, Result};

pub fn shard_for(hash_id: i64, dest_nodes: u32) -> u32 {
    (hash_id.rem_euclid(dest_nodes as i64) as u32) + 1
}

pub struct Router {
    bus: Arc<dyn MessageBus>,
    outputs: Vec<(String, u32)>,
    input_queue: String,
    cluster_size: u32,
    worker_id: u32,
}

impl Router {
    pub fn new(bus: Arc<dyn MessageBus>, settings: &RouterSettings) -> Result<Self> {
        let input_queue = settings
            .input_queues
            .first()
            .map(|spec| spec.queue.clone())
            .ok_or_else(|| CoreError::Internal("router needs an input queue".to_string()))?;
        Ok(Self {
            bus,
            outputs: settings
                .outputs
                .iter()
                .map(|output| (output.prefix.clone(), output.dest_nodes))
                .collect(),
            input_queue,
            cluster_size: settings.cluster_size,
            worker_id: settings.id,
        })
    }

    pub fn inputs(settings: &RouterSettings) -> Vec<QueueBinding> {
        settings.input_queues.iter().map(QueueBinding::from_spec).collect()
    }

    async fn route_items<T, F, W>(
        &self,
        client_id: ClientId,
        parent: MessageId,
        items: &[T],
        hash_id: F,
        wrap: W,
    ) -> Result<()>
    where
        T: Clone,
        F: Fn(&T) -> i64,
        W: Fn(MessageId, ClientId, Vec<T>) -> Packet,
    {
        for (prefix, dest_nodes) in &self.outputs {
            let mut shards: BTreeMap<u32, Vec<T>> = BTreeMap::new();
            for item in items {
                let dest = shard_for(hash_id(item), *dest_nodes);
                shards.entry(dest).or_default().push(item.clone());
            }
            for (dest, shard_items) in shards {
                let child_id = parent.derive(&dest.to_string());
                let packet = wrap(child_id, client_id, shard_items);
                publish_packet(&self.bus, &format!("{prefix}_{dest}"), &packet).await?;
                debug!(client_id = %client_id, prefix = %prefix, dest, "batch routed");
            }
        }
        Ok(())
    }

    async fn handle_eof(&self, mut eof: Eof) -> Result<()> {
        eof.add_seen_id(self.worker_id);
        if !eof.ring_complete(self.cluster_size) {
            return reenqueue_packet(&self.bus, &self.input_queue, &eof.into()).await;
        }
        // Ring closed: every destination shard gets its own EOF token.
        for (prefix, dest_nodes) in &self.outputs {
            for dest in 1..=*dest_nodes {
                let child = Eof::with_message_id(
                    eof.message_id.derive(&dest.to_string()),
                    eof.client_id,
                );
                publish_packet(&self.bus, &format!("{prefix}_{dest}"), &child.into()).await?;
            }
        }
        Ok(())
    }

    async fn broadcast(&self, cd: ClientDisconnected) -> Result<()> {
        for (prefix, dest_nodes) in &self.outputs {
            for dest in 1..=*dest_nodes {
                publish_packet(
                    &self.bus,
                    &format!("{prefix}_{dest}"),
                    &cd.clone().into(),
                )
                .await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PacketHandler for Router {
    async fn handle(&mut self, _queue: &str, packet: Packet) -> Result<()> {
        match packet {
            Packet::Movies(batch) => {
                let MoviesBatch {
                    message_id,
                    client_id,
                    movies,
                } = batch;
                self.route_items(
                    client_id,
                    message_id,
                    &movies,
                    |movie| movie.id.unwrap_or_default(),
                    |id, client, items| MoviesBatch::with_message_id(id, client, items).into(),
                )
                .await
            }
            Packet::Ratings(batch) => {
                let RatingsBatch {
                    message_id,
                    client_id,
                    ratings,
                } = batch;
                self.route_items(
                    client_id,
                    message_id,
                    &ratings,
                    |rating| rating.movie_id,
                    |id, client, items| RatingsBatch::with_message_id(id, client, items).into(),
                )
                .await
            }
            Packet::Credits(batch) => {
                let CreditsBatch {
                    message_id,
                    client_id,
                    credits,
                } = batch;
                self.route_items(
                    client_id,
                    message_id,
                    &credits,
                    |credit| credit.movie_id,
                    |id, client, items| CreditsBatch::with_message_id(id, client, items).into(),
                )
                .await
            }
            Packet::Eof(eof) => self.handle_eof(eof).await,
            Packet::ClientDisconnected(cd) => self.broadcast(cd).await,
            other => {
                warn!(kind = ?other.kind(), "unexpected packet type");
                Ok(())
            }
        }
    }
}
