//! Stateful joiner shard: correlates its slice of the reference movie
//! stream with the matching slice of ratings or credits.
//!
//! Both inputs are per-shard exchanges fed by the routers, so a batch
//! that cannot resolve yet is re-enqueued whole and unchanged on the
//! to-join queue; the published join keeps the parent batch's message
//! id, which makes the output idempotent under redelivery.
//!
//! The EOF ring runs over the to-join side only. Each shard receives
//! its own token from the router broadcast and forwards incomplete
//! tokens to the next shard (`id % cluster_size + 1`); a token dies at
//! the shard that completes it, and only the completion that lands on
//! the smallest seen id emits the final EOF downstream.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use reelgrid_config::{JoinKind, JoinerSettings};
use reelgrid_model::{
    ClientDisconnected, ClientId, CreditsBatch, Eof, MovieCredit, MovieCreditsBatch, MovieRating,
    MovieRatingsBatch, MoviesBatch, Packet, RatingsBatch,
};
use tracing::{debug, info, warn};

use super::{publish_packet, reenqueue_packet, PacketHandler, QueueBinding};
use crate::bus::MessageBus;
use crate::error::Result;
use crate::storage::StorageAdapter;

const MOVIES_FILE_KEY: &str = "movies_";
const ALL_RECEIVED_FILE_KEY: &str = "all_movies_received";
const DEFERRED_FILE_KEY: &str = "deferred_eofs";

pub struct MoviesJoiner {
    bus: Arc<dyn MessageBus>,
    kind: JoinKind,
    movies_queue: String,
    to_join_queue: String,
    to_join_prefix: String,
    output_exchange: String,
    cluster_size: u32,
    worker_id: u32,
    storage: StorageAdapter,
    movies: HashMap<ClientId, HashMap<i64, String>>,
    all_received: HashSet<ClientId>,
    deferred: HashSet<ClientId>,
}

impl MoviesJoiner {
    pub fn new(bus: Arc<dyn MessageBus>, settings: &JoinerSettings) -> Result<Self> {
        let storage = StorageAdapter::new(&settings.storage_path)?;
        let mut joiner = Self {
            bus,
            kind: settings.kind,
            movies_queue: format!("{}_{}", settings.movies_queue_prefix, settings.id),
            to_join_queue: format!("{}_{}", settings.to_join_queue_prefix, settings.id),
            to_join_prefix: settings.to_join_queue_prefix.clone(),
            output_exchange: settings.output_exchange.clone(),
            cluster_size: settings.cluster_size,
            worker_id: settings.id,
            storage,
            movies: HashMap::new(),
            all_received: HashSet::new(),
            deferred: HashSet::new(),
        };
        joiner.load_state()?;
        Ok(joiner)
    }

    pub fn inputs(&self) -> Vec<QueueBinding> {
        vec![
            QueueBinding::mirrored(self.movies_queue.clone()),
            QueueBinding::mirrored(self.to_join_queue.clone()),
        ]
    }

    fn load_state(&mut self) -> Result<()> {
        for (client, entries) in self.storage.load_logs::<(i64, String)>(MOVIES_FILE_KEY)? {
            let Ok(client_id) = client.parse::<ClientId>() else {
                warn!(file_suffix = %client, "ignoring movie log with malformed client id");
                continue;
            };
            self.movies
                .entry(client_id)
                .or_default()
                .extend(entries);
        }
        if let Some(all_received) = self.storage.load(ALL_RECEIVED_FILE_KEY, None)? {
            self.all_received = all_received;
        }
        if let Some(deferred) = self.storage.load(DEFERRED_FILE_KEY, None)? {
            self.deferred = deferred;
        }
        if !self.movies.is_empty() {
            info!(clients = self.movies.len(), "joiner state restored");
        }
        Ok(())
    }

    fn persist_all_received(&self) -> Result<()> {
        self.storage
            .update(ALL_RECEIVED_FILE_KEY, None, &self.all_received)
    }

    fn persist_deferred(&self) -> Result<()> {
        self.storage.update(DEFERRED_FILE_KEY, None, &self.deferred)
    }

    fn store_movies(&mut self, batch: &MoviesBatch) -> Result<()> {
        let client_key = batch.client_id.to_string();
        let movies = self.movies.entry(batch.client_id).or_default();
        for movie in &batch.movies {
            let (Some(id), Some(title)) = (movie.id, movie.title.as_ref()) else {
                warn!(client_id = %batch.client_id, "reference movie without id or title");
                continue;
            };
            if movies.insert(id, title.clone()).is_none() {
                self.storage
                    .append(MOVIES_FILE_KEY, Some(&client_key), &(id, title))?;
            }
        }
        Ok(())
    }

    fn clean_client(&mut self, client_id: &ClientId) -> Result<()> {
        self.movies.remove(client_id);
        let was_complete = self.all_received.remove(client_id);
        let was_deferred = self.deferred.remove(client_id);
        self.storage
            .delete(MOVIES_FILE_KEY, Some(&client_id.to_string()))?;
        if was_complete {
            self.persist_all_received()?;
        }
        if was_deferred {
            self.persist_deferred()?;
        }
        debug!(client_id = %client_id, "joiner client state cleaned");
        Ok(())
    }

    async fn defer(&mut self, client_id: ClientId, packet: Packet) -> Result<()> {
        reenqueue_packet(&self.bus, &self.to_join_queue, &packet).await?;
        if self.deferred.insert(client_id) {
            self.persist_deferred()?;
        }
        Ok(())
    }

    /// None means the batch cannot be resolved yet and must come back
    /// later; an item missing after the full reference arrived is
    /// dropped.
    fn lookup_ratings(&self, batch: &RatingsBatch) -> Option<Vec<MovieRating>> {
        let all_received = self.all_received.contains(&batch.client_id);
        let movies = match self.movies.get(&batch.client_id) {
            Some(movies) if !movies.is_empty() => movies,
            // A complete but empty reference can never match anything.
            _ => return all_received.then(Vec::new),
        };
        let mut joined = Vec::with_capacity(batch.ratings.len());
        for rating in &batch.ratings {
            match movies.get(&rating.movie_id) {
                Some(title) => joined.push(MovieRating {
                    movie_id: rating.movie_id,
                    title: title.clone(),
                    rating: rating.rating,
                }),
                None if !all_received => return None,
                None => {}
            }
        }
        Some(joined)
    }

    fn lookup_credits(&self, batch: &CreditsBatch) -> Option<Vec<MovieCredit>> {
        let all_received = self.all_received.contains(&batch.client_id);
        let movies = match self.movies.get(&batch.client_id) {
            Some(movies) if !movies.is_empty() => movies,
            _ => return all_received.then(Vec::new),
        };
        let mut joined = Vec::with_capacity(batch.credits.len());
        for credit in &batch.credits {
            match movies.get(&credit.movie_id) {
                Some(title) => joined.push(MovieCredit {
                    movie_id: credit.movie_id,
                    title: title.clone(),
                    cast: credit.cast.clone(),
                }),
                None if !all_received => return None,
                None => {}
            }
        }
        Some(joined)
    }

    async fn handle_ratings(&mut self, batch: RatingsBatch) -> Result<()> {
        match self.lookup_ratings(&batch) {
            Some(joined) => {
                if joined.is_empty() {
                    return Ok(());
                }
                let out =
                    MovieRatingsBatch::with_message_id(batch.message_id, batch.client_id, joined);
                publish_packet(&self.bus, &self.output_exchange, &out.into()).await
            }
            None => self.defer(batch.client_id, batch.into()).await,
        }
    }

    async fn handle_credits(&mut self, batch: CreditsBatch) -> Result<()> {
        match self.lookup_credits(&batch) {
            Some(joined) => {
                if joined.is_empty() {
                    return Ok(());
                }
                let out =
                    MovieCreditsBatch::with_message_id(batch.message_id, batch.client_id, joined);
                publish_packet(&self.bus, &self.output_exchange, &out.into()).await
            }
            None => self.defer(batch.client_id, batch.into()).await,
        }
    }

    async fn handle_to_join_eof(&mut self, mut eof: Eof) -> Result<()> {
        let client_id = eof.client_id;
        if self.deferred.remove(&client_id) {
            // Re-enqueued data is still in flight behind this token.
            self.persist_deferred()?;
            return reenqueue_packet(&self.bus, &self.to_join_queue, &eof.into()).await;
        }

        eof.add_seen_id(self.worker_id);
        if eof.ring_complete(self.cluster_size) {
            if eof.min_seen_id() == Some(self.worker_id) {
                let onward = Eof::with_message_id(eof.message_id, client_id);
                publish_packet(&self.bus, &self.output_exchange, &onward.into()).await?;
                info!(client_id = %client_id, "join complete, EOF emitted");
            }
            self.clean_client(&client_id)
        } else {
            let next = self.worker_id % self.cluster_size + 1;
            let exchange = format!("{}_{}", self.to_join_prefix, next);
            publish_packet(&self.bus, &exchange, &eof.into()).await
        }
    }

    async fn handle_movies_input(&mut self, packet: Packet) -> Result<()> {
        match packet {
            Packet::Movies(batch) => self.store_movies(&batch),
            Packet::Eof(eof) => {
                if self.all_received.insert(eof.client_id) {
                    self.persist_all_received()?;
                }
                Ok(())
            }
            Packet::ClientDisconnected(cd) => self.clean_client(&cd.client_id),
            other => {
                warn!(kind = ?other.kind(), "unexpected packet on the movies input");
                Ok(())
            }
        }
    }

    async fn handle_to_join_input(&mut self, packet: Packet) -> Result<()> {
        match (self.kind, packet) {
            (JoinKind::Ratings, Packet::Ratings(batch)) => self.handle_ratings(batch).await,
            (JoinKind::Credits, Packet::Credits(batch)) => self.handle_credits(batch).await,
            (_, Packet::Eof(eof)) => self.handle_to_join_eof(eof).await,
            (_, Packet::ClientDisconnected(cd)) => self.handle_client_disconnected(cd).await,
            (_, other) => {
                warn!(kind = ?other.kind(), "unexpected packet on the to-join input");
                Ok(())
            }
        }
    }

    async fn handle_client_disconnected(&mut self, cd: ClientDisconnected) -> Result<()> {
        self.clean_client(&cd.client_id)?;
        publish_packet(&self.bus, &self.output_exchange, &cd.into()).await
    }
}

#[async_trait]
impl PacketHandler for MoviesJoiner {
    async fn handle(&mut self, queue: &str, packet: Packet) -> Result<()> {
        if queue == self.movies_queue {
            self.handle_movies_input(packet).await
        } else {
            self.handle_to_join_input(packet).await
        }
    }
}
