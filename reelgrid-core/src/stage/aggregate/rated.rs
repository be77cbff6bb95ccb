//! Query 3: the best and worst movies by mean rating.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reelgrid_config::AggregatorSettings;
use reelgrid_model::{
    ClientDisconnected, ClientId, Eof, MovieRating, MovieRatingsBatch, Packet,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::ClientStates;
use crate::bus::MessageBus;
use crate::dedup::ProcessedIds;
use crate::error::Result;
use crate::stage::{publish_packet, PacketHandler, QueueBinding};
use crate::storage::StorageAdapter;

const EMISSION_SLOT: &str = "most_least_rated_movies_calculator";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RatedState {
    /// movie id -> (title, rating sum, rating count)
    movie_ratings: HashMap<i64, (String, f64, u64)>,
    processed: ProcessedIds,
}

pub struct MostLeastRatedMovies {
    bus: Arc<dyn MessageBus>,
    output_exchange: String,
    states: ClientStates<RatedState>,
}

impl MostLeastRatedMovies {
    pub fn new(bus: Arc<dyn MessageBus>, settings: &AggregatorSettings) -> Result<Self> {
        let storage = StorageAdapter::new(&settings.storage_path)?;
        Ok(Self {
            bus,
            output_exchange: settings.output_exchange.clone(),
            states: ClientStates::load(storage)?,
        })
    }

    pub fn inputs(settings: &AggregatorSettings) -> Vec<QueueBinding> {
        settings.input_queues.iter().map(QueueBinding::from_spec).collect()
    }

    fn update_ratings(&mut self, batch: &MovieRatingsBatch) -> Result<()> {
        let state = self.states.entry(batch.client_id);
        if state.processed.contains(&batch.message_id) {
            return Ok(());
        }
        for movie_rating in &batch.movie_ratings {
            let entry = state
                .movie_ratings
                .entry(movie_rating.movie_id)
                .or_insert_with(|| (movie_rating.title.clone(), 0.0, 0));
            entry.1 += movie_rating.rating;
            entry.2 += 1;
        }
        state.processed.insert(batch.message_id);
        self.states.persist(&batch.client_id)
    }

    /// Best and worst by mean rating; ties resolved towards the lowest
    /// movie id so replays emit identical rows.
    fn most_least_rated(&self, client_id: &ClientId) -> Option<(MovieRating, MovieRating)> {
        let state = self.states.get(client_id)?;
        let mut entries: Vec<(i64, &(String, f64, u64))> = state
            .movie_ratings
            .iter()
            .map(|(id, entry)| (*id, entry))
            .collect();
        if entries.is_empty() {
            return None;
        }
        entries.sort_by_key(|(id, _)| *id);

        let mut most: Option<MovieRating> = None;
        let mut least: Option<MovieRating> = None;
        for (movie_id, (title, sum, count)) in entries {
            let avg = sum / (*count as f64);
            if most.as_ref().is_none_or(|m| avg > m.rating) {
                most = Some(MovieRating {
                    movie_id,
                    title: title.clone(),
                    rating: avg,
                });
            }
            if least.as_ref().is_none_or(|l| avg < l.rating) {
                least = Some(MovieRating {
                    movie_id,
                    title: title.clone(),
                    rating: avg,
                });
            }
        }
        Some((most?, least?))
    }

    async fn handle_eof(&mut self, eof: Eof) -> Result<()> {
        if let Some((most, least)) = self.most_least_rated(&eof.client_id) {
            let out = MovieRatingsBatch::with_message_id(
                eof.message_id.derive(EMISSION_SLOT),
                eof.client_id,
                vec![most, least],
            );
            publish_packet(&self.bus, &self.output_exchange, &out.into()).await?;
        }
        let onward = Eof::with_message_id(eof.message_id, eof.client_id);
        publish_packet(&self.bus, &self.output_exchange, &onward.into()).await?;
        info!(client_id = %eof.client_id, "most/least rated movies emitted");
        self.states.remove(&eof.client_id)
    }

    async fn handle_client_disconnected(&mut self, cd: ClientDisconnected) -> Result<()> {
        self.states.remove(&cd.client_id)?;
        publish_packet(&self.bus, &self.output_exchange, &cd.into()).await
    }
}

#[async_trait]
impl PacketHandler for MostLeastRatedMovies {
    async fn handle(&mut self, _queue: &str, packet: Packet) -> Result<()> {
        match packet {
            Packet::MovieRatings(batch) => self.update_ratings(&batch),
            Packet::Eof(eof) => self.handle_eof(eof).await,
            Packet::ClientDisconnected(cd) => self.handle_client_disconnected(cd).await,
            other => {
                warn!(kind = ?other.kind(), "unexpected packet type");
                Ok(())
            }
        }
    }
}
