//! Stateless movie filter: keep the records matching the configured
//! predicate, project the configured columns, pass control packets
//! through the EOF ring.

use std::sync::Arc;

use async_trait::async_trait;
use reelgrid_config::{FilterSettings, FilterValues};
use reelgrid_model::{Eof, Movie, MovieField, MoviesBatch, Packet};
use tracing::{debug, warn};

use super::{publish_packet, reenqueue_packet, PacketHandler, QueueBinding};
use crate::bus::MessageBus;
use crate::error::{CoreError, Result};

pub const PRODUCTION_COUNTRIES_FIELD: &str = "production_countries";
pub const RELEASE_DATE_FIELD: &str = "release_date";

#[derive(Debug, Clone, PartialEq)]
pub enum FilterPredicate {
    /// Every listed country present, case-insensitive.
    CountriesAll(Vec<String>),
    /// Exactly this many production countries.
    CountriesExactly(usize),
    /// Release year within the inclusive range.
    ReleaseYear { min: i32, max: Option<i32> },
}

impl FilterPredicate {
    pub fn from_config(field: &str, values: &FilterValues) -> Result<Self> {
        match (field, values) {
            (PRODUCTION_COUNTRIES_FIELD, FilterValues::Countries(countries)) => {
                Ok(FilterPredicate::CountriesAll(
                    countries.iter().map(|c| c.to_lowercase()).collect(),
                ))
            }
            (PRODUCTION_COUNTRIES_FIELD, FilterValues::CountryCount(count)) => {
                Ok(FilterPredicate::CountriesExactly(*count))
            }
            (RELEASE_DATE_FIELD, FilterValues::YearRange { min, max }) => {
                Ok(FilterPredicate::ReleaseYear {
                    min: *min,
                    max: *max,
                })
            }
            (field, values) => Err(CoreError::Internal(format!(
                "filter field {field} cannot take values {values:?}"
            ))),
        }
    }

    pub fn matches(&self, movie: &Movie) -> bool {
        match self {
            FilterPredicate::CountriesAll(wanted) => match &movie.production_countries {
                Some(countries) => {
                    let present: Vec<String> =
                        countries.iter().map(|c| c.to_lowercase()).collect();
                    wanted.iter().all(|c| present.contains(c))
                }
                None => false,
            },
            FilterPredicate::CountriesExactly(count) => movie
                .production_countries
                .as_ref()
                .is_some_and(|countries| countries.len() == *count),
            FilterPredicate::ReleaseYear { min, max } => match movie.release_year() {
                Some(year) => year >= *min && max.map_or(true, |max| year <= max),
                None => false,
            },
        }
    }
}

pub struct MoviesFilter {
    bus: Arc<dyn MessageBus>,
    predicate: FilterPredicate,
    output_fields: Vec<MovieField>,
    output_exchange: String,
    input_queue: String,
    cluster_size: u32,
    worker_id: u32,
}

impl MoviesFilter {
    pub fn new(bus: Arc<dyn MessageBus>, settings: &FilterSettings) -> Result<Self> {
        let predicate =
            FilterPredicate::from_config(&settings.filter_field, &settings.filter_values)?;
        let output_fields = settings
            .output_fields
            .iter()
            .map(|name| {
                MovieField::parse(name)
                    .ok_or_else(|| CoreError::Internal(format!("unknown movie field: {name}")))
            })
            .collect::<Result<Vec<_>>>()?;
        let input_queue = settings
            .input_queues
            .first()
            .map(|spec| spec.queue.clone())
            .ok_or_else(|| CoreError::Internal("filter needs an input queue".to_string()))?;
        Ok(Self {
            bus,
            predicate,
            output_fields,
            output_exchange: settings.output_exchange.clone(),
            input_queue,
            cluster_size: settings.cluster_size,
            worker_id: settings.id,
        })
    }

    pub fn inputs(settings: &FilterSettings) -> Vec<QueueBinding> {
        settings.input_queues.iter().map(QueueBinding::from_spec).collect()
    }

    async fn handle_movies(&self, batch: MoviesBatch) -> Result<()> {
        let kept: Vec<Movie> = batch
            .movies
            .iter()
            .filter(|movie| self.predicate.matches(movie))
            .cloned()
            .collect();
        if kept.is_empty() {
            return Ok(());
        }
        debug!(
            client_id = %batch.client_id,
            kept = kept.len(),
            total = batch.movies.len(),
            "movies filtered"
        );
        let out = MoviesBatch::with_message_id(batch.message_id, batch.client_id, kept);
        let payload = Packet::encode_movies_subset(&out, &self.output_fields)?;
        self.bus.publish(&self.output_exchange, payload).await
    }

    async fn handle_eof(&self, mut eof: Eof) -> Result<()> {
        eof.add_seen_id(self.worker_id);
        if eof.ring_complete(self.cluster_size) {
            let onward = Eof::with_message_id(eof.message_id, eof.client_id);
            publish_packet(&self.bus, &self.output_exchange, &onward.into()).await
        } else {
            reenqueue_packet(&self.bus, &self.input_queue, &eof.into()).await
        }
    }
}

#[async_trait]
impl PacketHandler for MoviesFilter {
    async fn handle(&mut self, _queue: &str, packet: Packet) -> Result<()> {
        match packet {
            Packet::Movies(batch) => self.handle_movies(batch).await,
            Packet::Eof(eof) => self.handle_eof(eof).await,
            Packet::ClientDisconnected(cd) => {
                publish_packet(&self.bus, &self.output_exchange, &cd.into()).await
            }
            other => {
                warn!(kind = ?other.kind(), "unexpected packet type");
                Ok(())
            }
        }
    }
}
