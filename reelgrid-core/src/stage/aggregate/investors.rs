//! Query 2: total budget invested per production country, top K.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reelgrid_config::AggregatorSettings;
use reelgrid_model::{
    ClientDisconnected, ClientId, Eof, InvestorCountry, MoviesBatch, Packet,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::ClientStates;
use crate::bus::MessageBus;
use crate::dedup::ProcessedIds;
use crate::error::Result;
use crate::stage::{publish_packet, PacketHandler, QueueBinding};
use crate::storage::StorageAdapter;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct InvestorState {
    investment_by_country: HashMap<String, i64>,
    processed: ProcessedIds,
}

pub struct TopInvestorCountries {
    bus: Arc<dyn MessageBus>,
    output_exchange: String,
    top_n: usize,
    states: ClientStates<InvestorState>,
}

impl TopInvestorCountries {
    pub fn new(bus: Arc<dyn MessageBus>, settings: &AggregatorSettings) -> Result<Self> {
        let storage = StorageAdapter::new(&settings.storage_path)?;
        Ok(Self {
            bus,
            output_exchange: settings.output_exchange.clone(),
            top_n: settings.top_n,
            states: ClientStates::load(storage)?,
        })
    }

    pub fn inputs(settings: &AggregatorSettings) -> Vec<QueueBinding> {
        settings.input_queues.iter().map(QueueBinding::from_spec).collect()
    }

    fn update_investments(&mut self, batch: &MoviesBatch) -> Result<()> {
        let state = self.states.entry(batch.client_id);
        if state.processed.contains(&batch.message_id) {
            return Ok(());
        }
        for movie in &batch.movies {
            let budget = movie.budget.unwrap_or_default();
            for country in movie.production_countries.iter().flatten() {
                *state
                    .investment_by_country
                    .entry(country.clone())
                    .or_default() += budget;
            }
        }
        state.processed.insert(batch.message_id);
        self.states.persist(&batch.client_id)
    }

    fn top_countries(&self, client_id: &ClientId) -> Vec<(String, i64)> {
        let Some(state) = self.states.get(client_id) else {
            return Vec::new();
        };
        let mut entries: Vec<(String, i64)> = state
            .investment_by_country
            .iter()
            .map(|(country, investment)| (country.clone(), *investment))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        entries.truncate(self.top_n);
        entries
    }

    async fn handle_eof(&mut self, eof: Eof) -> Result<()> {
        for (country, investment) in self.top_countries(&eof.client_id) {
            let record = InvestorCountry {
                message_id: eof.message_id.derive(&country),
                client_id: eof.client_id,
                country,
                investment,
            };
            publish_packet(&self.bus, &self.output_exchange, &record.into()).await?;
        }
        let onward = Eof::with_message_id(eof.message_id, eof.client_id);
        publish_packet(&self.bus, &self.output_exchange, &onward.into()).await?;
        info!(client_id = %eof.client_id, "top investor countries emitted");
        self.states.remove(&eof.client_id)
    }

    async fn handle_client_disconnected(&mut self, cd: ClientDisconnected) -> Result<()> {
        self.states.remove(&cd.client_id)?;
        publish_packet(&self.bus, &self.output_exchange, &cd.into()).await
    }
}

#[async_trait]
impl PacketHandler for TopInvestorCountries {
    async fn handle(&mut self, _queue: &str, packet: Packet) -> Result<()> {
        match packet {
            Packet::Movies(batch) => self.update_investments(&batch),
            Packet::Eof(eof) => self.handle_eof(eof).await,
            Packet::ClientDisconnected(cd) => self.handle_client_disconnected(cd).await,
            other => {
                warn!(kind = ?other.kind(), "unexpected packet type");
                Ok(())
            }
        }
    }
}
