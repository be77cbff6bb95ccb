//! Query 5: revenue over budget averaged per overview sentiment.
//! Rows with a zero revenue or budget carry no signal and are skipped.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reelgrid_config::AggregatorSettings;
use reelgrid_model::{
    AnalyzedMoviesBatch, AvgRateRevenueBudget, ClientDisconnected, ClientId, Eof, Packet,
    Sentiment,
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
struct RevenueState {
    /// sentiment value -> (revenue sum, budget sum)
    revenue_budget_by_sentiment: HashMap<u8, (f64, i64)>,
    processed: ProcessedIds,
}

pub struct AvgRateRevenueBudgetCalculator {
    bus: Arc<dyn MessageBus>,
    output_exchange: String,
    states: ClientStates<RevenueState>,
}

impl AvgRateRevenueBudgetCalculator {
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

    fn update_sums(&mut self, batch: &AnalyzedMoviesBatch) -> Result<()> {
        let state = self.states.entry(batch.client_id);
        if state.processed.contains(&batch.message_id) {
            return Ok(());
        }
        for movie in &batch.movies {
            if movie.revenue == 0.0 || movie.budget == 0 {
                continue;
            }
            let entry = state
                .revenue_budget_by_sentiment
                .entry(movie.sentiment.value())
                .or_insert((0.0, 0));
            entry.0 += movie.revenue;
            entry.1 += movie.budget;
        }
        state.processed.insert(batch.message_id);
        self.states.persist(&batch.client_id)
    }

    fn averages(&self, client_id: &ClientId) -> Vec<(Sentiment, f64)> {
        let Some(state) = self.states.get(client_id) else {
            return Vec::new();
        };
        let mut entries: Vec<(u8, (f64, i64))> = state
            .revenue_budget_by_sentiment
            .iter()
            .map(|(value, sums)| (*value, *sums))
            .collect();
        entries.sort_by_key(|(value, _)| *value);
        entries
            .into_iter()
            .filter_map(|(value, (revenue, budget))| {
                let sentiment = Sentiment::from_value(value).ok()?;
                (budget != 0).then(|| (sentiment, revenue / budget as f64))
            })
            .collect()
    }

    async fn handle_eof(&mut self, eof: Eof) -> Result<()> {
        for (sentiment, avg) in self.averages(&eof.client_id) {
            let record = AvgRateRevenueBudget {
                message_id: eof.message_id.derive(&sentiment.value().to_string()),
                client_id: eof.client_id,
                sentiment,
                avg,
            };
            publish_packet(&self.bus, &self.output_exchange, &record.into()).await?;
        }
        let onward = Eof::with_message_id(eof.message_id, eof.client_id);
        publish_packet(&self.bus, &self.output_exchange, &onward.into()).await?;
        info!(client_id = %eof.client_id, "avg rate revenue/budget emitted");
        self.states.remove(&eof.client_id)
    }

    async fn handle_client_disconnected(&mut self, cd: ClientDisconnected) -> Result<()> {
        self.states.remove(&cd.client_id)?;
        publish_packet(&self.bus, &self.output_exchange, &cd.into()).await
    }
}

#[async_trait]
impl PacketHandler for AvgRateRevenueBudgetCalculator {
    async fn handle(&mut self, _queue: &str, packet: Packet) -> Result<()> {
        match packet {
            Packet::AnalyzedMovies(batch) => self.update_sums(&batch),
            Packet::Eof(eof) => self.handle_eof(eof).await,
            Packet::ClientDisconnected(cd) => self.handle_client_disconnected(cd).await,
            other => {
                warn!(kind = ?other.kind(), "unexpected packet type");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InProcBus;
    use futures::StreamExt;
    use reelgrid_model::{AnalyzedMovie, MessageId};

    fn settings(dir: &std::path::Path) -> AggregatorSettings {
        AggregatorSettings {
            input_queues: vec![reelgrid_config::QueueSpec {
                queue: "movies_sentiment_analyzed".to_string(),
                exchange: Some("movies_sentiment_analyzed".to_string()),
            }],
            output_exchange: "avg_rate_revenue_budget_by_sentiment".to_string(),
            storage_path: dir.to_path_buf(),
            top_n: 0,
        }
    }

    fn batch(client_id: ClientId, movies: &[(f64, i64, Sentiment)]) -> AnalyzedMoviesBatch {
        AnalyzedMoviesBatch::with_message_id(
            MessageId::new(),
            client_id,
            movies
                .iter()
                .map(|(revenue, budget, sentiment)| AnalyzedMovie {
                    revenue: *revenue,
                    budget: *budget,
                    sentiment: *sentiment,
                })
                .collect(),
        )
    }

    async fn observed(bus: &Arc<dyn MessageBus>) -> Vec<Packet> {
        let mut out = Vec::new();
        let mut stream = bus.consume("observer").await.unwrap();
        while let Ok(Some(delivery)) =
            tokio::time::timeout(std::time::Duration::from_millis(50), stream.next()).await
        {
            out.push(Packet::decode(&delivery.payload).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn averages_revenue_over_budget_per_sentiment() {
        let dir = tempfile::tempdir().unwrap();
        let bus: Arc<dyn MessageBus> = Arc::new(InProcBus::new());
        bus.bind("observer", "avg_rate_revenue_budget_by_sentiment")
            .await
            .unwrap();
        let mut calc =
            AvgRateRevenueBudgetCalculator::new(Arc::clone(&bus), &settings(dir.path())).unwrap();

        let client_id = ClientId::new();
        calc.handle(
            "q",
            batch(
                client_id,
                &[
                    (200.0, 100, Sentiment::Positive),
                    (100.0, 100, Sentiment::Positive),
                    (50.0, 100, Sentiment::Negative),
                ],
            )
            .into(),
        )
        .await
        .unwrap();
        calc.handle("q", Eof::new(client_id).into()).await.unwrap();

        let packets = observed(&bus).await;
        let rows: Vec<String> = packets
            .iter()
            .filter_map(|p| match p {
                Packet::AvgRateRevenueBudget(avg) => Some(avg.to_csv_line()),
                _ => None,
            })
            .collect();
        assert_eq!(rows, vec!["NEGATIVE,0.5", "POSITIVE,1.5"]);
        assert!(matches!(packets.last(), Some(Packet::Eof(_))));
    }

    #[tokio::test]
    async fn zero_rows_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let bus: Arc<dyn MessageBus> = Arc::new(InProcBus::new());
        bus.bind("observer", "avg_rate_revenue_budget_by_sentiment")
            .await
            .unwrap();
        let mut calc =
            AvgRateRevenueBudgetCalculator::new(Arc::clone(&bus), &settings(dir.path())).unwrap();

        let client_id = ClientId::new();
        calc.handle(
            "q",
            batch(
                client_id,
                &[
                    (0.0, 100, Sentiment::Positive),
                    (100.0, 0, Sentiment::Positive),
                ],
            )
            .into(),
        )
        .await
        .unwrap();
        calc.handle("q", Eof::new(client_id).into()).await.unwrap();

        let packets = observed(&bus).await;
        assert!(matches!(packets.as_slice(), [Packet::Eof(_)]));
    }

    #[tokio::test]
    async fn duplicate_batches_count_once() {
        let dir = tempfile::tempdir().unwrap();
        let bus: Arc<dyn MessageBus> = Arc::new(InProcBus::new());
        bus.bind("observer", "avg_rate_revenue_budget_by_sentiment")
            .await
            .unwrap();
        let mut calc =
            AvgRateRevenueBudgetCalculator::new(Arc::clone(&bus), &settings(dir.path())).unwrap();

        let client_id = ClientId::new();
        let analyzed = batch(client_id, &[(100.0, 50, Sentiment::Positive)]);
        calc.handle("q", Packet::from(analyzed.clone())).await.unwrap();
        calc.handle("q", Packet::from(analyzed)).await.unwrap();
        calc.handle("q", Eof::new(client_id).into()).await.unwrap();

        let packets = observed(&bus).await;
        let rows: Vec<String> = packets
            .iter()
            .filter_map(|p| match p {
                Packet::AvgRateRevenueBudget(avg) => Some(avg.to_csv_line()),
                _ => None,
            })
            .collect();
        assert_eq!(rows, vec!["POSITIVE,2"]);
    }
}
