//! One worker per query: turns typed result packets into rows for the
//! socket sender, deduplicating redelivered results by message id.

use async_trait::async_trait;
use reelgrid_model::{MessageId, Packet};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::ResultRow;
use crate::comm;
use crate::dedup::ProcessedIds;
use crate::error::Result;
use crate::stage::PacketHandler;

pub(crate) struct QueryResultsWorker {
    num_query: usize,
    rows: mpsc::Sender<ResultRow>,
    processed: ProcessedIds,
}

impl QueryResultsWorker {
    pub(crate) fn new(num_query: usize, rows: mpsc::Sender<ResultRow>) -> Self {
        Self {
            num_query,
            rows,
            processed: ProcessedIds::new(),
        }
    }

    fn result_lines(packet: &Packet) -> Option<Vec<String>> {
        match packet {
            Packet::Movies(batch) => Some(batch.to_csv_lines()),
            Packet::MovieRatings(batch) => Some(batch.to_csv_lines()),
            Packet::InvestorCountry(record) => Some(vec![record.to_csv_line()]),
            Packet::ActorParticipation(record) => Some(vec![record.to_csv_line()]),
            Packet::AvgRateRevenueBudget(record) => Some(vec![record.to_csv_line()]),
            Packet::Eof(_) => Some(vec![comm::EOF_MESSAGE.to_string()]),
            _ => None,
        }
    }

    async fn forward(&self, packet: &Packet, lines: Vec<String>) -> Result<()> {
        let mut row = Vec::with_capacity(lines.len() + 1);
        row.push(self.num_query.to_string());
        row.extend(lines);
        if self.rows.send((packet.client_id(), row)).await.is_err() {
            warn!(num_query = self.num_query, "row sink closed");
        }
        Ok(())
    }
}

#[async_trait]
impl PacketHandler for QueryResultsWorker {
    async fn handle(&mut self, _queue: &str, packet: Packet) -> Result<()> {
        let message_id: MessageId = packet.message_id();
        if self.processed.contains(&message_id) {
            debug!(num_query = self.num_query, message_id = %message_id, "duplicate result dropped");
            return Ok(());
        }
        let Some(lines) = Self::result_lines(&packet) else {
            // Client-disconnect control reaching the sink carries no row.
            return Ok(());
        };
        self.forward(&packet, lines).await?;
        self.processed.insert(message_id);
        Ok(())
    }
}
