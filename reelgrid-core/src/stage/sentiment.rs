//! Stateless, CPU-bound sentiment stage: scores each movie overview
//! and forwards `(revenue, budget, sentiment)` triples.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use lexicon::polarity_lexicon;
use reelgrid_config::SentimentSettings;
use reelgrid_model::{AnalyzedMovie, AnalyzedMoviesBatch, Eof, MoviesBatch, Packet, Sentiment};
use tracing::{debug, warn};

use super::{publish_packet, reenqueue_packet, PacketHandler, QueueBinding};
use crate::bus::MessageBus;
use crate::error::{CoreError, Result};

pub const OVERVIEW_FIELD: &str = "overview";

/// Seam for the concrete sentiment scorer. Polarity is in [-1, 1].
pub trait SentimentModel: Send + Sync {
    fn polarity(&self, text: &str) -> f64;
}

/// Word-list scorer: the mean of the matched word valences, scaled into
/// [-1, 1]. Good enough to split overviews into the two buckets the
/// pipeline cares about; the seam above is where a heavier model plugs
/// in.
#[derive(Debug, Default)]
pub struct LexiconModel;

impl SentimentModel for LexiconModel {
    fn polarity(&self, text: &str) -> f64 {
        let lexicon = polarity_lexicon();
        let mut total = 0i32;
        let mut matched = 0u32;
        for word in text
            .split(|c: char| !c.is_alphanumeric() && c != '\'')
            .filter(|w| !w.is_empty())
        {
            if let Some(score) = lexicon.get(word.to_lowercase().as_str()) {
                total += i32::from(*score);
                matched += 1;
            }
        }
        if matched == 0 {
            return 0.0;
        }
        // Valences span [-3, 3]; normalize the mean to [-1, 1].
        (f64::from(total) / f64::from(matched) / 3.0).clamp(-1.0, 1.0)
    }
}

mod lexicon {
    use super::HashMap;
    use once_cell::sync::Lazy;

    /// AFINN-style valences, trimmed to vocabulary that shows up in
    /// movie overviews.
    const VALENCES: &[(&str, i8)] = &[
        ("abandoned", -2),
        ("admire", 2),
        ("adventure", 2),
        ("agony", -3),
        ("amazing", 3),
        ("anger", -2),
        ("awful", -3),
        ("bad", -2),
        ("beautiful", 3),
        ("beloved", 3),
        ("best", 3),
        ("betrayal", -3),
        ("bitter", -2),
        ("bleak", -2),
        ("bless", 2),
        ("brave", 2),
        ("brilliant", 3),
        ("broken", -2),
        ("brutal", -3),
        ("careless", -2),
        ("charming", 2),
        ("cheerful", 2),
        ("comedy", 2),
        ("corrupt", -3),
        ("crime", -2),
        ("cruel", -3),
        ("cry", -2),
        ("danger", -2),
        ("dark", -1),
        ("dead", -3),
        ("death", -2),
        ("defeat", -2),
        ("delight", 3),
        ("despair", -3),
        ("destroy", -3),
        ("devastating", -2),
        ("disaster", -2),
        ("doom", -2),
        ("dream", 1),
        ("dying", -3),
        ("enemy", -2),
        ("escape", -1),
        ("evil", -3),
        ("fail", -2),
        ("fear", -2),
        ("fight", -1),
        ("fortune", 2),
        ("free", 1),
        ("friend", 1),
        ("friendship", 2),
        ("fun", 3),
        ("funny", 2),
        ("glorious", 3),
        ("grace", 1),
        ("great", 3),
        ("grief", -2),
        ("happiness", 3),
        ("happy", 3),
        ("hate", -3),
        ("heartbreaking", -3),
        ("hero", 2),
        ("hope", 2),
        ("horrible", -3),
        ("horror", -3),
        ("hurt", -2),
        ("inspire", 2),
        ("joy", 3),
        ("kill", -3),
        ("kind", 2),
        ("laugh", 1),
        ("lonely", -2),
        ("lose", -3),
        ("loss", -3),
        ("lost", -3),
        ("love", 3),
        ("loyal", 3),
        ("luck", 3),
        ("magic", 1),
        ("misery", -3),
        ("murder", -2),
        ("nightmare", -3),
        ("pain", -2),
        ("peace", 2),
        ("perfect", 3),
        ("poverty", -1),
        ("prison", -2),
        ("rescue", 2),
        ("revenge", -2),
        ("romantic", 2),
        ("ruin", -2),
        ("sad", -2),
        ("save", 2),
        ("scared", -2),
        ("strong", 2),
        ("struggle", -2),
        ("success", 2),
        ("suffer", -2),
        ("sweet", 2),
        ("terrible", -3),
        ("terror", -3),
        ("threat", -2),
        ("tragedy", -2),
        ("tragic", -2),
        ("triumph", 3),
        ("trust", 1),
        ("ugly", -3),
        ("victory", 3),
        ("villain", -2),
        ("violence", -3),
        ("war", -2),
        ("warm", 1),
        ("win", 3),
        ("wonderful", 3),
        ("worst", -3),
        ("wrong", -2),
    ];

    static LEXICON: Lazy<HashMap<&'static str, i8>> =
        Lazy::new(|| VALENCES.iter().copied().collect());

    pub(super) fn polarity_lexicon() -> &'static HashMap<&'static str, i8> {
        &LEXICON
    }
}

pub struct SentimentAnalyzer {
    bus: Arc<dyn MessageBus>,
    model: Arc<dyn SentimentModel>,
    output_exchange: String,
    input_queue: String,
    cluster_size: u32,
    worker_id: u32,
}

impl SentimentAnalyzer {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        model: Arc<dyn SentimentModel>,
        settings: &SentimentSettings,
    ) -> Result<Self> {
        if settings.field_to_analyze != OVERVIEW_FIELD {
            return Err(CoreError::Internal(format!(
                "unknown field to analyze: {}",
                settings.field_to_analyze
            )));
        }
        let input_queue = settings
            .input_queues
            .first()
            .map(|spec| spec.queue.clone())
            .ok_or_else(|| CoreError::Internal("analyzer needs an input queue".to_string()))?;
        Ok(Self {
            bus,
            model,
            output_exchange: settings.output_exchange.clone(),
            input_queue,
            cluster_size: settings.cluster_size,
            worker_id: settings.id,
        })
    }

    pub fn inputs(settings: &SentimentSettings) -> Vec<QueueBinding> {
        settings.input_queues.iter().map(QueueBinding::from_spec).collect()
    }

    async fn analyze(&self, batch: MoviesBatch) -> Result<()> {
        let mut analyzed = Vec::with_capacity(batch.movies.len());
        for movie in &batch.movies {
            let overview = movie.overview.as_deref().unwrap_or_default();
            let polarity = self.model.polarity(overview).clamp(-1.0, 1.0);
            analyzed.push(AnalyzedMovie {
                revenue: movie.revenue.unwrap_or_default(),
                budget: movie.budget.unwrap_or_default(),
                sentiment: Sentiment::from_polarity(polarity)?,
            });
        }
        debug!(client_id = %batch.client_id, movies = analyzed.len(), "batch analyzed");
        let out =
            AnalyzedMoviesBatch::with_message_id(batch.message_id, batch.client_id, analyzed);
        publish_packet(&self.bus, &self.output_exchange, &out.into()).await
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
impl PacketHandler for SentimentAnalyzer {
    async fn handle(&mut self, _queue: &str, packet: Packet) -> Result<()> {
        match packet {
            Packet::Movies(batch) => self.analyze(batch).await,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scored_words_move_the_polarity() {
        let model = LexiconModel;
        assert!(model.polarity("a wonderful, beautiful love story") > 0.0);
        assert!(model.polarity("a brutal tale of murder and revenge") < 0.0);
    }

    #[test]
    fn unknown_text_is_neutral_and_neutral_is_positive() {
        let model = LexiconModel;
        let polarity = model.polarity("zxqv plain words only");
        assert_eq!(polarity, 0.0);
        assert_eq!(Sentiment::from_polarity(polarity).unwrap(), Sentiment::Positive);
    }

    #[test]
    fn empty_text_is_neutral() {
        assert_eq!(LexiconModel.polarity(""), 0.0);
    }

    #[test]
    fn polarity_stays_in_range() {
        let model = LexiconModel;
        for text in ["win win win triumph wonderful", "worst awful horror hate"] {
            let p = model.polarity(text);
            assert!((-1.0..=1.0).contains(&p), "polarity {p} out of range");
        }
    }
}
