use std::fmt;

use bytes::Buf;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::ids::{ClientId, MessageId};
use crate::wire;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sentiment {
    Negative,
    Positive,
}

impl Sentiment {
    /// POSITIVE iff polarity >= 0.
    pub fn from_polarity(polarity: f64) -> Result<Self> {
        if !(-1.0..=1.0).contains(&polarity) {
            return Err(ModelError::Codec(format!(
                "polarity must be between -1 and 1, got {polarity}"
            )));
        }
        Ok(if polarity < 0.0 {
            Sentiment::Negative
        } else {
            Sentiment::Positive
        })
    }

    pub fn value(self) -> u8 {
        match self {
            Sentiment::Negative => 0,
            Sentiment::Positive => 1,
        }
    }

    pub fn from_value(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Sentiment::Negative),
            1 => Ok(Sentiment::Positive),
            other => Err(ModelError::Codec(format!("unexpected sentiment: {other}"))),
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sentiment::Negative => write!(f, "NEGATIVE"),
            Sentiment::Positive => write!(f, "POSITIVE"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzedMovie {
    pub revenue: f64,
    pub budget: i64,
    pub sentiment: Sentiment,
}

impl AnalyzedMovie {
    pub(crate) fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        wire::put_num(buf, self.revenue)?;
        wire::put_num(buf, self.budget)?;
        wire::put_num(buf, self.sentiment.value())
    }

    pub(crate) fn decode(buf: &mut &[u8]) -> Result<Self> {
        Ok(AnalyzedMovie {
            revenue: wire::get_num(buf)?,
            budget: wire::get_num(buf)?,
            sentiment: Sentiment::from_value(wire::get_num(buf)?)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzedMoviesBatch {
    pub message_id: MessageId,
    pub client_id: ClientId,
    pub movies: Vec<AnalyzedMovie>,
}

impl AnalyzedMoviesBatch {
    pub fn with_message_id(
        message_id: MessageId,
        client_id: ClientId,
        movies: Vec<AnalyzedMovie>,
    ) -> Self {
        Self {
            message_id,
            client_id,
            movies,
        }
    }

    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        wire::put_str(buf, &self.message_id.to_string())?;
        wire::put_str(buf, &self.client_id.to_string())?;
        for movie in &self.movies {
            movie.encode(buf)?;
        }
        Ok(())
    }

    pub fn decode(buf: &mut &[u8]) -> Result<Self> {
        let message_id: MessageId = wire::get_str(buf)?.parse()?;
        let client_id: ClientId = wire::get_str(buf)?.parse()?;
        let mut movies = Vec::new();
        while buf.has_remaining() {
            movies.push(AnalyzedMovie::decode(buf)?);
        }
        Ok(Self {
            message_id,
            client_id,
            movies,
        })
    }
}
