//! Join results: ratings and credits widened with the movie title.

use bytes::Buf;

use crate::error::Result;
use crate::ids::{ClientId, MessageId};
use crate::wire;

#[derive(Debug, Clone, PartialEq)]
pub struct MovieRating {
    pub movie_id: i64,
    pub title: String,
    pub rating: f64,
}

impl MovieRating {
    pub fn to_csv_line(&self) -> String {
        format!("{},{},{}", self.movie_id, self.title, self.rating)
    }

    pub(crate) fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        wire::put_num(buf, self.movie_id)?;
        wire::put_str(buf, &self.title)?;
        wire::put_num(buf, self.rating)
    }

    pub(crate) fn decode(buf: &mut &[u8]) -> Result<Self> {
        Ok(MovieRating {
            movie_id: wire::get_num(buf)?,
            title: wire::get_str(buf)?,
            rating: wire::get_num(buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MovieRatingsBatch {
    pub message_id: MessageId,
    pub client_id: ClientId,
    pub movie_ratings: Vec<MovieRating>,
}

impl MovieRatingsBatch {
    pub fn with_message_id(
        message_id: MessageId,
        client_id: ClientId,
        movie_ratings: Vec<MovieRating>,
    ) -> Self {
        Self {
            message_id,
            client_id,
            movie_ratings,
        }
    }

    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        wire::put_str(buf, &self.message_id.to_string())?;
        wire::put_str(buf, &self.client_id.to_string())?;
        for movie_rating in &self.movie_ratings {
            movie_rating.encode(buf)?;
        }
        Ok(())
    }

    pub fn decode(buf: &mut &[u8]) -> Result<Self> {
        let message_id: MessageId = wire::get_str(buf)?.parse()?;
        let client_id: ClientId = wire::get_str(buf)?.parse()?;
        let mut movie_ratings = Vec::new();
        while buf.has_remaining() {
            movie_ratings.push(MovieRating::decode(buf)?);
        }
        Ok(Self {
            message_id,
            client_id,
            movie_ratings,
        })
    }

    pub fn to_csv_lines(&self) -> Vec<String> {
        self.movie_ratings.iter().map(MovieRating::to_csv_line).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MovieCredit {
    pub movie_id: i64,
    pub title: String,
    pub cast: Vec<String>,
}

impl MovieCredit {
    pub(crate) fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        wire::put_num(buf, self.movie_id)?;
        wire::put_str(buf, &self.title)?;
        wire::put_str_list(buf, &self.cast)
    }

    pub(crate) fn decode(buf: &mut &[u8]) -> Result<Self> {
        Ok(MovieCredit {
            movie_id: wire::get_num(buf)?,
            title: wire::get_str(buf)?,
            cast: wire::get_str_list(buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MovieCreditsBatch {
    pub message_id: MessageId,
    pub client_id: ClientId,
    pub movie_credits: Vec<MovieCredit>,
}

impl MovieCreditsBatch {
    pub fn with_message_id(
        message_id: MessageId,
        client_id: ClientId,
        movie_credits: Vec<MovieCredit>,
    ) -> Self {
        Self {
            message_id,
            client_id,
            movie_credits,
        }
    }

    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        wire::put_str(buf, &self.message_id.to_string())?;
        wire::put_str(buf, &self.client_id.to_string())?;
        for movie_credit in &self.movie_credits {
            movie_credit.encode(buf)?;
        }
        Ok(())
    }

    pub fn decode(buf: &mut &[u8]) -> Result<Self> {
        let message_id: MessageId = wire::get_str(buf)?.parse()?;
        let client_id: ClientId = wire::get_str(buf)?.parse()?;
        let mut movie_credits = Vec::new();
        while buf.has_remaining() {
            movie_credits.push(MovieCredit::decode(buf)?);
        }
        Ok(Self {
            message_id,
            client_id,
            movie_credits,
        })
    }
}
