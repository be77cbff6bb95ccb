use bytes::Buf;

use crate::error::{ModelError, Result};
use crate::ids::{ClientId, MessageId};
use crate::movie::{parse_decimal_float, parse_decimal_int, split_csv_fields};
use crate::wire;

const TOTAL_FIELDS_IN_CSV_LINE: usize = 4;
const MOVIE_ID_COLUMN: usize = 1;
const RATING_COLUMN: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct Rating {
    pub movie_id: i64,
    pub rating: f64,
}

impl Rating {
    pub fn from_csv_line(line: &str) -> Result<Self> {
        let fields = split_csv_fields(line)?;
        if fields.len() != TOTAL_FIELDS_IN_CSV_LINE {
            return Err(ModelError::InvalidLine(format!(
                "invalid amount of line fields: {}",
                fields.len()
            )));
        }
        Ok(Rating {
            movie_id: parse_decimal_int(&fields[MOVIE_ID_COLUMN], "movie_id")?,
            rating: parse_decimal_float(&fields[RATING_COLUMN], "rating")?,
        })
    }

    pub(crate) fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        wire::put_num(buf, self.movie_id)?;
        wire::put_num(buf, self.rating)
    }

    pub(crate) fn decode(buf: &mut &[u8]) -> Result<Self> {
        Ok(Rating {
            movie_id: wire::get_num(buf)?,
            rating: wire::get_num(buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RatingsBatch {
    pub message_id: MessageId,
    pub client_id: ClientId,
    pub ratings: Vec<Rating>,
}

impl RatingsBatch {
    pub fn new(client_id: ClientId, ratings: Vec<Rating>) -> Self {
        Self {
            message_id: MessageId::new(),
            client_id,
            ratings,
        }
    }

    pub fn with_message_id(message_id: MessageId, client_id: ClientId, ratings: Vec<Rating>) -> Self {
        Self {
            message_id,
            client_id,
            ratings,
        }
    }

    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        wire::put_str(buf, &self.message_id.to_string())?;
        wire::put_str(buf, &self.client_id.to_string())?;
        for rating in &self.ratings {
            rating.encode(buf)?;
        }
        Ok(())
    }

    pub fn decode(buf: &mut &[u8]) -> Result<Self> {
        let message_id: MessageId = wire::get_str(buf)?.parse()?;
        let client_id: ClientId = wire::get_str(buf)?.parse()?;
        let mut ratings = Vec::new();
        while buf.has_remaining() {
            ratings.push(Rating::decode(buf)?);
        }
        Ok(Self {
            message_id,
            client_id,
            ratings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_ratings_line() {
        let rating = Rating::from_csv_line("1,31,2.5,1260759144").unwrap();
        assert_eq!(rating.movie_id, 31);
        assert_eq!(rating.rating, 2.5);
    }

    #[test]
    fn rejects_negative_or_textual_values() {
        assert!(Rating::from_csv_line("1,-31,2.5,1260759144").is_err());
        assert!(Rating::from_csv_line("1,31,bad,1260759144").is_err());
        assert!(Rating::from_csv_line("1,31,2.5").is_err());
    }

    #[test]
    fn batch_round_trips() {
        let batch = RatingsBatch::new(
            ClientId::new(),
            vec![
                Rating {
                    movie_id: 1,
                    rating: 5.0,
                },
                Rating {
                    movie_id: 2,
                    rating: 1.5,
                },
            ],
        );
        let mut buf = Vec::new();
        batch.encode(&mut buf).unwrap();
        let mut view: &[u8] = &buf;
        assert_eq!(RatingsBatch::decode(&mut view).unwrap(), batch);
    }
}
