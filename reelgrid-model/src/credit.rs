use bytes::Buf;

use crate::error::{ModelError, Result};
use crate::ids::{ClientId, MessageId};
use crate::movie::{embedded_names, parse_decimal_int, split_csv_fields};
use crate::wire;

const TOTAL_FIELDS_IN_CSV_LINE: usize = 3;
const CAST_COLUMN: usize = 0;
const MOVIE_ID_COLUMN: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct Credit {
    pub movie_id: i64,
    pub cast: Vec<String>,
}

impl Credit {
    pub fn from_csv_line(line: &str) -> Result<Self> {
        let fields = split_csv_fields(line)?;
        if fields.len() != TOTAL_FIELDS_IN_CSV_LINE {
            return Err(ModelError::InvalidLine(format!(
                "invalid amount of line fields: {}",
                fields.len()
            )));
        }
        if fields[CAST_COLUMN].is_empty() {
            return Err(ModelError::InvalidLine("invalid cast: empty".to_string()));
        }
        Ok(Credit {
            movie_id: parse_decimal_int(&fields[MOVIE_ID_COLUMN], "movie_id")?,
            // A malformed cast column degrades to no actors.
            cast: embedded_names(&fields[CAST_COLUMN]),
        })
    }

    pub(crate) fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        wire::put_num(buf, self.movie_id)?;
        wire::put_str_list(buf, &self.cast)
    }

    pub(crate) fn decode(buf: &mut &[u8]) -> Result<Self> {
        Ok(Credit {
            movie_id: wire::get_num(buf)?,
            cast: wire::get_str_list(buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreditsBatch {
    pub message_id: MessageId,
    pub client_id: ClientId,
    pub credits: Vec<Credit>,
}

impl CreditsBatch {
    pub fn new(client_id: ClientId, credits: Vec<Credit>) -> Self {
        Self {
            message_id: MessageId::new(),
            client_id,
            credits,
        }
    }

    pub fn with_message_id(message_id: MessageId, client_id: ClientId, credits: Vec<Credit>) -> Self {
        Self {
            message_id,
            client_id,
            credits,
        }
    }

    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        wire::put_str(buf, &self.message_id.to_string())?;
        wire::put_str(buf, &self.client_id.to_string())?;
        for credit in &self.credits {
            credit.encode(buf)?;
        }
        Ok(())
    }

    pub fn decode(buf: &mut &[u8]) -> Result<Self> {
        let message_id: MessageId = wire::get_str(buf)?.parse()?;
        let client_id: ClientId = wire::get_str(buf)?.parse()?;
        let mut credits = Vec::new();
        while buf.has_remaining() {
            credits.push(Credit::decode(buf)?);
        }
        Ok(Self {
            message_id,
            client_id,
            credits,
        })
    }
}
