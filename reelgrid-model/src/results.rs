//! Aggregator emissions: one record per result row.

use crate::analyzed::Sentiment;
use crate::error::Result;
use crate::ids::{ClientId, MessageId};
use crate::wire;

#[derive(Debug, Clone, PartialEq)]
pub struct InvestorCountry {
    pub message_id: MessageId,
    pub client_id: ClientId,
    pub country: String,
    pub investment: i64,
}

impl InvestorCountry {
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        wire::put_str(buf, &self.message_id.to_string())?;
        wire::put_str(buf, &self.client_id.to_string())?;
        wire::put_str(buf, &self.country)?;
        wire::put_num(buf, self.investment)
    }

    pub fn decode(buf: &mut &[u8]) -> Result<Self> {
        Ok(Self {
            message_id: wire::get_str(buf)?.parse()?,
            client_id: wire::get_str(buf)?.parse()?,
            country: wire::get_str(buf)?,
            investment: wire::get_num(buf)?,
        })
    }

    pub fn to_csv_line(&self) -> String {
        format!("{},{}", self.country, self.investment)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActorParticipation {
    pub message_id: MessageId,
    pub client_id: ClientId,
    pub actor: String,
    pub participation: u64,
}

impl ActorParticipation {
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        wire::put_str(buf, &self.message_id.to_string())?;
        wire::put_str(buf, &self.client_id.to_string())?;
        wire::put_str(buf, &self.actor)?;
        wire::put_num(buf, self.participation)
    }

    pub fn decode(buf: &mut &[u8]) -> Result<Self> {
        Ok(Self {
            message_id: wire::get_str(buf)?.parse()?,
            client_id: wire::get_str(buf)?.parse()?,
            actor: wire::get_str(buf)?,
            participation: wire::get_num(buf)?,
        })
    }

    pub fn to_csv_line(&self) -> String {
        format!("{},{}", self.actor, self.participation)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AvgRateRevenueBudget {
    pub message_id: MessageId,
    pub client_id: ClientId,
    pub sentiment: Sentiment,
    pub avg: f64,
}

impl AvgRateRevenueBudget {
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        wire::put_str(buf, &self.message_id.to_string())?;
        wire::put_str(buf, &self.client_id.to_string())?;
        wire::put_num(buf, self.sentiment.value())?;
        wire::put_num(buf, self.avg)
    }

    pub fn decode(buf: &mut &[u8]) -> Result<Self> {
        Ok(Self {
            message_id: wire::get_str(buf)?.parse()?,
            client_id: wire::get_str(buf)?.parse()?,
            sentiment: Sentiment::from_value(wire::get_num(buf)?)?,
            avg: wire::get_num(buf)?,
        })
    }

    pub fn to_csv_line(&self) -> String {
        format!("{},{}", self.sentiment, self.avg)
    }
}
