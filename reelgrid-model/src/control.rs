//! Control packets: stream termination and client cleanup.

use std::collections::BTreeSet;

use crate::error::Result;
use crate::ids::{ClientId, MessageId};
use crate::wire;

/// The EOF ring token.
///
/// It circulates through a cluster's input queue until every shard id
/// is in `seen_ids`; union is idempotent, so redelivery is harmless.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eof {
    pub message_id: MessageId,
    pub client_id: ClientId,
    pub seen_ids: BTreeSet<u32>,
}

impl Eof {
    pub fn new(client_id: ClientId) -> Self {
        Self {
            message_id: MessageId::new(),
            client_id,
            seen_ids: BTreeSet::new(),
        }
    }

    pub fn with_message_id(message_id: MessageId, client_id: ClientId) -> Self {
        Self {
            message_id,
            client_id,
            seen_ids: BTreeSet::new(),
        }
    }

    pub fn add_seen_id(&mut self, worker_id: u32) {
        self.seen_ids.insert(worker_id);
    }

    pub fn ring_complete(&self, cluster_size: u32) -> bool {
        self.seen_ids.len() as u32 == cluster_size
    }

    pub fn min_seen_id(&self) -> Option<u32> {
        self.seen_ids.iter().next().copied()
    }

    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        wire::put_str(buf, &self.message_id.to_string())?;
        wire::put_str(buf, &self.client_id.to_string())?;
        let ids: Vec<String> = self.seen_ids.iter().map(u32::to_string).collect();
        wire::put_str_list(buf, &ids)
    }

    pub fn decode(buf: &mut &[u8]) -> Result<Self> {
        let message_id: MessageId = wire::get_str(buf)?.parse()?;
        let client_id: ClientId = wire::get_str(buf)?.parse()?;
        let mut seen_ids = BTreeSet::new();
        for raw in wire::get_str_list(buf)? {
            seen_ids.insert(raw.parse().map_err(|_| {
                crate::error::ModelError::Codec(format!("invalid worker id: {raw}"))
            })?);
        }
        Ok(Self {
            message_id,
            client_id,
            seen_ids,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientDisconnected {
    pub message_id: MessageId,
    pub client_id: ClientId,
}

impl ClientDisconnected {
    pub fn new(client_id: ClientId) -> Self {
        Self {
            message_id: MessageId::new(),
            client_id,
        }
    }

    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        wire::put_str(buf, &self.message_id.to_string())?;
        wire::put_str(buf, &self.client_id.to_string())
    }

    pub fn decode(buf: &mut &[u8]) -> Result<Self> {
        Ok(Self {
            message_id: wire::get_str(buf)?.parse()?,
            client_id: wire::get_str(buf)?.parse()?,
        })
    }
}
