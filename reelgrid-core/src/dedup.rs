//! Bounded processed-message-id set.
//!
//! Stateful handlers reject batches whose id they already incorporated.
//! The set keeps the 500 newest ids by insertion time and evicts the
//! oldest beyond that; after an eviction a very late duplicate can slip
//! through, which the at-least-once design already tolerates.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use reelgrid_model::MessageId;
use serde::{Deserialize, Serialize};

pub const MAX_PROCESSED_MESSAGE_IDS: usize = 500;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProcessedIds {
    seen: HashMap<MessageId, u64>,
}

impl ProcessedIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.seen.contains_key(id)
    }

    pub fn insert(&mut self, id: MessageId) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        self.seen.insert(id, now);
        if self.seen.len() > MAX_PROCESSED_MESSAGE_IDS {
            if let Some(oldest) = self
                .seen
                .iter()
                .min_by_key(|(_, inserted)| **inserted)
                .map(|(id, _)| *id)
            {
                self.seen.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
