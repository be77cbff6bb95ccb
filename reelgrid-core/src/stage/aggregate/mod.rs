//! The four stateful calculators behind the query outputs.
//!
//! They share one shape: per-client state created lazily on the first
//! batch, snapshotted after every mutation, deduped by message id, and
//! deleted on EOF (results already emitted) or client disconnect.

pub mod actors;
pub mod investors;
pub mod rated;
pub mod revenue;

use std::collections::HashMap;

use reelgrid_model::ClientId;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::Result;
use crate::storage::StorageAdapter;

pub use actors::TopActorsParticipation;
pub use investors::TopInvestorCountries;
pub use rated::MostLeastRatedMovies;
pub use revenue::AvgRateRevenueBudgetCalculator;

const STATE_FILE_KEY: &str = "state";

/// Per-client aggregation states with their persistent shadow.
pub(crate) struct ClientStates<S> {
    storage: StorageAdapter,
    states: HashMap<ClientId, S>,
}

impl<S> ClientStates<S>
where
    S: Serialize + DeserializeOwned + Default,
{
    pub(crate) fn load(storage: StorageAdapter) -> Result<Self> {
        let mut states = HashMap::new();
        for (secondary, state) in storage.load_all::<S>(STATE_FILE_KEY)? {
            match secondary.parse::<ClientId>() {
                Ok(client_id) => {
                    states.insert(client_id, state);
                }
                Err(_) => {
                    warn!(file_suffix = %secondary, "ignoring state file with malformed client id");
                }
            }
        }
        if !states.is_empty() {
            debug!(clients = states.len(), "aggregator state restored");
        }
        Ok(Self { storage, states })
    }

    pub(crate) fn entry(&mut self, client_id: ClientId) -> &mut S {
        self.states.entry(client_id).or_default()
    }

    pub(crate) fn get(&self, client_id: &ClientId) -> Option<&S> {
        self.states.get(client_id)
    }

    /// Snapshot one client's state; call after every mutation.
    pub(crate) fn persist(&self, client_id: &ClientId) -> Result<()> {
        if let Some(state) = self.states.get(client_id) {
            self.storage
                .update(STATE_FILE_KEY, Some(&client_id.to_string()), state)?;
        }
        Ok(())
    }

    pub(crate) fn remove(&mut self, client_id: &ClientId) -> Result<()> {
        if self.states.remove(client_id).is_some() {
            debug!(client_id = %client_id, "client state deleted");
        }
        self.storage
            .delete(STATE_FILE_KEY, Some(&client_id.to_string()))
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, client_id: &ClientId) -> bool {
        self.states.contains_key(client_id)
    }
}
