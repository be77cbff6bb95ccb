//! Layered configuration for every reelgrid role.
//!
//! A `config.ini` file provides defaults; environment variables override
//! it key by key. Compound values use flat comma syntax parsed by the
//! helpers in [`parse`].

pub mod error;
pub mod parse;
pub mod roles;
pub mod settings;

pub use error::{ConfigError, Result};
pub use parse::{FilterValues, JoinKind, QueueSpec, ShardedOutput};
pub use roles::{
    AggregatorSettings, CleanerSettings, ClientSettings, CommonSettings, FilterSettings,
    GuardSettings, JoinerSettings, ResultsSettings, RouterSettings, SentimentSettings,
};
pub use settings::Settings;
