//! Stage fabric for the reelgrid pipeline.
//!
//! Everything a worker process is made of lives here: the message-bus
//! contract and its AMQP / in-process implementations, the crash-safe
//! storage adapter, the stage skeleton with the EOF ring, the ingress
//! and results edges, and the health-guard ring that keeps the fleet
//! alive.

pub mod bus;
pub mod cleaner;
pub mod comm;
pub mod dedup;
pub mod error;
pub mod failure;
pub mod guard;
pub mod health;
pub mod results;
pub mod stage;
pub mod storage;

pub use bus::{AmqpBus, InProcBus, MessageBus};
pub use cleaner::DataCleaner;
pub use error::{CoreError, Result};
pub use guard::{ContainerSupervisor, DockerCliSupervisor, HealthGuard};
pub use results::ResultsHandler;
pub use stage::aggregate::{
    AvgRateRevenueBudgetCalculator, MostLeastRatedMovies, TopActorsParticipation,
    TopInvestorCountries,
};
pub use stage::filter::MoviesFilter;
pub use stage::joiner::MoviesJoiner;
pub use stage::router::Router;
pub use stage::sentiment::{LexiconModel, SentimentAnalyzer, SentimentModel};
pub use storage::StorageAdapter;
