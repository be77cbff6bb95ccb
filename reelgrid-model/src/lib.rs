//! Record types, identifiers and the wire codec shared by every stage of
//! the reelgrid pipeline.
//!
//! Everything that travels on the bus is a [`Packet`]: a one-byte type
//! tag followed by a body that starts with a `message_id` and a
//! `client_id`. Batches are flat collections of homogeneous items;
//! control packets ([`Eof`], [`ClientDisconnected`]) drive stage
//! termination and per-client cleanup.

pub mod analyzed;
pub mod control;
pub mod credit;
pub mod error;
pub mod ids;
pub mod joined;
pub mod lines;
pub mod movie;
pub mod movies_batch;
pub mod packet;
pub mod rating;
pub mod results;
pub mod wire;

pub use analyzed::{AnalyzedMovie, AnalyzedMoviesBatch, Sentiment};
pub use control::{ClientDisconnected, Eof};
pub use credit::{Credit, CreditsBatch};
pub use error::{ModelError, Result};
pub use ids::{ClientId, MessageId};
pub use joined::{MovieCredit, MovieCreditsBatch, MovieRating, MovieRatingsBatch};
pub use movie::{Movie, MovieField};
pub use movies_batch::MoviesBatch;
pub use packet::{Packet, PacketKind};
pub use rating::{Rating, RatingsBatch};
pub use results::{ActorParticipation, AvgRateRevenueBudget, InvestorCountry};
