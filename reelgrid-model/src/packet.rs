//! The bus envelope: one type tag byte, then the body.

use crate::analyzed::AnalyzedMoviesBatch;
use crate::control::{ClientDisconnected, Eof};
use crate::credit::CreditsBatch;
use crate::error::{ModelError, Result};
use crate::ids::{ClientId, MessageId};
use crate::joined::{MovieCreditsBatch, MovieRatingsBatch};
use crate::movie::MovieField;
use crate::movies_batch::MoviesBatch;
use crate::rating::RatingsBatch;
use crate::results::{ActorParticipation, AvgRateRevenueBudget, InvestorCountry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    MoviesBatch = 1,
    Eof = 2,
    InvestorCountry = 3,
    RatingsBatch = 4,
    MovieRatingsBatch = 5,
    CreditsBatch = 6,
    MovieCreditsBatch = 7,
    ActorParticipation = 8,
    AnalyzedMoviesBatch = 9,
    AvgRateRevenueBudget = 10,
    ClientDisconnected = 11,
}

impl PacketKind {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        Ok(match tag {
            1 => PacketKind::MoviesBatch,
            2 => PacketKind::Eof,
            3 => PacketKind::InvestorCountry,
            4 => PacketKind::RatingsBatch,
            5 => PacketKind::MovieRatingsBatch,
            6 => PacketKind::CreditsBatch,
            7 => PacketKind::MovieCreditsBatch,
            8 => PacketKind::ActorParticipation,
            9 => PacketKind::AnalyzedMoviesBatch,
            10 => PacketKind::AvgRateRevenueBudget,
            11 => PacketKind::ClientDisconnected,
            other => return Err(ModelError::UnknownPacketType(other)),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Movies(MoviesBatch),
    Eof(Eof),
    InvestorCountry(InvestorCountry),
    Ratings(RatingsBatch),
    MovieRatings(MovieRatingsBatch),
    Credits(CreditsBatch),
    MovieCredits(MovieCreditsBatch),
    ActorParticipation(ActorParticipation),
    AnalyzedMovies(AnalyzedMoviesBatch),
    AvgRateRevenueBudget(AvgRateRevenueBudget),
    ClientDisconnected(ClientDisconnected),
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Movies(_) => PacketKind::MoviesBatch,
            Packet::Eof(_) => PacketKind::Eof,
            Packet::InvestorCountry(_) => PacketKind::InvestorCountry,
            Packet::Ratings(_) => PacketKind::RatingsBatch,
            Packet::MovieRatings(_) => PacketKind::MovieRatingsBatch,
            Packet::Credits(_) => PacketKind::CreditsBatch,
            Packet::MovieCredits(_) => PacketKind::MovieCreditsBatch,
            Packet::ActorParticipation(_) => PacketKind::ActorParticipation,
            Packet::AnalyzedMovies(_) => PacketKind::AnalyzedMoviesBatch,
            Packet::AvgRateRevenueBudget(_) => PacketKind::AvgRateRevenueBudget,
            Packet::ClientDisconnected(_) => PacketKind::ClientDisconnected,
        }
    }

    pub fn client_id(&self) -> ClientId {
        match self {
            Packet::Movies(p) => p.client_id,
            Packet::Eof(p) => p.client_id,
            Packet::InvestorCountry(p) => p.client_id,
            Packet::Ratings(p) => p.client_id,
            Packet::MovieRatings(p) => p.client_id,
            Packet::Credits(p) => p.client_id,
            Packet::MovieCredits(p) => p.client_id,
            Packet::ActorParticipation(p) => p.client_id,
            Packet::AnalyzedMovies(p) => p.client_id,
            Packet::AvgRateRevenueBudget(p) => p.client_id,
            Packet::ClientDisconnected(p) => p.client_id,
        }
    }

    pub fn message_id(&self) -> MessageId {
        match self {
            Packet::Movies(p) => p.message_id,
            Packet::Eof(p) => p.message_id,
            Packet::InvestorCountry(p) => p.message_id,
            Packet::Ratings(p) => p.message_id,
            Packet::MovieRatings(p) => p.message_id,
            Packet::Credits(p) => p.message_id,
            Packet::MovieCredits(p) => p.message_id,
            Packet::ActorParticipation(p) => p.message_id,
            Packet::AnalyzedMovies(p) => p.message_id,
            Packet::AvgRateRevenueBudget(p) => p.message_id,
            Packet::ClientDisconnected(p) => p.message_id,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = vec![self.kind().tag()];
        match self {
            Packet::Movies(p) => p.encode(&mut buf)?,
            Packet::Eof(p) => p.encode(&mut buf)?,
            Packet::InvestorCountry(p) => p.encode(&mut buf)?,
            Packet::Ratings(p) => p.encode(&mut buf)?,
            Packet::MovieRatings(p) => p.encode(&mut buf)?,
            Packet::Credits(p) => p.encode(&mut buf)?,
            Packet::MovieCredits(p) => p.encode(&mut buf)?,
            Packet::ActorParticipation(p) => p.encode(&mut buf)?,
            Packet::AnalyzedMovies(p) => p.encode(&mut buf)?,
            Packet::AvgRateRevenueBudget(p) => p.encode(&mut buf)?,
            Packet::ClientDisconnected(p) => p.encode(&mut buf)?,
        }
        Ok(buf)
    }

    /// `MoviesBatch` with column projection; everything else ignores the
    /// subset (only movie batches are field-tagged).
    pub fn encode_movies_subset(batch: &MoviesBatch, subset: &[MovieField]) -> Result<Vec<u8>> {
        let mut buf = vec![PacketKind::MoviesBatch.tag()];
        batch.encode_subset(&mut buf, subset)?;
        Ok(buf)
    }

    pub fn decode(packet: &[u8]) -> Result<Self> {
        let (&tag, mut body) = packet
            .split_first()
            .ok_or_else(|| ModelError::Codec("empty packet".to_string()))?;
        Ok(match PacketKind::from_tag(tag)? {
            PacketKind::MoviesBatch => Packet::Movies(MoviesBatch::decode(&mut body)?),
            PacketKind::Eof => Packet::Eof(Eof::decode(&mut body)?),
            PacketKind::InvestorCountry => {
                Packet::InvestorCountry(InvestorCountry::decode(&mut body)?)
            }
            PacketKind::RatingsBatch => Packet::Ratings(RatingsBatch::decode(&mut body)?),
            PacketKind::MovieRatingsBatch => {
                Packet::MovieRatings(MovieRatingsBatch::decode(&mut body)?)
            }
            PacketKind::CreditsBatch => Packet::Credits(CreditsBatch::decode(&mut body)?),
            PacketKind::MovieCreditsBatch => {
                Packet::MovieCredits(MovieCreditsBatch::decode(&mut body)?)
            }
            PacketKind::ActorParticipation => {
                Packet::ActorParticipation(ActorParticipation::decode(&mut body)?)
            }
            PacketKind::AnalyzedMoviesBatch => {
                Packet::AnalyzedMovies(AnalyzedMoviesBatch::decode(&mut body)?)
            }
            PacketKind::AvgRateRevenueBudget => {
                Packet::AvgRateRevenueBudget(AvgRateRevenueBudget::decode(&mut body)?)
            }
            PacketKind::ClientDisconnected => {
                Packet::ClientDisconnected(ClientDisconnected::decode(&mut body)?)
            }
        })
    }
}

impl From<MoviesBatch> for Packet {
    fn from(p: MoviesBatch) -> Self {
        Packet::Movies(p)
    }
}

impl From<Eof> for Packet {
    fn from(p: Eof) -> Self {
        Packet::Eof(p)
    }
}

impl From<InvestorCountry> for Packet {
    fn from(p: InvestorCountry) -> Self {
        Packet::InvestorCountry(p)
    }
}

impl From<RatingsBatch> for Packet {
    fn from(p: RatingsBatch) -> Self {
        Packet::Ratings(p)
    }
}

impl From<MovieRatingsBatch> for Packet {
    fn from(p: MovieRatingsBatch) -> Self {
        Packet::MovieRatings(p)
    }
}

impl From<CreditsBatch> for Packet {
    fn from(p: CreditsBatch) -> Self {
        Packet::Credits(p)
    }
}

impl From<MovieCreditsBatch> for Packet {
    fn from(p: MovieCreditsBatch) -> Self {
        Packet::MovieCredits(p)
    }
}

impl From<ActorParticipation> for Packet {
    fn from(p: ActorParticipation) -> Self {
        Packet::ActorParticipation(p)
    }
}

impl From<AnalyzedMoviesBatch> for Packet {
    fn from(p: AnalyzedMoviesBatch) -> Self {
        Packet::AnalyzedMovies(p)
    }
}

impl From<AvgRateRevenueBudget> for Packet {
    fn from(p: AvgRateRevenueBudget) -> Self {
        Packet::AvgRateRevenueBudget(p)
    }
}

impl From<ClientDisconnected> for Packet {
    fn from(p: ClientDisconnected) -> Self {
        Packet::ClientDisconnected(p)
    }
}
