//! Field-tagged columnar serialization for movie batches.
//!
//! The payload is `batch_size(2 BE)` followed by one block per present
//! field: `field_tag(1)` and then `batch_size` encoded values. A field
//! is present iff every item in the batch carries it; mixed batches are
//! rejected so decode can assign values positionally.

use bytes::{Buf, BufMut};

use crate::error::{ModelError, Result};
use crate::ids::{ClientId, MessageId};
use crate::movie::{Movie, MovieField};
use crate::wire;

const LENGTH_BATCH_SIZE: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct MoviesBatch {
    pub message_id: MessageId,
    pub client_id: ClientId,
    pub movies: Vec<Movie>,
}

impl MoviesBatch {
    pub fn new(client_id: ClientId, movies: Vec<Movie>) -> Self {
        Self {
            message_id: MessageId::new(),
            client_id,
            movies,
        }
    }

    pub fn with_message_id(message_id: MessageId, client_id: ClientId, movies: Vec<Movie>) -> Self {
        Self {
            message_id,
            client_id,
            movies,
        }
    }

    /// Serialize carrying every field that all items share.
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        self.encode_fields(buf, None)
    }

    /// Serialize carrying only `subset` (column projection). Every item
    /// must carry every requested field.
    pub fn encode_subset(&self, buf: &mut Vec<u8>, subset: &[MovieField]) -> Result<()> {
        self.encode_fields(buf, Some(subset))
    }

    fn encode_fields(&self, buf: &mut Vec<u8>, subset: Option<&[MovieField]>) -> Result<()> {
        wire::put_str(buf, &self.message_id.to_string())?;
        wire::put_str(buf, &self.client_id.to_string())?;

        let batch_size = u16::try_from(self.movies.len())
            .map_err(|_| ModelError::Codec(format!("batch of {} movies too large", self.movies.len())))?;
        buf.put_u16(batch_size);

        let fields: Vec<MovieField> = match subset {
            Some(subset) => subset.to_vec(),
            None => MovieField::ALL
                .into_iter()
                .filter(|f| self.movies.iter().any(|m| f.is_present(m)))
                .collect(),
        };

        for field in fields {
            let present = self.movies.iter().filter(|m| field.is_present(m)).count();
            if present != self.movies.len() {
                return Err(ModelError::Codec(format!(
                    "not all movies carry field {field:?}"
                )));
            }
            buf.put_u8(field.tag());
            for movie in &self.movies {
                Self::encode_value(buf, field, movie)?;
            }
        }
        Ok(())
    }

    fn encode_value(buf: &mut Vec<u8>, field: MovieField, movie: &Movie) -> Result<()> {
        match field {
            MovieField::Id => wire::put_opt_num(buf, movie.id),
            MovieField::Title => wire::put_opt_str(buf, movie.title.as_deref()),
            MovieField::Genres => {
                wire::put_str_list(buf, movie.genres.as_deref().unwrap_or_default())
            }
            MovieField::ProductionCountries => wire::put_str_list(
                buf,
                movie.production_countries.as_deref().unwrap_or_default(),
            ),
            MovieField::ReleaseDate => wire::put_opt_date(buf, movie.release_date),
            MovieField::Budget => wire::put_opt_num(buf, movie.budget),
            MovieField::Overview => wire::put_opt_str(buf, movie.overview.as_deref()),
            MovieField::Revenue => wire::put_opt_num(buf, movie.revenue),
        }
    }

    pub fn decode(buf: &mut &[u8]) -> Result<Self> {
        let message_id: MessageId = wire::get_str(buf)?.parse()?;
        let client_id: ClientId = wire::get_str(buf)?.parse()?;

        if buf.remaining() < LENGTH_BATCH_SIZE {
            return Err(ModelError::Codec("truncated batch size".to_string()));
        }
        let batch_size = buf.get_u16() as usize;
        let mut movies = vec![Movie::default(); batch_size];

        while buf.has_remaining() {
            let tag = buf.get_u8();
            let field = MovieField::from_tag(tag)
                .ok_or_else(|| ModelError::Codec(format!("unknown movie field tag: {tag}")))?;
            for movie in movies.iter_mut() {
                Self::decode_value(buf, field, movie)?;
            }
        }

        Ok(Self {
            message_id,
            client_id,
            movies,
        })
    }

    fn decode_value(buf: &mut &[u8], field: MovieField, movie: &mut Movie) -> Result<()> {
        match field {
            MovieField::Id => movie.id = wire::get_opt_num(buf)?,
            MovieField::Title => movie.title = wire::get_opt_str(buf)?.or(Some(String::new())),
            MovieField::Genres => movie.genres = Some(wire::get_str_list(buf)?),
            MovieField::ProductionCountries => {
                movie.production_countries = Some(wire::get_str_list(buf)?)
            }
            MovieField::ReleaseDate => movie.release_date = wire::get_opt_date(buf)?,
            MovieField::Budget => movie.budget = wire::get_opt_num(buf)?,
            MovieField::Overview => movie.overview = wire::get_opt_str(buf)?.or(Some(String::new())),
            MovieField::Revenue => movie.revenue = wire::get_opt_num(buf)?,
        }
        Ok(())
    }

    pub fn to_csv_lines(&self) -> Vec<String> {
        self.movies.iter().map(Movie::to_csv_line).collect()
    }
}
