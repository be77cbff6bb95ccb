use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("invalid line: {0}")]
    InvalidLine(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("unknown packet type: {0}")]
    UnknownPacketType(u8),

    #[error("invalid id: {0}")]
    InvalidId(String),
}

pub type Result<T> = std::result::Result<T, ModelError>;
