use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bus error: {0}")]
    Bus(#[from] lapin::Error),

    #[error("codec error: {0}")]
    Model(#[from] reelgrid_model::ModelError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("injected failure {0}")]
    InjectedFailure(String),

    #[error("connection closed: {0}")]
    Disconnected(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
