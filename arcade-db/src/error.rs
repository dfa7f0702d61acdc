use thiserror::Error;
use tokio_rusqlite::rusqlite;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("database connection error: {0}")]
    Connection(#[from] tokio_rusqlite::Error),

    #[error("arcade not found")]
    ArcadeNotFound,

    #[error("seat is held by another user")]
    SeatOccupied { holder: String },

    #[error("email already in use")]
    EmailInUse,
}

pub type Result<T> = std::result::Result<T, DbError>;
