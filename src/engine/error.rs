use ulid::Ulid;

use crate::model::BookingStatus;

#[derive(Debug)]
pub enum EngineError {
    /// Malformed input, rejected before anything is persisted.
    Validation(&'static str),
    /// Overlap with existing approved bookings; carries every conflicting id
    /// so the caller can show the human what is in the way.
    Conflict(Vec<Ulid>),
    /// Operation requested against a booking not in the required source state.
    InvalidTransition {
        id: Ulid,
        status: BookingStatus,
        action: &'static str,
    },
    NotFound(Ulid),
    LimitExceeded(&'static str),
    Wal(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "validation failed: {msg}"),
            EngineError::Conflict(ids) => {
                write!(f, "conflicts with {} approved booking(s):", ids.len())?;
                for id in ids {
                    write!(f, " {id}")?;
                }
                Ok(())
            }
            EngineError::InvalidTransition { id, status, action } => {
                write!(f, "cannot {action} booking {id} with status {status}")
            }
            EngineError::NotFound(id) => write!(f, "booking not found: {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Wal(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
