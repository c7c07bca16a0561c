use ulid::Ulid;

use crate::model::WorkshopId;

/// Failures raised by the storage layer.
#[derive(Debug)]
pub enum StoreError {
    /// The exclusion constraint refused a row overlapping `conflicting`.
    ExclusionViolation {
        workshop_id: WorkshopId,
        conflicting: Ulid,
    },
    /// A write was attempted inside a transaction that holds no workshop row.
    UnknownWorkshop(WorkshopId),
    /// Replayed log contents contradict the store's invariants.
    Corrupt(String),
    WalError(String),
    Io(std::io::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::ExclusionViolation {
                workshop_id,
                conflicting,
            } => write!(
                f,
                "exclusion constraint violated on workshop {workshop_id}: overlaps booking {conflicting}"
            ),
            StoreError::UnknownWorkshop(id) => write!(f, "unknown workshop: {id}"),
            StoreError::Corrupt(msg) => write!(f, "corrupt store: {msg}"),
            StoreError::WalError(e) => write!(f, "WAL error: {e}"),
            StoreError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e)
    }
}
