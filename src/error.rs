//! Failure taxonomy for booking admission.

use crate::engine::StoreError;
use crate::model::{BookingId, WorkshopId};
use crate::time::TimeError;

/// Who can fix a failure, and how it should be surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unparseable input. Rejected before any storage access.
    Malformed,
    /// Booking shape is wrong; the client can correct it.
    Validation,
    /// Stored data rejects the booking; the client can pick another slot.
    Domain,
    /// Opaque to the client beyond "internal error".
    Infra,
}

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("{0}")]
    Malformed(String),
    #[error(transparent)]
    InvalidTime(TimeError),

    #[error("begin_at is in the past")]
    PastBeginTime,
    #[error("end_at is before begin_at")]
    InvertedRange,
    #[error("invalid booking duration: must be in range [30m, 4h]")]
    InvalidDuration,

    #[error("booking is out of workshop schedule")]
    OutOfSchedule,
    #[error("booking overlaps with another booking")]
    Overlap,

    #[error("no schedule for workshop {0}")]
    ScheduleNotFound(WorkshopId),
    #[error("schedule of workshop {workshop_id} is unusable: {source}")]
    ScheduleTimezone {
        workshop_id: WorkshopId,
        source: TimeError,
    },
    #[error("stored booking {id} is unreadable: {source}")]
    CorruptBooking { id: BookingId, source: TimeError },
    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),
    #[error("operation cancelled")]
    Cancelled,
}

impl BookingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BookingError::Malformed(_) | BookingError::InvalidTime(_) => ErrorKind::Malformed,
            BookingError::PastBeginTime
            | BookingError::InvertedRange
            | BookingError::InvalidDuration => ErrorKind::Validation,
            BookingError::OutOfSchedule | BookingError::Overlap => ErrorKind::Domain,
            BookingError::ScheduleNotFound(_)
            | BookingError::ScheduleTimezone { .. }
            | BookingError::CorruptBooking { .. }
            | BookingError::Storage(_)
            | BookingError::Cancelled => ErrorKind::Infra,
        }
    }

    /// Short stable label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            BookingError::Malformed(_) => "malformed",
            BookingError::InvalidTime(TimeError::InvalidTimezone(_)) => "invalid_timezone",
            BookingError::InvalidTime(_) => "invalid_time_format",
            BookingError::PastBeginTime => "past_begin_time",
            BookingError::InvertedRange => "inverted_range",
            BookingError::InvalidDuration => "invalid_duration",
            BookingError::OutOfSchedule => "out_of_schedule",
            BookingError::Overlap => "overlap",
            BookingError::ScheduleNotFound(_) => "schedule_not_found",
            BookingError::ScheduleTimezone { .. } => "schedule_timezone",
            BookingError::CorruptBooking { .. } => "corrupt_booking",
            BookingError::Storage(_) => "storage",
            BookingError::Cancelled => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds() {
        assert_eq!(BookingError::Malformed("x".into()).kind(), ErrorKind::Malformed);
        assert_eq!(
            BookingError::InvalidTime(TimeError::InvalidTimezone("x".into())).kind(),
            ErrorKind::Malformed
        );
        assert_eq!(BookingError::PastBeginTime.kind(), ErrorKind::Validation);
        assert_eq!(BookingError::InvalidDuration.kind(), ErrorKind::Validation);
        assert_eq!(BookingError::Overlap.kind(), ErrorKind::Domain);
        assert_eq!(BookingError::OutOfSchedule.kind(), ErrorKind::Domain);
        assert_eq!(BookingError::ScheduleNotFound(1).kind(), ErrorKind::Infra);
        assert_eq!(
            BookingError::ScheduleTimezone {
                workshop_id: 1,
                source: TimeError::InvalidTimezone("Nowhere".into()),
            }
            .kind(),
            ErrorKind::Infra
        );
        assert_eq!(
            BookingError::Storage(StoreError::WalError("down".into())).kind(),
            ErrorKind::Infra
        );
    }

    #[test]
    fn schedule_timezone_is_not_a_missing_schedule() {
        let e = BookingError::ScheduleTimezone {
            workshop_id: 4,
            source: TimeError::InvalidTimezone("Nowhere".into()),
        };
        assert_ne!(e.reason(), BookingError::ScheduleNotFound(4).reason());
    }
}
