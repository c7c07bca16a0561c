//! Stateless pre-checks run before a booking touches storage.

use crate::error::BookingError;
use crate::limits::{MAX_BOOKING_DURATION_MS, MIN_BOOKING_DURATION_MS};
use crate::model::{BookingDraft, Ms, Span};

/// A draft that passed admission. Only [`validate`] constructs one, so the
/// store never sees an unvalidated candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidBooking {
    draft: BookingDraft,
    span: Span,
}

impl ValidBooking {
    pub fn draft(&self) -> &BookingDraft {
        &self.draft
    }

    pub fn span(&self) -> Span {
        self.span
    }
}

/// Check, in order: not in the past, not inverted, duration within
/// [30m, 4h] inclusive. The first failure wins.
///
/// `now` is compared as an absolute instant, which is the same instant
/// whichever zone the client observes it in.
pub fn validate(draft: BookingDraft, now: Ms) -> Result<ValidBooking, BookingError> {
    let begin = draft.begin_ms();
    let end = draft.end_ms();

    if begin < now {
        return Err(BookingError::PastBeginTime);
    }
    if end < begin {
        return Err(BookingError::InvertedRange);
    }
    let duration = end - begin;
    if !(MIN_BOOKING_DURATION_MS..=MAX_BOOKING_DURATION_MS).contains(&duration) {
        return Err(BookingError::InvalidDuration);
    }

    Ok(ValidBooking {
        span: Span::new(begin, end),
        draft,
    })
}
