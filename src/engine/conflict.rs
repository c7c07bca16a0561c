use crate::model::*;

use super::store::WorkshopState;
use super::StoreError;

/// Committed bookings on `ws` sharing any instant with `span`.
pub(crate) fn count_overlapping(ws: &WorkshopState, span: &Span) -> usize {
    ws.overlapping(span).count()
}

/// The exclusion constraint over `(workshop, [begin, end))`: `candidate` may
/// not overlap a committed row or a row staged earlier in the same unit of work.
pub(crate) fn check_exclusion(
    ws: &WorkshopState,
    pending: &[StoredBooking],
    candidate: &StoredBooking,
) -> Result<(), StoreError> {
    let conflict = ws
        .overlapping(&candidate.span)
        .chain(pending.iter().filter(|p| p.span.overlaps(&candidate.span)))
        .next();
    match conflict {
        Some(existing) => Err(StoreError::ExclusionViolation {
            workshop_id: ws.workshop_id,
            conflicting: existing.id,
        }),
        None => Ok(()),
    }
}
