//! Does a booking fit inside its workshop's recurring daily window?

use crate::model::{Span, WorkshopSchedule};
use crate::time::{self, TimeError};

/// The schedule window anchored to the calendar date on which `span` begins,
/// as observed in the schedule's timezone. Overnight windows
/// ([`WorkshopSchedule::is_overnight`]) close the next day.
pub fn anchored_window(schedule: &WorkshopSchedule, span: &Span) -> Result<Span, TimeError> {
    let tz = time::parse_timezone(&schedule.timezone)?;
    let date = time::to_zoned(span.start, tz)?.date_naive();

    let begin = time::anchor_time_of_day(date, schedule.begin, tz)?;
    let end_date = if schedule.is_overnight() {
        date.succ_opt().ok_or(TimeError::OutOfRange(span.start))?
    } else {
        date
    };
    let end = time::anchor_time_of_day(end_date, schedule.end, tz)?;
    if end <= begin {
        // Both bounds fell into one DST gap: the window does not exist that day.
        return Ok(Span { start: begin, end: begin });
    }
    Ok(Span::new(begin, end))
}

/// True iff `span` lies fully inside the anchored window.
///
/// An `Err` means the schedule itself is unusable (bad timezone); callers must
/// treat that as an infrastructure fault, never as non-compliance.
pub fn complies(schedule: &WorkshopSchedule, span: &Span) -> Result<bool, TimeError> {
    Ok(anchored_window(schedule, span)?.contains_span(span))
}
