use chrono::{DateTime, NaiveTime};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::time::{self, TimeError};

/// Unix milliseconds, UTC. The only absolute-instant type inside the store.
pub type Ms = i64;

pub type WorkshopId = i64;

pub type BookingId = Ulid;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// A workshop's recurring daily operating window, in the workshop's own timezone.
///
/// `end <= begin` means the window closes on the following calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkshopSchedule {
    pub workshop_id: WorkshopId,
    /// IANA zone name. Resolved lazily: an unknown name is an infrastructure
    /// fault at booking time, not a client error.
    pub timezone: String,
    pub begin: NaiveTime,
    pub end: NaiveTime,
}

impl WorkshopSchedule {
    pub fn is_overnight(&self) -> bool {
        self.end <= self.begin
    }
}

/// A booking candidate, parsed but not yet validated or stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingDraft {
    pub workshop_id: WorkshopId,
    pub client_id: String,
    pub begin: DateTime<Tz>,
    pub end: DateTime<Tz>,
    pub client_timezone: Tz,
}

impl BookingDraft {
    /// Build a draft from the wire representation (`DD-MM-YYYY HH:MM` wall-clock
    /// strings interpreted in `client_timezone`).
    pub fn parse(
        workshop_id: WorkshopId,
        client_id: impl Into<String>,
        begin_at: &str,
        end_at: &str,
        client_timezone: &str,
    ) -> Result<Self, TimeError> {
        let tz = time::parse_timezone(client_timezone)?;
        let begin = time::parse_wall_clock(begin_at, tz)?;
        let end = time::parse_wall_clock(end_at, tz)?;
        Ok(Self {
            workshop_id,
            client_id: client_id.into(),
            begin,
            end,
            client_timezone: tz,
        })
    }

    pub fn begin_ms(&self) -> Ms {
        self.begin.timestamp_millis()
    }

    pub fn end_ms(&self) -> Ms {
        self.end.timestamp_millis()
    }
}

/// A committed booking, with its instants rendered in the client's timezone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booking {
    pub id: BookingId,
    pub workshop_id: WorkshopId,
    pub client_id: String,
    pub begin: DateTime<Tz>,
    pub end: DateTime<Tz>,
    pub client_timezone: Tz,
}

impl Booking {
    /// Reconstruct the client-facing view of a stored row.
    pub fn from_stored(row: &StoredBooking) -> Result<Self, TimeError> {
        let tz = time::parse_timezone(&row.client_timezone)?;
        Ok(Self {
            id: row.id,
            workshop_id: row.workshop_id,
            client_id: row.client_id.clone(),
            begin: time::to_zoned(row.span.start, tz)?,
            end: time::to_zoned(row.span.end, tz)?,
            client_timezone: tz,
        })
    }

    pub fn span(&self) -> Span {
        Span::new(self.begin.timestamp_millis(), self.end.timestamp_millis())
    }
}

/// Row layout of the bookings table: UTC instants plus the originating zone name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredBooking {
    pub id: BookingId,
    pub workshop_id: WorkshopId,
    pub span: Span,
    pub client_id: String,
    pub client_timezone: String,
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ScheduleSet(WorkshopSchedule),
    BookingConfirmed(StoredBooking),
}

impl Event {
    pub fn workshop_id(&self) -> WorkshopId {
        match self {
            Event::ScheduleSet(s) => s.workshop_id,
            Event::BookingConfirmed(b) => b.workshop_id,
        }
    }
}
