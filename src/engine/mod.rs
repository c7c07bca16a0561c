mod conflict;
mod error;
mod store;

pub use error::StoreError;
pub use store::{
    BookingStore, InMemoryStore, InMemoryTx, NewBooking, SharedWorkshopState, StoreTx,
    WorkshopState,
};

use std::path::Path;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::admission::{self, ValidBooking};
use crate::compliance;
use crate::error::{BookingError, ErrorKind};
use crate::model::*;
use crate::observability::{BOOKINGS_CREATED_TOTAL, BOOKINGS_REJECTED_TOTAL};
use crate::time;

/// The booking admission and consistency engine.
///
/// Each `create_booking` is one unit of work on the store:
/// schedule lookup → compliance → overlap check → insert → commit.
/// Any exit before commit rolls the unit back.
pub struct Engine<S: BookingStore = InMemoryStore> {
    store: S,
}

impl Engine<InMemoryStore> {
    pub fn open(wal_path: &Path) -> Result<Self, StoreError> {
        Ok(Self::new(InMemoryStore::open(wal_path)?))
    }
}

impl<S: BookingStore> Engine<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Validate `draft` against the current time, then create it.
    pub async fn admit(
        &self,
        draft: BookingDraft,
        cancel: &CancellationToken,
    ) -> Result<Booking, BookingError> {
        let workshop_id = draft.workshop_id;
        match admission::validate(draft, time::now_ms()) {
            Ok(valid) => self.create_booking(valid, cancel).await,
            Err(e) => {
                record_rejection(workshop_id, &e);
                Err(e)
            }
        }
    }

    /// Commit a validated booking, or explain why not.
    ///
    /// `cancel` aborts the unit of work up to the commit point; past it the
    /// commit runs to completion.
    pub async fn create_booking(
        &self,
        booking: ValidBooking,
        cancel: &CancellationToken,
    ) -> Result<Booking, BookingError> {
        let workshop_id = booking.draft().workshop_id;
        let result = self.run_unit_of_work(&booking, cancel).await;
        match &result {
            Ok(b) => {
                metrics::counter!(BOOKINGS_CREATED_TOTAL).increment(1);
                info!("booking {} committed on workshop {workshop_id}", b.id);
            }
            Err(e) => record_rejection(workshop_id, e),
        }
        result
    }

    async fn run_unit_of_work(
        &self,
        booking: &ValidBooking,
        cancel: &CancellationToken,
    ) -> Result<Booking, BookingError> {
        let (tx, id) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(BookingError::Cancelled),
            prepared = self.prepare(booking) => prepared?,
        };
        tx.commit().await.map_err(translate)?;

        let draft = booking.draft();
        Ok(Booking {
            id,
            workshop_id: draft.workshop_id,
            client_id: draft.client_id.clone(),
            begin: draft.begin,
            end: draft.end,
            client_timezone: draft.client_timezone,
        })
    }

    /// Everything up to, not including, commit. The returned transaction still
    /// holds the workshop.
    async fn prepare(&self, booking: &ValidBooking) -> Result<(S::Tx, BookingId), BookingError> {
        let draft = booking.draft();
        let span = booking.span();
        let workshop_id = draft.workshop_id;

        let mut tx = self.store.begin(workshop_id).await?;

        let schedule = tx
            .load_schedule()
            .await?
            .ok_or(BookingError::ScheduleNotFound(workshop_id))?;
        let fits = compliance::complies(&schedule, &span)
            .map_err(|source| BookingError::ScheduleTimezone { workshop_id, source })?;
        if !fits {
            return Err(BookingError::OutOfSchedule);
        }

        if tx.count_overlapping(&span).await? > 0 {
            return Err(BookingError::Overlap);
        }

        let id = tx
            .insert_booking(NewBooking {
                workshop_id,
                span,
                client_id: draft.client_id.clone(),
                client_timezone: draft.client_timezone.name().to_string(),
            })
            .await
            .map_err(translate)?;
        Ok((tx, id))
    }

    /// Committed bookings of a workshop in insertion order, rendered in each
    /// client's timezone.
    pub async fn list_bookings(&self, workshop_id: WorkshopId) -> Result<Vec<Booking>, BookingError> {
        let rows = self.store.list_bookings(workshop_id).await.inspect_err(|e| {
            error!("listing bookings of workshop {workshop_id} failed: {e}");
        })?;
        rows.iter()
            .map(|row| {
                Booking::from_stored(row).map_err(|source| {
                    error!("booking {} of workshop {workshop_id} is unreadable: {source}", row.id);
                    BookingError::CorruptBooking { id: row.id, source }
                })
            })
            .collect()
    }

    /// Install or replace a workshop's schedule. The timezone must resolve.
    pub async fn put_schedule(&self, schedule: WorkshopSchedule) -> Result<(), BookingError> {
        time::parse_timezone(&schedule.timezone).map_err(BookingError::InvalidTime)?;
        let workshop_id = schedule.workshop_id;
        self.store.put_schedule(schedule).await?;
        info!("schedule set for workshop {workshop_id}");
        Ok(())
    }

    pub async fn close(&self) -> Result<(), StoreError> {
        self.store.close().await
    }
}

/// A storage-level exclusion violation means another writer won the slot.
fn translate(e: StoreError) -> BookingError {
    match e {
        StoreError::ExclusionViolation { .. } => BookingError::Overlap,
        other => BookingError::Storage(other),
    }
}

fn record_rejection(workshop_id: WorkshopId, e: &BookingError) {
    metrics::counter!(BOOKINGS_REJECTED_TOTAL, "reason" => e.reason()).increment(1);
    match e.kind() {
        ErrorKind::Infra => error!("booking on workshop {workshop_id} failed: {e}"),
        _ => debug!("booking on workshop {workshop_id} rejected: {e}"),
    }
}
