use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::limits::WAL_CHANNEL_CAPACITY;
use crate::model::*;
use crate::wal::{Replay, Wal, WalHandle};

use super::conflict::{check_exclusion, count_overlapping};
use super::StoreError;

/// A booking about to be inserted; the store assigns its identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBooking {
    pub workshop_id: WorkshopId,
    pub span: Span,
    pub client_id: String,
    pub client_timezone: String,
}

/// Storage port. One transaction covers one workshop.
#[async_trait]
pub trait BookingStore: Send + Sync + 'static {
    type Tx: StoreTx;

    /// Open a unit of work on `workshop_id`. Conflicting writers on the same
    /// workshop are serialized; other workshops are unaffected.
    async fn begin(&self, workshop_id: WorkshopId) -> Result<Self::Tx, StoreError>;

    /// Committed bookings of a workshop in insertion order, from one snapshot.
    async fn list_bookings(&self, workshop_id: WorkshopId) -> Result<Vec<StoredBooking>, StoreError>;

    async fn put_schedule(&self, schedule: WorkshopSchedule) -> Result<(), StoreError>;

    /// Release storage resources. Later calls may fail.
    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// A unit of work. Dropping it without [`StoreTx::commit`] rolls it back,
/// which also covers cancellation of the future holding it.
#[async_trait]
pub trait StoreTx: Send + 'static {
    async fn load_schedule(&mut self) -> Result<Option<WorkshopSchedule>, StoreError>;

    /// Committed bookings whose span overlaps `span` (half-open).
    async fn count_overlapping(&mut self, span: &Span) -> Result<usize, StoreError>;

    /// Stage an insert. Fails with [`StoreError::ExclusionViolation`] if the
    /// row would overlap a committed or staged booking.
    async fn insert_booking(&mut self, booking: NewBooking) -> Result<BookingId, StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self)
    where
        Self: Sized,
    {
        drop(self);
    }
}

// ── In-memory tables ─────────────────────────────────────

/// One workshop's schedule row and bookings table.
#[derive(Debug, Clone)]
pub struct WorkshopState {
    pub workshop_id: WorkshopId,
    pub schedule: Option<WorkshopSchedule>,
    /// Insertion order.
    bookings: Vec<StoredBooking>,
    /// Indices into `bookings`, sorted by `span.start`.
    by_start: Vec<usize>,
}

pub type SharedWorkshopState = Arc<RwLock<WorkshopState>>;

impl WorkshopState {
    pub fn new(workshop_id: WorkshopId) -> Self {
        Self {
            workshop_id,
            schedule: None,
            bookings: Vec::new(),
            by_start: Vec::new(),
        }
    }

    pub fn bookings(&self) -> &[StoredBooking] {
        &self.bookings
    }

    /// Return only bookings whose span overlaps the query window.
    /// Uses binary search to skip bookings starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &StoredBooking> {
        let right_bound = self
            .by_start
            .partition_point(|&i| self.bookings[i].span.start < query.end);
        self.by_start[..right_bound]
            .iter()
            .map(|&i| &self.bookings[i])
            .filter(move |b| b.span.end > query.start)
    }

    /// Insert under the exclusion constraint: no two rows may overlap.
    pub fn insert_booking(&mut self, booking: StoredBooking) -> Result<(), StoreError> {
        check_exclusion(self, &[], &booking)?;
        let pos = self
            .by_start
            .partition_point(|&i| self.bookings[i].span.start < booking.span.start);
        self.by_start.insert(pos, self.bookings.len());
        self.bookings.push(booking);
        Ok(())
    }

    fn apply(&mut self, event: &Event) -> Result<(), StoreError> {
        match event {
            Event::ScheduleSet(schedule) => {
                self.schedule = Some(schedule.clone());
                Ok(())
            }
            Event::BookingConfirmed(booking) => self.insert_booking(booking.clone()),
        }
    }
}

// ── In-memory store ──────────────────────────────────────

/// WAL-backed store. Each workshop is a row lock around its tables; a
/// transaction holds the write half for its whole lifetime.
pub struct InMemoryStore {
    workshops: DashMap<WorkshopId, SharedWorkshopState>,
    wal: WalHandle,
}

impl InMemoryStore {
    /// Replay `wal_path`, cut off any torn tail, and start the group-commit
    /// writer. Must run inside a tokio runtime.
    pub fn open(wal_path: &Path) -> Result<Self, StoreError> {
        let Replay { events, valid_len } = Wal::replay(wal_path)?;
        // New entries must follow the last intact one, or the next replay
        // would stop at the garbage in between and lose them.
        let dropped = Wal::truncate(wal_path, valid_len)?;
        if dropped > 0 {
            tracing::warn!(
                "discarded {dropped} bytes of torn tail from {} at offset {valid_len}",
                wal_path.display()
            );
        }
        let mut tables: HashMap<WorkshopId, WorkshopState> = HashMap::new();
        for event in &events {
            let id = event.workshop_id();
            tables
                .entry(id)
                .or_insert_with(|| WorkshopState::new(id))
                .apply(event)
                .map_err(|e| StoreError::Corrupt(format!("replaying {}: {e}", wal_path.display())))?;
        }
        tracing::info!(
            "replayed {} events for {} workshops from {}",
            events.len(),
            tables.len(),
            wal_path.display()
        );

        let workshops = DashMap::new();
        for (id, state) in tables {
            workshops.insert(id, Arc::new(RwLock::new(state)));
        }
        let wal = WalHandle::spawn(Wal::open(wal_path)?, WAL_CHANNEL_CAPACITY);
        Ok(Self { workshops, wal })
    }

    fn get_workshop(&self, id: &WorkshopId) -> Option<SharedWorkshopState> {
        self.workshops.get(id).map(|e| e.value().clone())
    }

    fn get_or_create_workshop(&self, id: WorkshopId) -> SharedWorkshopState {
        self.workshops
            .entry(id)
            .or_insert_with(|| Arc::new(RwLock::new(WorkshopState::new(id))))
            .value()
            .clone()
    }
}

#[async_trait]
impl BookingStore for InMemoryStore {
    type Tx = InMemoryTx;

    async fn begin(&self, workshop_id: WorkshopId) -> Result<InMemoryTx, StoreError> {
        // A workshop without a row has no schedule and can take no bookings,
        // so there is nothing to lock.
        let guard = match self.get_workshop(&workshop_id) {
            Some(ws) => Some(ws.write_owned().await),
            None => None,
        };
        Ok(InMemoryTx {
            workshop_id,
            guard,
            pending: Vec::new(),
            wal: self.wal.clone(),
        })
    }

    async fn list_bookings(&self, workshop_id: WorkshopId) -> Result<Vec<StoredBooking>, StoreError> {
        let Some(ws) = self.get_workshop(&workshop_id) else {
            return Ok(Vec::new());
        };
        let guard = ws.read().await;
        Ok(guard.bookings().to_vec())
    }

    async fn put_schedule(&self, schedule: WorkshopSchedule) -> Result<(), StoreError> {
        let ws = self.get_or_create_workshop(schedule.workshop_id);
        let mut guard = ws.write().await;
        let event = Event::ScheduleSet(schedule);
        self.wal.append(&event).await?;
        guard.apply(&event)
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.wal.shutdown().await;
        Ok(())
    }
}

pub struct InMemoryTx {
    workshop_id: WorkshopId,
    guard: Option<OwnedRwLockWriteGuard<WorkshopState>>,
    pending: Vec<StoredBooking>,
    wal: WalHandle,
}

impl InMemoryTx {
    fn state(&self) -> Result<&WorkshopState, StoreError> {
        self.guard
            .as_deref()
            .ok_or(StoreError::UnknownWorkshop(self.workshop_id))
    }
}

#[async_trait]
impl StoreTx for InMemoryTx {
    async fn load_schedule(&mut self) -> Result<Option<WorkshopSchedule>, StoreError> {
        Ok(self.guard.as_ref().and_then(|g| g.schedule.clone()))
    }

    async fn count_overlapping(&mut self, span: &Span) -> Result<usize, StoreError> {
        Ok(self
            .guard
            .as_ref()
            .map_or(0, |g| count_overlapping(g, span)))
    }

    async fn insert_booking(&mut self, booking: NewBooking) -> Result<BookingId, StoreError> {
        if booking.workshop_id != self.workshop_id {
            return Err(StoreError::UnknownWorkshop(booking.workshop_id));
        }
        let row = StoredBooking {
            id: Ulid::new(),
            workshop_id: booking.workshop_id,
            span: booking.span,
            client_id: booking.client_id,
            client_timezone: booking.client_timezone,
        };
        check_exclusion(self.state()?, &self.pending, &row)?;
        let id = row.id;
        self.pending.push(row);
        Ok(id)
    }

    /// Log, then apply. Runs on its own task so that once the first WAL append
    /// is issued, dropping the caller cannot leave the log and the tables
    /// disagreeing.
    async fn commit(self) -> Result<(), StoreError> {
        let InMemoryTx {
            workshop_id,
            guard,
            pending,
            wal,
        } = self;
        if pending.is_empty() {
            return Ok(());
        }
        let mut guard = guard.ok_or(StoreError::UnknownWorkshop(workshop_id))?;

        let task = tokio::spawn(async move {
            for row in &pending {
                wal.append(&Event::BookingConfirmed(row.clone())).await?;
            }
            for row in pending {
                guard.insert_booking(row)?;
            }
            Ok::<(), StoreError>(())
        });
        task.await
            .map_err(|e| StoreError::WalError(format!("commit task failed: {e}")))?
    }
}
