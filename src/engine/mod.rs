mod availability;
mod checkout;
mod conflict;
mod error;
mod mutations;
mod pricing;
mod queries;
mod store;

pub use availability::{blocked_days, first_overlap, has_overlap, merge_overlapping};
pub use checkout::{Checkout, Finalized};
pub use conflict::{now_ms, today, yesterday};
pub use error::{EngineError, CONFLICT_MESSAGE};
pub use pricing::{compute_price, PriceQuote};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::payment::PaymentProcessor;
use crate::wal::Wal;

use store::InMemoryStore;

pub type SharedRoomState = Arc<RwLock<RoomState>>;
pub(super) type RoomGuard = OwnedRwLockWriteGuard<RoomState>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Appends that queue up while a flush is in progress are
/// committed together with a single fsync; control commands run between batches.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let mut batch: Vec<PendingAppend> = match cmd {
            WalCommand::Append { event, response } => vec![(event, response)],
            control => {
                run_control(&mut wal, control);
                continue;
            }
        };

        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                control => {
                    deferred = Some(control);
                    break;
                }
            }
        }

        commit_batch(&mut wal, batch);
        if let Some(control) = deferred {
            run_control(&mut wal, control);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    if let Err(e) = &result {
        // The whole batch is refused, so none of it may survive on disk.
        tracing::error!(events = batch.len(), "WAL batch failed: {e}");
        if let Err(rollback) = wal.rollback() {
            tracing::error!("WAL rollback failed: {rollback}");
        }
    }

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn run_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched"),
    }
}

/// Knobs the checkout flow needs at runtime.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// ISO currency code sent to the payment processor.
    pub currency: String,
    /// Pending bookings older than this are abandoned. `None` keeps them forever.
    pub pending_ttl: Option<Ms>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            currency: "usd".into(),
            pending_ttl: None,
        }
    }
}

pub struct Engine {
    pub(super) store: InMemoryStore,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) processor: Arc<dyn PaymentProcessor>,
    pub(super) settings: EngineSettings,
    /// Serializes hotel/room creation and deletion against each other and compaction.
    pub(super) catalog: Mutex<()>,
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        processor: Arc<dyn PaymentProcessor>,
        settings: EngineSettings,
    ) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store: InMemoryStore::new(),
            wal_tx,
            processor,
            settings,
            catalog: Mutex::new(()),
        };

        // Replay runs before anyone else holds these locks, so try_read/try_write
        // never contend. Blocking lock calls would panic inside the runtime.
        for event in &events {
            engine.replay_event(event);
        }
        tracing::info!(
            events = events.len(),
            hotels = engine.store.hotel_count(),
            rooms = engine.store.room_count(),
            "replayed WAL {}",
            wal_path.display()
        );

        Ok(engine)
    }

    fn replay_event(&self, event: &Event) {
        match event {
            Event::HotelCreated { hotel } | Event::HotelUpdated { hotel } => {
                self.store.insert_hotel(hotel.clone())
            }
            Event::HotelDeleted { id } => {
                for room_id in self.store.room_ids_of(id) {
                    self.replay_drop_room(&room_id);
                }
                self.store.remove_hotel(id);
            }
            Event::RoomCreated { room } => self.store.insert_room(room.clone()),
            Event::RoomDeleted { id, .. } => self.replay_drop_room(id),
            Event::BookingMoved {
                from_room_id,
                booking,
            } => {
                self.replay_room_event(from_room_id, event);
                self.replay_room_event(&booking.room_id, event);
            }
            other => {
                if let Some(room_id) = event_room_id(other) {
                    self.replay_room_event(&room_id, other);
                }
            }
        }
    }

    fn replay_room_event(&self, room_id: &Ulid, event: &Event) {
        if let Some(rs) = self.store.get_room(room_id) {
            let mut guard = rs.try_write().expect("replay: uncontended write");
            self.store.apply_room_event(&mut guard, event);
        }
    }

    fn replay_drop_room(&self, room_id: &Ulid) {
        if let Some(rs) = self.store.get_room(room_id) {
            let guard = rs.try_read().expect("replay: uncontended read");
            self.store.drop_room(&guard);
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn get_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.store.get_room(id)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Durably record a room-scoped event, then apply it. Caller holds the room lock.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut RoomState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.store.apply_room_event(rs, event);
        Ok(())
    }

    /// Durably record a `BookingMoved`, then apply it to both rooms. Caller
    /// holds both write locks.
    pub(super) async fn persist_and_apply_move(
        &self,
        from: &mut RoomState,
        to: &mut RoomState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.store.apply_room_event(from, event);
        self.store.apply_room_event(to, event);
        Ok(())
    }

    /// Lock the room a booking belongs to. Follows the booking if it moves to
    /// another room while we wait.
    pub(super) async fn lock_booking_room(
        &self,
        booking_id: &Ulid,
    ) -> Result<RoomGuard, EngineError> {
        loop {
            let room_id = self
                .store
                .room_for_booking(booking_id)
                .ok_or_else(|| EngineError::not_found("booking", booking_id))?;
            let guard = self.lock_room(&room_id).await?;
            if guard.booking(*booking_id).is_none()
                && self
                    .store
                    .room_for_booking(booking_id)
                    .is_some_and(|now| now != room_id)
            {
                continue;
            }
            return Ok(guard);
        }
    }

    /// Write-lock a room. `NotFound` if the room was deleted while we waited.
    pub(super) async fn lock_room(
        &self,
        room_id: &Ulid,
    ) -> Result<RoomGuard, EngineError> {
        let rs = self
            .store
            .get_room(room_id)
            .ok_or_else(|| EngineError::not_found("room", room_id))?;
        let guard = rs.clone().write_owned().await;
        match self.store.get_room(room_id) {
            Some(live) if Arc::ptr_eq(&live, &rs) => Ok(guard),
            _ => Err(EngineError::not_found("room", room_id)),
        }
    }

    /// Write-lock two distinct rooms in id order. Returned as `(a, b)`.
    pub(super) async fn lock_room_pair(
        &self,
        a: &Ulid,
        b: &Ulid,
    ) -> Result<(RoomGuard, RoomGuard), EngineError> {
        if a < b {
            let ga = self.lock_room(a).await?;
            let gb = self.lock_room(b).await?;
            Ok((ga, gb))
        } else {
            let gb = self.lock_room(b).await?;
            let ga = self.lock_room(a).await?;
            Ok((ga, gb))
        }
    }
}

/// Room touched by a booking-level event.
fn event_room_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::BookingOpened { booking } | Event::BookingRevised { booking } => {
            Some(booking.room_id)
        }
        Event::BookingPaid { room_id, .. } | Event::BookingRemoved { room_id, .. } => {
            Some(*room_id)
        }
        // Touches two rooms; replayed separately.
        Event::BookingMoved { .. } => None,
        Event::RoomUpdated { room } => Some(room.id),
        Event::HotelCreated { .. }
        | Event::HotelUpdated { .. }
        | Event::HotelDeleted { .. }
        | Event::RoomCreated { .. }
        | Event::RoomDeleted { .. } => None,
    }
}
