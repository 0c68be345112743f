use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. Used for creation timestamps and TTL arithmetic.
pub type Ms = i64;

/// Amount in currency minor units (cents for `usd`).
pub type Money = i64;

/// Identity of an authenticated user, as handed to us by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Returns `None` for an empty or whitespace-only id.
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            None
        } else {
            Some(Self(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Calendar-day range, inclusive on both ends.
///
/// A stay from day A to day B blocks A and B, so two stays sharing a
/// checkout/checkin day collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DayRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DayRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start <= end, "DayRange start must not be after end");
        Self { start, end }
    }

    /// Every day from `cutoff` on. Selects stays ending on or after it.
    pub fn since(cutoff: NaiveDate) -> Self {
        Self::new(cutoff, NaiveDate::MAX)
    }

    /// Whole calendar days between start and end (the number of nights).
    pub fn nights(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn contains_day(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }

    /// Every calendar day in the range, endpoints included.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.start.iter_days().take_while(move |d| *d <= self.end)
    }
}

impl fmt::Display for DayRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hotel {
    pub id: Ulid,
    pub owner_id: UserId,
    pub title: String,
    pub country: String,
    pub state: Option<String>,
    pub city: Option<String>,
    pub amenities: Vec<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub hotel_id: Ulid,
    pub title: String,
    pub nightly_rate: Money,
    pub breakfast_rate: Option<Money>,
    pub guest_count: u32,
    pub bed_count: u32,
    pub amenities: Vec<String>,
    pub image_url: Option<String>,
}

/// Partial hotel update. `None` leaves a field unchanged; for nullable
/// fields `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HotelPatch {
    pub title: Option<String>,
    pub country: Option<String>,
    pub state: Option<Option<String>>,
    pub city: Option<Option<String>>,
    pub amenities: Option<Vec<String>>,
    pub image_url: Option<Option<String>>,
}

impl HotelPatch {
    pub fn apply(self, hotel: &mut Hotel) {
        if let Some(v) = self.title {
            hotel.title = v;
        }
        if let Some(v) = self.country {
            hotel.country = v;
        }
        if let Some(v) = self.state {
            hotel.state = v;
        }
        if let Some(v) = self.city {
            hotel.city = v;
        }
        if let Some(v) = self.amenities {
            hotel.amenities = v;
        }
        if let Some(v) = self.image_url {
            hotel.image_url = v;
        }
    }
}

/// Partial room update, same conventions as [`HotelPatch`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomPatch {
    pub title: Option<String>,
    pub nightly_rate: Option<Money>,
    pub breakfast_rate: Option<Option<Money>>,
    pub guest_count: Option<u32>,
    pub bed_count: Option<u32>,
    pub amenities: Option<Vec<String>>,
    pub image_url: Option<Option<String>>,
}

impl RoomPatch {
    pub fn apply(self, room: &mut Room) {
        if let Some(v) = self.title {
            room.title = v;
        }
        if let Some(v) = self.nightly_rate {
            room.nightly_rate = v;
        }
        if let Some(v) = self.breakfast_rate {
            room.breakfast_rate = v;
        }
        if let Some(v) = self.guest_count {
            room.guest_count = v;
        }
        if let Some(v) = self.bed_count {
            room.bed_count = v;
        }
        if let Some(v) = self.amenities {
            room.amenities = v;
        }
        if let Some(v) = self.image_url {
            room.image_url = v;
        }
    }
}

/// Where a booking sits in checkout. `Draft` never reaches the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingState {
    PendingPayment,
    Reserved,
    /// Pending for longer than the configured TTL.
    Abandoned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub room_id: Ulid,
    pub hotel_id: Ulid,
    pub hotel_owner_id: UserId,
    pub user_id: UserId,
    pub stay: DayRange,
    pub total_price: Money,
    pub breakfast_included: bool,
    pub currency: String,
    pub payment_intent_id: String,
    pub payment_status: bool,
    pub booked_at: Ms,
}

impl Booking {
    pub fn state(&self, now: Ms, pending_ttl: Option<Ms>) -> BookingState {
        if self.payment_status {
            return BookingState::Reserved;
        }
        match pending_ttl {
            Some(ttl) if now - self.booked_at >= ttl => BookingState::Abandoned,
            _ => BookingState::PendingPayment,
        }
    }
}

/// Client-held checkout proposal, validated before it reaches the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingDraft {
    pub room_id: Ulid,
    pub hotel_id: Ulid,
    pub hotel_owner_id: UserId,
    pub stay: DayRange,
    pub breakfast_included: bool,
    /// Price the client computed; must match the server-side price.
    pub total_price: Money,
}

/// A room and its bookings, sorted by `stay.start`.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    pub bookings: Vec<Booking>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            bookings: Vec::new(),
        }
    }

    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.stay.start, |b| b.stay.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    /// Bookings whose stay shares at least one day with `window`.
    /// Binary search skips everything starting after `window.end`.
    pub fn overlapping(&self, window: &DayRange) -> impl Iterator<Item = &Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.stay.start <= window.end);
        let start = window.start;
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.stay.end >= start)
    }

    /// Stays of paid bookings sharing a day with `window`, optionally
    /// skipping one booking.
    pub fn paid_stays(&self, window: &DayRange, except: Option<Ulid>) -> Vec<DayRange> {
        self.overlapping(window)
            .filter(|b| b.payment_status && Some(b.id) != except)
            .map(|b| b.stay)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemovalReason {
    Cancelled,
    Abandoned,
}

/// WAL record format. Flat: each variant carries everything replay needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    HotelCreated {
        hotel: Hotel,
    },
    HotelUpdated {
        hotel: Hotel,
    },
    /// Cascades to the hotel's rooms and their bookings.
    HotelDeleted {
        id: Ulid,
    },
    RoomCreated {
        room: Room,
    },
    RoomUpdated {
        room: Room,
    },
    RoomDeleted {
        id: Ulid,
        hotel_id: Ulid,
    },
    BookingOpened {
        booking: Booking,
    },
    BookingRevised {
        booking: Booking,
    },
    BookingPaid {
        id: Ulid,
        room_id: Ulid,
    },
    BookingRemoved {
        id: Ulid,
        room_id: Ulid,
        reason: RemovalReason,
    },
    /// A pending booking revised onto another room. `booking.room_id` is the
    /// destination; id and payment intent are unchanged.
    BookingMoved {
        from_room_id: Ulid,
        booking: Booking,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotelInfo {
    pub hotel: Hotel,
    pub room_count: usize,
}
