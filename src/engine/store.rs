use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

use super::SharedRoomState;

/// Live state rebuilt from the WAL: hotels, rooms (each behind its own lock)
/// and the indexes that find a booking's room.
pub struct InMemoryStore {
    hotels: DashMap<Ulid, Hotel>,
    /// Hotel → rooms, for cascades and listings.
    hotel_rooms: DashMap<Ulid, Vec<Ulid>>,
    rooms: DashMap<Ulid, SharedRoomState>,
    /// Booking id → room id.
    booking_room: DashMap<Ulid, Ulid>,
    /// Payment intent id → booking id. Intent ids are unique across bookings.
    intent_booking: DashMap<String, Ulid>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            hotels: DashMap::new(),
            hotel_rooms: DashMap::new(),
            rooms: DashMap::new(),
            booking_room: DashMap::new(),
            intent_booking: DashMap::new(),
        }
    }

    // ── Hotels ───────────────────────────────────────────────

    pub fn hotel_count(&self) -> usize {
        self.hotels.len()
    }

    pub fn contains_hotel(&self, id: &Ulid) -> bool {
        self.hotels.contains_key(id)
    }

    pub fn get_hotel(&self, id: &Ulid) -> Option<Hotel> {
        self.hotels.get(id).map(|e| e.value().clone())
    }

    pub fn hotels(&self) -> Vec<Hotel> {
        self.hotels.iter().map(|e| e.value().clone()).collect()
    }

    pub fn insert_hotel(&self, hotel: Hotel) {
        self.hotel_rooms.entry(hotel.id).or_default();
        self.hotels.insert(hotel.id, hotel);
    }

    /// Removes the hotel record only; rooms are dropped separately under their locks.
    pub fn remove_hotel(&self, id: &Ulid) {
        self.hotels.remove(id);
        self.hotel_rooms.remove(id);
    }

    // ── Rooms ────────────────────────────────────────────────

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn get_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn room_ids_of(&self, hotel_id: &Ulid) -> Vec<Ulid> {
        self.hotel_rooms
            .get(hotel_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub fn room_ids(&self) -> Vec<Ulid> {
        self.rooms.iter().map(|e| *e.key()).collect()
    }

    pub fn insert_room(&self, room: Room) {
        self.hotel_rooms.entry(room.hotel_id).or_default().push(room.id);
        self.rooms
            .insert(room.id, Arc::new(RwLock::new(RoomState::new(room))));
    }

    /// Forget a room and every booking index entry that points into it.
    pub fn drop_room(&self, rs: &RoomState) {
        for booking in &rs.bookings {
            self.unindex_booking(booking);
        }
        if let Some(mut rooms) = self.hotel_rooms.get_mut(&rs.room.hotel_id) {
            rooms.retain(|r| *r != rs.room.id);
        }
        self.rooms.remove(&rs.room.id);
    }

    // ── Booking indexes ──────────────────────────────────────

    pub fn room_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_room.get(booking_id).map(|e| *e.value())
    }

    pub fn booking_for_intent(&self, intent_id: &str) -> Option<Ulid> {
        self.intent_booking.get(intent_id).map(|e| *e.value())
    }

    fn index_booking(&self, booking: &Booking) {
        self.booking_room.insert(booking.id, booking.room_id);
        self.intent_booking
            .insert(booking.payment_intent_id.clone(), booking.id);
    }

    fn unindex_booking(&self, booking: &Booking) {
        self.booking_room.remove(&booking.id);
        self.intent_booking.remove(&booking.payment_intent_id);
    }

    // ── Event application ────────────────────────────────────

    /// Apply a room-scoped event. The caller holds the room's write lock.
    pub fn apply_room_event(&self, rs: &mut RoomState, event: &Event) {
        match event {
            Event::BookingOpened { booking } => {
                self.index_booking(booking);
                rs.insert_booking(booking.clone());
            }
            Event::BookingRevised { booking } => {
                if let Some(old) = rs.remove_booking(booking.id) {
                    self.unindex_booking(&old);
                }
                self.index_booking(booking);
                rs.insert_booking(booking.clone());
            }
            Event::BookingPaid { id, .. } => {
                if let Some(b) = rs.bookings.iter_mut().find(|b| b.id == *id) {
                    b.payment_status = true;
                }
            }
            Event::BookingRemoved { id, .. } => {
                if let Some(old) = rs.remove_booking(*id) {
                    self.unindex_booking(&old);
                }
            }
            // Applied to the source room first, then the destination.
            Event::BookingMoved {
                from_room_id,
                booking,
            } => {
                if rs.room.id == *from_room_id
                    && let Some(old) = rs.remove_booking(booking.id)
                {
                    self.unindex_booking(&old);
                }
                if rs.room.id == booking.room_id {
                    self.index_booking(booking);
                    rs.insert_booking(booking.clone());
                }
            }
            Event::RoomUpdated { room } => {
                rs.room = room.clone();
            }
            Event::HotelCreated { .. }
            | Event::HotelUpdated { .. }
            | Event::HotelDeleted { .. }
            | Event::RoomCreated { .. }
            | Event::RoomDeleted { .. } => {}
        }
    }
}
