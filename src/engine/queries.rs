use std::collections::BTreeSet;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::auth::Session;
use crate::model::*;

use super::availability::blocked_days;
use super::{Engine, EngineError};

impl Engine {
    /// Bookings of a room ending on or after `cutoff`, in start order. Any
    /// signed-in user may read a room's calendar.
    pub async fn bookings_for_room(
        &self,
        session: &Session,
        room_id: Ulid,
        cutoff: NaiveDate,
    ) -> Result<Vec<Booking>, EngineError> {
        session.require_user()?;
        Ok(self.room_bookings_since(room_id, cutoff).await)
    }

    /// Bookings across all rooms of a hotel ending on or after `cutoff`.
    /// Only the hotel's owner may list them.
    pub async fn bookings_for_hotel(
        &self,
        session: &Session,
        hotel_id: Ulid,
        cutoff: NaiveDate,
    ) -> Result<Vec<Booking>, EngineError> {
        let user = session.require_user()?;
        let hotel = self
            .store
            .get_hotel(&hotel_id)
            .ok_or_else(|| EngineError::not_found("hotel", hotel_id))?;
        if hotel.owner_id != *user {
            return Err(EngineError::Forbidden(hotel_id));
        }

        let mut out = Vec::new();
        for room_id in self.store.room_ids_of(&hotel_id) {
            out.extend(self.room_bookings_since(room_id, cutoff).await);
        }
        out.sort_by_key(|b| (b.stay.start, b.id));
        Ok(out)
    }

    /// Every booking made at hotels the caller owns, newest first.
    pub async fn bookings_for_owner(
        &self,
        session: &Session,
        owner: &UserId,
    ) -> Result<Vec<Booking>, EngineError> {
        require_self(session, owner)?;
        Ok(self.collect_bookings(|b| b.hotel_owner_id == *owner).await)
    }

    /// Every booking the caller made as a guest, newest first.
    pub async fn bookings_for_guest(
        &self,
        session: &Session,
        guest: &UserId,
    ) -> Result<Vec<Booking>, EngineError> {
        require_self(session, guest)?;
        Ok(self.collect_bookings(|b| b.user_id == *guest).await)
    }

    async fn room_bookings_since(&self, room_id: Ulid, cutoff: NaiveDate) -> Vec<Booking> {
        let Some(rs) = self.store.get_room(&room_id) else {
            return Vec::new();
        };
        let guard = rs.read().await;
        guard
            .bookings
            .iter()
            .filter(|b| b.stay.end >= cutoff)
            .cloned()
            .collect()
    }

    async fn collect_bookings(&self, keep: impl Fn(&Booking) -> bool) -> Vec<Booking> {
        let mut out = Vec::new();
        for room_id in self.store.room_ids() {
            let Some(rs) = self.store.get_room(&room_id) else {
                continue;
            };
            let guard = rs.read().await;
            out.extend(guard.bookings.iter().filter(|b| keep(b)).cloned());
        }
        out.sort_by(|a, b| b.booked_at.cmp(&a.booked_at).then(b.id.cmp(&a.id)));
        out
    }

    /// Days a guest can't pick for this room: every day of a paid booking
    /// ending on or after `cutoff`.
    pub async fn blocked_days_for_room(
        &self,
        room_id: Ulid,
        cutoff: NaiveDate,
    ) -> BTreeSet<NaiveDate> {
        let Some(rs) = self.store.get_room(&room_id) else {
            return BTreeSet::new();
        };
        let guard = rs.read().await;
        blocked_days(&guard.paid_stays(&DayRange::since(cutoff), None))
    }

    pub async fn booking_by_intent(&self, intent_id: &str) -> Option<Booking> {
        let booking_id = self.store.booking_for_intent(intent_id)?;
        let room_id = self.store.room_for_booking(&booking_id)?;
        let rs = self.store.get_room(&room_id)?;
        let guard = rs.read().await;
        guard.booking(booking_id).cloned()
    }

    pub fn get_hotel(&self, hotel_id: &Ulid) -> Option<Hotel> {
        self.store.get_hotel(hotel_id)
    }

    pub fn list_hotels(&self) -> Vec<HotelInfo> {
        let mut hotels: Vec<HotelInfo> = self
            .store
            .hotels()
            .into_iter()
            .map(|hotel| HotelInfo {
                room_count: self.store.room_ids_of(&hotel.id).len(),
                hotel,
            })
            .collect();
        hotels.sort_by_key(|h| h.hotel.id);
        hotels
    }

    pub async fn rooms_for_hotel(&self, hotel_id: Ulid) -> Vec<Room> {
        let mut rooms = Vec::new();
        for room_id in self.store.room_ids_of(&hotel_id) {
            if let Some(rs) = self.store.get_room(&room_id) {
                rooms.push(rs.read().await.room.clone());
            }
        }
        rooms.sort_by_key(|r| r.id);
        rooms
    }

    /// Pending bookings past the TTL, as of `now`. Empty when no TTL is set.
    pub fn collect_abandoned(&self, now: Ms) -> Vec<Ulid> {
        let Some(ttl) = self.settings.pending_ttl else {
            return Vec::new();
        };
        let mut stale = Vec::new();
        for room_id in self.store.room_ids() {
            let Some(rs) = self.store.get_room(&room_id) else {
                continue;
            };
            // Busy rooms are picked up on the next sweep.
            if let Ok(guard) = rs.try_read() {
                stale.extend(
                    guard
                        .bookings
                        .iter()
                        .filter(|b| b.state(now, Some(ttl)) == BookingState::Abandoned)
                        .map(|b| b.id),
                );
            }
        }
        stale
    }
}

fn require_self(session: &Session, who: &UserId) -> Result<(), EngineError> {
    if session.require_user()? != who {
        return Err(EngineError::ListingForbidden(who.clone()));
    }
    Ok(())
}
