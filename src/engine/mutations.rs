use tokio::sync::oneshot;
use ulid::Ulid;

use crate::auth::Session;
use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError, WalCommand};

fn check_len(value: &str, max: usize, what: &'static str) -> Result<(), EngineError> {
    if value.len() > max {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

fn validate_hotel(hotel: &Hotel) -> Result<(), EngineError> {
    if hotel.title.trim().is_empty() {
        return Err(EngineError::Validation("hotel title is required".into()));
    }
    if hotel.country.trim().is_empty() {
        return Err(EngineError::Validation("hotel country is required".into()));
    }
    check_len(&hotel.title, MAX_TITLE_LEN, "hotel title too long")?;
    check_len(&hotel.country, MAX_LOCATION_FIELD_LEN, "country too long")?;
    for field in [&hotel.state, &hotel.city].into_iter().flatten() {
        check_len(field, MAX_LOCATION_FIELD_LEN, "location field too long")?;
    }
    if hotel.amenities.len() > MAX_AMENITIES {
        return Err(EngineError::LimitExceeded("too many amenities"));
    }
    if let Some(url) = &hotel.image_url {
        check_len(url, MAX_URL_LEN, "image url too long")?;
    }
    Ok(())
}

fn validate_room(room: &Room) -> Result<(), EngineError> {
    if room.title.trim().is_empty() {
        return Err(EngineError::Validation("room title is required".into()));
    }
    check_len(&room.title, MAX_TITLE_LEN, "room title too long")?;
    if room.nightly_rate < 1 {
        return Err(EngineError::Validation("nightly rate must be positive".into()));
    }
    if room.nightly_rate > MAX_RATE_MINOR {
        return Err(EngineError::LimitExceeded("nightly rate too large"));
    }
    if let Some(rate) = room.breakfast_rate {
        if rate < 0 {
            return Err(EngineError::Validation("breakfast rate must not be negative".into()));
        }
        if rate > MAX_RATE_MINOR {
            return Err(EngineError::LimitExceeded("breakfast rate too large"));
        }
    }
    if room.guest_count == 0 || room.bed_count == 0 {
        return Err(EngineError::Validation("room needs at least one guest and one bed".into()));
    }
    if room.guest_count > MAX_GUEST_COUNT {
        return Err(EngineError::LimitExceeded("guest count too large"));
    }
    if room.amenities.len() > MAX_AMENITIES {
        return Err(EngineError::LimitExceeded("too many amenities"));
    }
    if let Some(url) = &room.image_url {
        check_len(url, MAX_URL_LEN, "image url too long")?;
    }
    Ok(())
}

impl Engine {
    /// Hotel owned by the caller, or the reason it can't be touched.
    fn owned_hotel(&self, user: &UserId, hotel_id: Ulid) -> Result<Hotel, EngineError> {
        let hotel = self
            .store
            .get_hotel(&hotel_id)
            .ok_or_else(|| EngineError::not_found("hotel", hotel_id))?;
        if hotel.owner_id != *user {
            return Err(EngineError::Forbidden(hotel_id));
        }
        Ok(hotel)
    }

    /// Register a hotel. The caller becomes its owner regardless of `owner_id`.
    pub async fn create_hotel(
        &self,
        session: &Session,
        hotel: Hotel,
    ) -> Result<Hotel, EngineError> {
        let user = session.require_user()?;
        let hotel = Hotel {
            owner_id: user.clone(),
            ..hotel
        };
        validate_hotel(&hotel)?;

        let _catalog = self.catalog.lock().await;
        if self.store.contains_hotel(&hotel.id) {
            return Err(EngineError::AlreadyExists(hotel.id));
        }
        if self.store.hotel_count() >= MAX_HOTELS {
            return Err(EngineError::LimitExceeded("too many hotels"));
        }

        self.wal_append(&Event::HotelCreated {
            hotel: hotel.clone(),
        })
        .await?;
        self.store.insert_hotel(hotel.clone());
        tracing::debug!(hotel = %hotel.id, owner = %hotel.owner_id, "hotel created");
        Ok(hotel)
    }

    pub async fn update_hotel(
        &self,
        session: &Session,
        hotel_id: Ulid,
        patch: HotelPatch,
    ) -> Result<Hotel, EngineError> {
        let user = session.require_user()?;
        let _catalog = self.catalog.lock().await;
        let mut hotel = self.owned_hotel(user, hotel_id)?;
        patch.apply(&mut hotel);
        validate_hotel(&hotel)?;

        self.wal_append(&Event::HotelUpdated {
            hotel: hotel.clone(),
        })
        .await?;
        self.store.insert_hotel(hotel.clone());
        Ok(hotel)
    }

    /// Delete a hotel with all of its rooms and their bookings.
    pub async fn delete_hotel(&self, session: &Session, hotel_id: Ulid) -> Result<(), EngineError> {
        let user = session.require_user()?;
        let _catalog = self.catalog.lock().await;
        self.owned_hotel(user, hotel_id)?;

        // Sorted order, so concurrent multi-room lockers can't deadlock.
        let mut room_ids = self.store.room_ids_of(&hotel_id);
        room_ids.sort();
        let mut guards = Vec::with_capacity(room_ids.len());
        for room_id in &room_ids {
            if let Some(rs) = self.store.get_room(room_id) {
                guards.push(rs.write_owned().await);
            }
        }

        self.wal_append(&Event::HotelDeleted { id: hotel_id }).await?;
        for guard in &guards {
            self.store.drop_room(guard);
        }
        self.store.remove_hotel(&hotel_id);
        tracing::info!(hotel = %hotel_id, rooms = guards.len(), "hotel deleted");
        Ok(())
    }

    pub async fn create_room(&self, session: &Session, room: Room) -> Result<Room, EngineError> {
        let user = session.require_user()?;
        validate_room(&room)?;

        let _catalog = self.catalog.lock().await;
        self.owned_hotel(user, room.hotel_id)?;
        if self.store.get_room(&room.id).is_some() {
            return Err(EngineError::AlreadyExists(room.id));
        }
        if self.store.room_ids_of(&room.hotel_id).len() >= MAX_ROOMS_PER_HOTEL {
            return Err(EngineError::LimitExceeded("too many rooms on hotel"));
        }

        self.wal_append(&Event::RoomCreated { room: room.clone() })
            .await?;
        self.store.insert_room(room.clone());
        Ok(room)
    }

    /// Change a room's details or rates. Existing bookings keep the price
    /// they were created with.
    pub async fn update_room(
        &self,
        session: &Session,
        room_id: Ulid,
        patch: RoomPatch,
    ) -> Result<Room, EngineError> {
        let user = session.require_user()?;
        let mut guard = self.lock_room(&room_id).await?;
        self.owned_hotel(user, guard.room.hotel_id)?;

        let mut room = guard.room.clone();
        patch.apply(&mut room);
        validate_room(&room)?;

        let event = Event::RoomUpdated { room: room.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(room)
    }

    pub async fn delete_room(&self, session: &Session, room_id: Ulid) -> Result<(), EngineError> {
        let user = session.require_user()?;
        let _catalog = self.catalog.lock().await;
        let guard = self.lock_room(&room_id).await?;
        self.owned_hotel(user, guard.room.hotel_id)?;

        self.wal_append(&Event::RoomDeleted {
            id: room_id,
            hotel_id: guard.room.hotel_id,
        })
        .await?;
        self.store.drop_room(&guard);
        Ok(())
    }

    /// Rewrite the WAL as the minimal event sequence that rebuilds current state.
    ///
    /// Holds the catalog lock and a read lock on every room until the writer
    /// has swapped files, so no event can land between snapshot and swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _catalog = self.catalog.lock().await;
        let mut events = Vec::new();
        let mut guards = Vec::new();

        for hotel in self.store.hotels() {
            let mut room_ids = self.store.room_ids_of(&hotel.id);
            events.push(Event::HotelCreated { hotel });
            room_ids.sort();
            for room_id in room_ids {
                let Some(rs) = self.store.get_room(&room_id) else {
                    continue;
                };
                let guard = rs.read_owned().await;
                events.push(Event::RoomCreated {
                    room: guard.room.clone(),
                });
                events.extend(guard.bookings.iter().map(|b| Event::BookingOpened {
                    booking: b.clone(),
                }));
                guards.push(guard);
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()));
        drop(guards);
        result
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
