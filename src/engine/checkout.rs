use ulid::Ulid;

use crate::auth::Session;
use crate::limits::*;
use crate::model::*;
use crate::payment::PaymentIntent;

use super::availability::has_overlap;
use super::conflict::{check_no_conflict, now_ms, today, validate_stay, yesterday};
use super::pricing::{compute_price, PriceQuote};
use super::{Engine, EngineError, RoomGuard};

/// What a successful draft submission hands back to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkout {
    pub booking_id: Ulid,
    pub intent: PaymentIntent,
    /// True when an existing pending booking was revised instead of created.
    pub revised: bool,
}

/// Outcome of `finalize_booking`. `newly_reserved` is false when the booking
/// was already paid and nothing was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finalized {
    pub booking: Booking,
    pub newly_reserved: bool,
}

impl Engine {
    /// Turn a client draft into a pending booking backed by a payment intent.
    ///
    /// With `existing_intent` set and a pending booking of this user behind it,
    /// the intent amount and the booking are revised in place, moving the
    /// booking if the draft names another room. Otherwise a new intent and
    /// booking are created. The write locks of every room involved are held
    /// throughout, processor calls included.
    pub async fn submit_booking_draft(
        &self,
        session: &Session,
        draft: BookingDraft,
        existing_intent: Option<&str>,
    ) -> Result<Checkout, EngineError> {
        let user = session.require_user()?.clone();
        if let Some(id) = existing_intent
            && id.len() > MAX_PAYMENT_INTENT_ID_LEN
        {
            return Err(EngineError::LimitExceeded("payment intent id too long"));
        }

        let existing = existing_intent.and_then(|id| self.store.booking_for_intent(id));
        if let Some(booking_id) = existing
            && let Some(from_room_id) = self.store.room_for_booking(&booking_id)
            && from_room_id != draft.room_id
        {
            return self
                .submit_to_other_room(user, &draft, booking_id, from_room_id)
                .await;
        }

        let mut guard = self.lock_room(&draft.room_id).await?;
        let total = self.validate_draft(&guard, &draft)?;

        let existing = existing
            .and_then(|bid| guard.booking(bid))
            .filter(|b| b.user_id == user)
            .cloned();

        match existing {
            Some(booking) => {
                self.revise_booking(&mut guard, None, booking, &draft, total)
                    .await
            }
            None => self.open_booking(&mut guard, user, &draft, total).await,
        }
    }

    /// Resubmission whose existing booking lives in a different room than the
    /// draft. Both rooms stay locked until the booking has moved.
    async fn submit_to_other_room(
        &self,
        user: UserId,
        draft: &BookingDraft,
        booking_id: Ulid,
        from_room_id: Ulid,
    ) -> Result<Checkout, EngineError> {
        let (mut from, mut to) = match self.lock_room_pair(&from_room_id, &draft.room_id).await {
            Ok(pair) => pair,
            // The old room went away with its bookings.
            Err(EngineError::NotFound(_)) if self.store.get_room(&from_room_id).is_none() => {
                let mut to = self.lock_room(&draft.room_id).await?;
                let total = self.validate_draft(&to, draft)?;
                return self.open_booking(&mut to, user, draft, total).await;
            }
            Err(e) => return Err(e),
        };
        let total = self.validate_draft(&to, draft)?;

        // Another submission may have moved or removed it while we waited.
        if let Some(booking) = to.booking(booking_id).filter(|b| b.user_id == user).cloned() {
            drop(from);
            return self.revise_booking(&mut to, None, booking, draft, total).await;
        }
        let moving = from.booking(booking_id).filter(|b| b.user_id == user).cloned();
        match moving {
            Some(booking) => {
                self.revise_booking(&mut to, Some(&mut from), booking, draft, total)
                    .await
            }
            None => {
                drop(from);
                self.open_booking(&mut to, user, draft, total).await
            }
        }
    }

    /// Every check that can run before the processor is called.
    fn validate_draft(&self, rs: &RoomState, draft: &BookingDraft) -> Result<Money, EngineError> {
        if draft.hotel_id != rs.room.hotel_id {
            return Err(EngineError::Validation(format!(
                "room {} does not belong to hotel {}",
                rs.room.id, draft.hotel_id
            )));
        }
        let hotel = self
            .store
            .get_hotel(&draft.hotel_id)
            .ok_or_else(|| EngineError::not_found("hotel", draft.hotel_id))?;
        if hotel.owner_id != draft.hotel_owner_id {
            return Err(EngineError::Validation(format!(
                "hotel {} is not owned by {}",
                hotel.id, draft.hotel_owner_id
            )));
        }

        validate_stay(&draft.stay, today())?;

        let quote = PriceQuote::for_room(&rs.room, draft.stay, draft.breakfast_included);
        let total = compute_price(&quote)?;
        if total != draft.total_price {
            return Err(EngineError::Validation(format!(
                "total price {} does not match computed price {total}",
                draft.total_price
            )));
        }

        check_no_conflict(rs, &draft.stay, None)?;
        Ok(total)
    }

    /// Re-price `booking` to `draft`. `source` is the booking's current room
    /// when it differs from `rs`, the room the draft names.
    async fn revise_booking(
        &self,
        rs: &mut RoomGuard,
        source: Option<&mut RoomGuard>,
        booking: Booking,
        draft: &BookingDraft,
        total: Money,
    ) -> Result<Checkout, EngineError> {
        if booking.payment_status {
            return Err(EngineError::AlreadyFinalized(booking.id));
        }
        if source.is_some() && rs.bookings.len() >= MAX_BOOKINGS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many bookings on room"));
        }

        let Some(_current) = self
            .processor
            .retrieve_payment_intent(&booking.payment_intent_id)
            .await?
        else {
            // The processor lost the intent: start over with a fresh one.
            tracing::warn!(
                booking = %booking.id,
                intent = %booking.payment_intent_id,
                "payment intent missing at processor; replacing booking"
            );
            let user = booking.user_id.clone();
            let event = Event::BookingRemoved {
                id: booking.id,
                room_id: booking.room_id,
                reason: RemovalReason::Cancelled,
            };
            match source {
                Some(from) => self.persist_and_apply(from, &event).await?,
                None => self.persist_and_apply(rs, &event).await?,
            }
            return self.open_booking(rs, user, draft, total).await;
        };

        let intent = self
            .processor
            .update_payment_intent_amount(&booking.payment_intent_id, total)
            .await?;

        let from_room_id = booking.room_id;
        let revised = Booking {
            room_id: draft.room_id,
            hotel_id: draft.hotel_id,
            hotel_owner_id: draft.hotel_owner_id.clone(),
            stay: draft.stay,
            total_price: total,
            breakfast_included: draft.breakfast_included,
            ..booking
        };
        let booking_id = revised.id;
        let persisted = match source {
            Some(from) => {
                let event = Event::BookingMoved {
                    from_room_id,
                    booking: revised,
                };
                self.persist_and_apply_move(from, rs, &event).await
            }
            None => {
                let event = Event::BookingRevised { booking: revised };
                self.persist_and_apply(rs, &event).await
            }
        };
        if let Err(e) = persisted {
            tracing::error!(
                intent = %intent.id,
                amount = total,
                error = %e,
                "payment intent amount updated but booking revision not persisted"
            );
            return Err(e);
        }

        metrics::counter!(crate::observability::PAYMENT_INTENTS_TOTAL, "op" => "update")
            .increment(1);
        tracing::debug!(intent = %intent.id, amount = total, "booking revised");
        Ok(Checkout {
            booking_id,
            intent,
            revised: true,
        })
    }

    async fn open_booking(
        &self,
        rs: &mut RoomGuard,
        user: UserId,
        draft: &BookingDraft,
        total: Money,
    ) -> Result<Checkout, EngineError> {
        if rs.bookings.len() >= MAX_BOOKINGS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many bookings on room"));
        }

        let intent = self
            .processor
            .create_payment_intent(total, &self.settings.currency)
            .await?;

        let booking = Booking {
            id: Ulid::new(),
            room_id: draft.room_id,
            hotel_id: draft.hotel_id,
            hotel_owner_id: draft.hotel_owner_id.clone(),
            user_id: user,
            stay: draft.stay,
            total_price: total,
            breakfast_included: draft.breakfast_included,
            currency: intent.currency.clone(),
            payment_intent_id: intent.id.clone(),
            payment_status: false,
            booked_at: now_ms(),
        };
        let booking_id = booking.id;
        let event = Event::BookingOpened { booking };
        if let Err(e) = self.persist_and_apply(rs, &event).await {
            tracing::error!(
                intent = %intent.id,
                amount = total,
                error = %e,
                "payment intent created but booking not persisted"
            );
            return Err(e);
        }

        metrics::counter!(crate::observability::PAYMENT_INTENTS_TOTAL, "op" => "create")
            .increment(1);
        tracing::debug!(booking = %booking_id, intent = %intent.id, "booking opened");
        Ok(Checkout {
            booking_id,
            intent,
            revised: false,
        })
    }

    /// Mark the booking behind `intent_id` as paid.
    ///
    /// Runs under the room's write lock and re-checks that no other paid
    /// booking shares a day with this one before writing.
    pub async fn finalize_booking(
        &self,
        session: &Session,
        intent_id: &str,
    ) -> Result<Finalized, EngineError> {
        session.require_user()?;
        let booking_id = self
            .store
            .booking_for_intent(intent_id)
            .ok_or_else(|| EngineError::not_found("booking for payment intent", intent_id))?;
        let mut guard = self.lock_booking_room(&booking_id).await?;
        // The booking may have been removed while we waited for the lock.
        let booking = guard
            .booking(booking_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("booking for payment intent", intent_id))?;

        if booking.payment_status {
            return Ok(Finalized {
                booking,
                newly_reserved: false,
            });
        }

        if let Err(e) = check_no_conflict(&guard, &booking.stay, Some(booking.id)) {
            tracing::warn!(
                booking = %booking.id,
                intent = %intent_id,
                "payment confirmed for dates already reserved; refund required"
            );
            return Err(e);
        }

        let event = Event::BookingPaid {
            id: booking.id,
            room_id: booking.room_id,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::BOOKINGS_RESERVED_TOTAL).increment(1);

        let booking = guard
            .booking(booking_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("booking", booking_id))?;
        Ok(Finalized {
            booking,
            newly_reserved: true,
        })
    }

    /// Last look before the client confirms payment: fails with `Conflict`
    /// when a paid booking ending on or after yesterday shares a day with the stay.
    pub async fn check_availability_before_confirm(
        &self,
        session: &Session,
        room_id: Ulid,
        stay: DayRange,
    ) -> Result<(), EngineError> {
        session.require_user()?;
        let rs = self
            .store
            .get_room(&room_id)
            .ok_or_else(|| EngineError::not_found("room", room_id))?;
        let guard = rs.read().await;
        let reserved = guard.paid_stays(&DayRange::since(yesterday()), None);
        if has_overlap(&stay, &reserved) {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::Conflict { room_id, stay });
        }
        Ok(())
    }

    /// Delete a booking. Allowed for the guest who made it and the hotel's owner.
    pub async fn cancel_booking(
        &self,
        session: &Session,
        booking_id: Ulid,
    ) -> Result<Booking, EngineError> {
        let user = session.require_user()?;
        let mut guard = self.lock_booking_room(&booking_id).await?;
        let booking = guard
            .booking(booking_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("booking", booking_id))?;
        if booking.user_id != *user && booking.hotel_owner_id != *user {
            return Err(EngineError::Forbidden(booking_id));
        }

        let event = Event::BookingRemoved {
            id: booking.id,
            room_id: booking.room_id,
            reason: RemovalReason::Cancelled,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(booking)
    }

    /// Remove a pending booking whose TTL ran out and cancel its intent.
    /// Returns false if the booking was paid or removed in the meantime.
    pub async fn abandon_booking(&self, booking_id: Ulid, now: Ms) -> Result<bool, EngineError> {
        let Some(ttl) = self.settings.pending_ttl else {
            return Ok(false);
        };
        let mut guard = match self.lock_booking_room(&booking_id).await {
            Ok(g) => g,
            Err(EngineError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        let Some(booking) = guard.booking(booking_id).cloned() else {
            return Ok(false);
        };
        if booking.state(now, Some(ttl)) != BookingState::Abandoned {
            return Ok(false);
        }

        if let Err(e) = self
            .processor
            .cancel_payment_intent(&booking.payment_intent_id)
            .await
        {
            tracing::warn!(
                intent = %booking.payment_intent_id,
                error = %e,
                "could not cancel payment intent of abandoned booking"
            );
        }

        let event = Event::BookingRemoved {
            id: booking.id,
            room_id: booking.room_id,
            reason: RemovalReason::Abandoned,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(true)
    }
}
