use chrono::{Days, NaiveDate, Utc};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::first_overlap;
use super::EngineError;

pub fn now_ms() -> Ms {
    Utc::now().timestamp_millis()
}

/// Current UTC calendar day.
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Cutoff for "bookings that are not fully in the past".
pub fn yesterday() -> NaiveDate {
    today().checked_sub_days(Days::new(1)).unwrap_or(NaiveDate::MIN)
}

/// Shape checks on a requested stay, before anything external is touched.
pub(crate) fn validate_stay(stay: &DayRange, today: NaiveDate) -> Result<(), EngineError> {
    let nights = stay.nights();
    if nights < 1 {
        return Err(EngineError::Validation(format!(
            "stay {stay} must end at least one day after it starts"
        )));
    }
    if nights > MAX_STAY_NIGHTS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    if stay.start < today {
        return Err(EngineError::Validation(format!(
            "stay {stay} starts in the past"
        )));
    }
    Ok(())
}

/// Reject `stay` if it shares a day with any paid booking on the room.
/// Pending bookings never block. `except` skips the booking being finalized.
pub(crate) fn check_no_conflict(
    rs: &RoomState,
    stay: &DayRange,
    except: Option<Ulid>,
) -> Result<(), EngineError> {
    let paid = rs.paid_stays(stay, except);
    if let Some(taken) = first_overlap(stay, &paid) {
        tracing::debug!(room = %rs.room.id, %stay, %taken, "stay collides with paid booking");
        metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
        return Err(EngineError::Conflict {
            room_id: rs.room.id,
            stay: *stay,
        });
    }
    Ok(())
}
