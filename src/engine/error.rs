use ulid::Ulid;

use crate::model::{DayRange, UserId};
use crate::payment::PaymentError;

/// Message shown to a guest whose dates were taken while they were checking out.
pub const CONFLICT_MESSAGE: &str = "Some of the days you are trying to book have already been reserved. \
     Please go back and select different dates or rooms.";

#[derive(Debug)]
pub enum EngineError {
    /// No authenticated user on the session.
    Unauthorized,
    /// Authenticated, but not the owner of the hotel/room/booking.
    Forbidden(Ulid),
    /// Listing another user's bookings.
    ListingForbidden(UserId),
    NotFound(String),
    Validation(String),
    /// The requested stay collides with a paid booking.
    Conflict {
        room_id: Ulid,
        stay: DayRange,
    },
    /// The booking is already paid; nothing was written.
    AlreadyFinalized(Ulid),
    AlreadyExists(Ulid),
    LimitExceeded(&'static str),
    Payment(PaymentError),
    WalError(String),
}

impl EngineError {
    pub fn not_found(what: &str, id: impl std::fmt::Display) -> Self {
        EngineError::NotFound(format!("{what} {id}"))
    }

    /// Payment processor and store failures: logged, shown generically.
    pub fn is_external(&self) -> bool {
        matches!(self, EngineError::Payment(_) | EngineError::WalError(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Unauthorized => write!(f, "unauthorized"),
            EngineError::Forbidden(id) => write!(f, "not permitted to modify {id}"),
            EngineError::ListingForbidden(who) => write!(f, "cannot list bookings of {who}"),
            EngineError::NotFound(what) => write!(f, "not found: {what}"),
            EngineError::Validation(msg) => write!(f, "invalid booking: {msg}"),
            EngineError::Conflict { .. } => f.write_str(CONFLICT_MESSAGE),
            EngineError::AlreadyFinalized(id) => write!(f, "booking {id} is already paid"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Payment(e) => write!(f, "payment processor error: {e}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<PaymentError> for EngineError {
    fn from(e: PaymentError) -> Self {
        EngineError::Payment(e)
    }
}
