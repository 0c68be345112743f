// Hard caps on stored state and request shapes.

pub const MAX_HOTELS: usize = 100_000;
pub const MAX_ROOMS_PER_HOTEL: usize = 1_000;
pub const MAX_BOOKINGS_PER_ROOM: usize = 10_000;

pub const MAX_TITLE_LEN: usize = 256;
pub const MAX_LOCATION_FIELD_LEN: usize = 128;
pub const MAX_AMENITIES: usize = 64;
pub const MAX_URL_LEN: usize = 2_048;
pub const MAX_USER_ID_LEN: usize = 256;
pub const MAX_PAYMENT_INTENT_ID_LEN: usize = 255;

/// Longest stay a single booking may cover.
pub const MAX_STAY_NIGHTS: i64 = 365;

/// Largest nightly or breakfast rate, in minor units.
pub const MAX_RATE_MINOR: i64 = 100_000_000;

pub const MAX_GUEST_COUNT: u32 = 64;
