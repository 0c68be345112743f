use crate::model::*;

use super::EngineError;

/// Inputs to the price of a stay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceQuote {
    pub nightly_rate: Money,
    pub breakfast_rate: Option<Money>,
    pub stay: DayRange,
    pub include_breakfast: bool,
}

impl PriceQuote {
    pub fn for_room(room: &Room, stay: DayRange, include_breakfast: bool) -> Self {
        Self {
            nightly_rate: room.nightly_rate,
            breakfast_rate: room.breakfast_rate,
            stay,
            include_breakfast,
        }
    }
}

/// Total price of a stay in minor units.
///
/// `nights * nightly_rate`, plus `nights * breakfast_rate` when breakfast is
/// requested and the room offers it at a positive price.
pub fn compute_price(quote: &PriceQuote) -> Result<Money, EngineError> {
    let nights = quote.stay.nights();
    if nights < 1 {
        return Err(EngineError::Validation(format!(
            "stay {} must cover at least one night",
            quote.stay
        )));
    }
    let overflow = || EngineError::Validation("price out of range".into());

    let mut total = nights.checked_mul(quote.nightly_rate).ok_or_else(overflow)?;
    if quote.include_breakfast
        && let Some(rate) = quote.breakfast_rate
        && rate > 0
    {
        let breakfast = nights.checked_mul(rate).ok_or_else(overflow)?;
        total = total.checked_add(breakfast).ok_or_else(overflow)?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn stay(nights: u64) -> DayRange {
        let start = NaiveDate::from_ymd_opt(2030, 1, 10).unwrap();
        DayRange::new(start, start + chrono::Days::new(nights))
    }

    fn quote(nightly: Money, breakfast: Option<Money>, nights: u64, include: bool) -> PriceQuote {
        PriceQuote {
            nightly_rate: nightly,
            breakfast_rate: breakfast,
            stay: stay(nights),
            include_breakfast: include,
        }
    }

    #[test]
    fn three_nights_with_breakfast() {
        assert_eq!(compute_price(&quote(100, Some(20), 3, true)).unwrap(), 360);
    }

    #[test]
    fn breakfast_not_requested() {
        assert_eq!(compute_price(&quote(100, Some(20), 3, false)).unwrap(), 300);
    }

    #[test]
    fn breakfast_requested_but_not_offered() {
        assert_eq!(compute_price(&quote(100, None, 2, true)).unwrap(), 200);
        assert_eq!(compute_price(&quote(100, Some(0), 2, true)).unwrap(), 200);
    }

    #[test]
    fn zero_night_stay_is_validation_error() {
        let result = compute_price(&quote(100, None, 0, false));
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[test]
    fn overflow_is_validation_error() {
        let result = compute_price(&quote(i64::MAX / 2, None, 3, false));
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[test]
    fn quote_for_room_copies_rates() {
        let room = Room {
            id: ulid::Ulid::new(),
            hotel_id: ulid::Ulid::new(),
            title: "Suite".into(),
            nightly_rate: 25_000,
            breakfast_rate: Some(1_500),
            guest_count: 2,
            bed_count: 1,
            amenities: vec![],
            image_url: None,
        };
        let q = PriceQuote::for_room(&room, stay(2), true);
        assert_eq!(compute_price(&q).unwrap(), 2 * 25_000 + 2 * 1_500);
    }
}
