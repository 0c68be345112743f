use std::collections::BTreeSet;

use chrono::NaiveDate;

use crate::model::*;

// ── Availability Algorithm ────────────────────────────────────────

/// Decide whether `candidate` collides with any of `existing`.
///
/// Both sides are whole calendar days, inclusive at both ends. A collision is
/// any of:
/// 1. candidate start falls inside an existing range,
/// 2. candidate end falls inside an existing range,
/// 3. candidate strictly contains an existing range.
///
/// Sharing a boundary day (checkout on the day another stay checks in) counts.
pub fn has_overlap(candidate: &DayRange, existing: &[DayRange]) -> bool {
    existing.iter().any(|range| {
        range.contains_day(candidate.start)
            || range.contains_day(candidate.end)
            || (candidate.start < range.start && candidate.end > range.end)
    })
}

/// First existing range that collides with `candidate`, if any.
pub fn first_overlap(candidate: &DayRange, existing: &[DayRange]) -> Option<DayRange> {
    existing
        .iter()
        .find(|r| has_overlap(candidate, std::slice::from_ref(*r)))
        .copied()
}

/// Every calendar day covered by `ranges`, for greying out a date picker.
pub fn blocked_days(ranges: &[DayRange]) -> BTreeSet<NaiveDate> {
    let mut days = BTreeSet::new();
    for range in merge_overlapping(ranges) {
        days.extend(range.days());
    }
    days
}

/// Merge ranges that share or touch a day into disjoint, sorted ranges.
pub fn merge_overlapping(ranges: &[DayRange]) -> Vec<DayRange> {
    let mut sorted = ranges.to_vec();
    sorted.sort_by_key(|r| r.start);

    let mut merged: Vec<DayRange> = Vec::new();
    for range in sorted {
        if let Some(last) = merged.last_mut()
            && range.start <= last.end.succ_opt().unwrap_or(last.end)
        {
            last.end = last.end.max(range.end);
            continue;
        }
        merged.push(range);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2030, m, d).unwrap()
    }

    fn range(from: (u32, u32), to: (u32, u32)) -> DayRange {
        DayRange::new(day(from.0, from.1), day(to.0, to.1))
    }

    // ── has_overlap ───────────────────────────────────────

    #[test]
    fn no_existing_ranges_never_overlaps() {
        assert!(!has_overlap(&range((1, 10), (1, 15)), &[]));
    }

    #[test]
    fn shared_checkout_day_is_overlap() {
        let reserved = [range((1, 10), (1, 15))];
        assert!(has_overlap(&range((1, 15), (1, 18)), &reserved));
    }

    #[test]
    fn shared_checkin_day_is_overlap() {
        let reserved = [range((1, 10), (1, 15))];
        assert!(has_overlap(&range((1, 5), (1, 10)), &reserved));
    }

    #[test]
    fn full_day_gap_is_free() {
        let reserved = [range((1, 10), (1, 15))];
        assert!(!has_overlap(&range((1, 16), (1, 18)), &reserved));
        assert!(!has_overlap(&range((1, 1), (1, 9)), &reserved));
    }

    #[test]
    fn candidate_inside_existing() {
        let reserved = [range((1, 10), (1, 20))];
        assert!(has_overlap(&range((1, 12), (1, 14)), &reserved));
    }

    #[test]
    fn candidate_contains_existing() {
        let reserved = [range((1, 12), (1, 14))];
        assert!(has_overlap(&range((1, 10), (1, 20)), &reserved));
    }

    #[test]
    fn identical_ranges_overlap() {
        let r = range((1, 10), (1, 12));
        assert!(has_overlap(&r, &[r]));
    }

    #[test]
    fn single_day_ranges() {
        let reserved = [range((1, 10), (1, 10))];
        assert!(has_overlap(&range((1, 10), (1, 10)), &reserved));
        assert!(!has_overlap(&range((1, 11), (1, 11)), &reserved));
    }

    #[test]
    fn any_of_many_ranges_triggers() {
        let reserved = [
            range((1, 1), (1, 3)),
            range((2, 1), (2, 3)),
            range((3, 1), (3, 3)),
        ];
        assert!(has_overlap(&range((2, 3), (2, 5)), &reserved));
        assert!(!has_overlap(&range((2, 4), (2, 27)), &reserved));
    }

    #[test]
    fn overlap_symmetric_for_partial_overlaps() {
        let pairs = [
            (range((1, 10), (1, 15)), range((1, 15), (1, 18))),
            (range((1, 10), (1, 15)), range((1, 12), (1, 20))),
            (range((1, 10), (1, 15)), range((1, 1), (1, 10))),
            (range((1, 10), (1, 15)), range((1, 16), (1, 18))),
        ];
        for (a, b) in pairs {
            assert_eq!(has_overlap(&a, &[b]), has_overlap(&b, &[a]), "{a} vs {b}");
        }
    }

    #[test]
    fn overlap_matches_shared_day_definition() {
        // Exhaustive over a small window: overlap <=> at least one common day.
        let days: Vec<NaiveDate> = (1..=8).map(|d| day(1, d)).collect();
        let ranges: Vec<DayRange> = days
            .iter()
            .flat_map(|&s| days.iter().filter(move |&&e| e >= s).map(move |&e| DayRange::new(s, e)))
            .collect();
        for a in &ranges {
            for b in &ranges {
                let shares_day = a.days().any(|d| b.contains_day(d));
                assert_eq!(has_overlap(a, &[*b]), shares_day, "{a} vs {b}");
            }
        }
    }

    #[test]
    fn first_overlap_reports_colliding_range() {
        let reserved = [range((1, 1), (1, 3)), range((1, 10), (1, 15))];
        assert_eq!(
            first_overlap(&range((1, 14), (1, 20)), &reserved),
            Some(range((1, 10), (1, 15)))
        );
        assert_eq!(first_overlap(&range((1, 4), (1, 9)), &reserved), None);
    }

    // ── blocked_days ──────────────────────────────────────

    #[test]
    fn blocked_days_union_of_ranges() {
        let days = blocked_days(&[
            range((1, 10), (1, 12)),
            range((1, 11), (1, 13)),
            range((1, 20), (1, 20)),
        ]);
        let expected: BTreeSet<_> = [day(1, 10), day(1, 11), day(1, 12), day(1, 13), day(1, 20)]
            .into_iter()
            .collect();
        assert_eq!(days, expected);
    }

    #[test]
    fn blocked_days_empty() {
        assert!(blocked_days(&[]).is_empty());
    }

    // ── merge_overlapping ─────────────────────────────────

    #[test]
    fn merge_joins_touching_days() {
        let merged = merge_overlapping(&[
            range((1, 5), (1, 7)),
            range((1, 1), (1, 4)),
            range((1, 10), (1, 11)),
        ]);
        assert_eq!(merged, vec![range((1, 1), (1, 7)), range((1, 10), (1, 11))]);
    }
}
