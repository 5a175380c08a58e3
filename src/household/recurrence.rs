//! Weekly recurrence arithmetic.
//!
//! Weekdays are numbered Sunday-first (1 = Sunday, 7 = Saturday) and are always
//! evaluated in the household's time zone, so an event's time-of-day stays put
//! across daylight-saving changes.

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;

use crate::household::Event;

pub const SUNDAY: u8 = 1;
pub const MONDAY: u8 = 2;
pub const TUESDAY: u8 = 3;
pub const WEDNESDAY: u8 = 4;
pub const THURSDAY: u8 = 5;
pub const FRIDAY: u8 = 6;
pub const SATURDAY: u8 = 7;

pub fn weekday_number(instant: DateTime<Utc>, zone: Tz) -> u8 {
    day_number(instant.with_timezone(&zone).weekday())
}

pub fn day_number(weekday: Weekday) -> u8 {
    weekday.num_days_from_sunday() as u8 + 1
}

pub fn weekday_from_number(number: u8) -> Option<Weekday> {
    match number {
        SUNDAY => Some(Weekday::Sun),
        MONDAY => Some(Weekday::Mon),
        TUESDAY => Some(Weekday::Tue),
        WEDNESDAY => Some(Weekday::Wed),
        THURSDAY => Some(Weekday::Thu),
        FRIDAY => Some(Weekday::Fri),
        SATURDAY => Some(Weekday::Sat),
        _ => None,
    }
}

/// First instant strictly after `after` that falls on `weekday` at `time` in `zone`.
pub fn next_occurrence(weekday: u8, time: NaiveTime, after: DateTime<Utc>, zone: Tz) -> Option<DateTime<Utc>> {
    let target = weekday_from_number(weekday)?;
    let today = after.with_timezone(&zone).date_naive();

    (0..=7)
        .filter_map(|offset| today.checked_add_signed(Duration::days(offset)))
        .filter(|day| day.weekday() == target)
        .filter_map(|day| resolve_local(day.and_time(time), zone))
        .find(|candidate| *candidate > after)
}

/// Concrete occurrence instants of `event` within `[start, end)`.
///
/// Honours `recurrence_end_date` (inclusive). One-off events yield their single
/// date when it falls inside the window.
pub fn occurrences_between(event: &Event, start: DateTime<Utc>, end: DateTime<Utc>, zone: Tz) -> Vec<DateTime<Utc>> {
    if !event.is_recurring {
        let date = event.date();
        return if date >= start && date < end { vec![date] } else { Vec::new() };
    }

    let first = event.date().with_timezone(&zone);
    let first_day = first.date_naive();
    let time = first.time();
    let series_end = event.effective_recurrence_end();

    let skip_weeks = if start > event.date() {
        ((start - event.date()).num_days() / 7 - 1).max(0)
    } else {
        0
    };

    let mut occurrences = Vec::new();
    let mut week = skip_weeks;
    loop {
        let Some(day) = first_day.checked_add_signed(Duration::weeks(week)) else {
            break;
        };
        week += 1;
        let Some(instant) = resolve_local(day.and_time(time), zone) else {
            continue;
        };
        if instant >= end || series_end.is_some_and(|limit| instant > limit) {
            break;
        }
        if instant >= start {
            occurrences.push(instant);
        }
    }
    occurrences
}

/// Every calendar day of the month containing `day`.
pub fn days_of_month(day: NaiveDate) -> Vec<NaiveDate> {
    let Some(first) = day.with_day(1) else {
        return Vec::new();
    };
    first
        .iter_days()
        .take_while(|candidate| candidate.month() == first.month())
        .collect()
}

// Ambiguous local times take the earlier instant; times skipped by a DST jump
// move forward by an hour.
fn resolve_local(local: NaiveDateTime, zone: Tz) -> Option<DateTime<Utc>> {
    match zone.from_local_datetime(&local) {
        LocalResult::Single(instant) => Some(instant.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        LocalResult::None => zone
            .from_local_datetime(&(local + Duration::hours(1)))
            .earliest()
            .map(|instant| instant.with_timezone(&Utc)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::{Europe::London, UTC};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, hour, minute, 0).unwrap()
    }

    fn eight_am() -> NaiveTime {
        NaiveTime::from_hms_opt(8, 0, 0).unwrap()
    }

    #[test]
    fn sunday_is_day_one() {
        assert_eq!(weekday_number(at(2025, 1, 5, 12, 0), UTC), SUNDAY);
        assert_eq!(weekday_number(at(2025, 1, 11, 12, 0), UTC), SATURDAY);
    }

    #[test]
    fn weekday_numbers_round_trip_through_chrono() {
        for number in SUNDAY..=SATURDAY {
            let weekday = weekday_from_number(number).unwrap();
            assert_eq!(day_number(weekday), number);
        }
        assert_eq!(weekday_from_number(0), None);
        assert_eq!(weekday_from_number(8), None);
    }

    #[test]
    fn next_occurrence_later_this_week() {
        let monday = at(2025, 1, 6, 9, 0);

        let next = next_occurrence(TUESDAY, eight_am(), monday, UTC);

        assert_eq!(next, Some(at(2025, 1, 7, 8, 0)));
    }

    #[test]
    fn next_occurrence_skips_a_week_once_todays_time_has_passed() {
        let tuesday_after_eight = at(2025, 1, 7, 8, 1);

        let next = next_occurrence(TUESDAY, eight_am(), tuesday_after_eight, UTC);

        assert_eq!(next, Some(at(2025, 1, 14, 8, 0)));
    }

    #[test]
    fn next_occurrence_is_strictly_after_now() {
        let exactly_eight = at(2025, 1, 7, 8, 0);

        let next = next_occurrence(TUESDAY, eight_am(), exactly_eight, UTC);

        assert_eq!(next, Some(at(2025, 1, 14, 8, 0)));
    }

    #[test]
    fn next_occurrence_rejects_invalid_weekday() {
        assert_eq!(next_occurrence(9, eight_am(), at(2025, 1, 6, 9, 0), UTC), None);
    }

    #[test]
    fn recurring_occurrences_keep_local_time_across_dst() {
        let event = Event::new("child", "Swimming", at(2025, 3, 25, 8, 0), "parent", "owner", London);

        let occurrences = occurrences_between(&event, at(2025, 3, 20, 0, 0), at(2025, 4, 9, 0, 0), London);

        // 08:00 GMT, then 08:00 BST once the clocks go forward on 30 March.
        assert_eq!(occurrences, vec![at(2025, 3, 25, 8, 0), at(2025, 4, 1, 7, 0), at(2025, 4, 8, 7, 0)]);
    }

    #[test]
    fn recurring_occurrences_stop_at_recurrence_end() {
        let event = Event::new("child", "Piano", at(2025, 1, 7, 8, 0), "parent", "owner", UTC)
            .recurring_until(at(2025, 1, 21, 8, 0));

        let occurrences = occurrences_between(&event, at(2025, 1, 1, 0, 0), at(2025, 3, 1, 0, 0), UTC);

        assert_eq!(occurrences, vec![at(2025, 1, 7, 8, 0), at(2025, 1, 14, 8, 0), at(2025, 1, 21, 8, 0)]);
    }

    #[test]
    fn one_off_event_has_single_occurrence() {
        let event = Event::new("child", "Dentist", at(2025, 1, 7, 8, 0), "parent", "owner", UTC).one_off();

        let inside = occurrences_between(&event, at(2025, 1, 1, 0, 0), at(2025, 2, 1, 0, 0), UTC);
        let outside = occurrences_between(&event, at(2025, 2, 1, 0, 0), at(2025, 3, 1, 0, 0), UTC);

        assert_eq!(inside, vec![at(2025, 1, 7, 8, 0)]);
        assert!(outside.is_empty());
    }

    #[test]
    fn occurrences_window_far_after_start_only_yields_window() {
        let event = Event::new("child", "Scouts", at(2020, 1, 7, 18, 0), "parent", "owner", UTC);

        let occurrences = occurrences_between(&event, at(2025, 1, 1, 0, 0), at(2025, 1, 15, 0, 0), UTC);

        assert_eq!(occurrences, vec![at(2025, 1, 7, 18, 0), at(2025, 1, 14, 18, 0)]);
    }

    #[test]
    fn days_of_month_covers_leap_february() {
        let days = days_of_month(NaiveDate::from_ymd_opt(2024, 2, 10).unwrap());

        assert_eq!(days.len(), 29);
        assert_eq!(days.first(), NaiveDate::from_ymd_opt(2024, 2, 1).as_ref());
        assert_eq!(days.last(), NaiveDate::from_ymd_opt(2024, 2, 29).as_ref());
    }

    proptest! {
        #[test]
        fn day_of_week_matches_date_after_construction_and_moves(
            first in 0i64..4_000_000_000,
            second in 0i64..4_000_000_000,
        ) {
            let start = Utc.timestamp_opt(first, 0).unwrap();
            let moved = Utc.timestamp_opt(second, 0).unwrap();

            let mut event = Event::new("child", "Chess", start, "parent", "owner", London);
            prop_assert_eq!(event.day_of_week(), weekday_number(start, London));

            event.set_date(moved, London);
            prop_assert_eq!(event.day_of_week(), weekday_number(moved, London));
        }

        #[test]
        fn next_occurrence_lands_on_requested_weekday(
            now in 0i64..4_000_000_000,
            weekday in 1u8..=7,
            hour in 0u32..24,
        ) {
            let now = Utc.timestamp_opt(now, 0).unwrap();
            let time = NaiveTime::from_hms_opt(hour, 0, 0).unwrap();

            let next = next_occurrence(weekday, time, now, UTC).unwrap();

            prop_assert!(next > now);
            prop_assert!(next - now <= Duration::days(7));
            prop_assert_eq!(weekday_number(next, UTC), weekday);
        }
    }
}
