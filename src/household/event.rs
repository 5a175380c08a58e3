use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::household::recurrence;

/// A weekly household commitment for one person, owned by a responsible parent.
///
/// `day_of_week` is derived from `date` in the household's time zone and has no
/// setter: the only way to move it is [`Event::set_date`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "EventRecord")]
pub struct Event {
    pub id: String,
    pub person_id: String,
    pub event_name: String,
    date: DateTime<Utc>,
    pub responsible_person_id: String,
    day_of_week: u8,
    pub owner_id: String,
    pub is_recurring: bool,
    pub recurrence_end_date: Option<DateTime<Utc>>,
}

/// Stored form of an [`Event`]. A stored `dayOfWeek` is ignored; it is
/// re-derived from `date` (in UTC until the owner calls [`Event::set_date`]
/// with the household zone).
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventRecord {
    id: String,
    person_id: String,
    event_name: String,
    date: DateTime<Utc>,
    responsible_person_id: String,
    owner_id: String,
    #[serde(default = "recurring_by_default")]
    is_recurring: bool,
    #[serde(default)]
    recurrence_end_date: Option<DateTime<Utc>>,
}

fn recurring_by_default() -> bool {
    true
}

impl From<EventRecord> for Event {
    fn from(record: EventRecord) -> Self {
        Self {
            id: record.id,
            person_id: record.person_id,
            event_name: record.event_name,
            date: record.date,
            responsible_person_id: record.responsible_person_id,
            day_of_week: recurrence::weekday_number(record.date, Tz::UTC),
            owner_id: record.owner_id,
            is_recurring: record.is_recurring,
            recurrence_end_date: record.recurrence_end_date,
        }
    }
}

impl Event {
    /// Creates a recurring event. Use [`Event::one_off`] for a single occurrence.
    pub fn new(
        person_id: impl Into<String>,
        event_name: impl Into<String>,
        date: DateTime<Utc>,
        responsible_person_id: impl Into<String>,
        owner_id: impl Into<String>,
        zone: Tz,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            person_id: person_id.into(),
            event_name: event_name.into(),
            date,
            responsible_person_id: responsible_person_id.into(),
            day_of_week: recurrence::weekday_number(date, zone),
            owner_id: owner_id.into(),
            is_recurring: true,
            recurrence_end_date: None,
        }
    }

    /// One recurring event per requested weekday, each dated at the next
    /// instance of that weekday and `time` after `now`.
    #[allow(clippy::too_many_arguments)]
    pub fn weekly_series(
        person_id: &str,
        event_name: &str,
        responsible_person_id: &str,
        owner_id: &str,
        weekdays: &[u8],
        time: NaiveTime,
        now: DateTime<Utc>,
        zone: Tz,
    ) -> Vec<Event> {
        weekdays
            .iter()
            .filter_map(|&weekday| recurrence::next_occurrence(weekday, time, now, zone))
            .map(|date| Event::new(person_id, event_name, date, responsible_person_id, owner_id, zone))
            .collect()
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn one_off(mut self) -> Self {
        self.is_recurring = false;
        self.recurrence_end_date = None;
        self
    }

    pub fn recurring_until(mut self, end: DateTime<Utc>) -> Self {
        self.is_recurring = true;
        self.recurrence_end_date = Some(end);
        self
    }

    pub fn date(&self) -> DateTime<Utc> {
        self.date
    }

    /// 1 = Sunday through 7 = Saturday.
    pub fn day_of_week(&self) -> u8 {
        self.day_of_week
    }

    pub fn set_date(&mut self, date: DateTime<Utc>, zone: Tz) {
        self.date = date;
        self.day_of_week = recurrence::weekday_number(date, zone);
    }

    /// Recomputes `day_of_week` for `zone` without moving the date.
    pub fn rezone(&mut self, zone: Tz) {
        self.set_date(self.date, zone);
    }

    /// The end of the series, or `None` for one-off and open-ended events.
    pub fn effective_recurrence_end(&self) -> Option<DateTime<Utc>> {
        if self.is_recurring {
            self.recurrence_end_date
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::{America::New_York, UTC};

    fn tuesday_morning() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 7, 8, 0, 0).unwrap()
    }

    #[test]
    fn new_event_is_recurring_by_default() {
        let event = Event::new("child", "Swimming", tuesday_morning(), "parent", "owner", UTC);

        assert!(event.is_recurring);
        assert_eq!(event.recurrence_end_date, None);
    }

    #[test]
    fn day_of_week_is_derived_from_date() {
        let event = Event::new("child", "Swimming", tuesday_morning(), "parent", "owner", UTC);

        assert_eq!(event.day_of_week(), recurrence::TUESDAY);
    }

    #[test]
    fn day_of_week_follows_household_zone() {
        let late_monday_in_new_york = Utc.with_ymd_and_hms(2025, 1, 7, 2, 0, 0).unwrap();

        let event = Event::new("child", "Homework", late_monday_in_new_york, "parent", "owner", New_York);

        assert_eq!(event.day_of_week(), recurrence::MONDAY);
    }

    #[test]
    fn moving_the_date_recomputes_day_of_week() {
        let mut event = Event::new("child", "Swimming", tuesday_morning(), "parent", "owner", UTC);

        event.set_date(Utc.with_ymd_and_hms(2025, 1, 11, 8, 0, 0).unwrap(), UTC);

        assert_eq!(event.day_of_week(), recurrence::SATURDAY);
    }

    #[test]
    fn stored_day_of_week_is_ignored_when_deserializing() {
        let json = serde_json::json!({
            "id": "e1",
            "personId": "child",
            "eventName": "Swimming",
            "date": "2025-01-07T08:00:00Z",
            "responsiblePersonId": "parent",
            "dayOfWeek": 42,
            "ownerId": "owner",
            "isRecurring": true,
        });

        let event: Event = serde_json::from_value(json).unwrap();

        assert_eq!(event.day_of_week(), recurrence::TUESDAY);
        assert_eq!(event.date(), tuesday_morning());
    }

    #[test]
    fn rezone_rederives_day_of_week_in_new_zone() {
        let mut event = Event::new("child", "Homework", Utc.with_ymd_and_hms(2025, 1, 7, 2, 0, 0).unwrap(), "parent", "owner", UTC);
        assert_eq!(event.day_of_week(), recurrence::TUESDAY);

        event.rezone(New_York);

        assert_eq!(event.day_of_week(), recurrence::MONDAY);
    }

    #[test]
    fn recurrence_end_is_ignored_for_one_off_events() {
        let end = tuesday_morning() + chrono::Duration::weeks(4);
        let event = Event::new("child", "Dentist", tuesday_morning(), "parent", "owner", UTC)
            .recurring_until(end)
            .one_off();

        assert_eq!(event.effective_recurrence_end(), None);
    }

    #[test]
    fn weekly_series_creates_one_event_per_weekday() {
        let now = Utc.with_ymd_and_hms(2025, 1, 6, 12, 0, 0).unwrap();
        let time = NaiveTime::from_hms_opt(16, 30, 0).unwrap();

        let events = Event::weekly_series(
            "child",
            "Football",
            "parent",
            "owner",
            &[recurrence::TUESDAY, recurrence::THURSDAY],
            time,
            now,
            UTC,
        );

        let dates: Vec<_> = events.iter().map(Event::date).collect();
        assert_eq!(
            dates,
            vec![
                Utc.with_ymd_and_hms(2025, 1, 7, 16, 30, 0).unwrap(),
                Utc.with_ymd_and_hms(2025, 1, 9, 16, 30, 0).unwrap(),
            ]
        );
        assert!(events.iter().all(|event| event.is_recurring));
    }
}
