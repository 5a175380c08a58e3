//! Read-only views over a people/events snapshot.
//!
//! Day and month views match on the weekday pattern only: `recurrence_end_date`
//! is not consulted and one-off events match every date sharing their weekday.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use thiserror::Error;

use crate::household::recurrence::{day_number, days_of_month};
use crate::household::{Event, Person};

#[derive(Debug, Clone, PartialEq, Error)]
#[error("Event {event_id} references unknown person {missing_person_id}")]
pub struct DanglingReference {
    pub event_id: String,
    pub missing_person_id: String,
}

/// An event together with both of its participants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedEvent<'a> {
    pub event: &'a Event,
    pub person: &'a Person,
    pub responsible: &'a Person,
}

#[derive(Debug, Clone, Copy)]
pub struct QueryLayer<'a> {
    people: &'a [Person],
    events: &'a [Event],
}

impl<'a> QueryLayer<'a> {
    pub fn new(people: &'a [Person], events: &'a [Event]) -> Self {
        Self { people, events }
    }

    pub fn person(&self, id: &str) -> Option<&'a Person> {
        self.people.iter().find(|person| person.id == id)
    }

    pub fn family_members(&self) -> Vec<&'a Person> {
        self.people.iter().filter(|person| !person.is_parent).collect()
    }

    pub fn parents(&self) -> Vec<&'a Person> {
        self.people.iter().filter(|person| person.is_parent).collect()
    }

    pub fn by_person(&self, person_id: &str) -> Vec<&'a Event> {
        self.sorted(|event| event.person_id == person_id)
    }

    pub fn by_parent(&self, parent_id: &str) -> Vec<&'a Event> {
        self.sorted(|event| event.responsible_person_id == parent_id)
    }

    pub fn by_day_of_week(&self, day: NaiveDate) -> Vec<&'a Event> {
        let weekday = day_number(day.weekday());
        self.sorted(|event| event.day_of_week() == weekday)
    }

    /// The weekday pattern of [`QueryLayer::by_day_of_week`] for every day of `day`'s month.
    pub fn by_month(&self, day: NaiveDate) -> BTreeMap<NaiveDate, Vec<&'a Event>> {
        days_of_month(day)
            .into_iter()
            .map(|date| (date, self.by_day_of_week(date)))
            .collect()
    }

    pub fn resolve(&self, event: &'a Event) -> Result<ResolvedEvent<'a>, DanglingReference> {
        let lookup = |id: &str| {
            self.person(id).ok_or_else(|| DanglingReference {
                event_id: event.id.clone(),
                missing_person_id: id.to_string(),
            })
        };
        Ok(ResolvedEvent {
            event,
            person: lookup(&event.person_id)?,
            responsible: lookup(&event.responsible_person_id)?,
        })
    }

    fn sorted(&self, matches: impl Fn(&Event) -> bool) -> Vec<&'a Event> {
        let mut events: Vec<&'a Event> = self.events.iter().filter(|&event| matches(event)).collect();
        events.sort_by_key(|event| event.date());
        events
    }
}
