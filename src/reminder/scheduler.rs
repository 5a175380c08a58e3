use chrono::{DateTime, Duration, Timelike, Utc};

use crate::household::{Event, Person};
use crate::reminder::notifier::{Notifier, ReminderRequest};

const DEFAULT_LEAD_MINUTES: i64 = 15;

/// Derives reminders from events and hands them to a [`Notifier`].
pub struct ReminderScheduler {
    notifier: Box<dyn Notifier>,
    lead: Duration,
}

impl ReminderScheduler {
    pub fn new(notifier: Box<dyn Notifier>) -> Self {
        Self {
            notifier,
            lead: Duration::minutes(DEFAULT_LEAD_MINUTES),
        }
    }

    pub fn with_lead(mut self, lead: Duration) -> Self {
        self.lead = lead;
        self
    }

    /// The reminder for `event`, or `None` unless both the person and the
    /// responsible parent are present in `people`.
    pub fn reminder_for(&self, event: &Event, people: &[Person]) -> Option<ReminderRequest> {
        let person = people.iter().find(|person| person.id == event.person_id)?;
        let responsible = people
            .iter()
            .find(|person| person.id == event.responsible_person_id)?;

        Some(ReminderRequest {
            id: event.id.clone(),
            title: format!("Upcoming Event: {}", event.event_name),
            body: format!("{}'s event - Responsible: {}", person.name, responsible.name),
            fire_at: fire_time(event.date(), self.lead),
        })
    }

    /// Returns whether a reminder was registered.
    pub fn schedule(&self, event: &Event, people: &[Person]) -> bool {
        match self.reminder_for(event, people) {
            Some(request) => {
                tracing::debug!("Scheduling reminder for {} at {}", request.id, request.fire_at);
                self.notifier.schedule(request);
                true
            }
            None => {
                tracing::debug!("Skipping reminder for {}: participants unknown", event.id);
                false
            }
        }
    }

    pub fn cancel(&self, event_id: &str) {
        tracing::debug!("Cancelling reminder for {}", event_id);
        self.notifier.cancel(event_id);
    }

    /// Cancels whatever is pending for the event's id before scheduling afresh.
    pub fn reschedule(&self, event: &Event, people: &[Person]) -> bool {
        self.cancel(&event.id);
        self.schedule(event, people)
    }
}

/// `date - lead`, truncated to the minute. Saturates at the earliest
/// representable instant.
pub fn fire_time(date: DateTime<Utc>, lead: Duration) -> DateTime<Utc> {
    let fire_at = date.checked_sub_signed(lead).unwrap_or(DateTime::<Utc>::MIN_UTC);
    fire_at
        .with_second(0)
        .and_then(|at| at.with_nanosecond(0))
        .unwrap_or(fire_at)
}
