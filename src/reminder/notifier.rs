use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderRequest {
    pub id: String,
    pub title: String,
    pub body: String,
    pub fire_at: DateTime<Utc>,
}

/// OS-level reminder delivery, keyed by event id.
///
/// Scheduling an id that is already pending replaces it; cancelling an unknown
/// id does nothing.
#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send {
    fn schedule(&self, request: ReminderRequest);

    fn cancel(&self, id: &str);
}

/// In-process notifier that keeps pending reminders for a host shell to deliver.
#[derive(Debug, Clone, Default)]
pub struct PendingReminders {
    pending: Arc<Mutex<BTreeMap<String, ReminderRequest>>>,
}

impl PendingReminders {
    pub fn new() -> Self {
        Self::default()
    }

    fn pending(&self) -> MutexGuard<'_, BTreeMap<String, ReminderRequest>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, id: &str) -> Option<ReminderRequest> {
        self.pending().get(id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        self.pending().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.pending().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending().is_empty()
    }

    /// Removes and returns every reminder due at or before `now`, earliest first.
    pub fn take_due(&self, now: DateTime<Utc>) -> Vec<ReminderRequest> {
        let mut pending = self.pending();
        let due_ids: Vec<String> = pending
            .values()
            .filter(|request| request.fire_at <= now)
            .map(|request| request.id.clone())
            .collect();
        let mut due: Vec<ReminderRequest> = due_ids.iter().filter_map(|id| pending.remove(id)).collect();
        due.sort_by_key(|request| request.fire_at);
        due
    }
}

impl Notifier for PendingReminders {
    fn schedule(&self, request: ReminderRequest) {
        self.pending().insert(request.id.clone(), request);
    }

    fn cancel(&self, id: &str) {
        self.pending().remove(id);
    }
}
