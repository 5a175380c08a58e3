pub mod engine;
pub mod household;
pub mod logging;
pub mod query;
pub mod reminder;
pub mod storage;
pub mod sync;

pub use household::{Color, Event, Person};
pub use query::{DanglingReference, QueryLayer};
pub use reminder::{Notifier, PendingReminders, ReminderScheduler};
pub use storage::{Config, LocalCache};
pub use sync::{Session, SyncCoordinator, SyncError, SyncMode};
