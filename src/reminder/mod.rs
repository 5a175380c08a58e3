pub mod notifier;
pub mod scheduler;

pub use notifier::{Notifier, PendingReminders, ReminderRequest};
pub use scheduler::ReminderScheduler;
