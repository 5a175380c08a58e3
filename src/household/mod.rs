pub mod event;
pub mod person;
pub mod recurrence;

pub use event::Event;
pub use person::{Color, Person};
