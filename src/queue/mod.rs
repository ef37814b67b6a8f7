pub mod coordinator;
pub mod events;
pub mod slots;
pub mod song;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use coordinator::{CoordinatorOptions, PlayOutcome, QueueCoordinator};
pub use events::QueueEvent;
