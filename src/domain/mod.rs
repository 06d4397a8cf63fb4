//! Domain layer: request queueing, failure accounting, and proxy state.
//!
//! The client-side types (request queue, recurring entries, error counter)
//! are plain data with no I/O; the scheduler in [`crate::client`] drives
//! them. The proxy-side types hold the last REAPER state and broadcast its
//! diffs.

pub mod error_counter;
pub mod event_bus;
pub mod recurring;
pub mod request_queue;
pub mod state_store;

pub use error_counter::ErrorCounter;
pub use event_bus::{EventBus, StateDiff};
pub use recurring::{RecurringRequest, RecurringSet};
pub use request_queue::{RequestBatch, RequestQueue};
pub use state_store::StateStore;
