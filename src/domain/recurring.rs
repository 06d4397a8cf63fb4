//! Recurring request entries.
//!
//! Each entry re-arms itself on the cycle where it fires; entries are
//! kept in registration order and cancelled by name.

use std::time::Duration;

use tokio::time::Instant;

/// A periodic request: `(name, interval, next due instant)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurringRequest {
    /// Request name sent when the entry fires.
    pub name: String,
    /// Minimum spacing between two firings.
    pub interval: Duration,
    /// Instant after which the entry fires again. `None` means due now.
    pub next_due: Option<Instant>,
}

/// Ordered list of [`RecurringRequest`]s.
#[derive(Debug, Default, Clone)]
pub struct RecurringSet {
    entries: Vec<RecurringRequest>,
}

impl RecurringSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new entry, due on the next tick.
    ///
    /// Registering the same name twice yields two independent entries.
    pub fn register(&mut self, name: impl Into<String>, interval: Duration) {
        self.entries.push(RecurringRequest {
            name: name.into(),
            interval,
            next_due: None,
        });
    }

    /// Removes the first entry named `name`. Returns `true` if one was removed.
    pub fn cancel(&mut self, name: &str) -> bool {
        match self.entries.iter().position(|e| e.name == name) {
            Some(idx) => {
                self.entries.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Collects the names of entries due at `now` and re-arms each of them
    /// to `now + interval`.
    pub fn collect_due(&mut self, now: Instant) -> Vec<String> {
        let mut due = Vec::new();
        for entry in &mut self.entries {
            if entry.next_due.is_none_or(|at| at < now) {
                entry.next_due = Some(now + entry.interval);
                due.push(entry.name.clone());
            }
        }
        due
    }

    /// Returns the registered entries in order.
    #[must_use]
    pub fn entries(&self) -> &[RecurringRequest] {
        &self.entries
    }
}
