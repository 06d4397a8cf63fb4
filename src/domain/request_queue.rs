//! Outgoing request queue and batched request path encoding.
//!
//! Names are opaque tokens (`TRANSPORT`, `GET/EXTSTATE/TUX/text`, ...).
//! A batch encodes every queued name, each terminated by `;`, under the
//! fixed `/_/` prefix the REAPER web interface understands.

/// Path prefix of every batched request.
pub const REQUEST_PREFIX: &str = "/_/";

/// Terminator appended after each name in a batch.
pub const NAME_TERMINATOR: char = ';';

/// Ordered queue of request names waiting for the next polling cycle.
///
/// Append-only between cycles; [`RequestQueue::take_batch`] flushes the
/// whole queue at once.
#[derive(Debug, Default, Clone)]
pub struct RequestQueue {
    names: Vec<String>,
}

impl RequestQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a name. Duplicates are kept; the server receives each one.
    pub fn push(&mut self, name: impl Into<String>) {
        self.names.push(name.into());
    }

    /// Returns `true` if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Returns the number of queued names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Drains the queue into a [`RequestBatch`], or `None` if it is empty.
    pub fn take_batch(&mut self) -> Option<RequestBatch> {
        if self.names.is_empty() {
            return None;
        }
        Some(RequestBatch {
            names: std::mem::take(&mut self.names),
        })
    }
}

/// Names flushed from a [`RequestQueue`] and sent as one GET request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestBatch {
    names: Vec<String>,
}

impl RequestBatch {
    /// Names in enqueue order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Request path: `/_/<name1>;<name2>;...`.
    #[must_use]
    pub fn path(&self) -> String {
        let capacity = REQUEST_PREFIX.len() + self.names.iter().map(|n| n.len() + 1).sum::<usize>();
        let mut path = String::with_capacity(capacity);
        path.push_str(REQUEST_PREFIX);
        for name in &self.names {
            path.push_str(name);
            path.push(NAME_TERMINATOR);
        }
        path
    }
}
