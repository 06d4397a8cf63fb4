//! Last REAPER state seen by the proxy poller, and the line diff
//! broadcast to WebSocket clients.
//!
//! REAPER answers a poll with one tab-separated record per line. Clients
//! only need the lines that changed since the previous poll, so the poller
//! compares bodies line by line by position.

use parking_lot::RwLock;

/// Shared holder of the most recent full poll body.
///
/// Readers always receive an owned copy, never a reference into the store.
#[derive(Debug, Default)]
pub struct StateStore {
    last: RwLock<Option<Vec<u8>>>,
}

impl StateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the last state, if any poll has succeeded yet.
    #[must_use]
    pub fn get(&self) -> Option<Vec<u8>> {
        self.last.read().clone()
    }

    /// Stores `body` if it differs from the last state and returns the
    /// changed lines relative to the previous state.
    ///
    /// Returns `None` when the body is unchanged. The returned diff may be
    /// empty when the body changed only by dropping trailing lines.
    pub fn update(&self, body: &[u8]) -> Option<Vec<u8>> {
        let mut last = self.last.write();
        if last.as_deref() == Some(body) {
            return None;
        }
        let diff = changed_lines(last.as_deref(), body);
        *last = Some(body.to_vec());
        Some(diff)
    }
}

/// Splits on `\n`, dropping a single trailing empty line.
fn split_lines(body: &[u8]) -> Vec<&[u8]> {
    if body.is_empty() {
        return Vec::new();
    }
    let mut lines: Vec<&[u8]> = body.split(|b| *b == b'\n').collect();
    if lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines
}

/// Returns the lines of `new` that differ from the line at the same
/// position in `old`, joined with `\n`.
///
/// Without a previous state every line of `new` counts as changed. Lines
/// missing from `old` compare as empty.
#[must_use]
pub fn changed_lines(old: Option<&[u8]>, new: &[u8]) -> Vec<u8> {
    let new_lines = split_lines(new);
    let old_lines = old.map(split_lines).unwrap_or_default();

    let changed: Vec<&[u8]> = if old_lines.is_empty() {
        new_lines
    } else {
        new_lines
            .into_iter()
            .enumerate()
            .filter(|(i, line)| old_lines.get(*i).copied().unwrap_or_default() != *line)
            .map(|(_, line)| line)
            .collect()
    };

    changed.join(&b'\n')
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn first_state_sends_every_line() {
        let diff = changed_lines(None, b"TRANSPORT\t1\nBEATPOS\t2\n");
        assert_eq!(diff, b"TRANSPORT\t1\nBEATPOS\t2");
    }

    #[test]
    fn only_changed_positions_are_sent() {
        let old = b"A\t1\nB\t2\nC\t3\n";
        let new = b"A\t1\nB\t9\nC\t3\n";
        assert_eq!(changed_lines(Some(old.as_slice()), new), b"B\t9");
    }

    #[test]
    fn appended_lines_are_changed() {
        let old = b"A\nB";
        let new = b"A\nB\nC\nD";
        assert_eq!(changed_lines(Some(old.as_slice()), new), b"C\nD");
    }

    #[test]
    fn dropped_lines_produce_empty_diff() {
        let old = b"A\nB\nC";
        let new = b"A\nB";
        assert!(changed_lines(Some(old.as_slice()), new).is_empty());
    }

    #[test]
    fn empty_old_state_counts_as_missing() {
        assert_eq!(changed_lines(Some(b"".as_slice()), b"X\nY"), b"X\nY");
    }

    #[test]
    fn update_ignores_identical_body() {
        let store = StateStore::new();
        assert_eq!(store.update(b"A\nB"), Some(b"A\nB".to_vec()));
        assert_eq!(store.update(b"A\nB"), None);
        assert_eq!(store.update(b"A\nC"), Some(b"C".to_vec()));
        assert_eq!(store.get(), Some(b"A\nC".to_vec()));
    }

    #[test]
    fn get_returns_independent_copy() {
        let store = StateStore::new();
        let _ = store.update(b"abc");
        let Some(mut copy) = store.get() else {
            panic!("state missing");
        };
        copy.clear();
        assert_eq!(store.get(), Some(b"abc".to_vec()));
    }
}
