//! The set of peers that captured broadcasts are relayed to.
//!
//! Shared between the public mutation API and the capture loop. The capture
//! path takes the lock only long enough to copy the members out
//! ([`ReceiverSet::snapshot`]); forwarding then runs against that private
//! copy, so callers can add and remove peers while capture is live without
//! blocking on per-packet work.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;

use parking_lot::Mutex;

/// Concurrently-mutable set of receiver IPv4 addresses.
///
/// Clones share the same underlying set.
#[derive(Debug, Clone, Default)]
pub struct ReceiverSet {
    entries: Arc<Mutex<HashSet<Ipv4Addr>>>,
}

impl ReceiverSet {
    /// Create a new empty receiver set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `addr` as a dotted quad and insert it.
    ///
    /// Returns `true` iff the address parsed; inserting an address that is
    /// already present succeeds and leaves the set unchanged.
    pub fn add(&self, addr: &str) -> bool {
        match addr.parse::<Ipv4Addr>() {
            Ok(ip) => {
                self.entries.lock().insert(ip);
                true
            }
            Err(_) => false,
        }
    }

    /// Remove `addr` if present. Unparseable or absent addresses are a no-op.
    pub fn remove(&self, addr: &str) {
        if let Ok(ip) = addr.parse::<Ipv4Addr>() {
            self.entries.lock().remove(&ip);
        }
    }

    /// Empty the set.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Copy the current members out.
    ///
    /// This is the per-packet critical section: O(|receivers|) under the
    /// lock, nothing more.
    pub fn snapshot(&self) -> Vec<Ipv4Addr> {
        self.entries.lock().iter().copied().collect()
    }

    /// Dotted-quad rendering of a snapshot.
    pub fn list(&self) -> Vec<String> {
        self.snapshot().iter().map(Ipv4Addr::to_string).collect()
    }

    /// Number of receivers.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_parse_and_insert_addresses() {
        let set = ReceiverSet::new();

        assert!(set.add("10.0.0.2"));
        assert!(set.add("10.0.0.3"));
        assert_eq!(set.len(), 2);

        assert!(!set.add("not-an-address"));
        assert!(!set.add("10.0.0.999"));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn should_keep_each_address_at_most_once() {
        let set = ReceiverSet::new();

        assert!(set.add("10.0.0.2"));
        assert!(set.add("10.0.0.2"));
        assert!(set.add("10.0.0.2"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn should_treat_remove_of_absent_address_as_noop() {
        let set = ReceiverSet::new();
        set.add("10.0.0.2");

        set.remove("10.0.0.3");
        set.remove("garbage");
        assert_eq!(set.len(), 1);

        set.remove("10.0.0.2");
        assert!(set.is_empty());
    }

    #[test]
    fn should_snapshot_a_copy_not_a_borrow() {
        let set = ReceiverSet::new();
        set.add("10.0.0.2");

        let snapshot = set.snapshot();
        set.clear();

        // The snapshot survives mutation of the set.
        assert_eq!(snapshot, vec![Ipv4Addr::new(10, 0, 0, 2)]);
        assert!(set.is_empty());
    }

    #[test]
    fn should_render_dotted_quads() {
        let set = ReceiverSet::new();
        set.add("10.0.0.2");
        set.add("192.168.1.40");

        let mut listed = set.list();
        listed.sort();
        assert_eq!(listed, vec!["10.0.0.2", "192.168.1.40"]);
    }

    #[test]
    fn should_share_entries_between_clones() {
        let set = ReceiverSet::new();
        let clone = set.clone();

        set.add("10.0.0.2");
        assert_eq!(clone.len(), 1);
    }
}
