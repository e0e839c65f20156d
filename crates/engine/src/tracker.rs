//! In-memory ticket tracking for one dispatch cycle.
//!
//! Maps gateway ticket ids to the record they were issued for. State is
//! ephemeral: it lives in the reconciliation task and is lost on restart.

use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
pub struct TicketTracker {
    pending: HashMap<String, i64>,
    records: HashSet<i64>,
}

impl TicketTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `ticket_id` for `record_id`.
    ///
    /// Returns `false` and leaves the tracker unchanged if the ticket is already
    /// tracked or the record already has a live ticket.
    pub fn register(&mut self, ticket_id: impl Into<String>, record_id: i64) -> bool {
        let ticket_id = ticket_id.into();
        if self.pending.contains_key(&ticket_id) || self.records.contains(&record_id) {
            tracing::warn!(ticket_id = %ticket_id, record_id, "Duplicate ticket registration ignored");
            return false;
        }
        self.pending.insert(ticket_id, record_id);
        self.records.insert(record_id);
        true
    }

    /// Stop tracking `ticket_id`, returning its record if it was tracked.
    pub fn take(&mut self, ticket_id: &str) -> Option<i64> {
        let record_id = self.pending.remove(ticket_id)?;
        self.records.remove(&record_id);
        Some(record_id)
    }

    pub fn ticket_ids(&self) -> Vec<String> {
        self.pending.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl FromIterator<(i64, String)> for TicketTracker {
    fn from_iter<I: IntoIterator<Item = (i64, String)>>(iter: I) -> Self {
        let mut tracker = Self::new();
        for (record_id, ticket_id) in iter {
            tracker.register(ticket_id, record_id);
        }
        tracker
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_take() {
        let mut tracker = TicketTracker::new();
        assert!(tracker.register("t1", 10));
        assert!(tracker.register("t2", 11));
        assert_eq!(tracker.len(), 2);
        assert_eq!(tracker.take("t1"), Some(10));
        // Second take is a no-op.
        assert_eq!(tracker.take("t1"), None);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_one_ticket_per_record() {
        let mut tracker = TicketTracker::new();
        assert!(tracker.register("t1", 10));
        assert!(!tracker.register("t2", 10));
        assert!(!tracker.register("t1", 11));
        assert_eq!(tracker.len(), 1);

        // Once the ticket is consumed the record may be tracked again.
        tracker.take("t1");
        assert!(tracker.register("t3", 10));
    }

    #[test]
    fn test_from_persisted_pairs() {
        let mut tracker: TicketTracker = vec![(1, "a".to_string()), (2, "b".to_string())]
            .into_iter()
            .collect();
        assert_eq!(tracker.len(), 2);
        assert_eq!(tracker.take("b"), Some(2));
    }
}
