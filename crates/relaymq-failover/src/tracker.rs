//! In-flight command tracking for replay across failovers.
//!
//! Commands that were delegated to a physical transport but not yet
//! acknowledged are retained here so the reconnect task can resend them, in
//! ascending identifier order, before normal traffic resumes on a new
//! connection. The table is bounded: once `max_cache_size` entries are
//! tracked, the oldest entry is evicted rather than letting the table grow
//! without limit under a sustained disconnection.

use std::collections::BTreeMap;

use tracing::debug;

use crate::command::Command;

/// Bounded table of sent-but-unacknowledged commands.
#[derive(Debug)]
pub struct InFlightTracker {
    commands: BTreeMap<u64, Command>,
    max_cache_size: usize,
    evictions: u64,
}

impl InFlightTracker {
    /// Creates a tracker that retains at most `max_cache_size` commands.
    pub fn new(max_cache_size: usize) -> Self {
        Self {
            commands: BTreeMap::new(),
            max_cache_size,
            evictions: 0,
        }
    }

    /// Records a command under its identifier. The command must already have
    /// an id assigned. Evicts the oldest tracked command when the table is
    /// full; eviction is not an error, the dropped command simply leaves
    /// replay consideration.
    pub fn track(&mut self, command: &Command) {
        let Some(id) = command.id() else {
            return;
        };
        self.commands.insert(id, command.clone());
        while self.commands.len() > self.max_cache_size {
            if let Some((evicted, _)) = self.commands.pop_first() {
                self.evictions += 1;
                debug!(command_id = evicted, "in-flight table full, evicting oldest entry");
            }
        }
    }

    /// Removes the entry for a command whose correlated response arrived.
    /// Returns true when the id was tracked.
    pub fn acknowledge(&mut self, command_id: u64) -> bool {
        self.commands.remove(&command_id).is_some()
    }

    /// Returns all tracked commands in ascending identifier order without
    /// removing them; entries stay tracked until acknowledged, since replay
    /// does not guarantee the broker's response outlives the next failure.
    pub fn drain_for_replay(&self) -> Vec<Command> {
        self.commands.values().cloned().collect()
    }

    /// Drops every entry. Used on close.
    pub fn clear(&mut self) {
        self.commands.clear();
    }

    /// Number of tracked commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// True when nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Number of entries dropped due to the capacity bound.
    pub fn evictions(&self) -> u64 {
        self.evictions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use crate::command::CommandKind;

    fn cmd(id: u64) -> Command {
        let mut c = Command::new(CommandKind::Message, Bytes::from_static(b"x"), true);
        c.assign_id(id);
        c
    }

    #[test]
    fn test_track_and_acknowledge() {
        let mut tracker = InFlightTracker::new(16);
        tracker.track(&cmd(1));
        tracker.track(&cmd(2));
        assert_eq!(tracker.len(), 2);

        assert!(tracker.acknowledge(1));
        assert!(!tracker.acknowledge(1));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_untracked_command_without_id_ignored() {
        let mut tracker = InFlightTracker::new(16);
        let unassigned = Command::message(Bytes::new());
        tracker.track(&unassigned);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut tracker = InFlightTracker::new(2);
        tracker.track(&cmd(1));
        tracker.track(&cmd(2));
        tracker.track(&cmd(3));

        assert_eq!(tracker.len(), 2);
        assert_eq!(tracker.evictions(), 1);
        let ids: Vec<u64> = tracker.drain_for_replay().iter().map(|c| c.id().unwrap()).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn test_drain_is_ordered_and_non_destructive() {
        let mut tracker = InFlightTracker::new(16);
        // Insertion order deliberately scrambled.
        tracker.track(&cmd(3));
        tracker.track(&cmd(1));
        tracker.track(&cmd(2));

        let ids: Vec<u64> = tracker.drain_for_replay().iter().map(|c| c.id().unwrap()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        // Still tracked after the drain.
        assert_eq!(tracker.len(), 3);
    }

    #[test]
    fn test_retrack_same_id_replaces() {
        let mut tracker = InFlightTracker::new(16);
        tracker.track(&cmd(5));
        tracker.track(&cmd(5));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_clear() {
        let mut tracker = InFlightTracker::new(16);
        tracker.track(&cmd(1));
        tracker.clear();
        assert!(tracker.is_empty());
    }
}
