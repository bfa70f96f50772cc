//! Overlap gate for periodic per-key tasks.
//!
//! A tick is skipped when the previous run for the same key is still in
//! flight; overlap collapses instead of queueing.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// Keyed in-flight guard shared by periodic tasks.
#[derive(Debug, Default)]
pub struct TaskGate {
    inflight: DashMap<String, ()>,
}

impl TaskGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to enter the gate for `key`. Returns `None` when a run for
    /// the same key is already in flight; otherwise the returned pass
    /// holds the slot until dropped.
    #[must_use]
    pub fn try_enter(&self, key: &str) -> Option<GatePass<'_>> {
        match self.inflight.entry(key.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(GatePass {
                    gate: self,
                    key: key.to_string(),
                })
            }
        }
    }

    /// Whether a run for `key` is currently in flight
    #[must_use]
    pub fn is_busy(&self, key: &str) -> bool {
        self.inflight.contains_key(key)
    }
}

/// Slot held for the duration of one task run
pub struct GatePass<'a> {
    gate: &'a TaskGate,
    key: String,
}

impl Drop for GatePass<'_> {
    fn drop(&mut self) {
        self.gate.inflight.remove(&self.key);
    }
}
