// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Time-ordered poll queue.
//!
//! A plain binary min-heap of `(due_at, device_id, generation)` entries.
//! Entries are immutable values; rescheduling a device bumps its generation
//! and pushes a fresh entry, so older entries for the same device go stale
//! and are discarded on pop. Heap mutations never mutate device state and
//! the heap lock is never held across I/O.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use parking_lot::Mutex;

use crate::device::Registry;

/// One scheduled poll.
///
/// Derived ordering is lexicographic `(due_at, device_id, generation)`,
/// which makes ties deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PollEntry {
    pub due_at: u64,
    pub device_id: u64,
    pub generation: u64,
}

/// Min-heap of poll entries with lazy stale-entry invalidation.
#[derive(Default)]
pub struct PollQueue {
    heap: Mutex<BinaryHeap<Reverse<PollEntry>>>,
}

impl PollQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: PollEntry) {
        self.heap.lock().push(Reverse(entry));
    }

    /// Pop the earliest live entry.
    ///
    /// Entries whose device is gone from the registry, or whose generation
    /// no longer matches the device's current generation, are dropped here.
    pub fn pop_due(&self, registry: &Registry) -> Option<PollEntry> {
        let mut heap = self.heap.lock();
        while let Some(Reverse(entry)) = heap.pop() {
            match registry.get(entry.device_id) {
                Some(device) if device.generation() == entry.generation => return Some(entry),
                _ => continue,
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::DeviceRecord;
    use crate::device::Device;
    use std::sync::Arc;

    fn registry_with(ids: &[u64]) -> Registry {
        let registry = Registry::new();
        for &id in ids {
            let record = DeviceRecord {
                id,
                lookup_id: id * 10,
                tag: "IOTSU_N3_RHTEMP".into(),
                last_seen: 0,
                channels: vec![],
            };
            registry.insert(Arc::new(Device::from_record(&record, 0).expect("device")));
        }
        registry
    }

    #[test]
    fn test_pop_in_due_order() {
        let registry = registry_with(&[1, 2, 3]);
        let queue = PollQueue::new();
        queue.push(PollEntry {
            due_at: 300,
            device_id: 3,
            generation: 0,
        });
        queue.push(PollEntry {
            due_at: 100,
            device_id: 1,
            generation: 0,
        });
        queue.push(PollEntry {
            due_at: 200,
            device_id: 2,
            generation: 0,
        });

        assert_eq!(queue.pop_due(&registry).map(|e| e.device_id), Some(1));
        assert_eq!(queue.pop_due(&registry).map(|e| e.device_id), Some(2));
        assert_eq!(queue.pop_due(&registry).map(|e| e.device_id), Some(3));
        assert_eq!(queue.pop_due(&registry), None);
    }

    #[test]
    fn test_equal_due_ties_break_on_device_id() {
        let registry = registry_with(&[8, 9]);
        let queue = PollQueue::new();
        queue.push(PollEntry {
            due_at: 100,
            device_id: 9,
            generation: 0,
        });
        queue.push(PollEntry {
            due_at: 100,
            device_id: 8,
            generation: 0,
        });

        assert_eq!(queue.pop_due(&registry).map(|e| e.device_id), Some(8));
        assert_eq!(queue.pop_due(&registry).map(|e| e.device_id), Some(9));
    }

    #[test]
    fn test_stale_generation_discarded() {
        let registry = registry_with(&[1]);
        let queue = PollQueue::new();
        let device = registry.get(1).expect("device");

        // entry for generation 0, then the device is rescheduled
        queue.push(PollEntry {
            due_at: 100,
            device_id: 1,
            generation: 0,
        });
        let generation = device.bump_generation();
        queue.push(PollEntry {
            due_at: 200,
            device_id: 1,
            generation,
        });

        // the stale t=100 entry is skipped, the live t=200 entry survives
        let popped = queue.pop_due(&registry).expect("live entry");
        assert_eq!(popped.due_at, 200);
        assert_eq!(popped.generation, 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_unknown_device_discarded() {
        let registry = registry_with(&[1]);
        let queue = PollQueue::new();
        queue.push(PollEntry {
            due_at: 100,
            device_id: 42,
            generation: 0,
        });
        assert_eq!(queue.pop_due(&registry), None);
    }
}
