//! Process-liveness table embedded in the management area
//!
//! Every registered process owns one slot, indexed by its runtime id, and
//! stamps a monotonic timestamp into it as keep-alive. The broker-side
//! monitor scans the table and declares a process dead once the stamp ages
//! past the configured dead interval.

use std::ptr::NonNull;
use std::sync::atomic::Ordering;

use nix::time::{clock_gettime, ClockId};
use serde::{Deserialize, Serialize};

use crate::debug_enforce;
use crate::error::{FloeError, Result};
use crate::memory::headers::LivenessSlot;

/// Identity of a registered process, also its liveness slot index
///
/// Bounded by [`crate::limits::MAX_PROCESSES`] so a single 64-bit bitmap can
/// carry one bit per runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuntimeId(pub u32);

impl RuntimeId {
    /// Bit mask of this runtime inside a chunk owner bitmap
    pub fn bit(&self) -> u64 {
        1u64 << self.0
    }
}

impl std::fmt::Display for RuntimeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "runtime-{}", self.0)
    }
}

/// Current monotonic clock reading in nanoseconds
pub fn monotonic_ns() -> Result<u64> {
    let ts = clock_gettime(ClockId::CLOCK_MONOTONIC)
        .map_err(|e| FloeError::platform(format!("Failed to read the monotonic clock: {}", e)))?;
    Ok(ts.tv_sec() as u64 * 1_000_000_000 + ts.tv_nsec() as u64)
}

/// View over the liveness slot array inside a mapped segment
#[derive(Debug, Clone, Copy)]
pub struct ProcessLivenessTable {
    slots: NonNull<LivenessSlot>,
    capacity: usize,
}

unsafe impl Send for ProcessLivenessTable {}
unsafe impl Sync for ProcessLivenessTable {}

impl ProcessLivenessTable {
    /// Create a view over `capacity` slots starting at `slots`
    ///
    /// # Safety
    /// `slots` must point at `capacity` initialized `LivenessSlot`s inside a
    /// mapping that outlives the view.
    pub unsafe fn from_raw(slots: NonNull<LivenessSlot>, capacity: usize) -> Self {
        Self { slots, capacity }
    }

    /// Number of slots in the table
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn slot(&self, index: usize) -> &LivenessSlot {
        debug_enforce!(index < self.capacity, "liveness slot index out of range");
        unsafe { &*self.slots.as_ptr().add(index) }
    }

    /// Claim a free slot for a process, stamping it immediately
    ///
    /// Returns `Ok(None)` when every slot is taken.
    pub fn claim(&self, pid: u32) -> Result<Option<RuntimeId>> {
        let now = monotonic_ns()?;
        for index in 0..self.capacity {
            let slot = self.slot(index);
            if slot
                .state
                .compare_exchange(
                    LivenessSlot::FREE,
                    LivenessSlot::CLAIMED,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                slot.pid.store(pid, Ordering::Relaxed);
                slot.last_alive_ns.store(now, Ordering::Release);
                return Ok(Some(RuntimeId(index as u32)));
            }
        }
        Ok(None)
    }

    /// Release a slot back to the free state
    pub fn release(&self, id: RuntimeId) {
        let slot = self.slot(id.0 as usize);
        slot.pid.store(0, Ordering::Relaxed);
        slot.state.store(LivenessSlot::FREE, Ordering::Release);
    }

    /// Stamp the keep-alive timestamp of a claimed slot
    pub fn stamp(&self, id: RuntimeId) -> Result<()> {
        self.slot(id.0 as usize)
            .last_alive_ns
            .store(monotonic_ns()?, Ordering::Release);
        Ok(())
    }

    /// Check whether a slot is currently claimed
    pub fn is_claimed(&self, id: RuntimeId) -> bool {
        self.slot(id.0 as usize).state.load(Ordering::Acquire) == LivenessSlot::CLAIMED
    }

    /// Last keep-alive timestamp of a claimed slot
    pub fn last_alive_ns(&self, id: RuntimeId) -> Option<u64> {
        let slot = self.slot(id.0 as usize);
        if slot.state.load(Ordering::Acquire) != LivenessSlot::CLAIMED {
            return None;
        }
        Some(slot.last_alive_ns.load(Ordering::Acquire))
    }

    /// Snapshot of every claimed slot as `(runtime, pid, last_alive_ns)`
    pub fn claimed(&self) -> Vec<(RuntimeId, u32, u64)> {
        let mut out = Vec::new();
        for index in 0..self.capacity {
            let slot = self.slot(index);
            if slot.state.load(Ordering::Acquire) == LivenessSlot::CLAIMED {
                out.push((
                    RuntimeId(index as u32),
                    slot.pid.load(Ordering::Relaxed),
                    slot.last_alive_ns.load(Ordering::Acquire),
                ));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::headers::CACHE_LINE_SIZE;

    fn table_with_capacity(capacity: usize) -> (Vec<u64>, ProcessLivenessTable) {
        let mut backing = vec![0u64; capacity * CACHE_LINE_SIZE / 8];
        let ptr = NonNull::new(backing.as_mut_ptr() as *mut LivenessSlot).unwrap();
        let table = unsafe { ProcessLivenessTable::from_raw(ptr, capacity) };
        (backing, table)
    }

    #[test]
    fn test_claim_assigns_distinct_slots() {
        let (_backing, table) = table_with_capacity(4);

        let a = table.claim(100).unwrap().unwrap();
        let b = table.claim(200).unwrap().unwrap();
        assert_ne!(a, b);
        assert!(table.is_claimed(a));
        assert!(table.is_claimed(b));
    }

    #[test]
    fn test_claim_fails_when_full() {
        let (_backing, table) = table_with_capacity(2);

        assert!(table.claim(1).unwrap().is_some());
        assert!(table.claim(2).unwrap().is_some());
        assert!(table.claim(3).unwrap().is_none());
    }

    #[test]
    fn test_release_makes_slot_reusable() {
        let (_backing, table) = table_with_capacity(1);

        let id = table.claim(7).unwrap().unwrap();
        table.release(id);
        assert!(!table.is_claimed(id));
        assert!(table.claim(8).unwrap().is_some());
    }

    #[test]
    fn test_stamp_advances_timestamp() {
        let (_backing, table) = table_with_capacity(1);

        let id = table.claim(7).unwrap().unwrap();
        let first = table.last_alive_ns(id).unwrap();
        table.stamp(id).unwrap();
        let second = table.last_alive_ns(id).unwrap();
        assert!(second >= first);
    }

    #[test]
    fn test_runtime_bit_positions() {
        assert_eq!(RuntimeId(0).bit(), 1);
        assert_eq!(RuntimeId(5).bit(), 1 << 5);
    }
}
