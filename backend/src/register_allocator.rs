//! The shared register-allocator template (`spec.md` §4.3, §9): a flat,
//! fixed-size array of logical register slots, each tracking which
//! [`NodeId`] it currently holds, whether it is locked, dirty, or
//! permanently blacklisted, and when it was last touched (for LRU
//! eviction). Purely in-memory, lives only for one compilation (`spec.md`
//! §5).
//!
//! Grounded in
//! `original_source/src/compiler/register_allocator_base.hpp`'s
//! `RegisterAllocatorBase<RegType, NUM_REGS>`: same per-slot fields
//! (`contents_`, `locked_`, `dirty_`, `usageCounter_`, `blacklisted_`), same
//! "empty slot first, else evict LRU unlocked/non-blacklisted slot" policy.
//! The physical register type (`RegType` in the original) is not
//! represented here — `forge-backend`'s Cranelift codegen maps each logical
//! slot index onto a Cranelift [`cranelift_frontend::Variable`] rather than
//! a raw XMM/YMM number; see `codegen.rs`.

use forge_ir::NodeId;

use crate::error::{BackendError, Result};

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    content: Option<NodeId>,
    locked: bool,
    dirty: bool,
    last_use: u64,
    blacklisted: bool,
}

/// LRU register allocator over `num_registers` logical slots.
#[derive(Debug, Clone)]
pub struct RegisterAllocator {
    slots: Vec<Slot>,
    counter: u64,
}

impl RegisterAllocator {
    pub fn new(num_registers: usize) -> Self {
        Self {
            slots: vec![Slot::default(); num_registers],
            counter: 0,
        }
    }

    pub fn num_registers(&self) -> usize {
        self.slots.len()
    }

    fn tick(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }

    /// Allocate a register: an empty, unlocked, non-blacklisted slot if one
    /// exists, else the unlocked non-blacklisted slot with the smallest
    /// `last_use`.
    pub fn allocate(&mut self) -> Result<usize> {
        self.allocate_avoiding(&[])
    }

    /// Same as [`Self::allocate`], but every index in `avoid` is treated as
    /// blacklisted for this call only.
    pub fn allocate_avoiding(&mut self, avoid: &[usize]) -> Result<usize> {
        let allocatable = |i: usize, s: &Slot| !s.locked && !s.blacklisted && !avoid.contains(&i);

        if let Some(i) = self
            .slots
            .iter()
            .enumerate()
            .find(|(i, s)| s.content.is_none() && allocatable(*i, s))
            .map(|(i, _)| i)
        {
            let t = self.tick();
            self.slots[i].last_use = t;
            return Ok(i);
        }

        let lru = self
            .slots
            .iter()
            .enumerate()
            .filter(|(i, s)| allocatable(*i, s))
            .min_by_key(|(_, s)| s.last_use)
            .map(|(i, _)| i);

        match lru {
            Some(i) => {
                self.slots[i].content = None;
                self.slots[i].dirty = false;
                let t = self.tick();
                self.slots[i].last_use = t;
                Ok(i)
            }
            None => Err(BackendError::RegisterAllocationFailed {
                count: self.slots.len(),
            }),
        }
    }

    /// Find the register currently holding `node`, if any.
    pub fn find(&self, node: NodeId) -> Option<usize> {
        self.slots.iter().position(|s| s.content == Some(node))
    }

    /// Bind `index` to hold `node`'s value, optionally marking it dirty
    /// (i.e. not yet written back to the value slot).
    pub fn bind(&mut self, index: usize, node: NodeId, dirty: bool) {
        self.slots[index].content = Some(node);
        self.slots[index].dirty = dirty;
        let t = self.tick();
        self.slots[index].last_use = t;
    }

    pub fn content(&self, index: usize) -> Option<NodeId> {
        self.slots[index].content
    }

    pub fn mark_dirty(&mut self, index: usize) {
        self.slots[index].dirty = true;
    }

    pub fn mark_clean(&mut self, index: usize) {
        self.slots[index].dirty = false;
    }

    pub fn is_dirty(&self, index: usize) -> bool {
        self.slots[index].dirty
    }

    pub fn lock(&mut self, index: usize) {
        self.slots[index].locked = true;
    }

    pub fn unlock(&mut self, index: usize) {
        self.slots[index].locked = false;
    }

    pub fn is_locked(&self, index: usize) -> bool {
        self.slots[index].locked
    }

    /// Permanent, per-compilation exclusion (`spec.md` §4.3's
    /// `blacklist(i)` — e.g. the legacy AVX2 top-two-register workaround;
    /// see `isa.rs`'s `Avx2Backend` for why this backend's default is an
    /// empty set).
    pub fn blacklist(&mut self, index: usize) {
        self.slots[index].blacklisted = true;
        self.slots[index].content = None;
        self.slots[index].locked = false;
    }

    pub fn is_blacklisted(&self, index: usize) -> bool {
        self.slots[index].blacklisted
    }

    /// Drop the claim on every register in `volatile_range` (inclusive),
    /// called immediately after any emitted call to an external helper
    /// (transcendentals) per `spec.md` §5's "Volatile-register
    /// invalidation" correctness requirement.
    pub fn invalidate_volatile(&mut self, volatile_range: std::ops::RangeInclusive<usize>) {
        for i in volatile_range {
            if i < self.slots.len() {
                self.slots[i].content = None;
                self.slots[i].dirty = false;
            }
        }
    }

    /// True iff no register in `range` currently reports holding a live
    /// node — the property `spec.md` §8 testable-property 6 checks after
    /// every emitted external call.
    pub fn no_live_node_in_range(&self, range: std::ops::RangeInclusive<usize>) -> bool {
        range
            .filter(|&i| i < self.slots.len())
            .all(|i| self.slots[i].content.is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_empty_slots_first() {
        let mut ra = RegisterAllocator::new(4);
        let a = ra.allocate().unwrap();
        let b = ra.allocate().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn evicts_least_recently_used_when_full() {
        let mut ra = RegisterAllocator::new(2);
        let a = ra.allocate().unwrap();
        ra.bind(a, NodeId(1), false);
        let b = ra.allocate().unwrap();
        ra.bind(b, NodeId(2), false);

        // `a` was touched first, so it is the LRU candidate once both slots
        // are full.
        let evicted = ra.allocate().unwrap();
        assert_eq!(evicted, a);
        assert_eq!(ra.content(a), None);
    }

    #[test]
    fn locked_slots_are_never_evicted() {
        let mut ra = RegisterAllocator::new(2);
        let a = ra.allocate().unwrap();
        ra.bind(a, NodeId(1), false);
        ra.lock(a);
        let b = ra.allocate().unwrap();
        ra.bind(b, NodeId(2), false);

        let err = ra.allocate();
        assert!(err.is_err());
    }

    #[test]
    fn blacklisted_slots_are_never_allocated() {
        let mut ra = RegisterAllocator::new(2);
        ra.blacklist(1);
        let a = ra.allocate().unwrap();
        assert_eq!(a, 0);
        let b = ra.allocate().unwrap();
        assert_eq!(b, 0); // only slot 0 is allocatable, reused via eviction
    }

    #[test]
    fn allocate_avoiding_treats_given_indices_as_blacklisted_once() {
        let mut ra = RegisterAllocator::new(2);
        let avoided = ra.allocate_avoiding(&[0]).unwrap();
        assert_eq!(avoided, 1);
        // Without the avoid-list, slot 0 is allocatable again.
        let next = ra.allocate().unwrap();
        assert_eq!(next, 0);
    }

    #[test]
    fn invalidate_volatile_clears_content_in_range() {
        let mut ra = RegisterAllocator::new(4);
        for i in 0..4 {
            ra.bind(i, NodeId(i as u32), false);
        }
        ra.invalidate_volatile(0..=1);
        assert!(ra.no_live_node_in_range(0..=1));
        assert!(!ra.no_live_node_in_range(2..=3));
    }
}
