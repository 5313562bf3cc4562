//! Concurrent, capacity-bounded storage of state vectors.
//!
//! [`StateStorage`] maps state vectors (byte buffers of a fixed length) to
//! dense indices `0..len`. Workers insert concurrently: insertion is
//! *insert-if-absent* and returns the canonical index of the state.
//!
//! The hash table uses open addressing with linear probing. Every slot is one
//! `AtomicU64` that moves through three phases:
//!
//! - `EMPTY`: nothing stored yet,
//! - `RESERVED`: a worker won the slot and is copying its state,
//! - *ready*: `READY | memo << 32 | index`, where `memo` is a part of the hash,
//! - `TOMBSTONE`: the reservation failed because the storage is full.
//!
//! Readers that hit a reserved slot spin until it becomes ready, then compare
//! the memoized hash and, on a match, the full state vector.
//!
//! The table never grows: indices handed out to running workers must stay
//! valid. Running out of capacity aborts the traversal with
//! [`Error::CapacityExceeded`].

use std::hash::Hasher;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::OnceLock;

use log::trace;
use rustc_hash::FxHasher;

use crate::error::{Capacity, Error, Result};

const EMPTY: u64 = 0;
const RESERVED: u64 = u64::MAX;
const READY: u64 = 1 << 63;
const TOMBSTONE: u64 = READY | (1 << 62);
const MEMO_MASK: u64 = 0x3fff_ffff;
const INDEX_MASK: u64 = 0xffff_ffff;

/// Parent of states that have no predecessor.
pub const NO_PARENT: u32 = u32::MAX;

pub struct StateStorage {
    state_size: usize,
    capacity: usize,
    slots: Box<[AtomicU64]>,
    bitmask: usize,
    max_lookups: usize,
    states: Box<[OnceLock<Box<[u8]>>]>,
    parents: Box<[AtomicU32]>,
    len: AtomicUsize,
}

impl StateStorage {
    pub fn new(state_size: usize, capacity: usize) -> Self {
        assert!(capacity > 0, "State capacity must be positive");
        assert!(
            capacity < u32::MAX as usize,
            "State capacity must be less than {}",
            u32::MAX
        );

        let table_size = (capacity * 2).next_power_of_two();
        Self {
            state_size,
            capacity,
            slots: (0..table_size).map(|_| AtomicU64::new(EMPTY)).collect(),
            bitmask: table_size - 1,
            max_lookups: table_size.min(1024),
            states: (0..capacity).map(|_| OnceLock::new()).collect(),
            parents: (0..capacity).map(|_| AtomicU32::new(NO_PARENT)).collect(),
            len: AtomicUsize::new(0),
        }
    }

    pub fn state_size(&self) -> usize {
        self.state_size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of stored states.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire).min(self.capacity)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn hash(state: &[u8]) -> u64 {
        let mut hasher = FxHasher::default();
        hasher.write(state);
        let hash = hasher.finish();
        // Mix high bits into the slot index, FxHasher leaves low bits weak.
        hash ^ (hash >> 29)
    }

    fn capacity_exceeded(&self) -> Error {
        Error::CapacityExceeded {
            kind: Capacity::State,
            capacity: self.capacity,
        }
    }

    /// Inserts `state` if absent. Returns its index and whether it was newly inserted.
    pub fn add_state(&self, state: &[u8]) -> Result<(u32, bool)> {
        assert_eq!(state.len(), self.state_size, "Unexpected state size");

        let hash = Self::hash(state);
        let memo = (hash >> 32) & MEMO_MASK;

        for offset in 0..self.max_lookups {
            let slot = &self.slots[(hash as usize).wrapping_add(offset) & self.bitmask];
            let mut current = slot.load(Ordering::Acquire);

            if current == EMPTY {
                match slot.compare_exchange(EMPTY, RESERVED, Ordering::AcqRel, Ordering::Acquire) {
                    Ok(_) => {
                        let index = self.len.fetch_add(1, Ordering::AcqRel);
                        if index >= self.capacity {
                            slot.store(TOMBSTONE, Ordering::Release);
                            return Err(self.capacity_exceeded());
                        }
                        if self.states[index].set(state.into()).is_err() {
                            panic!("State {} was initialized twice", index);
                        }
                        slot.store(READY | (memo << 32) | index as u64, Ordering::Release);
                        trace!("add_state: new state {}", index);
                        return Ok((index as u32, true));
                    }
                    Err(actual) => current = actual,
                }
            }

            while current == RESERVED {
                std::hint::spin_loop();
                current = slot.load(Ordering::Acquire);
            }

            if current != TOMBSTONE && (current >> 32) & MEMO_MASK == memo {
                let index = (current & INDEX_MASK) as u32;
                if self.get(index) == state {
                    return Ok((index, false));
                }
            }
        }

        Err(self.capacity_exceeded())
    }

    /// Returns the state vector with the given index.
    pub fn get(&self, index: u32) -> &[u8] {
        match self.states[index as usize].get() {
            Some(state) => state,
            None => panic!("State {} is not stored", index),
        }
    }

    /// Records the state the traversal discovered `index` from.
    pub fn set_parent(&self, index: u32, parent: u32) {
        self.parents[index as usize].store(parent, Ordering::Release);
    }

    /// Returns the discovering state of `index`, or `None` for initial states.
    pub fn parent(&self, index: u32) -> Option<u32> {
        match self.parents[index as usize].load(Ordering::Acquire) {
            NO_PARENT => None,
            parent => Some(parent),
        }
    }

    /// Walks the parent chain from an initial state to `index`.
    pub fn path_to(&self, index: u32) -> Vec<u32> {
        let mut path = vec![index];
        let mut current = index;
        while let Some(parent) = self.parent(current) {
            path.push(parent);
            current = parent;
            assert!(path.len() <= self.len(), "Cyclic parent chain at state {}", index);
        }
        path.reverse();
        path
    }
}

impl std::fmt::Debug for StateStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStorage")
            .field("state_size", &self.state_size)
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}
