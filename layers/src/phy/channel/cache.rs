//! Channel realization store
//!
//! One record per unordered node pair, held in an arena and addressed by
//! [`ChannelHandle`]. The record remembers which node transmitted when it was
//! generated; a lookup in the opposite direction reports `reversed = true`.

use common::NodeId;
use std::collections::HashMap;

/// Unordered pair of nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PairKey {
    low: NodeId,
    high: NodeId,
}

impl PairKey {
    pub fn new(a: NodeId, b: NodeId) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }
}

/// Index of a record in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelHandle(usize);

#[derive(Debug, Clone)]
struct Slot<T> {
    tx: NodeId,
    value: T,
}

/// Arena of per-pair records with symmetric lookup
#[derive(Debug, Clone)]
pub struct ChannelCache<T> {
    index: HashMap<PairKey, ChannelHandle>,
    slots: Vec<Slot<T>>,
}

impl<T> Default for ChannelCache<T> {
    fn default() -> Self {
        Self {
            index: HashMap::new(),
            slots: Vec::new(),
        }
    }
}

impl<T> ChannelCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Handle for the pair and whether `tx` is the stored receiver
    pub fn lookup(&self, tx: NodeId, rx: NodeId) -> Option<(ChannelHandle, bool)> {
        let handle = *self.index.get(&PairKey::new(tx, rx))?;
        let reversed = self.slots[handle.0].tx != tx;
        Some((handle, reversed))
    }

    /// Store a record generated with `tx` transmitting, replacing any previous one
    pub fn insert(&mut self, tx: NodeId, rx: NodeId, value: T) -> ChannelHandle {
        let key = PairKey::new(tx, rx);
        if let Some(&handle) = self.index.get(&key) {
            self.slots[handle.0] = Slot { tx, value };
            return handle;
        }
        let handle = ChannelHandle(self.slots.len());
        self.slots.push(Slot { tx, value });
        self.index.insert(key, handle);
        handle
    }

    pub fn get(&self, handle: ChannelHandle) -> Option<&T> {
        self.slots.get(handle.0).map(|slot| &slot.value)
    }

    pub fn get_mut(&mut self, handle: ChannelHandle) -> Option<&mut T> {
        self.slots.get_mut(handle.0).map(|slot| &mut slot.value)
    }
}
