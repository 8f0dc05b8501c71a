use std::collections::BTreeMap;

/// Releases items in sequence order.
///
/// Items are inserted under any sequence number and only released once every
/// lower number has been released. An item whose number was already passed is
/// released immediately.
#[derive(Debug)]
pub struct ReorderBuffer<T> {
    pending: BTreeMap<u64, T>,
    next_seq: u64,
}

impl<T> Default for ReorderBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ReorderBuffer<T> {
    pub fn new() -> Self {
        Self {
            pending: BTreeMap::new(),
            next_seq: 0,
        }
    }

    pub fn insert(&mut self, seq: u64, item: T) {
        self.pending.insert(seq, item);
    }

    pub fn try_pop_next(&mut self) -> Option<T> {
        let entry = self.pending.first_entry()?;
        if *entry.key() > self.next_seq {
            return None;
        }
        self.next_seq = self.next_seq.max(*entry.key() + 1);
        Some(entry.remove())
    }

    /// Pop every item that is ready, in order.
    pub fn drain_ready(&mut self) -> impl Iterator<Item = T> + '_ {
        std::iter::from_fn(|| self.try_pop_next())
    }

    /// Pop everything left, skipping over gaps.
    pub fn drain_all(&mut self) -> impl Iterator<Item = T> {
        let pending = std::mem::take(&mut self.pending);
        if let Some(&last) = pending.keys().next_back() {
            self.next_seq = self.next_seq.max(last + 1);
        }
        pending.into_values()
    }

    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
