//! # Pending-Item Stores
//!
//! A mailbox owns exactly one [`PendingStore`]. The store decides *which* pending item runs
//! next; the mailbox decides *when*. Keeping the two apart means the drain loop is written
//! once and every ordering policy (FIFO, priority, anything a caller plugs in) reuses it.
//!
//! Stores are only ever touched under the mailbox lock, so implementations are plain
//! single-threaded containers.

use std::collections::VecDeque;
use std::fmt;

/// The runnable part of a pending item.
pub(crate) type Payload = Box<dyn FnOnce() + Send + 'static>;

/// A scheduling record: a payload, its context key and its arrival sequence number.
///
/// Items are never mutated once created. Reordering happens only through the order in
/// which a store hands them back.
pub struct PendingItem<K> {
    payload: Payload,
    key: Option<K>,
    sequence: u64,
}

impl<K> PendingItem<K> {
    pub(crate) fn new(payload: Payload, key: Option<K>, sequence: u64) -> Self {
        Self {
            payload,
            key,
            sequence,
        }
    }

    /// The context key the item was enqueued with; `None` is the default context.
    pub fn key(&self) -> Option<&K> {
        self.key.as_ref()
    }

    /// Monotonic arrival number assigned by the mailbox at enqueue time.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub(crate) fn into_payload(self) -> Payload {
        self.payload
    }
}

impl<K: fmt::Debug> fmt::Debug for PendingItem<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingItem")
            .field("key", &self.key)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

/// Ordering policy for the items waiting in a mailbox.
///
/// # Contract
/// - `pop` must return every pushed item exactly once.
/// - Among items the policy considers equal, the smaller `sequence` must come out first.
pub trait PendingStore<K>: Send {
    /// Short policy name, used in logs and `Debug` output.
    fn kind(&self) -> &'static str;

    fn push(&mut self, item: PendingItem<K>);

    fn pop(&mut self) -> Option<PendingItem<K>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every waiting item, in no particular order.
    fn take_all(&mut self) -> Vec<PendingItem<K>>;
}

/// Arrival-order store used by the base mailbox. Context keys are carried but ignored.
pub struct FifoStore<K> {
    items: VecDeque<PendingItem<K>>,
}

impl<K> FifoStore<K> {
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }
}

impl<K> Default for FifoStore<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Send> PendingStore<K> for FifoStore<K> {
    fn kind(&self) -> &'static str {
        "fifo"
    }

    fn push(&mut self, item: PendingItem<K>) {
        self.items.push_back(item);
    }

    fn pop(&mut self) -> Option<PendingItem<K>> {
        self.items.pop_front()
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn take_all(&mut self) -> Vec<PendingItem<K>> {
        self.items.drain(..).collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn item<K>(key: Option<K>, sequence: u64) -> PendingItem<K> {
        PendingItem::new(Box::new(|| {}), key, sequence)
    }

    #[test]
    fn fifo_pops_in_arrival_order_regardless_of_key() {
        let mut store = FifoStore::new();
        store.push(item(Some("b"), 0));
        store.push(item(None, 1));
        store.push(item(Some("a"), 2));

        let order: Vec<u64> = std::iter::from_fn(|| store.pop().map(|i| i.sequence())).collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert!(store.is_empty());
    }

    #[test]
    fn take_all_empties_the_store() {
        let mut store = FifoStore::new();
        store.push(item(Some(1), 0));
        store.push(item(Some(2), 1));

        assert_eq!(store.take_all().len(), 2);
        assert_eq!(store.len(), 0);
        assert!(store.pop().is_none());
    }
}
