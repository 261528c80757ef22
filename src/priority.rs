//! # Priority Ordering
//!
//! A [`PriorityMailbox`] is a [`Mailbox`] whose store hands out the pending item with the
//! *smallest* context key first, as decided by an injected [`KeyComparer`]. Items whose keys
//! compare equal run in arrival order.
//!
//! The comparer is a strategy value supplied once at construction. It must be a consistent
//! total order for the lifetime of the mailbox; an inconsistent comparer yields an unspecified
//! run order but never loses or duplicates an item.
//!
//! ```rust
//! use mailboxes::PriorityMailbox;
//! use std::sync::{Arc, Mutex};
//!
//! let mailbox = PriorityMailbox::<&'static str>::new();
//! let log = Arc::new(Mutex::new(Vec::new()));
//!
//! let l = log.clone();
//! mailbox.execute_with_context("b", move || l.lock().unwrap().push("b")).unwrap();
//! assert_eq!(*log.lock().unwrap(), vec!["b"]);
//! ```

use crate::mailbox::{Mailbox, MailboxBuilder};
use crate::store::{PendingItem, PendingStore};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Total order over optional context keys. `Less` means "runs earlier".
pub trait KeyComparer<K>: Send + Sync + 'static {
    fn compare(&self, a: Option<&K>, b: Option<&K>) -> Ordering;
}

impl<K, F> KeyComparer<K> for F
where
    F: Fn(Option<&K>, Option<&K>) -> Ordering + Send + Sync + 'static,
{
    fn compare(&self, a: Option<&K>, b: Option<&K>) -> Ordering {
        self(a, b)
    }
}

/// Default comparer: the key's natural order, with the default context running last.
#[derive(Debug, Default, Clone, Copy)]
pub struct NaturalOrder;

impl<K: Ord> KeyComparer<K> for NaturalOrder {
    fn compare(&self, a: Option<&K>, b: Option<&K>) -> Ordering {
        match (a, b) {
            (Some(a), Some(b)) => a.cmp(b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}

struct Ranked<K> {
    item: PendingItem<K>,
    comparer: Arc<dyn KeyComparer<K>>,
}

impl<K: 'static> Ord for Ranked<K> {
    // BinaryHeap is a max-heap, so the order is reversed: smallest key, then
    // smallest sequence, sits on top.
    fn cmp(&self, other: &Self) -> Ordering {
        self.comparer
            .compare(self.item.key(), other.item.key())
            .then_with(|| self.item.sequence().cmp(&other.item.sequence()))
            .reverse()
    }
}

impl<K: 'static> PartialOrd for Ranked<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: 'static> PartialEq for Ranked<K> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<K: 'static> Eq for Ranked<K> {}

/// Store ordered by (context key under the comparer, arrival sequence).
pub struct PriorityStore<K> {
    heap: BinaryHeap<Ranked<K>>,
    comparer: Arc<dyn KeyComparer<K>>,
}

impl<K: 'static> PriorityStore<K> {
    pub fn new(comparer: impl KeyComparer<K>) -> Self {
        Self {
            heap: BinaryHeap::new(),
            comparer: Arc::new(comparer),
        }
    }
}

impl<K: Send + 'static> PendingStore<K> for PriorityStore<K> {
    fn kind(&self) -> &'static str {
        "priority"
    }

    fn push(&mut self, item: PendingItem<K>) {
        self.heap.push(Ranked {
            item,
            comparer: Arc::clone(&self.comparer),
        });
    }

    fn pop(&mut self) -> Option<PendingItem<K>> {
        self.heap.pop().map(|ranked| ranked.item)
    }

    fn len(&self) -> usize {
        self.heap.len()
    }

    fn take_all(&mut self) -> Vec<PendingItem<K>> {
        self.heap.drain().map(|ranked| ranked.item).collect()
    }
}

/// A [`Mailbox`] that runs pending work in context-key order.
///
/// Dereferences to [`Mailbox`], so every mailbox operation (`execute`, `spawn`, `close`, ...)
/// is available unchanged; only the ordering differs.
pub struct PriorityMailbox<K> {
    inner: Mailbox<K>,
}

impl<K: Send + 'static> PriorityMailbox<K> {
    /// Priority mailbox using [`NaturalOrder`].
    pub fn new() -> Self
    where
        K: Ord,
    {
        Self::with_comparer(NaturalOrder)
    }

    pub fn with_comparer(comparer: impl KeyComparer<K>) -> Self {
        Mailbox::builder().build_priority(comparer)
    }

    pub(crate) fn from_mailbox(inner: Mailbox<K>) -> Self {
        Self { inner }
    }

    /// Starts a builder; finish it with [`MailboxBuilder::build_priority`].
    pub fn builder() -> MailboxBuilder<K> {
        Mailbox::builder()
    }

    pub fn into_inner(self) -> Mailbox<K> {
        self.inner
    }
}

impl<K: Send + Ord + 'static> Default for PriorityMailbox<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Clone for PriorityMailbox<K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K> Deref for PriorityMailbox<K> {
    type Target = Mailbox<K>;

    fn deref(&self) -> &Mailbox<K> {
        &self.inner
    }
}

impl<K> From<PriorityMailbox<K>> for Mailbox<K> {
    fn from(mailbox: PriorityMailbox<K>) -> Self {
        mailbox.inner
    }
}

impl<K> fmt::Debug for PriorityMailbox<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.inner, f)
    }
}
