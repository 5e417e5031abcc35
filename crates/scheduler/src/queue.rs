//! Priority queue for tile load requests
//!
//! Orders the requests the world hands to the external download collaborator.
//! Higher priorities pop first; requests of equal priority pop in insertion
//! order. Re-pushing a payload at a higher priority wins because the newer
//! entry sorts ahead of the older one; the consumer is expected to ignore
//! duplicates it has already started.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// How urgently a tile load is needed.
///
/// Higher numeric values pop first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LoadPriority {
    /// Coarse backdrop levels below the target level.
    Backfill = 0,

    /// Just outside the viewport; prefetch for smooth panning.
    Nearby = 1,

    /// Intersects the viewport at the target level; needed now.
    Visible = 2,
}

/// A queued request: priority plus FIFO tie-break.
#[derive(Debug, Clone)]
struct Entry<T> {
    priority: LoadPriority,
    /// Used for FIFO ordering within the same priority.
    insertion_order: u64,
    payload: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.insertion_order == other.insertion_order
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.priority.cmp(&other.priority) {
            // Within the same priority, earlier insertions first. Reversed
            // because BinaryHeap is a max heap.
            Ordering::Equal => other.insertion_order.cmp(&self.insertion_order),
            ordering => ordering,
        }
    }
}

/// Priority-ordered load request queue.
///
/// Single-owner structure; the world owns one and feeds it from the
/// visibility pass.
#[derive(Debug)]
pub struct LoadQueue<T> {
    heap: BinaryHeap<Entry<T>>,
    insertion_counter: u64,
}

impl<T> LoadQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self { heap: BinaryHeap::new(), insertion_counter: 0 }
    }

    /// Queue a payload at the given priority.
    pub fn push(&mut self, priority: LoadPriority, payload: T) {
        let insertion_order = self.insertion_counter;
        self.insertion_counter += 1;
        self.heap.push(Entry { priority, insertion_order, payload });
    }

    /// Pop the most urgent payload, or `None` if empty.
    pub fn pop(&mut self) -> Option<T> {
        self.heap.pop().map(|entry| entry.payload)
    }

    /// Peek at the most urgent payload without removing it.
    pub fn peek(&self) -> Option<&T> {
        self.heap.peek().map(|entry| &entry.payload)
    }

    /// The priority the next pop would return.
    pub fn peek_priority(&self) -> Option<LoadPriority> {
        self.heap.peek().map(|entry| entry.priority)
    }

    /// Number of queued requests.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drop every queued request.
    pub fn clear(&mut self) {
        self.heap.clear();
    }

    /// Remove all requests matching a predicate. Returns how many were
    /// removed. The heap is rebuilt, so FIFO order among survivors holds.
    pub fn remove_if<F>(&mut self, mut predicate: F) -> usize
    where
        F: FnMut(&T) -> bool,
    {
        let original_len = self.heap.len();
        let remaining: Vec<Entry<T>> =
            self.heap.drain().filter(|entry| !predicate(&entry.payload)).collect();
        self.heap = remaining.into_iter().collect();
        original_len - self.heap.len()
    }
}

impl<T> Default for LoadQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
