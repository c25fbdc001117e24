//! Max-priority queue with predicate-based compaction.
//!
//! A plain array-backed binary heap ordered by a caller-supplied comparator.
//! Entries are never deleted individually: callers leave stale entries in
//! place, discard them when popped, and periodically purge them in one pass
//! with [`MergeQueue::remove_func`], which rebuilds the heap in O(n).

use std::cmp::Ordering;

/// Binary max-heap ordered by `cmp`.
///
/// `cmp(a, b)` returns [`Ordering::Greater`] when `a` has higher priority
/// than `b`. The root (`items[0]`) is always a maximal element.
pub struct MergeQueue<T, F>
where
    F: Fn(&T, &T) -> Ordering,
{
    items: Vec<T>,
    cmp: F,
}

impl<T, F> MergeQueue<T, F>
where
    F: Fn(&T, &T) -> Ordering,
{
    /// Create an empty queue with room for `size_hint` items.
    pub fn new(size_hint: usize, cmp: F) -> Self {
        Self {
            items: Vec::with_capacity(size_hint),
            cmp,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Insert an item. O(log n).
    pub fn insert(&mut self, item: T) {
        self.items.push(item);
        self.sift_up(self.items.len() - 1);
    }

    /// Remove and return the highest-priority item, or `None` if the queue
    /// is empty. O(log n).
    pub fn pop_max(&mut self) -> Option<T> {
        if self.items.is_empty() {
            return None;
        }
        let max = self.items.swap_remove(0);
        if !self.items.is_empty() {
            self.sift_down(0);
        }
        Some(max)
    }

    /// Highest-priority item without removing it.
    pub fn peek(&self) -> Option<&T> {
        self.items.first()
    }

    /// Remove every item for which `rm` returns true, then restore heap
    /// order. Returns the number of items removed. O(n).
    pub fn remove_func(&mut self, mut rm: impl FnMut(&T) -> bool) -> usize {
        let before = self.items.len();
        self.items.retain(|item| !rm(item));
        let removed = before - self.items.len();
        if removed > 0 {
            self.rebuild_heap();
        }
        removed
    }

    fn rebuild_heap(&mut self) {
        for i in (0..self.items.len() / 2).rev() {
            self.sift_down(i);
        }
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if (self.cmp)(&self.items[parent], &self.items[i]) != Ordering::Less {
                return;
            }
            self.items.swap(i, parent);
            i = parent;
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        let len = self.items.len();
        loop {
            let left = 2 * i + 1;
            if left >= len {
                return;
            }
            let mut max_child = left;
            let right = left + 1;
            if right < len && (self.cmp)(&self.items[right], &self.items[left]) == Ordering::Greater
            {
                max_child = right;
            }
            if (self.cmp)(&self.items[i], &self.items[max_child]) != Ordering::Less {
                return;
            }
            self.items.swap(i, max_child);
            i = max_child;
        }
    }
}
