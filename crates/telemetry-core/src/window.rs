//! Fixed-capacity, insertion-ordered buffer with FIFO eviction.

use std::collections::VecDeque;

/// Default number of points kept for display.
pub const DEFAULT_CAPACITY: usize = 10;

/// Bounded buffer of the most recent items, oldest first.
///
/// Ordering is by insertion, never by any property of `T`: a late item pushed
/// after newer ones still lands at the tail. `len() <= capacity()` holds after
/// every operation, and the capacity never changes after construction.
#[derive(Debug, Clone)]
pub struct SlidingWindow<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> SlidingWindow<T> {
    /// Create an empty window. A capacity of zero yields a window that never
    /// holds anything.
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `item`, evicting and returning the oldest element when the
    /// window would exceed its capacity.
    pub fn push(&mut self, item: T) -> Option<T> {
        self.items.push_back(item);
        if self.items.len() > self.capacity {
            self.items.pop_front()
        } else {
            None
        }
    }

    /// Replace the contents with the last `capacity` elements of `items`.
    pub fn seed<I>(&mut self, items: I)
    where
        I: IntoIterator<Item = T>,
    {
        self.items.clear();
        for item in items {
            self.push(item);
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Most recently pushed element.
    pub fn newest(&self) -> Option<&T> {
        self.items.back()
    }

    /// Iterate oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

impl<T: Clone> SlidingWindow<T> {
    /// Owned copy of the current contents, oldest first.
    pub fn snapshot(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_window_is_empty() {
        let window: SlidingWindow<u32> = SlidingWindow::new(DEFAULT_CAPACITY);
        assert!(window.is_empty());
        assert_eq!(window.capacity(), 10);
        assert!(window.newest().is_none());
    }

    #[test]
    fn test_push_below_capacity_keeps_everything() {
        let mut window = SlidingWindow::new(3);
        assert_eq!(window.push(1), None);
        assert_eq!(window.push(2), None);
        assert_eq!(window.snapshot(), vec![1, 2]);
    }

    #[test]
    fn test_push_never_exceeds_capacity() {
        let mut window = SlidingWindow::new(4);
        for i in 0..25 {
            window.push(i);
            assert!(window.len() <= window.capacity());
        }
        assert_eq!(window.snapshot(), vec![21, 22, 23, 24]);
    }

    #[test]
    fn test_push_returns_evicted_oldest() {
        let mut window = SlidingWindow::new(2);
        window.push("a");
        window.push("b");
        assert_eq!(window.push("c"), Some("a"));
        assert_eq!(window.snapshot(), vec!["b", "c"]);
    }

    #[test]
    fn test_push_keeps_insertion_order_not_value_order() {
        let mut window = SlidingWindow::new(5);
        window.push(5);
        window.push(6);
        window.push(4);
        assert_eq!(window.snapshot(), vec![5, 6, 4]);
        assert_eq!(window.newest(), Some(&4));
    }

    #[test]
    fn test_seed_replaces_prior_contents() {
        let mut window = SlidingWindow::new(3);
        window.push(100);
        window.push(200);
        window.seed(vec![1, 2]);
        assert_eq!(window.snapshot(), vec![1, 2]);
    }

    #[test]
    fn test_seed_keeps_last_capacity_items() {
        let mut window = SlidingWindow::new(3);
        let items: Vec<u32> = (1..=8).collect();
        window.seed(items.clone());
        assert_eq!(window.snapshot(), items[items.len() - 3..].to_vec());
    }

    #[test]
    fn test_seed_empty_clears() {
        let mut window = SlidingWindow::new(3);
        window.push(1);
        window.seed(Vec::new());
        assert!(window.is_empty());
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let mut window = SlidingWindow::new(3);
        window.push(1);
        let mut snapshot = window.snapshot();
        snapshot.push(99);
        assert_eq!(window.snapshot(), vec![1]);
    }

    #[test]
    fn test_zero_capacity_stays_empty() {
        let mut window = SlidingWindow::new(0);
        assert_eq!(window.push(1), Some(1));
        window.seed(vec![1, 2, 3]);
        assert!(window.is_empty());
    }
}
