use std::collections::VecDeque;

/// Bounded FIFO drained a few items per tick by its owner.
#[derive(Debug)]
pub struct WorkQueue<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> WorkQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Returns the item back when the queue is full.
    pub fn push(&mut self, item: T) -> Result<(), T> {
        if self.items.len() >= self.capacity {
            return Err(item);
        }
        self.items.push_back(item);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Pop up to `n` items in FIFO order.
    pub fn take(&mut self, n: usize) -> Vec<T> {
        let n = n.min(self.items.len());
        self.items.drain(..n).collect()
    }

    pub fn retain(&mut self, f: impl FnMut(&T) -> bool) {
        self.items.retain(f);
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_and_bound() {
        let mut queue = WorkQueue::new(3);
        for i in 0..3 {
            queue.push(i).unwrap();
        }
        assert_eq!(queue.push(3), Err(3));
        assert_eq!(queue.take(2), vec![0, 1]);
        queue.push(4).unwrap();
        assert_eq!(queue.take(10), vec![2, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_retain() {
        let mut queue = WorkQueue::new(8);
        for i in 0..6 {
            queue.push(i).unwrap();
        }
        queue.retain(|i| i % 2 == 0);
        assert_eq!(queue.pop(), Some(0));
        assert_eq!(queue.len(), 2);
    }
}
