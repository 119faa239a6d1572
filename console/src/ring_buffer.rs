use std::collections::VecDeque;

/// Fixed-capacity FIFO log.
///
/// Holds at most `capacity` items. When full, the oldest item is evicted to
/// make room for the newest, so after pushing `capacity + k` items the buffer
/// holds exactly the last `capacity` in arrival order.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// Creates an empty ring buffer. A capacity of zero is treated as one;
    /// configuration validation rejects it before we get here.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Pushes a new item, returning the evicted one if the buffer was full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    /// Returns up to `n` of the newest items, oldest first.
    pub fn latest(&self, n: usize) -> Vec<&T> {
        let skip = self.items.len().saturating_sub(n);
        self.items.iter().skip(skip).collect()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}
