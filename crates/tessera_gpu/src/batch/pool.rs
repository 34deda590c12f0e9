//! Reusable storage for the batch renderer
//!
//! Two pools live here. [`ScratchPool`] hands out power-of-two sized vectors
//! bucketed by size; buckets only ever grow. [`FramePool`] keeps records that
//! are rebuilt every flush: [`FramePool::reset`] marks them free without
//! dropping their allocations, and [`FramePool::acquire`] clears one before
//! handing it out again.

use bytemuck::Zeroable;

/// Power-of-two buckets of zeroed vectors
#[derive(Debug)]
pub struct ScratchPool<T> {
    buckets: Vec<Option<Vec<T>>>,
}

impl<T> Default for ScratchPool<T> {
    fn default() -> Self {
        Self {
            buckets: Vec::new(),
        }
    }
}

impl<T: Zeroable + Clone> ScratchPool<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn bucket(len: usize) -> (usize, usize) {
        let size = len.max(1).next_power_of_two();
        (size.trailing_zeros() as usize, size)
    }

    /// A vector of at least `min_len` elements, sized to the next power of two
    pub fn take(&mut self, min_len: usize) -> Vec<T> {
        let (index, size) = Self::bucket(min_len);
        if self.buckets.len() <= index {
            self.buckets.resize_with(index + 1, || None);
        }
        match self.buckets[index].take() {
            Some(buffer) => buffer,
            None => vec![T::zeroed(); size],
        }
    }

    /// Return a vector obtained from [`ScratchPool::take`]
    pub fn give(&mut self, buffer: Vec<T>) {
        if !buffer.len().is_power_of_two() {
            return;
        }
        let (index, _) = Self::bucket(buffer.len());
        if self.buckets.len() <= index {
            self.buckets.resize_with(index + 1, || None);
        }
        if self.buckets[index].is_none() {
            self.buckets[index] = Some(buffer);
        }
    }

    /// Buckets holding a buffer right now
    pub fn pooled(&self) -> usize {
        self.buckets.iter().filter(|b| b.is_some()).count()
    }
}

/// Records cleared in place between uses
pub trait Reset {
    fn reset(&mut self);
}

/// Slab of records reused across flushes
#[derive(Debug)]
pub struct FramePool<T> {
    items: Vec<T>,
    used: usize,
}

impl<T> Default for FramePool<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            used: 0,
        }
    }
}

impl<T: Default + Reset> FramePool<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next free record, cleared; returns its index
    pub fn acquire(&mut self) -> usize {
        if self.used == self.items.len() {
            self.items.push(T::default());
        } else {
            self.items[self.used].reset();
        }
        self.used += 1;
        self.used - 1
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.items[..self.used].get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.items[..self.used].get_mut(index)
    }

    /// Records handed out since the last reset
    pub fn in_use(&self) -> &[T] {
        &self.items[..self.used]
    }

    pub fn used(&self) -> usize {
        self.used
    }

    /// Records allocated over the pool's lifetime
    pub fn capacity(&self) -> usize {
        self.items.len()
    }

    /// Free every record, keeping the allocations
    pub fn reset(&mut self) {
        for item in &mut self.items[..self.used] {
            item.reset();
        }
        self.used = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Record {
        values: Vec<u32>,
    }

    impl Reset for Record {
        fn reset(&mut self) {
            self.values.clear();
        }
    }

    #[test]
    fn scratch_rounds_up_to_power_of_two() {
        let mut pool = ScratchPool::<u16>::new();

        assert_eq!(pool.take(5).len(), 8);
        assert_eq!(pool.take(8).len(), 8);
        assert_eq!(pool.take(0).len(), 1);
    }

    #[test]
    fn scratch_reuses_returned_buffers() {
        let mut pool = ScratchPool::<u32>::new();
        let buffer = pool.take(100);
        let ptr = buffer.as_ptr();
        pool.give(buffer);
        assert_eq!(pool.pooled(), 1);

        let again = pool.take(120);
        assert_eq!(again.as_ptr(), ptr);
        assert_eq!(pool.pooled(), 0);
    }

    #[test]
    fn frame_pool_keeps_allocations_across_resets() {
        let mut pool = FramePool::<Record>::new();
        let first = pool.acquire();
        pool.get_mut(first).unwrap().values.extend([1, 2, 3]);
        pool.acquire();
        assert_eq!(pool.used(), 2);

        pool.reset();
        assert_eq!(pool.used(), 0);
        assert_eq!(pool.capacity(), 2);

        let reused = pool.acquire();
        assert_eq!(reused, 0);
        let record = pool.get(reused).unwrap();
        assert!(record.values.is_empty());
        assert!(record.values.capacity() >= 3);
        assert_eq!(pool.capacity(), 2);
    }

    #[test]
    fn records_past_the_used_mark_are_hidden() {
        let mut pool = FramePool::<Record>::new();
        pool.acquire();
        pool.acquire();
        pool.reset();
        pool.acquire();

        assert!(pool.get(1).is_none());
        assert_eq!(pool.in_use().len(), 1);
    }
}
