//! Bounded FIFO store for decoded, normalised samples.

use std::collections::VecDeque;

/// Sample queue that evicts its oldest entries once `capacity` is exceeded.
///
/// The decode loop is the only writer. Readers pop whole blocks through
/// [`PcmRingBuffer::pop_exact`]; a request that cannot be satisfied in full
/// leaves the queue untouched.
#[derive(Debug, Clone)]
pub struct PcmRingBuffer {
    samples: VecDeque<f32>,
    capacity: usize,
}

impl PcmRingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// True while occupancy is below half of the capacity.
    pub fn is_below_half(&self) -> bool {
        self.samples.len() < self.capacity / 2
    }

    /// Appends `block` and trims from the front down to `capacity`.
    ///
    /// Returns the number of samples evicted.
    pub fn push(&mut self, block: &[f32]) -> usize {
        // Only the tail of an oversized block can survive.
        let block = if block.len() > self.capacity {
            &block[block.len() - self.capacity..]
        } else {
            block
        };
        self.samples.extend(block.iter().copied());

        let overflow = self.samples.len().saturating_sub(self.capacity);
        if overflow > 0 {
            self.samples.drain(..overflow);
        }
        overflow
    }

    /// Removes and returns exactly `count` samples from the front, or `None`
    /// if fewer are buffered.
    pub fn pop_exact(&mut self, count: usize) -> Option<Vec<f32>> {
        if self.samples.len() < count {
            return None;
        }
        Some(self.samples.drain(..count).collect())
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Drops all samples and adopts a new capacity.
    pub fn reset(&mut self, capacity: usize) {
        self.samples.clear();
        self.samples.shrink_to(capacity);
        self.capacity = capacity;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(start: usize, len: usize) -> Vec<f32> {
        (start..start + len).map(|i| i as f32).collect()
    }

    #[test]
    fn pops_are_fifo_and_never_overlap() {
        let mut buffer = PcmRingBuffer::new(16);
        buffer.push(&ramp(0, 10));

        assert_eq!(buffer.pop_exact(4).unwrap(), ramp(0, 4));
        assert_eq!(buffer.pop_exact(4).unwrap(), ramp(4, 4));
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn short_reads_leave_buffer_untouched() {
        let mut buffer = PcmRingBuffer::new(16);
        buffer.push(&ramp(0, 3));

        assert!(buffer.pop_exact(4).is_none());
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.pop_exact(3).unwrap(), ramp(0, 3));
    }

    #[test]
    fn evicts_oldest_when_capacity_is_exceeded() {
        let mut buffer = PcmRingBuffer::new(8);
        buffer.push(&ramp(0, 6));
        let evicted = buffer.push(&ramp(6, 6));

        assert_eq!(evicted, 4);
        assert_eq!(buffer.len(), 8);
        assert_eq!(buffer.pop_exact(8).unwrap(), ramp(4, 8));
    }

    #[test]
    fn oversized_block_keeps_only_its_tail() {
        let mut buffer = PcmRingBuffer::new(4);
        buffer.push(&ramp(0, 10));

        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.pop_exact(4).unwrap(), ramp(6, 4));
    }

    #[test]
    fn zero_length_read_is_empty_block() {
        let mut buffer = PcmRingBuffer::new(4);
        assert_eq!(buffer.pop_exact(0), Some(Vec::new()));
    }

    #[test]
    fn half_capacity_threshold() {
        let mut buffer = PcmRingBuffer::new(8);
        buffer.push(&ramp(0, 3));
        assert!(buffer.is_below_half());
        buffer.push(&ramp(3, 1));
        assert!(!buffer.is_below_half());
    }
}
