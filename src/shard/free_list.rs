//! Free-list of reclaimed slots, one bucket per size class.

use super::CLASS_COUNT;

/// Reclaimed slot offsets grouped by size class
#[derive(Debug, Clone)]
pub struct FreeList {
    buckets: [Vec<u64>; CLASS_COUNT],
    len: usize,
}

impl FreeList {
    pub fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| Vec::new()),
            len: 0,
        }
    }

    /// Return a slot of `class` at `offset` to the list
    pub fn push(&mut self, class: u8, offset: u64) {
        self.buckets[class as usize].push(offset);
        self.len += 1;
    }

    /// Take a free slot of exactly `class`, if any
    pub fn pop(&mut self, class: u8) -> Option<u64> {
        let offset = self.buckets[class as usize].pop()?;
        self.len -= 1;
        Some(offset)
    }

    /// Free slots of one class
    pub fn class_len(&self, class: u8) -> usize {
        self.buckets[class as usize].len()
    }

    /// Free slots across all classes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for FreeList {
    fn default() -> Self {
        Self::new()
    }
}
