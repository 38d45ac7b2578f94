//! Retention-aware scratch buffer pool.
//!
//! Raw chunk reads hand out buffers owned by this pool. A buffer stays
//! valid across the next few acquisitions (the safety window) and is then
//! eligible for recycling unless the caller has retained it. Buffers are
//! addressed by opaque [`BufferId`] handles; the backing bytes are reached
//! through the owning dataset.

use crate::types::{MAX_BUFFER_COUNT, SAFE_BUFFER_COUNT};

/// Handle to a pool-managed buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferId(u64);

struct PoolBuf {
    id: BufferId,
    data: Vec<u8>,
}

/// Active (recyclable) and retained (pinned) buffer lists.
///
/// The active list is ordered most-recently-acquired first. An acquisition
/// reuses the first exact-size buffer deeper than [`SAFE_BUFFER_COUNT`]
/// entries; when the list holds more than [`MAX_BUFFER_COUNT`] buffers the
/// oldest is resized and reused instead of allocating fresh.
pub struct BufferPool {
    active: Vec<PoolBuf>,
    retained: Vec<PoolBuf>,
    next_id: u64,
}

impl BufferPool {
    pub fn new() -> BufferPool {
        BufferPool { active: Vec::new(), retained: Vec::new(), next_id: 0 }
    }

    /// Acquires a buffer of exactly `size` bytes and returns its handle.
    /// May recycle a previously returned, unretained buffer.
    pub fn get(&mut self, size: usize) -> BufferId {
        // Reuse an exact-size buffer that has aged past the safety window.
        if let Some(pos) = self
            .active
            .iter()
            .enumerate()
            .skip(SAFE_BUFFER_COUNT)
            .find(|(_, b)| b.data.len() == size)
            .map(|(i, _)| i)
        {
            let buf = self.active.remove(pos);
            self.active.insert(0, buf);
            return self.active[0].id;
        }

        // Too many unretained buffers: repurpose the oldest.
        if self.active.len() > MAX_BUFFER_COUNT {
            let mut buf = self.active.pop().expect("active list is non-empty");
            buf.data.resize(size, 0);
            buf.data.shrink_to_fit();
            self.active.insert(0, buf);
            return self.active[0].id;
        }

        let id = BufferId(self.next_id);
        self.next_id += 1;
        self.active.insert(0, PoolBuf { id, data: vec![0u8; size] });
        id
    }

    /// Read access to a live buffer.
    pub fn bytes(&self, id: BufferId) -> Option<&[u8]> {
        self.find(id).map(|b| b.data.as_slice())
    }

    /// Write access to a live buffer.
    pub fn bytes_mut(&mut self, id: BufferId) -> Option<&mut [u8]> {
        if let Some(b) = self.active.iter_mut().find(|b| b.id == id) {
            return Some(b.data.as_mut_slice());
        }
        self.retained.iter_mut().find(|b| b.id == id).map(|b| b.data.as_mut_slice())
    }

    /// Pins a buffer so it is never recycled until discarded. Returns false
    /// for a handle the pool no longer owns.
    pub fn retain(&mut self, id: BufferId) -> bool {
        if let Some(pos) = self.active.iter().position(|b| b.id == id) {
            let buf = self.active.remove(pos);
            self.retained.push(buf);
            return true;
        }
        self.retained.iter().any(|b| b.id == id)
    }

    /// Frees a buffer, retained or not. Returns false for a handle the pool
    /// no longer owns.
    pub fn discard(&mut self, id: BufferId) -> bool {
        if let Some(pos) = self.active.iter().position(|b| b.id == id) {
            self.active.remove(pos);
            return true;
        }
        if let Some(pos) = self.retained.iter().position(|b| b.id == id) {
            self.retained.remove(pos);
            return true;
        }
        false
    }

    fn find(&self, id: BufferId) -> Option<&PoolBuf> {
        self.active
            .iter()
            .find(|b| b.id == id)
            .or_else(|| self.retained.iter().find(|b| b.id == id))
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        BufferPool::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_buffers_within_safety_window() {
        let mut pool = BufferPool::new();
        let mut ids = Vec::new();
        for _ in 0..SAFE_BUFFER_COUNT {
            ids.push(pool.get(16));
        }
        // All distinct: nothing inside the window may be recycled.
        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn aged_exact_size_buffer_is_recycled() {
        let mut pool = BufferPool::new();
        let old = pool.get(64);
        for _ in 0..SAFE_BUFFER_COUNT {
            pool.get(16);
        }
        let reused = pool.get(64);
        assert_eq!(reused, old);
    }

    #[test]
    fn retained_buffers_survive_recycling() {
        let mut pool = BufferPool::new();
        let kept = pool.get(64);
        assert!(pool.retain(kept));
        for _ in 0..MAX_BUFFER_COUNT + 4 {
            pool.get(64);
        }
        assert!(pool.bytes(kept).is_some());
        assert!(pool.discard(kept));
        assert!(pool.bytes(kept).is_none());
    }

    #[test]
    fn oldest_is_repurposed_past_the_cap() {
        let mut pool = BufferPool::new();
        let first = pool.get(8);
        // Distinct sizes so exact-size reuse never triggers.
        for size in 0..MAX_BUFFER_COUNT {
            pool.get(100 + size);
        }
        let recycled = pool.get(24);
        assert_eq!(recycled, first);
        assert_eq!(pool.bytes(recycled).unwrap().len(), 24);
    }
}
