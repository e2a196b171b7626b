//! Slot buffer pool.
//!
//! The total buffer budget is split into one fixed-size region per
//! connection slot. Regions are separate allocations moved into the
//! worker that owns the slot, so two live connections can never see
//! each other's bytes, and no offset arithmetic is needed to find them.

/// An exclusively owned buffer region tied to a connection slot.
///
/// The region is split in half: the front half accumulates input, the
/// back half receives the handler's response.
#[derive(Debug)]
pub struct SlotBuffer {
    slot: usize,
    data: Box<[u8]>,
}

impl SlotBuffer {
    /// Slot index this region belongs to.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Total size of the region.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Bytes available for buffering an incoming packet.
    pub fn input_capacity(&self) -> usize {
        self.data.len() / 2
    }

    /// Borrow the input and output views at the same time.
    pub fn split_mut(&mut self) -> (&mut [u8], &mut [u8]) {
        let half = self.input_capacity();
        self.data.split_at_mut(half)
    }

    /// Input view only.
    pub fn input_mut(&mut self) -> &mut [u8] {
        self.split_mut().0
    }

    /// Output view only.
    pub fn output(&self) -> &[u8] {
        &self.data[self.input_capacity()..]
    }
}

/// Pool of per-slot buffers with a LIFO free list.
///
/// Owned by the accept loop. A slot is checked out when a connection is
/// accepted and checked back in when its worker exits.
pub struct BufferPool {
    /// Region storage; `None` while checked out.
    slots: Vec<Option<Box<[u8]>>>,
    /// Stack of available slot indices (LIFO for cache locality).
    free_list: Vec<usize>,
    /// Size of each region.
    slot_size: usize,
}

impl BufferPool {
    /// Create a pool of `count` regions of `slot_size` bytes each.
    pub fn new(count: usize, slot_size: usize) -> Self {
        let mut slots = Vec::with_capacity(count);
        // Reverse so slot 0 is handed out first.
        let free_list = (0..count).rev().collect();

        for _ in 0..count {
            slots.push(Some(vec![0u8; slot_size].into_boxed_slice()));
        }

        Self {
            slots,
            free_list,
            slot_size,
        }
    }

    /// Split a total byte budget evenly across `count` slots.
    pub fn partition(total: usize, count: usize) -> Self {
        Self::new(count, total / count.max(1))
    }

    /// Check out a free slot.
    ///
    /// Returns `None` if every slot is in use.
    pub fn alloc(&mut self) -> Option<SlotBuffer> {
        let slot = self.free_list.pop()?;
        let data = self.slots[slot].take()?;
        Some(SlotBuffer { slot, data })
    }

    /// Return a slot to the pool.
    pub fn free(&mut self, buffer: SlotBuffer) {
        let SlotBuffer { slot, data } = buffer;
        debug_assert!(slot < self.slots.len(), "slot index out of bounds");
        debug_assert!(self.slots[slot].is_none(), "slot returned twice");
        self.slots[slot] = Some(data);
        self.free_list.push(slot);
    }

    /// Re-create the region of a slot whose buffer was lost (e.g. dropped
    /// together with a worker that could not be spawned).
    pub fn reclaim(&mut self, slot: usize) {
        debug_assert!(self.slots[slot].is_none(), "slot is not checked out");
        self.slots[slot] = Some(vec![0u8; self.slot_size].into_boxed_slice());
        self.free_list.push(slot);
    }

    /// Size of each slot region.
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots not checked out.
    pub fn available(&self) -> usize {
        self.free_list.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_pool_basic() {
        let mut pool = BufferPool::new(4, 1024);

        assert_eq!(pool.capacity(), 4);
        assert_eq!(pool.available(), 4);
        assert_eq!(pool.slot_size(), 1024);

        let b0 = pool.alloc().unwrap();
        let b1 = pool.alloc().unwrap();
        let b2 = pool.alloc().unwrap();
        let b3 = pool.alloc().unwrap();

        assert_eq!(b0.slot(), 0);
        assert_eq!(b1.slot(), 1);
        assert_eq!(pool.available(), 0);
        assert!(pool.alloc().is_none());

        // Free and reallocate
        pool.free(b1);
        assert_eq!(pool.available(), 1);

        let b4 = pool.alloc().unwrap();
        assert_eq!(b4.slot(), 1); // LIFO reuse

        pool.free(b0);
        pool.free(b2);
        pool.free(b3);
        pool.free(b4);
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn test_partition_sizes() {
        let pool = BufferPool::partition(4200, 5);
        assert_eq!(pool.capacity(), 5);
        assert_eq!(pool.slot_size(), 840);
    }

    #[test]
    fn test_slot_views_are_disjoint() {
        let mut pool = BufferPool::new(2, 100);
        let mut a = pool.alloc().unwrap();
        let mut b = pool.alloc().unwrap();

        a.input_mut().fill(0xAA);
        b.input_mut().fill(0xBB);

        {
            let (input, output) = a.split_mut();
            assert_eq!(input.len(), 50);
            assert_eq!(output.len(), 50);
            output[0] = 7;
        }

        assert!(a.input_mut().iter().all(|&x| x == 0xAA));
        assert!(b.input_mut().iter().all(|&x| x == 0xBB));
        assert_eq!(a.output()[0], 7);
        assert_eq!(b.output()[0], 0);

        pool.free(a);
        pool.free(b);
    }

    #[test]
    fn test_reclaim_lost_slot() {
        let mut pool = BufferPool::new(2, 32);
        let lost = pool.alloc().unwrap();
        let slot = lost.slot();
        drop(lost);
        assert_eq!(pool.available(), 1);

        pool.reclaim(slot);
        assert_eq!(pool.available(), 2);
        let buf = pool.alloc().unwrap();
        assert_eq!(buf.slot(), slot);
        assert_eq!(buf.len(), 32);
        pool.free(buf);
    }

    #[test]
    fn test_contents_survive_checkin() {
        let mut pool = BufferPool::new(1, 16);
        let mut buf = pool.alloc().unwrap();
        buf.input_mut()[0] = 42;
        pool.free(buf);

        let mut buf = pool.alloc().unwrap();
        assert_eq!(buf.len(), 16);
        assert_eq!(buf.input_mut()[0], 42);
        pool.free(buf);
    }
}
