//! Capacity-bounded allocator for short-lived activation tensors.

use {
    super::Allocator,
    crate::error::{CoreError, Result},
    std::collections::HashMap,
};

/// Opaque handle to a live allocation inside a [`SizeLimitedAllocator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u64);

/// A single device region serving arbitrary-order `alloc`/`free` requests
/// subject to a total capacity cap.
///
/// This allocator is used exclusively for per-step activation tensors: the
/// only contract is the capacity bound and that two live handles never
/// alias one another. Internal placement policy (free-list / best-fit) is
/// not observable from the outside.
#[derive(Debug)]
pub struct SizeLimitedAllocator {
    capacity: u64,
    in_use: u64,
    next_id: u64,
    live: HashMap<u64, (u64, u64)>,
    free_regions: Vec<(u64, u64)>,
    high_water: u64,
}

impl SizeLimitedAllocator {
    /// Creates a new allocator over a region of `capacity` bytes.
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            in_use: 0,
            next_id: 0,
            live: HashMap::new(),
            free_regions: vec![(0, capacity)],
            high_water: 0,
        }
    }

    /// Allocates `n_bytes`, failing with [`CoreError::OverLimit`] if doing
    /// so would exceed the configured capacity or no free region fits.
    pub fn alloc(&mut self, n_bytes: u64) -> Result<Handle> {
        if self.in_use + n_bytes > self.capacity {
            return Err(CoreError::OverLimit {
                requested: n_bytes,
                available: self.capacity - self.in_use,
            });
        }

        // Best-fit over the free list; this is purely an internal placement
        // policy and not part of the allocator's observable contract.
        let best = self
            .free_regions
            .iter()
            .enumerate()
            .filter(|(_, &(_, len))| len >= n_bytes)
            .min_by_key(|(_, &(_, len))| len)
            .map(|(idx, &(offset, len))| (idx, offset, len));

        let (idx, offset, len) = best.ok_or(CoreError::OverLimit {
            requested: n_bytes,
            available: self.capacity - self.in_use,
        })?;

        self.free_regions.remove(idx);
        if len > n_bytes {
            self.free_regions.push((offset + n_bytes, len - n_bytes));
        }

        let id = self.next_id;
        self.next_id += 1;
        self.live.insert(id, (offset, n_bytes));
        self.in_use += n_bytes;
        self.high_water = self.high_water.max(self.in_use);

        Ok(Handle(id))
    }

    /// Allocates space for an array of `element_count` elements of
    /// `element_size` bytes each.
    pub fn alloc_array(&mut self, element_count: u64, element_size: u64) -> Result<Handle> {
        self.alloc(element_count * element_size)
    }

    /// Releases a previously issued handle back to the pool.
    ///
    /// Freeing an unknown or already-freed handle panics: it would
    /// otherwise silently corrupt the free list and violate the "two live
    /// handles never alias" contract.
    pub fn free(&mut self, handle: Handle) {
        let (offset, len) = self
            .live
            .remove(&handle.0)
            .expect("free of unknown or already-freed handle");
        self.in_use -= len;
        self.free_regions.push((offset, len));
    }

    /// Peak bytes in use at any point in this allocator's lifetime.
    pub fn high_water_mark(&self) -> u64 {
        self.high_water
    }
}

impl Allocator for SizeLimitedAllocator {
    type Handle = Handle;

    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn in_use(&self) -> u64 {
        self.in_use
    }
}
