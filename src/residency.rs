//! Per-layer parameter residency tracking.
//!
//! A layer's parameters live in exactly one of three places at any given
//! moment: serialized bytes on host storage (`Disk`), a page-locked host
//! buffer staged for fast DMA (`PinnedHost`), or a device allocator slice
//! (`Device`). A layer is never partially resident; transitions are atomic.

use crate::alloc::{Allocator, DeviceSlice, ReusedAllocator};

/// Where a layer's parameters currently live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    /// Serialized bytes on host storage, not yet read into memory.
    Disk,
    /// A page-locked host buffer, staged for fast subsequent DMA.
    PinnedHost,
    /// A device allocator slice, stamped with the allocator generation that
    /// produced it so stale references across a `reset()` can be detected.
    Device {
        /// The device-side byte range.
        slice: DeviceSlice,
        /// Generation of the [`ReusedAllocator`] this slice was issued
        /// under. `to_device` is only idempotent within the same
        /// generation; calling it again after a `reset()` re-uploads.
        generation: u64,
    },
}

impl Residency {
    /// `true` if this layer is currently device-resident under the given
    /// allocator's current generation.
    pub fn is_current_device(&self, allocator: &ReusedAllocator) -> bool {
        matches!(
            self,
            Residency::Device { generation, .. } if *generation == allocator.generation()
        )
    }
}

/// Byte-exact parameter footprint and host-side storage for one
/// transformer layer (encoder block, decoder block, embedding, LM head,
/// position-bias table, etc).
///
/// Implementors own their host-side bytes (loaded by the checkpoint
/// deserializer) and track their own [`Residency`]. The forward-pass
/// compute itself lives on [`crate::backend::Backend`]; this trait is only
/// the residency/transfer contract shared by every parameter-owning layer.
pub trait LayerParams {
    /// Exact byte footprint of this layer's parameters on device.
    fn nbytes(&self) -> u64;

    /// Current residency state.
    fn residency(&self) -> Residency;

    /// Acquires a slice from `allocator` and records this layer as
    /// device-resident on that slice.
    ///
    /// Idempotent only within the same allocator generation: calling this
    /// again while already `Device`-resident under the allocator's current
    /// generation is a no-op copy-wise (the caller may still choose to
    /// re-issue the DMA, but residency tracking treats it as already
    /// satisfied).
    fn to_device(&mut self, allocator: &mut ReusedAllocator) -> crate::error::Result<()>;

    /// If not device-resident and will be repeatedly uploaded, moves the
    /// host-side bytes into a page-locked buffer for faster subsequent DMA.
    fn try_pinned(&mut self);

    /// Releases the non-pinned host copy once this layer is safely
    /// device-resident and will never be re-uploaded (used for
    /// permanent-resident layers after initial load).
    fn remove_host_data(&mut self);
}
