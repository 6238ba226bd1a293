//! Parameter-owning layer types.
//!
//! Every layer here is built on [`ParamBlock`]: a bag of named half-precision
//! tensors tracked as a single residency unit: a layer is never partially
//! resident. `ParamBlock` keeps its host
//! buffer for the lifetime of the model even after reporting itself
//! `DEVICE`-resident: [`crate::backend::Backend`] stands in for kernels that
//! would read genuine device memory once uploaded, so the actual byte
//! storage a fake or real backend reads from doesn't need to track the
//! residency state machine's bookkeeping 1:1 (see DESIGN.md).

use crate::{
    alloc::ReusedAllocator,
    error::Result,
    residency::{LayerParams, Residency},
};

/// A layer's parameters: one or more named tensors, concatenated in
/// declared order, tracked as a single residency unit.
pub struct ParamBlock {
    tensor_lens: Vec<usize>,
    host: Vec<half::f16>,
    residency: Residency,
    pinned: bool,
}

impl ParamBlock {
    /// Builds a block from already-loaded host data and its declared
    /// per-tensor element-count layout.
    pub fn new(tensor_lens: Vec<usize>, host: Vec<half::f16>) -> Self {
        let expected: usize = tensor_lens.iter().sum();
        assert_eq!(host.len(), expected, "checkpoint tensor length mismatch");
        Self {
            tensor_lens,
            host,
            residency: Residency::Disk,
            pinned: false,
        }
    }

    /// The `i`-th declared tensor's host-resident slice.
    pub fn tensor(&self, i: usize) -> &[half::f16] {
        let start: usize = self.tensor_lens[..i].iter().sum();
        let end = start + self.tensor_lens[i];
        &self.host[start..end]
    }

    /// `true` once `try_pinned` has promoted this block out of `Disk`.
    pub fn is_pinned(&self) -> bool {
        self.pinned
    }
}

impl LayerParams for ParamBlock {
    fn nbytes(&self) -> u64 {
        self.tensor_lens.iter().sum::<usize>() as u64 * 2
    }

    fn residency(&self) -> Residency {
        self.residency
    }

    fn to_device(&mut self, allocator: &mut ReusedAllocator) -> Result<()> {
        let slice = allocator.alloc(self.nbytes(), 256)?;
        self.residency = Residency::Device {
            slice,
            generation: allocator.generation(),
        };
        Ok(())
    }

    fn try_pinned(&mut self) {
        if matches!(self.residency, Residency::Disk) {
            self.residency = Residency::PinnedHost;
            self.pinned = true;
        }
    }

    fn remove_host_data(&mut self) {
        // Bookkeeping only; see module docs. The host buffer is retained
        // regardless so a fake or real backend can keep reading parameter
        // bytes through this type rather than through raw device memory.
    }
}

/// Declared tensor indices within an [`EncoderLayerParams`] block.
mod encoder_tensor {
    pub const SELF_ATTN: usize = 0;
    pub const FEED_FORWARD: usize = 1;
    pub const ATTN_NORM: usize = 2;
    pub const FF_NORM: usize = 3;
}

/// One encoder transformer block's parameters.
pub struct EncoderLayerParams(pub ParamBlock);

impl EncoderLayerParams {
    /// Self-attention projection weights.
    pub fn self_attn(&self) -> &[half::f16] {
        self.0.tensor(encoder_tensor::SELF_ATTN)
    }
    /// Feed-forward weights.
    pub fn feed_forward(&self) -> &[half::f16] {
        self.0.tensor(encoder_tensor::FEED_FORWARD)
    }
    /// Layer norm preceding self-attention.
    pub fn attn_norm(&self) -> &[half::f16] {
        self.0.tensor(encoder_tensor::ATTN_NORM)
    }
    /// Layer norm preceding the feed-forward block.
    pub fn ff_norm(&self) -> &[half::f16] {
        self.0.tensor(encoder_tensor::FF_NORM)
    }
}

impl LayerParams for EncoderLayerParams {
    fn nbytes(&self) -> u64 {
        self.0.nbytes()
    }
    fn residency(&self) -> Residency {
        self.0.residency()
    }
    fn to_device(&mut self, allocator: &mut ReusedAllocator) -> Result<()> {
        self.0.to_device(allocator)
    }
    fn try_pinned(&mut self) {
        self.0.try_pinned()
    }
    fn remove_host_data(&mut self) {
        self.0.remove_host_data()
    }
}

/// Declared tensor indices within a [`DecoderLayerParams`] block.
mod decoder_tensor {
    pub const SELF_ATTN: usize = 0;
    pub const CROSS_ATTN: usize = 1;
    pub const FEED_FORWARD: usize = 2;
    pub const SELF_ATTN_NORM: usize = 3;
    pub const CROSS_ATTN_NORM: usize = 4;
    pub const FF_NORM: usize = 5;
}

/// One decoder transformer block's parameters.
pub struct DecoderLayerParams(pub ParamBlock);

impl DecoderLayerParams {
    /// Self-attention projection weights.
    pub fn self_attn(&self) -> &[half::f16] {
        self.0.tensor(decoder_tensor::SELF_ATTN)
    }
    /// Cross-attention projection weights.
    pub fn cross_attn(&self) -> &[half::f16] {
        self.0.tensor(decoder_tensor::CROSS_ATTN)
    }
    /// Feed-forward weights.
    pub fn feed_forward(&self) -> &[half::f16] {
        self.0.tensor(decoder_tensor::FEED_FORWARD)
    }
    /// Layer norm preceding self-attention.
    pub fn self_attn_norm(&self) -> &[half::f16] {
        self.0.tensor(decoder_tensor::SELF_ATTN_NORM)
    }
    /// Layer norm preceding cross-attention.
    pub fn cross_attn_norm(&self) -> &[half::f16] {
        self.0.tensor(decoder_tensor::CROSS_ATTN_NORM)
    }
    /// Layer norm preceding the feed-forward block.
    pub fn ff_norm(&self) -> &[half::f16] {
        self.0.tensor(decoder_tensor::FF_NORM)
    }
}

impl LayerParams for DecoderLayerParams {
    fn nbytes(&self) -> u64 {
        self.0.nbytes()
    }
    fn residency(&self) -> Residency {
        self.0.residency()
    }
    fn to_device(&mut self, allocator: &mut ReusedAllocator) -> Result<()> {
        self.0.to_device(allocator)
    }
    fn try_pinned(&mut self) {
        self.0.try_pinned()
    }
    fn remove_host_data(&mut self) {
        self.0.remove_host_data()
    }
}
