//! The math-kernel boundary.
//!
//! Everything in this module is the seam between this crate (memory layout,
//! residency, streaming, sampling) and the actual GEMM/attention kernels,
//! which are out of scope here and assumed to be supplied by a GPU math
//! backend (cuBLAS/cuDNN-equivalent primitives). `Backend`
//! is the trait that boundary takes the shape of, with a pair of methods
//! standing in for the two independent command queues (`load_stream`/
//! `calc_stream`) that the overlap protocol in [`crate::overlap`]
//! synchronizes against.

use crate::error::Result;

/// A dense half-precision tensor with an explicit shape.
///
/// Row-major, matching the shapes used throughout the encoder/decoder
/// forward pass (e.g. `(batch, dim_model, seq_len)`).
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<half::f16>,
}

impl Tensor {
    /// Builds a tensor from its shape and row-major data.
    ///
    /// # Panics
    /// Panics if `data.len()` doesn't match the product of `shape`.
    pub fn new(shape: Vec<usize>, data: Vec<half::f16>) -> Self {
        let expected: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            expected,
            "tensor data length {} doesn't match shape {:?}",
            data.len(),
            shape
        );
        Self { shape, data }
    }

    /// A tensor of the given shape, filled with zeros.
    pub fn zeros(shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![half::f16::ZERO; len],
        }
    }

    /// The tensor's shape.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Row-major element data.
    pub fn data(&self) -> &[half::f16] {
        &self.data
    }

    /// Mutable row-major element data.
    pub fn data_mut(&mut self) -> &mut [half::f16] {
        &mut self.data
    }

    /// Total element count.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// `true` if this tensor has no elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Per-layer weights needed by [`Backend::encoder_block`].
pub struct EncoderBlockWeights<'a> {
    /// Self-attention projection weights, opaque to this crate.
    pub self_attn: &'a [half::f16],
    /// Feed-forward weights, opaque to this crate.
    pub feed_forward: &'a [half::f16],
    /// Layer-norm scale preceding self-attention.
    pub attn_norm: &'a [half::f16],
    /// Layer-norm scale preceding the feed-forward block.
    pub ff_norm: &'a [half::f16],
}

/// Per-layer weights needed by [`Backend::decoder_block`].
pub struct DecoderBlockWeights<'a> {
    /// Self-attention projection weights, opaque to this crate.
    pub self_attn: &'a [half::f16],
    /// Cross-attention projection weights, opaque to this crate.
    pub cross_attn: &'a [half::f16],
    /// Feed-forward weights, opaque to this crate.
    pub feed_forward: &'a [half::f16],
    /// Layer-norm scale preceding self-attention.
    pub self_attn_norm: &'a [half::f16],
    /// Layer-norm scale preceding cross-attention.
    pub cross_attn_norm: &'a [half::f16],
    /// Layer-norm scale preceding the feed-forward block.
    pub ff_norm: &'a [half::f16],
}

/// The math-kernel primitives the encoder/decoder pipelines are built from.
///
/// An implementation owns (or talks to) whatever device context actually
/// runs these kernels; this crate only ever calls through the trait, never
/// assuming a concrete compute backend. Kernels are *submitted* rather than
/// run to completion inline; it is the caller's job to call
/// `synchronize_calc`/`synchronize_load` at the right points, per
/// [`crate::overlap`]'s protocol.
pub trait Backend: Send + Sync {
    /// Blocks until every kernel previously submitted to the calc stream has
    /// completed. Called at each window boundary before the calc-side
    /// barrier rendezvous.
    fn synchronize_calc(&self);

    /// Blocks until every kernel previously submitted to the load stream has
    /// completed. Called at each window boundary before the load-side
    /// barrier rendezvous.
    fn synchronize_load(&self);

    /// Schedules a host-to-device upload of `bytes` into the given device
    /// byte range, on the load stream. Used by [`crate::residency::LayerParams::to_device`].
    fn upload(&self, offset: u64, bytes: &[u8]) -> Result<()>;

    /// Token embedding lookup, returning `(batch, dim_model, seq_len)`.
    fn embed(&self, weights: &[half::f16], ids: &[u32], batch: usize, seq_len: usize, dim_model: usize) -> Result<Tensor>;

    /// Additive attention mask from per-batch-element valid lengths,
    /// `(batch, seq_len, seq_len)`.
    fn input_mask(&self, lengths: &[u32], seq_len: usize) -> Result<Tensor>;

    /// Collapsed cross-attention mask, `(batch, seq_len)`, used as
    /// `encoder_mask` once a decoder context is bootstrapped: collapsed from
    /// the full self-attention mask for cross-attention use.
    fn cross_attention_mask(&self, lengths: &[u32], seq_len: usize) -> Result<Tensor>;

    /// Relative position bias table, `(1, num_heads, q_len, k_len)`.
    fn position_bias(
        &self,
        table: &[half::f16],
        num_heads: usize,
        num_buckets: usize,
        q_len: usize,
        k_len: usize,
        is_decoder: bool,
    ) -> Result<Tensor>;

    /// One encoder block: layer-normed self-attention with residual,
    /// layer-normed feed-forward with residual.
    fn encoder_block(
        &self,
        x: &Tensor,
        mask: &Tensor,
        position_bias: &Tensor,
        weights: &EncoderBlockWeights<'_>,
    ) -> Result<Tensor>;

    /// Final encoder layer normalization.
    fn layer_norm(&self, x: &Tensor, weights: &[half::f16]) -> Result<Tensor>;

    /// Projects encoder hidden states to per-decoder-layer key/value
    /// tensors, `(num_decoder_layers, 2, batch, num_heads, dim_kv, seq_in)`.
    fn encoder_kv_projection(
        &self,
        hidden_states: &Tensor,
        weights: &[half::f16],
        num_decoder_layers: usize,
        num_heads: usize,
        dim_kv: usize,
    ) -> Result<Tensor>;

    /// One decoder block for a single step: self-attention against
    /// `past_kv[..=step_pos]` (writing the new K/V into column `step_pos`),
    /// cross-attention against `encoder_kv` masked by `encoder_mask`,
    /// feed-forward. Returns the updated `(batch, dim_model)` hidden state.
    fn decoder_block(
        &self,
        x: &Tensor,
        past_kv: &mut Tensor,
        step_pos: u32,
        encoder_mask: &Tensor,
        encoder_kv: &Tensor,
        position_bias: &Tensor,
        weights: &DecoderBlockWeights<'_>,
    ) -> Result<Tensor>;

    /// Projects final decoder hidden states to vocabulary logits,
    /// `(batch, vocab_size)`.
    fn lm_head(&self, x: &Tensor, weights: &[half::f16], vocab_size: usize) -> Result<Tensor>;
}
