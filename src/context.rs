//! Per-request inference context.
//!
//! Created by [`crate::model::Model::encode`], extended by
//! [`crate::model::Model::init_decoder_context`], mutated by every
//! [`crate::model::Model::decode_step`], and discarded at the end of a
//! request. Borrows the model's activation allocator for its tensors; it
//! must not outlive the model.

use crate::backend::Tensor;

/// State threaded through one request's encode → decode lifecycle.
pub struct InferenceContext {
    /// `(batch, dim_model, seq_len)` encoder output.
    pub hidden_states: Tensor,
    /// Valid length per batch element, as supplied to `encode`.
    pub input_length: Vec<u32>,
    /// `(num_decoder_layers, 2, batch, num_heads, dim_kv, seq_in)`, set by
    /// `init_decoder_context`.
    pub encoder_layers_kv: Option<Tensor>,
    /// `(1, num_heads, max_decoder_length, max_decoder_length)`, set by
    /// `init_decoder_context`.
    pub decoder_position_bias: Option<Tensor>,
    /// `(num_decoder_layers, 2, batch, num_heads, dim_kv, max_decoder_length)`,
    /// zero-initialized by `init_decoder_context`, written one column at a
    /// time by each `decode_step`.
    pub past_kv: Option<Tensor>,
    /// `(batch, seq_in)` cross-attention mask, set by `init_decoder_context`.
    pub encoder_mask: Option<Tensor>,
    /// Monotonically increasing decode position in `[0, max_decoder_length)`.
    pub step_pos: u32,
}

impl InferenceContext {
    /// Builds a fresh context from an encoder pass's output. Decoder fields
    /// are left empty until `init_decoder_context` runs.
    pub fn from_encoder_output(hidden_states: Tensor, input_length: Vec<u32>) -> Self {
        Self {
            hidden_states,
            input_length,
            encoder_layers_kv: None,
            decoder_position_bias: None,
            past_kv: None,
            encoder_mask: None,
            step_pos: 0,
        }
    }

    /// `true` once `init_decoder_context` has populated the decoder fields.
    pub fn is_decoder_ready(&self) -> bool {
        self.past_kv.is_some()
    }
}
