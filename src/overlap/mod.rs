//! Double-buffered layer-prefetch: planner, auto-window selection, and the
//! barrier-synchronized load/calc protocol.

mod planner;
mod prefetch;

pub use self::{
    planner::{OverlapPlan, OverlapPlanner},
    prefetch::{run_overlapped_pass, PassDirection, PrefetchError},
};

use crate::error::{CoreError, Result};

/// Chooses the largest overlap window `W` such that
/// `permanent + overlap + dynamic + other <= limit`, preferring the
/// smallest `W` only when a larger one doesn't fit.
///
/// This derives `W` from the measured maximum per-layer byte size `s`
/// rather than a hardcoded constant for one reference model size — see
/// DESIGN.md for the rationale.
pub fn auto_window(
    num_encoder_layers: u32,
    num_decoder_layers: u32,
    max_layer_bytes: u64,
    dynamic_memory: u64,
    other_bytes: u64,
    memory_limit: u64,
) -> Result<u32> {
    let m = num_encoder_layers.max(num_decoder_layers);

    for w in (1..=m).rev() {
        if let Ok(plan) = OverlapPlanner::new(num_encoder_layers, num_decoder_layers, w, max_layer_bytes)
            .plan(dynamic_memory, other_bytes, memory_limit)
        {
            let _ = plan;
            return Ok(w);
        }
    }

    Err(CoreError::InsufficientMemory {
        required: max_layer_bytes + dynamic_memory + other_bytes,
        limit: memory_limit,
    })
}
