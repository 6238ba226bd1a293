//! Partitions encoder/decoder layers into permanent-resident and windowed
//! groups, and sizes the two auxiliary ring buffers.

use crate::error::{CoreError, Result};

/// The sizing decision produced by [`OverlapPlanner::plan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlapPlan {
    /// Number of layers (of each of encoder/decoder) held permanently
    /// resident on device for the model's lifetime.
    pub permanent_layers: u32,
    /// Byte size of ring pool A, or `0` if absent.
    pub pool_a_bytes: u64,
    /// Byte size of ring pool B, or `0` if absent.
    pub pool_b_bytes: u64,
    /// Total bytes permanently resident (`permanent_layers` for each of
    /// encoder and decoder, at `max_layer_bytes` each).
    pub permanent_bytes: u64,
}

impl OverlapPlan {
    /// `pool_a_bytes + pool_b_bytes`.
    pub fn overlap_bytes(&self) -> u64 {
        self.pool_a_bytes + self.pool_b_bytes
    }
}

/// Builds an [`OverlapPlan`] from `Le`, `Ld`, the overlap window `W`, and
/// the maximum per-layer byte size `s`.
#[derive(Debug, Clone, Copy)]
pub struct OverlapPlanner {
    num_encoder_layers: u32,
    num_decoder_layers: u32,
    window: u32,
    max_layer_bytes: u64,
}

impl OverlapPlanner {
    /// Creates a new planner. `window` must satisfy
    /// `1 <= window <= max(num_encoder_layers, num_decoder_layers)`.
    pub fn new(
        num_encoder_layers: u32,
        num_decoder_layers: u32,
        window: u32,
        max_layer_bytes: u64,
    ) -> Self {
        Self {
            num_encoder_layers,
            num_decoder_layers,
            window,
            max_layer_bytes,
        }
    }

    /// `M = max(Le, Ld)`.
    pub fn max_layers(&self) -> u32 {
        self.num_encoder_layers.max(self.num_decoder_layers)
    }

    /// Computes the permanent/windowed packing and rejects any
    /// configuration whose total (permanent + overlap + dynamic reserve +
    /// `other_bytes`) exceeds `memory_limit`. `other_bytes` is the caller's
    /// tally of every tensor this planner doesn't itself size — embedding,
    /// position bias, norms, encoder-KV, LM head — so the same checked sum
    /// is what the caller later carves its allocators out of.
    pub fn plan(&self, dynamic_memory: u64, other_bytes: u64, memory_limit: u64) -> Result<OverlapPlan> {
        let m = self.max_layers() as u64;
        let w = self.window as u64;
        let s = self.max_layer_bytes;

        let (permanent_layers, pool_a_bytes, pool_b_bytes) = if w >= m {
            // All layers permanent; no overlap needed.
            (m, 0, 0)
        } else if 2 * w >= m {
            // First W permanent; tail streamed through B only.
            (w, 0, (m - w) * s)
        } else if 3 * w >= m {
            // First W permanent; next windows alternate A/B.
            (w, (m - 2 * w) * s, w * s)
        } else {
            // Strict double-buffer ping-pong.
            (w, w * s, w * s)
        };

        let permanent_bytes = permanent_layers * s * 2; // encoder + decoder
        let overlap_bytes = pool_a_bytes + pool_b_bytes;
        let required = permanent_bytes + overlap_bytes + dynamic_memory + other_bytes;

        if required > memory_limit {
            return Err(CoreError::InsufficientMemory {
                required,
                limit: memory_limit,
            });
        }

        Ok(OverlapPlan {
            permanent_layers: permanent_layers as u32,
            pool_a_bytes,
            pool_b_bytes,
            permanent_bytes,
        })
    }
}
