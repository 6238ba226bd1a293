//! Immutable, builder-constructed configuration records.
//!
//! Mirrors the driver layer's `*Info`/`*InfoBuilder` pattern: a plain data
//! struct with no public constructor, built exclusively through a
//! `derive_builder`-generated builder so every field gets a sane default
//! and callers can't forget a required one.

use derive_builder::{Builder, UninitializedFieldError};

use crate::error::CoreError;

/// Immutable configuration for a [`crate::model::Model`] instance.
///
/// Every dimension here is fixed for the lifetime of the model; there is no
/// dynamic batch growth or reshaping mid-request.
#[derive(Builder, Clone, Copy, Debug, PartialEq, Eq)]
#[builder(
    build_fn(private, name = "fallible_build", error = "CoreConfigBuilderError"),
    derive(Clone, Debug),
    pattern = "owned"
)]
#[non_exhaustive]
pub struct CoreConfig {
    /// Vocabulary size.
    pub vocab_size: u32,
    /// Model (hidden) dimension `D`.
    pub dim_model: u32,
    /// Feed-forward dimension.
    pub dim_ff: u32,
    /// Per-head key/value dimension `Dkv`.
    pub dim_kv: u32,
    /// Attention head count `H`.
    pub num_heads: u32,
    /// Encoder layer count `Le`.
    pub num_encoder_layers: u32,
    /// Decoder layer count `Ld`. Ignored when `encoder_only` is set.
    #[builder(default)]
    pub num_decoder_layers: u32,
    /// Relative-position bucket count.
    pub num_position_buckets: u32,
    /// Maximum decoder sequence length `Lmax`.
    #[builder(default = "1")]
    pub max_decoder_length: u32,
    /// `true` if this model has no decoder stack at all.
    #[builder(default)]
    pub encoder_only: bool,
    /// Total device memory budget in bytes.
    pub memory_limit: u64,
    /// Bytes reserved up front for the activation allocator.
    #[builder(default)]
    pub dynamic_memory: u64,
    /// Whether the streaming double-buffer overlap is enabled at all.
    #[builder(default = "true")]
    pub overlap_enabled: bool,
    /// Overlap layer window `W`, or `None` to auto-select (see
    /// [`crate::overlap::auto_window`]).
    #[builder(default)]
    pub overlap_window: Option<u32>,
}

impl CoreConfig {
    /// Starts building a new configuration.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// The larger of the encoder/decoder layer counts, `M` in the overlap
    /// planner's sizing table.
    pub fn max_layers(&self) -> u32 {
        self.num_encoder_layers.max(self.num_decoder_layers)
    }
}

impl CoreConfigBuilder {
    /// Validates and builds a [`CoreConfig`].
    ///
    /// Fails with [`CoreError::BadConfig`] rather than panicking: malformed
    /// configuration is a recoverable, typed error, not a programmer bug
    /// caught only in debug builds.
    pub fn build(self) -> Result<CoreConfig, CoreError> {
        let config = self
            .fallible_build()
            .map_err(|_| CoreError::BadConfig {
                reason: "missing required configuration field",
            })?;

        if config.dim_model == 0 || config.num_heads == 0 {
            return Err(CoreError::BadConfig {
                reason: "dim_model and num_heads must be nonzero",
            });
        }
        if config.dim_kv == 0 {
            return Err(CoreError::BadConfig {
                reason: "dim_kv must be nonzero",
            });
        }
        if !config.encoder_only && config.max_decoder_length == 0 {
            return Err(CoreError::BadConfig {
                reason: "max_decoder_length must be nonzero for a decoder-enabled model",
            });
        }
        if !config.encoder_only && config.num_decoder_layers == 0 {
            return Err(CoreError::BadConfig {
                reason: "num_decoder_layers must be nonzero for a decoder-enabled model",
            });
        }
        if let Some(w) = config.overlap_window {
            if w == 0 {
                return Err(CoreError::BadConfig {
                    reason: "overlap_window must be at least 1",
                });
            }
        }

        Ok(config)
    }
}

#[derive(Debug)]
pub struct CoreConfigBuilderError(#[allow(dead_code)] UninitializedFieldError);

impl From<UninitializedFieldError> for CoreConfigBuilderError {
    fn from(err: UninitializedFieldError) -> Self {
        Self(err)
    }
}

/// Penalty/sampling configuration for [`crate::sampler::Sampler`].
///
/// The enumerated options are exactly: `top_n: int>=1`, `top_p: 0<float<=1`,
/// `temperature: float>0`, `frequency_penalty`, `presence_penalty`,
/// `max_tokens: int>=1`.
#[derive(Builder, Clone, Debug, PartialEq)]
#[builder(
    build_fn(private, name = "fallible_build", error = "SamplerConfigBuilderError"),
    derive(Clone, Debug),
    pattern = "owned"
)]
#[non_exhaustive]
pub struct SamplerConfig {
    /// Maximum number of tokens to generate.
    pub max_tokens: usize,
    /// Restrict sampling to the top `n` highest-probability tokens.
    #[builder(default)]
    pub top_n: Option<usize>,
    /// Restrict sampling to the minimal prefix with cumulative probability
    /// `>= top_p`.
    #[builder(default)]
    pub top_p: Option<f32>,
    /// Softmax temperature; must be greater than zero.
    #[builder(default = "1.0")]
    pub temperature: f32,
    /// Per-occurrence penalty subtracted for each prior occurrence of a
    /// token in the running history.
    #[builder(default)]
    pub frequency_penalty: f32,
    /// Flat penalty subtracted once if a token appeared at all in history.
    #[builder(default)]
    pub presence_penalty: f32,
}

impl SamplerConfig {
    /// Starts building a new sampler configuration.
    pub fn builder() -> SamplerConfigBuilder {
        SamplerConfigBuilder::default()
    }
}

impl SamplerConfigBuilder {
    /// Validates and builds a [`SamplerConfig`].
    pub fn build(self) -> Result<SamplerConfig, CoreError> {
        let config = self
            .fallible_build()
            .map_err(|_| CoreError::BadConfig {
                reason: "missing required sampler configuration field",
            })?;

        if config.max_tokens == 0 {
            return Err(CoreError::BadConfig {
                reason: "max_tokens must be at least 1",
            });
        }
        if config.temperature <= 0.0 {
            return Err(CoreError::BadConfig {
                reason: "temperature must be greater than zero",
            });
        }
        if let Some(n) = config.top_n {
            if n == 0 {
                return Err(CoreError::BadConfig {
                    reason: "top_n must be at least 1",
                });
            }
        }
        if let Some(p) = config.top_p {
            if !(0.0 < p && p <= 1.0) {
                return Err(CoreError::BadConfig {
                    reason: "top_p must be in (0, 1]",
                });
            }
        }

        Ok(config)
    }
}

#[derive(Debug)]
pub struct SamplerConfigBuilderError(#[allow(dead_code)] UninitializedFieldError);

impl From<UninitializedFieldError> for SamplerConfigBuilderError {
    fn from(err: UninitializedFieldError) -> Self {
        Self(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_rejects_zero_heads() {
        let result = CoreConfig::builder()
            .vocab_size(32000)
            .dim_model(0)
            .dim_ff(2048)
            .dim_kv(64)
            .num_heads(8)
            .num_encoder_layers(12)
            .num_position_buckets(32)
            .memory_limit(1 << 30)
            .build();
        assert!(matches!(result, Err(CoreError::BadConfig { .. })));
    }

    #[test]
    fn builder_accepts_encoder_only() {
        let config = CoreConfig::builder()
            .vocab_size(32000)
            .dim_model(512)
            .dim_ff(2048)
            .dim_kv(64)
            .num_heads(8)
            .num_encoder_layers(12)
            .num_position_buckets(32)
            .memory_limit(1 << 30)
            .encoder_only(true)
            .build()
            .unwrap();
        assert!(config.encoder_only);
    }

    #[test]
    fn builder_rejects_zero_dim_kv_even_when_heads_divide_evenly() {
        let result = CoreConfig::builder()
            .vocab_size(32000)
            .dim_model(512)
            .dim_ff(2048)
            .dim_kv(0)
            .num_heads(8)
            .num_encoder_layers(12)
            .num_position_buckets(32)
            .memory_limit(1 << 30)
            .build();
        assert!(matches!(result, Err(CoreError::BadConfig { .. })));
    }

    #[test]
    fn sampler_config_rejects_zero_temperature() {
        let result = SamplerConfig::builder()
            .max_tokens(8)
            .temperature(0.0)
            .build();
        assert!(matches!(result, Err(CoreError::BadConfig { .. })));
    }
}
