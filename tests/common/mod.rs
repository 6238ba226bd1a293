//! Shared fixtures for the integration suite: a deterministic fake
//! [`Backend`] (no real GEMM kernels — just closed-form arithmetic) plus a
//! checkpoint-blob builder that mirrors the declared tensor order
//! [`t5_overlap_core::model::Model::load`] reads.

use std::{
    collections::VecDeque,
    io::Cursor,
    sync::Mutex,
};

use t5_overlap_core::{
    backend::{Backend, DecoderBlockWeights, EncoderBlockWeights, Tensor},
    checkpoint::CheckpointReader,
    config::CoreConfig,
    error::Result,
    model::Model,
    tokenizer::Tokenizer,
};

/// Per-tensor element-count formulas duplicated from the model's checkpoint
/// layout contract: a deterministic concatenation of per-layer
/// half-precision tensors in declared order. A checkpoint writer outside
/// this crate has to know this layout too, so the test fixture plays that
/// role here.
pub fn attn_tensor_len(dim_model: u32, num_heads: u32, dim_kv: u32) -> usize {
    (4 * dim_model * num_heads * dim_kv) as usize
}

pub fn ff_tensor_len(dim_model: u32, dim_ff: u32) -> usize {
    (2 * dim_model * dim_ff) as usize
}

pub fn norm_tensor_len(dim_model: u32) -> usize {
    dim_model as usize
}

/// `5` base tokens + `<unk>`/`<sod>`/`<eod>` + `190` span sentinels, matching
/// [`tiny_tokenizer`] exactly so sampled token ids are always valid model
/// vocabulary indices.
pub const TINY_VOCAB_SIZE: u32 = 198;

/// A tiny, deterministic `CoreConfig` good enough to exercise the
/// encoder/decoder pipelines without a real GPU: two heads, two decoder
/// layers, a caller-chosen encoder layer count and overlap window.
pub fn tiny_config(memory_limit: u64, overlap_window: Option<u32>, num_encoder_layers: u32) -> CoreConfig {
    CoreConfig::builder()
        .vocab_size(TINY_VOCAB_SIZE)
        .dim_model(4)
        .dim_ff(4)
        .dim_kv(2)
        .num_heads(2)
        .num_encoder_layers(num_encoder_layers)
        .num_decoder_layers(2)
        .num_position_buckets(8)
        .max_decoder_length(8)
        .memory_limit(memory_limit)
        .overlap_window(overlap_window)
        .build()
        .unwrap()
}

/// Same as [`tiny_config`] but with the streaming overlap disabled
/// entirely (all layers permanently resident), for the equivalence oracle.
pub fn tiny_config_no_overlap(memory_limit: u64, num_encoder_layers: u32) -> CoreConfig {
    CoreConfig::builder()
        .vocab_size(TINY_VOCAB_SIZE)
        .dim_model(4)
        .dim_ff(4)
        .dim_kv(2)
        .num_heads(2)
        .num_encoder_layers(num_encoder_layers)
        .num_decoder_layers(2)
        .num_position_buckets(8)
        .max_decoder_length(8)
        .memory_limit(memory_limit)
        .overlap_enabled(false)
        .build()
        .unwrap()
}

/// Builds a parameter blob matching `config`'s declared tensor order, with
/// every element set to a distinct, deterministic value (`index as f32 *
/// 0.001`) so two checkpoints built from the same config always agree.
pub fn build_checkpoint(config: &CoreConfig) -> CheckpointReader<Cursor<Vec<u8>>> {
    let mut values = Vec::new();
    let mut push_n = |n: usize, values: &mut Vec<u8>| {
        for i in 0..n {
            let v = half::f16::from_f32((i as f32 % 97.0) * 0.001);
            values.extend_from_slice(&v.to_le_bytes());
        }
    };

    push_n((config.vocab_size * config.dim_model) as usize, &mut values);
    push_n((config.num_position_buckets * config.num_heads) as usize, &mut values);

    let attn_len = attn_tensor_len(config.dim_model, config.num_heads, config.dim_kv);
    let ff_len = ff_tensor_len(config.dim_model, config.dim_ff);
    let norm_len = norm_tensor_len(config.dim_model);

    for _ in 0..config.num_encoder_layers {
        push_n(attn_len, &mut values);
        push_n(ff_len, &mut values);
        push_n(norm_len, &mut values);
        push_n(norm_len, &mut values);
    }
    push_n(norm_len, &mut values);

    if !config.encoder_only {
        push_n((config.num_position_buckets * config.num_heads) as usize, &mut values);
        push_n(
            (config.num_decoder_layers * 2 * config.dim_model * config.num_heads * config.dim_kv) as usize,
            &mut values,
        );
        for _ in 0..config.num_decoder_layers {
            push_n(attn_len, &mut values);
            push_n(attn_len, &mut values);
            push_n(ff_len, &mut values);
            push_n(norm_len, &mut values);
            push_n(norm_len, &mut values);
            push_n(norm_len, &mut values);
        }
        push_n(norm_len, &mut values);
        push_n((config.vocab_size * config.dim_model) as usize, &mut values);
    }

    CheckpointReader::new(Cursor::new(values))
}

/// A logits vector with an overwhelming (underflow-guaranteed) peak at
/// `target`, for tests that need the sampler to pick a specific token
/// regardless of its RNG seed.
pub fn one_hot_logits(vocab_size: usize, target: u32) -> Vec<f32> {
    let mut logits = vec![0.0f32; vocab_size];
    logits[target as usize] = 110.0;
    logits
}

/// A vocabulary small enough for tests: `A`, `B`, `X`, `Y`, `Z`, then the
/// required `<unk>`/`<sod>`/`<eod>` trio, then 190 span sentinels.
pub fn tiny_tokenizer() -> Tokenizer {
    let mut lines: Vec<String> = vec!["A".into(), "B".into(), "X".into(), "Y".into(), "Z".into()];
    lines.push("<unk>".into());
    lines.push("<sod>".into());
    lines.push("<eod>".into());
    for i in 0..190 {
        lines.push(format!("<span_{i}>"));
    }
    Tokenizer::load(Cursor::new(lines.join("\n"))).unwrap()
}

pub fn build_model(config: CoreConfig, backend: FakeBackend) -> Model<FakeBackend> {
    let mut reader = build_checkpoint(&config);
    Model::load(config, backend, tiny_tokenizer(), &mut reader).unwrap()
}

/// Deterministic stand-in for the real GEMM/attention kernels: every block
/// is a sum-and-scale of its weights, folded additively onto the running
/// hidden state. Good enough to make the overlap-window equivalence oracles
/// meaningful (the output only depends on which weights a layer carries,
/// never on which ring pool or residency state served them) without a real
/// device.
///
/// `lm_head` optionally plays back a scripted sequence of logit vectors
/// instead of computing one, for tests that need to drive the sampler to a
/// specific token sequence.
pub struct FakeBackend {
    vocab_size: usize,
    logit_script: Mutex<VecDeque<Vec<f32>>>,
}

impl FakeBackend {
    pub fn new(vocab_size: usize) -> Self {
        Self {
            vocab_size,
            logit_script: Mutex::new(VecDeque::new()),
        }
    }

    /// Queues logits to return from successive `lm_head` calls, in order.
    pub fn with_script(vocab_size: usize, script: Vec<Vec<f32>>) -> Self {
        Self {
            vocab_size,
            logit_script: Mutex::new(script.into()),
        }
    }
}

fn sum(data: &[half::f16]) -> f32 {
    data.iter().map(|v| v.to_f32()).sum()
}

impl Backend for FakeBackend {
    fn synchronize_calc(&self) {}

    fn synchronize_load(&self) {}

    fn upload(&self, _offset: u64, _bytes: &[u8]) -> Result<()> {
        Ok(())
    }

    fn embed(&self, weights: &[half::f16], ids: &[u32], batch: usize, seq_len: usize, dim_model: usize) -> Result<Tensor> {
        let mut data = vec![half::f16::ZERO; batch * dim_model * seq_len];
        for b in 0..batch {
            for t in 0..seq_len {
                let id = ids[b * seq_len + t] as usize;
                for d in 0..dim_model {
                    let src = id * dim_model + d;
                    let dst = (b * dim_model + d) * seq_len + t;
                    data[dst] = weights.get(src).copied().unwrap_or(half::f16::ZERO);
                }
            }
        }
        Ok(Tensor::new(vec![batch, dim_model, seq_len], data))
    }

    fn input_mask(&self, lengths: &[u32], seq_len: usize) -> Result<Tensor> {
        Ok(Tensor::zeros(vec![lengths.len(), seq_len, seq_len]))
    }

    fn cross_attention_mask(&self, lengths: &[u32], seq_len: usize) -> Result<Tensor> {
        Ok(Tensor::zeros(vec![lengths.len(), seq_len]))
    }

    fn position_bias(
        &self,
        _table: &[half::f16],
        num_heads: usize,
        _num_buckets: usize,
        q_len: usize,
        k_len: usize,
        _is_decoder: bool,
    ) -> Result<Tensor> {
        Ok(Tensor::zeros(vec![1, num_heads, q_len, k_len]))
    }

    fn encoder_block(
        &self,
        x: &Tensor,
        _mask: &Tensor,
        _position_bias: &Tensor,
        weights: &EncoderBlockWeights<'_>,
    ) -> Result<Tensor> {
        let delta = 0.01
            * (sum(weights.self_attn) + sum(weights.feed_forward) + sum(weights.attn_norm) + sum(weights.ff_norm));
        let data: Vec<half::f16> = x.data().iter().map(|v| half::f16::from_f32(v.to_f32() + delta)).collect();
        Ok(Tensor::new(x.shape().to_vec(), data))
    }

    fn layer_norm(&self, x: &Tensor, weights: &[half::f16]) -> Result<Tensor> {
        let scale = 1.0 + 0.001 * sum(weights);
        let data: Vec<half::f16> = x.data().iter().map(|v| half::f16::from_f32(v.to_f32() * scale)).collect();
        Ok(Tensor::new(x.shape().to_vec(), data))
    }

    fn encoder_kv_projection(
        &self,
        hidden_states: &Tensor,
        weights: &[half::f16],
        num_decoder_layers: usize,
        num_heads: usize,
        dim_kv: usize,
    ) -> Result<Tensor> {
        let batch = hidden_states.shape()[0];
        let seq_in = *hidden_states.shape().last().unwrap();
        let value = half::f16::from_f32(0.001 * sum(hidden_states.data()) + 0.0001 * sum(weights));
        let len = num_decoder_layers * 2 * batch * num_heads * dim_kv * seq_in;
        Ok(Tensor::new(
            vec![num_decoder_layers, 2, batch, num_heads, dim_kv, seq_in],
            vec![value; len],
        ))
    }

    fn decoder_block(
        &self,
        x: &Tensor,
        past_kv: &mut Tensor,
        step_pos: u32,
        _encoder_mask: &Tensor,
        encoder_kv: &Tensor,
        _position_bias: &Tensor,
        weights: &DecoderBlockWeights<'_>,
    ) -> Result<Tensor> {
        let past_kv_shape = past_kv.shape().to_vec();
        let max_len = *past_kv_shape.last().unwrap();
        let marker = half::f16::from_f32(sum(x.data()) + step_pos as f32);
        let num_layers = past_kv_shape[0];
        let batch = past_kv_shape[2];
        let num_heads = past_kv_shape[3];
        let dim_kv = past_kv_shape[4];
        for l in 0..num_layers {
            for kv in 0..2 {
                for b in 0..batch {
                    for h in 0..num_heads {
                        for d in 0..dim_kv {
                            let idx = ((((l * 2 + kv) * batch + b) * num_heads + h) * dim_kv + d) * max_len
                                + step_pos as usize;
                            past_kv.data_mut()[idx] = marker;
                        }
                    }
                }
            }
        }

        let delta = 0.01
            * (sum(weights.self_attn)
                + sum(weights.cross_attn)
                + sum(weights.feed_forward)
                + sum(weights.self_attn_norm)
                + sum(weights.cross_attn_norm)
                + sum(weights.ff_norm)
                + sum(encoder_kv.data()));
        let data: Vec<half::f16> = x.data().iter().map(|v| half::f16::from_f32(v.to_f32() + delta)).collect();
        Ok(Tensor::new(x.shape().to_vec(), data))
    }

    fn lm_head(&self, x: &Tensor, weights: &[half::f16], vocab_size: usize) -> Result<Tensor> {
        let batch = x.shape()[0];
        assert_eq!(vocab_size, self.vocab_size);

        if let Some(scripted) = self.logit_script.lock().unwrap().pop_front() {
            assert_eq!(scripted.len(), vocab_size, "scripted logits must cover the whole vocabulary");
            let data: Vec<half::f16> = scripted.into_iter().map(half::f16::from_f32).collect();
            return Ok(Tensor::new(vec![batch, vocab_size], data));
        }

        let delta = half::f16::from_f32(0.01 * (sum(x.data()) + sum(weights)));
        Ok(Tensor::new(vec![batch, vocab_size], vec![delta; batch * vocab_size]))
    }
}
