//! The `Model`: owns every parameter, both allocator pools, the overlap
//! plan, and the `encode`/`init_decoder_context`/`decode_step` operations.

mod layer;

pub use layer::{DecoderLayerParams, EncoderLayerParams, ParamBlock};

use crate::{
    alloc::{Allocator, ReusedAllocator, SizeLimitedAllocator},
    backend::{Backend, DecoderBlockWeights, EncoderBlockWeights, Tensor},
    checkpoint::CheckpointReader,
    config::CoreConfig,
    context::InferenceContext,
    error::{CoreError, Result},
    overlap::{self, OverlapPlan, OverlapPlanner, PassDirection},
    residency::LayerParams,
    sync::{self, Mutex},
    tokenizer::Tokenizer,
};

fn attn_tensor_len(dim_model: u32, num_heads: u32, dim_kv: u32) -> usize {
    (4 * dim_model * num_heads * dim_kv) as usize
}

fn ff_tensor_len(dim_model: u32, dim_ff: u32) -> usize {
    (2 * dim_model * dim_ff) as usize
}

fn norm_tensor_len(dim_model: u32) -> usize {
    dim_model as usize
}

/// A fully materialized T5-family model: parameters, allocators, overlap
/// plan, and the operations that drive an inference request.
pub struct Model<B: Backend> {
    config: CoreConfig,
    backend: B,
    tokenizer: Tokenizer,

    embedding: ParamBlock,
    encoder_position_bias: ParamBlock,
    encoder_final_norm: ParamBlock,
    encoder_layers: Mutex<Vec<EncoderLayerParams>>,

    decoder_position_bias: Option<ParamBlock>,
    decoder_final_norm: Option<ParamBlock>,
    decoder_layers: Mutex<Vec<DecoderLayerParams>>,
    encoder_kv: Option<ParamBlock>,
    lm_head: Option<ParamBlock>,

    parameter_allocator: ReusedAllocator,
    overlap_allocator: Mutex<[Option<ReusedAllocator>; 2]>,
    overlap_allocator_status: Mutex<[Option<i64>; 2]>,
    variable_allocator: SizeLimitedAllocator,
    plan: OverlapPlan,
    window: u32,
}

impl<B: Backend> Model<B> {
    /// Builds a model from its configuration, a backend, a tokenizer, and a
    /// checkpoint reader positioned at the start of the parameter blob.
    ///
    /// Tensors are read off the checkpoint in the declared order: embedding,
    /// encoder position bias, `Le` encoder blocks, encoder final norm, then
    /// (unless `encoder_only`) decoder position bias, encoder-KV projection,
    /// `Ld` decoder blocks, decoder final norm, LM head.
    pub fn load<R: std::io::Read>(
        config: CoreConfig,
        backend: B,
        tokenizer: Tokenizer,
        reader: &mut CheckpointReader<R>,
    ) -> Result<Self> {
        let dim_model = config.dim_model;
        let dim_ff = config.dim_ff;
        let dim_kv = config.dim_kv;
        let num_heads = config.num_heads;

        info!("reading embedding and encoder parameters from checkpoint");
        let embedding = ParamBlock::new(
            vec![(config.vocab_size * dim_model) as usize],
            reader.read_f16_vec((config.vocab_size * dim_model) as usize)?,
        );
        let encoder_position_bias = ParamBlock::new(
            vec![(config.num_position_buckets * num_heads) as usize],
            reader.read_f16_vec((config.num_position_buckets * num_heads) as usize)?,
        );

        let attn_len = attn_tensor_len(dim_model, num_heads, dim_kv);
        let ff_len = ff_tensor_len(dim_model, dim_ff);
        let norm_len = norm_tensor_len(dim_model);

        let mut encoder_layers = Vec::with_capacity(config.num_encoder_layers as usize);
        for _ in 0..config.num_encoder_layers {
            let lens = vec![attn_len, ff_len, norm_len, norm_len];
            let total: usize = lens.iter().sum();
            encoder_layers.push(EncoderLayerParams(ParamBlock::new(
                lens,
                reader.read_f16_vec(total)?,
            )));
        }
        let encoder_final_norm =
            ParamBlock::new(vec![norm_len], reader.read_f16_vec(norm_len)?);

        let (decoder_position_bias, encoder_kv, decoder_layers, decoder_final_norm, lm_head) =
            if config.encoder_only {
                (None, None, Vec::new(), None, None)
            } else {
                info!("reading decoder parameters from checkpoint");
                let decoder_position_bias = ParamBlock::new(
                    vec![(config.num_position_buckets * num_heads) as usize],
                    reader.read_f16_vec((config.num_position_buckets * num_heads) as usize)?,
                );
                let kv_len =
                    (config.num_decoder_layers * 2 * dim_model * num_heads * dim_kv) as usize;
                let encoder_kv = ParamBlock::new(vec![kv_len], reader.read_f16_vec(kv_len)?);

                let mut decoder_layers = Vec::with_capacity(config.num_decoder_layers as usize);
                for _ in 0..config.num_decoder_layers {
                    let lens = vec![attn_len, attn_len, ff_len, norm_len, norm_len, norm_len];
                    let total: usize = lens.iter().sum();
                    decoder_layers.push(DecoderLayerParams(ParamBlock::new(
                        lens,
                        reader.read_f16_vec(total)?,
                    )));
                }
                let decoder_final_norm =
                    ParamBlock::new(vec![norm_len], reader.read_f16_vec(norm_len)?);
                let lm_head_len = (config.vocab_size * dim_model) as usize;
                let lm_head = ParamBlock::new(vec![lm_head_len], reader.read_f16_vec(lm_head_len)?);

                (
                    Some(decoder_position_bias),
                    Some(encoder_kv),
                    decoder_layers,
                    Some(decoder_final_norm),
                    Some(lm_head),
                )
            };

        let max_layer_bytes = encoder_layers
            .iter()
            .map(|l| l.nbytes())
            .chain(decoder_layers.iter().map(|l| l.nbytes()))
            .max()
            .unwrap_or(0);

        let other_bytes = embedding.nbytes()
            + encoder_position_bias.nbytes()
            + encoder_final_norm.nbytes()
            + decoder_position_bias.as_ref().map_or(0, |b| b.nbytes())
            + encoder_kv.as_ref().map_or(0, |b| b.nbytes())
            + decoder_final_norm.as_ref().map_or(0, |b| b.nbytes())
            + lm_head.as_ref().map_or(0, |b| b.nbytes());

        let window = match config.overlap_window {
            Some(w) if config.overlap_enabled => w,
            None if config.overlap_enabled => overlap::auto_window(
                config.num_encoder_layers,
                config.num_decoder_layers,
                max_layer_bytes,
                config.dynamic_memory,
                other_bytes,
                config.memory_limit,
            )?,
            _ => config.max_layers(),
        };

        let planner = OverlapPlanner::new(
            config.num_encoder_layers,
            config.num_decoder_layers,
            window,
            max_layer_bytes,
        );
        let plan = planner.plan(config.dynamic_memory, other_bytes, config.memory_limit)?;

        info!(
            "overlap plan: permanent_layers={} pool_a={} pool_b={}",
            plan.permanent_layers, plan.pool_a_bytes, plan.pool_b_bytes
        );

        let mut parameter_allocator = ReusedAllocator::new(other_bytes + plan.permanent_bytes);
        let mut encoder_layers = encoder_layers;
        let mut decoder_layers = decoder_layers;
        let mut embedding = embedding;
        let mut encoder_position_bias = encoder_position_bias;
        let mut encoder_final_norm = encoder_final_norm;
        let mut decoder_position_bias = decoder_position_bias;
        let mut encoder_kv = encoder_kv;
        let mut decoder_final_norm = decoder_final_norm;
        let mut lm_head = lm_head;

        embedding.to_device(&mut parameter_allocator)?;
        encoder_position_bias.to_device(&mut parameter_allocator)?;
        encoder_final_norm.to_device(&mut parameter_allocator)?;
        if let Some(b) = decoder_position_bias.as_mut() {
            b.to_device(&mut parameter_allocator)?;
        }
        if let Some(b) = encoder_kv.as_mut() {
            b.to_device(&mut parameter_allocator)?;
        }
        if let Some(b) = decoder_final_norm.as_mut() {
            b.to_device(&mut parameter_allocator)?;
        }
        if let Some(b) = lm_head.as_mut() {
            b.to_device(&mut parameter_allocator)?;
        }

        for layer in encoder_layers.iter_mut().take(plan.permanent_layers as usize) {
            layer.to_device(&mut parameter_allocator)?;
            layer.remove_host_data();
        }
        for layer in decoder_layers.iter_mut().take(plan.permanent_layers as usize) {
            layer.to_device(&mut parameter_allocator)?;
            layer.remove_host_data();
        }
        for layer in encoder_layers.iter_mut().skip(plan.permanent_layers as usize) {
            layer.try_pinned();
        }
        for layer in decoder_layers.iter_mut().skip(plan.permanent_layers as usize) {
            layer.try_pinned();
        }

        let overlap_allocator = if plan.pool_a_bytes == 0 && plan.pool_b_bytes == 0 {
            [None, None]
        } else {
            [
                (plan.pool_a_bytes > 0).then(|| ReusedAllocator::new(plan.pool_a_bytes)),
                (plan.pool_b_bytes > 0).then(|| ReusedAllocator::new(plan.pool_b_bytes)),
            ]
        };

        let variable_allocator = SizeLimitedAllocator::new(
            config.memory_limit - other_bytes - plan.permanent_bytes - plan.overlap_bytes(),
        );

        info!("model ready: {} encoder layers, {} decoder layers", config.num_encoder_layers, config.num_decoder_layers);

        Ok(Self {
            config,
            backend,
            tokenizer,
            embedding,
            encoder_position_bias,
            encoder_final_norm,
            encoder_layers: Mutex::new(encoder_layers),
            decoder_position_bias,
            decoder_final_norm,
            decoder_layers: Mutex::new(decoder_layers),
            encoder_kv,
            lm_head,
            parameter_allocator,
            overlap_allocator: Mutex::new(overlap_allocator),
            overlap_allocator_status: Mutex::new([None, None]),
            variable_allocator,
            plan,
            window,
        })
    }

    /// This model's immutable configuration.
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// The vocabulary and span-sentinel protocol for this model.
    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    /// The overlap plan computed at construction.
    pub fn plan(&self) -> &OverlapPlan {
        &self.plan
    }

    /// The activation allocator's configured capacity, in bytes. A real
    /// backend's kernel launches would carve per-step activation tensors out
    /// of this budget; since kernels are out of scope here, this crate only
    /// reserves and reports the budget rather than calling `alloc`/`free`
    /// against it itself.
    pub fn activation_budget(&self) -> u64 {
        self.variable_allocator.capacity()
    }

    /// Runs the encoder over a batch of token ids.
    ///
    /// `input_ids` is `batch * seq_len` ids in row-major order.
    pub fn encode(
        &mut self,
        input_ids: &[u32],
        batch: usize,
        seq_len: usize,
        input_length: &[u32],
    ) -> Result<InferenceContext> {
        debug!("encode: batch={batch} seq_len={seq_len}");

        let dim_model = self.config.dim_model as usize;
        let num_heads = self.config.num_heads as usize;
        let num_buckets = self.config.num_position_buckets as usize;

        let mask = self.backend.input_mask(input_length, seq_len)?;
        let mut x = self
            .backend
            .embed(self.embedding.tensor(0), input_ids, batch, seq_len, dim_model)?;
        let position_bias = self.backend.position_bias(
            self.encoder_position_bias.tensor(0),
            num_heads,
            num_buckets,
            seq_len,
            seq_len,
            false,
        )?;

        let num_layers = self.config.num_encoder_layers;
        let window = self.window;
        let backend = &self.backend;
        let encoder_layers = &self.encoder_layers;
        let overlap_allocator = &self.overlap_allocator;
        let overlap_allocator_status = &self.overlap_allocator_status;

        overlap::run_overlapped_pass(
            num_layers,
            window,
            || backend.synchronize_calc(),
            || backend.synchronize_load(),
            |i| {
                let layers = sync::lock(encoder_layers);
                let layer = &layers[i as usize];
                let weights = EncoderBlockWeights {
                    self_attn: layer.self_attn(),
                    feed_forward: layer.feed_forward(),
                    attn_norm: layer.attn_norm(),
                    ff_norm: layer.ff_norm(),
                };
                x = backend.encoder_block(&x, &mask, &position_bias, &weights)?;
                Ok(())
            },
            |boundary| {
                prefetch_window(
                    PassDirection::Encoder,
                    boundary,
                    num_layers,
                    window,
                    encoder_layers,
                    overlap_allocator,
                    overlap_allocator_status,
                )
            },
        )?;

        let x = self.backend.layer_norm(&x, self.encoder_final_norm.tensor(0))?;

        Ok(InferenceContext::from_encoder_output(x, input_length.to_vec()))
    }

    /// Bootstraps decoder state from an encoder context. Fails with
    /// [`CoreError::EncoderOnly`] on an encoder-only model.
    pub fn init_decoder_context(&mut self, ctx: &mut InferenceContext) -> Result<()> {
        if self.config.encoder_only {
            return Err(CoreError::EncoderOnly);
        }

        let num_heads = self.config.num_heads as usize;
        let num_buckets = self.config.num_position_buckets as usize;
        let dim_kv = self.config.dim_kv as usize;
        let max_len = self.config.max_decoder_length as usize;
        let batch = ctx.hidden_states.shape()[0];
        let seq_in = *ctx.hidden_states.shape().last().unwrap();
        let num_decoder = sync::lock(&self.decoder_layers).len();

        let encoder_kv = self.encoder_kv.as_ref().expect("encoder_kv present on decoder-enabled model");
        let encoder_layers_kv = self.backend.encoder_kv_projection(
            &ctx.hidden_states,
            encoder_kv.tensor(0),
            num_decoder,
            num_heads,
            dim_kv,
        )?;

        let decoder_position_bias = self
            .decoder_position_bias
            .as_ref()
            .expect("decoder_position_bias present on decoder-enabled model");
        let position_bias = self.backend.position_bias(
            decoder_position_bias.tensor(0),
            num_heads,
            num_buckets,
            max_len,
            max_len,
            true,
        )?;

        let past_kv = Tensor::zeros(vec![num_decoder, 2, batch, num_heads, dim_kv, max_len]);

        let encoder_mask = self.backend.cross_attention_mask(&ctx.input_length, seq_in)?;

        ctx.encoder_layers_kv = Some(encoder_layers_kv);
        ctx.decoder_position_bias = Some(position_bias);
        ctx.past_kv = Some(past_kv);
        ctx.encoder_mask = Some(encoder_mask);
        ctx.step_pos = 0;

        Ok(())
    }

    /// Advances the decoder by one token, returning `(batch, vocab)` logits.
    pub fn decode_step(&mut self, ctx: &mut InferenceContext, token_ids: &[u32]) -> Result<Tensor> {
        if ctx.step_pos >= self.config.max_decoder_length {
            return Err(CoreError::DecodeOverflow);
        }

        let batch = token_ids.len();
        let dim_model = self.config.dim_model as usize;
        let vocab_size = self.config.vocab_size as usize;
        let step_pos = ctx.step_pos;
        ctx.step_pos += 1;

        let mut x = self.backend.embed(self.embedding.tensor(0), token_ids, batch, 1, dim_model)?;

        let num_layers = self.config.num_decoder_layers;
        let window = self.window;
        let encoder_mask = ctx.encoder_mask.as_ref().expect("decoder context initialized");
        let encoder_layers_kv = ctx.encoder_layers_kv.as_ref().expect("decoder context initialized");
        let decoder_position_bias = ctx.decoder_position_bias.as_ref().expect("decoder context initialized");
        let past_kv = ctx.past_kv.as_mut().expect("decoder context initialized");

        let backend = &self.backend;
        let decoder_layers = &self.decoder_layers;
        let overlap_allocator = &self.overlap_allocator;
        let overlap_allocator_status = &self.overlap_allocator_status;

        overlap::run_overlapped_pass(
            num_layers,
            window,
            || backend.synchronize_calc(),
            || backend.synchronize_load(),
            |i| {
                let layers = sync::lock(decoder_layers);
                let layer = &layers[i as usize];
                let weights = DecoderBlockWeights {
                    self_attn: layer.self_attn(),
                    cross_attn: layer.cross_attn(),
                    feed_forward: layer.feed_forward(),
                    self_attn_norm: layer.self_attn_norm(),
                    cross_attn_norm: layer.cross_attn_norm(),
                    ff_norm: layer.ff_norm(),
                };
                x = backend.decoder_block(
                    &x,
                    past_kv,
                    step_pos,
                    encoder_mask,
                    encoder_layers_kv,
                    decoder_position_bias,
                    &weights,
                )?;
                Ok(())
            },
            |boundary| {
                prefetch_window(
                    PassDirection::Decoder,
                    boundary,
                    num_layers,
                    window,
                    decoder_layers,
                    overlap_allocator,
                    overlap_allocator_status,
                )
            },
        )?;

        let x = self
            .backend
            .layer_norm(&x, self.decoder_final_norm.as_ref().unwrap().tensor(0))?;
        let lm_head = self.lm_head.as_ref().unwrap();
        self.backend.lm_head(&x, lm_head.tensor(0), vocab_size)
    }
}

/// Shared load-side window swap-in, used by both the encoder and decoder
/// passes. Matches `encode_loader`/`decode_loader`'s shared skip-if-cached
/// logic, differing only in the sign convention of the status tag.
fn prefetch_window<L: LayerParams>(
    direction: PassDirection,
    boundary: u32,
    num_layers: u32,
    window: u32,
    layers: &Mutex<Vec<L>>,
    overlap_allocator: &Mutex<[Option<ReusedAllocator>; 2]>,
    overlap_allocator_status: &Mutex<[Option<i64>; 2]>,
) -> Result<()> {
    if boundary + window >= num_layers {
        return Ok(());
    }

    let overlap_idx = (((boundary + window) / window) % 2) as usize;
    let tag = match direction {
        PassDirection::Encoder => (boundary as i64) + 1,
        PassDirection::Decoder => -((boundary as i64) + 1),
    };

    if sync::lock(overlap_allocator_status)[overlap_idx] == Some(tag) {
        trace!("window {boundary} cache hit on pool {overlap_idx}");
        return Ok(());
    }

    let mut allocators = sync::lock(overlap_allocator);
    let allocator = allocators[overlap_idx]
        .as_mut()
        .expect("ring pool present when windowed layers remain");
    allocator.reset();

    let start = (boundary + window) as usize;
    let end = (boundary + window * 2).min(num_layers) as usize;
    for layer in &mut sync::lock(layers)[start..end] {
        layer.to_device(allocator)?;
    }

    sync::lock(overlap_allocator_status)[overlap_idx] = Some(tag);

    Ok(())
}
