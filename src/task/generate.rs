//! Free-generation task driver.

use crate::{backend::Backend, config::SamplerConfig, error::Result, model::Model};

use super::{pre_processing, tokenize_with_spans, SPAN_TOKEN};

/// Generates free-form continuation text for `input`.
///
/// Appends one sentinel to the input, treats its position as the sole
/// blank, and samples until a stop token is seen or `max_tokens` is
/// exhausted. The end-of-document token is always in the stop set. Returns
/// the generated text and whether a stop token (rather than the token
/// budget) ended generation.
pub fn generate<B: Backend>(
    model: &mut Model<B>,
    input: &str,
    sampler_config: SamplerConfig,
    seed: u64,
    mut stop_tokens: Vec<u32>,
) -> Result<(String, bool)> {
    let eod_id = model.tokenizer().eod_id;
    if !stop_tokens.contains(&eod_id) {
        stop_tokens.push(eod_id);
    }

    let with_sentinel = format!("{input}{SPAN_TOKEN}");
    let (ids, _positions) = tokenize_with_spans(model.tokenizer(), &with_sentinel, 189, None)?;

    let max_tokens = sampler_config.max_tokens;
    let (mut ctx, mut sampler) = pre_processing(model, ids, sampler_config, seed)?;

    let sod_id = model.tokenizer().sod_id;
    model.decode_step(&mut ctx, &[sod_id])?;

    let mut decoder_input = model.tokenizer().get_span(189);
    let mut generated = Vec::new();
    let mut stopped = false;

    for _ in 0..max_tokens {
        let logits = model.decode_step(&mut ctx, &[decoder_input])?;
        let logits_f32: Vec<f32> = logits.data().iter().map(|v| v.to_f32()).collect();
        decoder_input = sampler.sample(&logits_f32);

        if stop_tokens.contains(&decoder_input) {
            stopped = true;
            break;
        }
        generated.push(decoder_input);
    }

    Ok((model.tokenizer().decode(&generated), stopped))
}
