//! Blank-fill task driver.

use crate::{
    backend::Backend, config::SamplerConfig, error::CoreError, error::Result, model::Model,
};

use super::{pre_processing, tokenize_with_spans};

/// One generated blank: its position in the original input and the text
/// sampled for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blank {
    /// Byte offset of the `<span>` marker this blank replaces.
    pub position: usize,
    /// The generated text for this blank.
    pub text: String,
}

/// Fills in every `<span>` marker in `input` and returns one [`Blank`] per
/// marker, in order.
///
/// Tokenizes the input with span sentinels interleaved, emits a
/// start-of-decoder token, then samples until every span sentinel up to the
/// input's span count has been emitted or `max_tokens` is reached.
///
/// `spans_position` pins the byte offsets of each `<span>` marker explicitly;
/// each one is validated against `input` and rejected with
/// [`CoreError::InvalidSpan`] if it doesn't actually start with the marker
/// text. Pass `None` to autodetect markers via substring search instead.
pub fn fill_blank<B: Backend>(
    model: &mut Model<B>,
    input: &str,
    spans_position: Option<Vec<usize>>,
    sampler_config: SamplerConfig,
    seed: u64,
) -> Result<Vec<Blank>> {
    let (ids, positions) = tokenize_with_spans(model.tokenizer(), input, 0, spans_position)?;
    if positions.is_empty() {
        return Err(CoreError::NoSpans);
    }
    if positions.len() > 16 {
        return Err(CoreError::TooManySpans {
            found: positions.len(),
        });
    }

    let max_tokens = sampler_config.max_tokens;
    let (mut ctx, mut sampler) = pre_processing(model, ids, sampler_config, seed)?;

    let sod_id = model.tokenizer().sod_id;
    model.decode_step(&mut ctx, &[sod_id])?;

    let mut decoder_input = model.tokenizer().get_span(0);
    let mut blanks: Vec<Vec<u32>> = vec![Vec::new()];
    let mut next_span = 1u32;

    for _ in 0..max_tokens {
        let logits = model.decode_step(&mut ctx, &[decoder_input])?;
        let logits_f32: Vec<f32> = logits.data().iter().map(|v| v.to_f32()).collect();
        decoder_input = sampler.sample(&logits_f32);

        if next_span as usize <= positions.len() && decoder_input == model.tokenizer().get_span(next_span) {
            next_span += 1;
            if next_span as usize > positions.len() {
                break;
            }
            blanks.push(Vec::new());
        } else {
            blanks.last_mut().unwrap().push(decoder_input);
        }
    }

    Ok(positions
        .into_iter()
        .zip(blanks)
        .map(|(position, tokens)| Blank {
            position,
            text: model.tokenizer().decode(&tokens),
        })
        .collect())
}
