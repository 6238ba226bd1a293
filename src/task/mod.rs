//! Task drivers: loops over `decode_step` until a sentinel or a budget is
//! reached.

mod blank_fill;
mod generate;

pub use self::{
    blank_fill::{fill_blank, Blank},
    generate::generate,
};

use crate::{
    backend::Backend,
    config::SamplerConfig,
    context::InferenceContext,
    error::{CoreError, Result},
    model::Model,
    sampler::Sampler,
    tokenizer::Tokenizer,
};

const SPAN_TOKEN: &str = "<span>";

/// Encodes `input_ids`, bootstraps the decoder context, and builds a
/// [`Sampler`] seeded with those same ids — the shared prefix of both task
/// drivers.
fn pre_processing<B: Backend>(
    model: &mut Model<B>,
    input_ids: Vec<u32>,
    sampler_config: SamplerConfig,
    seed: u64,
) -> Result<(InferenceContext, Sampler)> {
    let input_length = input_ids.len() as u32;
    let mut ctx = model.encode(&input_ids, 1, input_ids.len(), &[input_length])?;
    model.init_decoder_context(&mut ctx)?;

    let vocab_size = model.tokenizer().vocab_size();
    let sampler = Sampler::new(sampler_config, vocab_size, input_ids, seed);

    Ok((ctx, sampler))
}

/// Tokenizes `text` with span sentinels interleaved at each `<span>` marker.
///
/// When `spans_position` is `None`, markers are autodetected via repeated
/// substring search. When given explicitly, each position is validated to
/// actually start with the marker text before use, rather than trusting the
/// caller's offsets blindly.
fn tokenize_with_spans(
    tokenizer: &Tokenizer,
    text: &str,
    start_span_idx: u32,
    spans_position: Option<Vec<usize>>,
) -> Result<(Vec<u32>, Vec<usize>)> {
    let positions = match spans_position {
        Some(positions) => {
            for &pos in &positions {
                if !text.get(pos..).is_some_and(|rest| rest.starts_with(SPAN_TOKEN)) {
                    return Err(CoreError::InvalidSpan { position: pos });
                }
            }
            positions
        }
        None => {
            let mut positions = Vec::new();
            let mut search_from = 0;
            while let Some(found) = text[search_from..].find(SPAN_TOKEN) {
                let pos = search_from + found;
                positions.push(pos);
                search_from = pos + SPAN_TOKEN.len();
            }
            positions
        }
    };

    let mut ids = Vec::new();
    let mut span_idx = start_span_idx;
    let mut last = 0;
    for &pos in &positions {
        ids.extend(tokenizer.encode(&text[last..pos]));
        ids.push(tokenizer.get_span(span_idx));
        span_idx += 1;
        last = pos + SPAN_TOKEN.len();
    }
    ids.extend(tokenizer.encode(&text[last..]));

    Ok((ids, positions))
}
