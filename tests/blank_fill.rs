//! End-to-end blank-fill scenarios, driven by a scripted fake backend so the
//! sampler is forced down an exact, known token path.

mod common;

use common::{build_model, one_hot_logits, tiny_config, FakeBackend, TINY_VOCAB_SIZE};
use t5_overlap_core::{config::SamplerConfig, task::fill_blank};

fn sampler_config(max_tokens: usize) -> SamplerConfig {
    SamplerConfig::builder().max_tokens(max_tokens).build().unwrap()
}

/// A single `<span>` marker: one content token, then the matching
/// terminator sentinel.
#[test]
fn single_span_fills_one_blank() {
    let config = tiny_config(1 << 20, Some(3), 3);
    let vocab = TINY_VOCAB_SIZE as usize;

    // X = 2 (a plain vocabulary token); span(1) = 9.
    let script = vec![
        one_hot_logits(vocab, 6), // sod decode_step, discarded by fill_blank
        one_hot_logits(vocab, 2), // "X"
        one_hot_logits(vocab, 9), // span(1): terminates the only blank
    ];
    let mut model = build_model(config, FakeBackend::with_script(vocab, script));

    let blanks = fill_blank(&mut model, "A<span>B", None, sampler_config(8), 0).unwrap();

    assert_eq!(blanks.len(), 1);
    assert_eq!(blanks[0].position, 1);
    assert_eq!(blanks[0].text, "X");
}

/// Three `<span>` markers, each filled with a single content token before
/// its terminator, mirroring `fill_blank`'s span bookkeeping across a run
/// longer than one window boundary.
#[test]
fn three_spans_fill_three_blanks_in_order() {
    let config = tiny_config(1 << 20, Some(2), 6);
    let vocab = TINY_VOCAB_SIZE as usize;

    let script = vec![
        one_hot_logits(vocab, 6),  // sod decode_step, discarded
        one_hot_logits(vocab, 2),  // "X" -> blank 0
        one_hot_logits(vocab, 9),  // span(1): close blank 0, open blank 1
        one_hot_logits(vocab, 3),  // "Y" -> blank 1
        one_hot_logits(vocab, 10), // span(2): close blank 1, open blank 2
        one_hot_logits(vocab, 4),  // "Z" -> blank 2
        one_hot_logits(vocab, 11), // span(3): close blank 2, stop
    ];
    let mut model = build_model(config, FakeBackend::with_script(vocab, script));

    let blanks = fill_blank(&mut model, "<span> <span> <span>", None, sampler_config(8), 0).unwrap();

    assert_eq!(blanks.iter().map(|b| b.text.as_str()).collect::<Vec<_>>(), vec!["X", "Y", "Z"]);
}

#[test]
fn input_without_any_span_marker_is_rejected() {
    let config = tiny_config(1 << 20, Some(3), 3);
    let vocab = TINY_VOCAB_SIZE as usize;
    let mut model = build_model(config, FakeBackend::new(vocab));

    let result = fill_blank(&mut model, "no markers here", None, sampler_config(8), 0);
    assert!(matches!(result, Err(t5_overlap_core::error::CoreError::NoSpans)));
}

#[test]
fn explicit_span_position_matching_the_marker_is_accepted() {
    let config = tiny_config(1 << 20, Some(3), 3);
    let vocab = TINY_VOCAB_SIZE as usize;

    let script = vec![
        one_hot_logits(vocab, 6), // sod decode_step, discarded
        one_hot_logits(vocab, 2), // "X"
        one_hot_logits(vocab, 9), // span(1): terminates the only blank
    ];
    let mut model = build_model(config, FakeBackend::with_script(vocab, script));

    let blanks = fill_blank(&mut model, "A<span>B", Some(vec![1]), sampler_config(8), 0).unwrap();

    assert_eq!(blanks.len(), 1);
    assert_eq!(blanks[0].position, 1);
    assert_eq!(blanks[0].text, "X");
}

#[test]
fn explicit_span_position_not_pointing_at_the_marker_is_rejected() {
    let config = tiny_config(1 << 20, Some(3), 3);
    let vocab = TINY_VOCAB_SIZE as usize;
    let mut model = build_model(config, FakeBackend::new(vocab));

    let result = fill_blank(&mut model, "A<span>B", Some(vec![0]), sampler_config(8), 0);
    assert!(matches!(
        result,
        Err(t5_overlap_core::error::CoreError::InvalidSpan { position: 0 })
    ));
}
