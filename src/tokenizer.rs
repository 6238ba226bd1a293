//! Text↔id conversion and the span-sentinel protocol.
//!
//! The vocabulary file is a plain text file enumerating tokens one per
//! line in id order. Tokenization itself is greedy longest-match
//! against the vocabulary rather than a full merge-rule BPE implementation —
//! the merge table is an external asset this crate's contract doesn't own;
//! what's in scope is the id protocol the rest of the crate depends on: the
//! reversible whitespace translators and the 190 contiguous span sentinels.

use std::{
    collections::HashMap,
    io::{BufRead, BufReader, Read},
};

use crate::error::{CoreError, Result};

const NUM_SPANS: u32 = 190;
const WHITESPACE_MARK: char = '\u{2581}';

/// Vocabulary, special ids, and the encode/decode character translators.
pub struct Tokenizer {
    vocab: Vec<String>,
    encoder: HashMap<String, u32>,
    /// First id of the 190-entry contiguous span sentinel range.
    span_base: u32,
    /// Unknown-token id.
    pub unk_id: u32,
    /// Start-of-decoder id.
    pub sod_id: u32,
    /// End-of-document id.
    pub eod_id: u32,
}

impl Tokenizer {
    /// Loads a vocabulary file: one token per line, in id order. The last
    /// three entries before the span range must be, in order: unknown
    /// token, start-of-decoder token, end-of-document token, followed
    /// immediately by 190 span sentinel tokens.
    pub fn load<R: Read>(reader: R) -> Result<Self> {
        let lines: std::result::Result<Vec<String>, _> = BufReader::new(reader).lines().collect();
        let vocab = lines.map_err(|_| CoreError::BadConfig {
            reason: "vocabulary file could not be read",
        })?;

        if vocab.len() < 3 + NUM_SPANS as usize {
            return Err(CoreError::BadConfig {
                reason: "vocabulary file is too short to contain the required special tokens",
            });
        }

        let span_base = vocab.len() as u32 - NUM_SPANS;
        let eod_id = span_base - 1;
        let sod_id = span_base - 2;
        let unk_id = span_base - 3;

        let encoder = vocab
            .iter()
            .enumerate()
            .map(|(id, token)| (token.clone(), id as u32))
            .collect();

        Ok(Self {
            vocab,
            encoder,
            span_base,
            unk_id,
            sod_id,
            eod_id,
        })
    }

    /// Total vocabulary size, including special and span tokens.
    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    /// The id of span sentinel `k` (`0 <= k < 190`).
    ///
    /// # Panics
    /// Panics if `k >= 190`.
    pub fn get_span(&self, k: u32) -> u32 {
        assert!(k < NUM_SPANS, "span index {k} out of range (0..190)");
        self.span_base + k
    }

    /// `true` if `id` is one of the 190 span sentinels.
    pub fn is_span(&self, id: u32) -> bool {
        id >= self.span_base && id < self.span_base + NUM_SPANS
    }

    /// Encodes `text` into token ids, greedily matching the longest
    /// vocabulary token at each position after applying the encode-side
    /// whitespace translator.
    pub fn encode(&self, text: &str) -> Vec<u32> {
        let translated: String = text.chars().map(translate_enc).collect();
        let chars: Vec<char> = translated.chars().collect();

        let mut ids = Vec::new();
        let mut i = 0;
        while i < chars.len() {
            let mut matched = None;
            let mut j = chars.len();
            while j > i {
                let candidate: String = chars[i..j].iter().collect();
                if let Some(&id) = self.encoder.get(&candidate) {
                    matched = Some((id, j));
                    break;
                }
                j -= 1;
            }
            match matched {
                Some((id, next)) => {
                    ids.push(id);
                    i = next;
                }
                None => {
                    ids.push(self.unk_id);
                    i += 1;
                }
            }
        }
        ids
    }

    /// Decodes token ids back into text, applying the decode-side
    /// translator to reverse whitespace/special-character mapping.
    pub fn decode(&self, ids: &[u32]) -> String {
        ids.iter()
            .filter_map(|&id| self.vocab.get(id as usize))
            .flat_map(|token| token.chars())
            .map(translate_dec)
            .collect()
    }
}

fn translate_enc(c: char) -> char {
    if c == ' ' {
        WHITESPACE_MARK
    } else {
        c
    }
}

fn translate_dec(c: char) -> char {
    if c == WHITESPACE_MARK {
        ' '
    } else {
        c
    }
}
