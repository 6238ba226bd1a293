//! Parameter checkpoint deserialization.
//!
//! The on-disk checkpoint is a deterministic concatenation of per-layer
//! half-precision tensors in declared order; parsing the actual container
//! format, its on-disk header, and any compression is an external
//! collaborator's job — out of scope here, which assumes a deterministic
//! deserializer that fills each layer's parameter tensors. What lives here
//! is the sequential-read contract every layer's `load` call is built on: a
//! thin cursor over a `Read` that hands back tensors of a requested
//! element count.

use std::io::{self, Read};

use crate::error::{CoreError, Result};

/// Sequential reader over a parameter blob.
///
/// Layers read their tensors off this in declared order; the reader makes
/// no attempt to interpret a header or validate tensor shapes against a
/// schema beyond the overall element count read matching what was written —
/// that responsibility sits with the caller's declared layer layout.
pub struct CheckpointReader<R> {
    inner: R,
    bytes_read: u64,
}

impl<R: Read> CheckpointReader<R> {
    /// Wraps a byte source as a checkpoint reader.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            bytes_read: 0,
        }
    }

    /// Total bytes consumed so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Reads `n_elements` little-endian half-precision values.
    pub fn read_f16_vec(&mut self, n_elements: usize) -> Result<Vec<half::f16>> {
        let mut bytes = vec![0u8; n_elements * 2];
        self.inner
            .read_exact(&mut bytes)
            .map_err(|err| checkpoint_io_error(err, n_elements))?;
        self.bytes_read += bytes.len() as u64;

        Ok(bytes
            .chunks_exact(2)
            .map(|pair| half::f16::from_le_bytes([pair[0], pair[1]]))
            .collect())
    }

    /// Reads a single raw byte blob of `n_bytes` length, for layers that
    /// store their parameters in a format other than a flat `f16` array
    /// (e.g. the tokenizer's id tables live outside this path entirely, but
    /// a quantized or packed tensor would go through here instead).
    pub fn read_raw(&mut self, n_bytes: usize) -> Result<Vec<u8>> {
        let mut bytes = vec![0u8; n_bytes];
        self.inner
            .read_exact(&mut bytes)
            .map_err(|err| checkpoint_io_error(err, n_bytes))?;
        self.bytes_read += bytes.len() as u64;
        Ok(bytes)
    }
}

fn checkpoint_io_error(err: io::Error, requested: usize) -> CoreError {
    CoreError::BadConfig {
        reason: if err.kind() == io::ErrorKind::UnexpectedEof {
            "checkpoint blob ended before all declared layer tensors were read"
        } else {
            let _ = requested;
            "checkpoint blob could not be read"
        },
    }
}
