//! Deterministic placeholder encoder.
//!
//! **This is not an embedding model.**  It turns text into a fixed-dimension
//! unit vector by hashing, so that the vector subsystem is usable (and
//! testable) without an external embedder.  Similar scores only mean "shares
//! tokens"; they carry no semantic meaning.  Hosts that need semantic recall
//! must supply their own vectors at store and query time.
//!
//! # Algorithm
//!
//! 1. Lowercase the text and split on whitespace.
//! 2. For every token, stream `dimension × 4` bytes out of the BLAKE3 XOF
//!    keyed by the token and map each little-endian `u32` to `[-1, 1]`.
//! 3. Sum the token vectors and L2-normalise the result.
//!
//! Text without tokens hashes the raw string instead, so the encoder always
//! yields a non-zero vector.

/// Stable hash-based text encoder producing `dimension`-length unit vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaceholderEncoder {
    dimension: usize,
}

impl PlaceholderEncoder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Encode `text` into a unit vector of length [`dimension`][Self::dimension].
    pub fn encode(&self, text: &str) -> Vec<f32> {
        let lowered = text.to_lowercase();
        let mut acc = vec![0.0f32; self.dimension];
        let mut tokens = 0usize;
        for token in lowered.split_whitespace() {
            self.accumulate(token, &mut acc);
            tokens += 1;
        }
        if tokens == 0 {
            self.accumulate(text, &mut acc);
        }
        normalize(&mut acc);
        acc
    }

    fn accumulate(&self, token: &str, acc: &mut [f32]) {
        let mut reader = blake3::Hasher::new().update(token.as_bytes()).finalize_xof();
        let mut buf = vec![0u8; self.dimension * 4];
        reader.fill(&mut buf);
        for (slot, chunk) in acc.iter_mut().zip(buf.chunks_exact(4)) {
            let raw = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            *slot += (raw as f64 / u32::MAX as f64 * 2.0 - 1.0) as f32;
        }
    }
}

/// Scale `v` to unit length in place.  Zero vectors are left untouched.
pub fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}
