use crate::chunking::normalize_whitespace;
use crate::config::DEFAULT_VECTOR_DIM;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT_VECTOR_DIM;

pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;
    fn embed(&self, text: &str) -> Vec<f32>;
}

/// Hashes word-bounded character trigrams into signed buckets and
/// L2-normalizes the result. Deterministic, so it stands in for a model in
/// tests and demos.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl CharacterNgramEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_EMBEDDING_DIMENSIONS)
    }
}

impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let buckets = vector.len() as u64;

        for word in normalize_whitespace(&text.to_lowercase()).split(' ') {
            if word.is_empty() {
                continue;
            }
            // Word boundaries count, so "ab" and "abc" still produce trigrams.
            let padded: Vec<char> = format!(" {word} ").chars().collect();
            for window in padded.windows(3) {
                let hash = fnv1a(window);
                let bucket = (hash % buckets) as usize;
                let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
                vector[bucket] += sign;
            }
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

fn fnv1a(window: &[char]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    let mut buffer = [0u8; 4];
    for ch in window {
        for byte in ch.encode_utf8(&mut buffer).bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
    }
    hash
}
