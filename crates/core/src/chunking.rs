use crate::error::IngestError;
use crate::models::{IngestionOptions, NewChunk};
use regex::Regex;
use serde_json::json;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
    pub min_chars: usize,
}

impl From<&IngestionOptions> for ChunkingConfig {
    fn from(value: &IngestionOptions) -> Self {
        Self {
            max_chars: value.chunk_max_chars,
            overlap_chars: value.chunk_overlap_chars,
            min_chars: value.min_chunk_chars,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.max_chars == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "max_chars must be greater than zero".to_string(),
            ));
        }
        if self.overlap_chars >= self.max_chars {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than max {}",
                self.overlap_chars, self.max_chars
            )));
        }
        Ok(())
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Packs paragraphs into chunks of at most `max_chars` characters. Paragraphs
/// longer than that are cut into windows that overlap by `overlap_chars`.
pub fn chunk_by_paragraph(text: &str, config: ChunkingConfig) -> Result<Vec<String>, IngestError> {
    config.validate()?;

    let paragraph_break = Regex::new(r"\n\s*\n")?;
    let paragraphs = paragraph_break
        .split(text)
        .map(normalize_whitespace)
        .filter(|paragraph| !paragraph.is_empty())
        .collect::<Vec<_>>();

    let mut packed = Vec::new();
    let mut current = String::new();

    for paragraph in paragraphs {
        if current.is_empty() {
            current = paragraph;
            continue;
        }

        if char_len(&current) + char_len(&paragraph) + 2 <= config.max_chars {
            current.push_str("\n\n");
            current.push_str(&paragraph);
        } else {
            packed.push(std::mem::replace(&mut current, paragraph));
        }
    }
    if !current.is_empty() {
        packed.push(current);
    }

    let mut chunks = Vec::new();
    for chunk in packed {
        if char_len(&chunk) <= config.max_chars {
            chunks.push(chunk);
            continue;
        }

        let chars: Vec<char> = chunk.chars().collect();
        let step = config.max_chars - config.overlap_chars;
        let mut start = 0;
        while start < chars.len() {
            let end = (start + config.max_chars).min(chars.len());
            chunks.push(chars[start..end].iter().collect());
            if end == chars.len() {
                break;
            }
            start += step;
        }
    }

    chunks.retain(|chunk| char_len(chunk) >= config.min_chars);
    Ok(chunks)
}

/// Splits a document's text into numbered chunks ready for the chunk store.
pub fn build_chunks(text: &str, options: &IngestionOptions) -> Result<Vec<NewChunk>, IngestError> {
    let pieces = chunk_by_paragraph(text, ChunkingConfig::from(options))?;

    Ok(pieces
        .into_iter()
        .enumerate()
        .map(|(index, piece)| NewChunk {
            chunk_index: index as i64,
            metadata: json!({
                "sha256": content_hash(&piece),
                "char_count": char_len(&piece),
            })
            .to_string(),
            chunk_text: piece,
            embedding: None,
        })
        .collect())
}

pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_chars: usize, overlap_chars: usize) -> ChunkingConfig {
        ChunkingConfig {
            max_chars,
            overlap_chars,
            min_chars: 1,
        }
    }

    #[test]
    fn whitespace_is_normalized() {
        let input = "A  \t  lot\nof \u{a0}  spacing";
        assert_eq!(normalize_whitespace(input), "A lot of spacing");
    }

    #[test]
    fn short_paragraphs_are_packed_together() {
        let text = "first paragraph\n\nsecond one\n \nthird";
        let chunks = chunk_by_paragraph(text, config(100, 10)).unwrap();
        assert_eq!(chunks, vec!["first paragraph\n\nsecond one\n\nthird"]);
    }

    #[test]
    fn paragraphs_split_when_budget_is_exceeded() {
        let text = "aaaa aaaa\n\nbbbb bbbb\n\ncccc";
        let chunks = chunk_by_paragraph(text, config(12, 2)).unwrap();
        assert_eq!(chunks, vec!["aaaa aaaa", "bbbb bbbb", "cccc"]);
    }

    #[test]
    fn long_paragraph_is_windowed_with_overlap() {
        let text = "abcdefghij";
        let chunks = chunk_by_paragraph(text, config(4, 1)).unwrap();
        assert_eq!(chunks, vec!["abcd", "defg", "ghij"]);
    }

    #[test]
    fn overlap_must_be_smaller_than_window() {
        let result = chunk_by_paragraph("text", config(4, 4));
        assert!(matches!(result, Err(IngestError::InvalidChunkConfig(_))));
    }

    #[test]
    fn built_chunks_are_numbered_from_zero() {
        let options = IngestionOptions {
            chunk_max_chars: 8,
            chunk_overlap_chars: 0,
            ..Default::default()
        };
        let chunks = build_chunks("hello\n\nworld", &options).unwrap();

        let indexed = chunks
            .iter()
            .map(|chunk| (chunk.chunk_index, chunk.chunk_text.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(indexed, vec![(0, "hello"), (1, "world")]);

        let metadata: serde_json::Value = serde_json::from_str(&chunks[0].metadata).unwrap();
        assert_eq!(metadata["sha256"], content_hash("hello"));
        assert_eq!(metadata["char_count"], 5);
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        let chunks = build_chunks(" \n\n \t", &IngestionOptions::default()).unwrap();
        assert!(chunks.is_empty());
    }
}
