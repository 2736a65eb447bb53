//! Text compression for archived context.
//!
//! The default codec is gzip + base64: reversible, idempotent (already
//! compressed text is left alone), and cheap. Higher layers may substitute
//! LLM-based summarization.

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::error::VikingResult;
use crate::types::TokenCounter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionLevel {
    Fast,
    #[default]
    Default,
    Best,
}

/// Whether `text` is already in the gzip+base64 compressed form.
pub fn is_compressed(text: &str) -> bool {
    match STANDARD.decode(text) {
        Ok(bytes) => bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b,
        Err(_) => false,
    }
}

/// Compress text with the default level. Empty and already-compressed input
/// is returned unchanged, which makes repeated compression idempotent.
pub fn compress_text(text: &str) -> String {
    compress_with_level(text, CompressionLevel::Default)
}

/// Compress text with an explicit level.
pub fn compress_with_level(text: &str, level: CompressionLevel) -> String {
    if text.is_empty() || is_compressed(text) {
        return text.to_string();
    }

    let level = match level {
        CompressionLevel::Fast => Compression::fast(),
        CompressionLevel::Default => Compression::default(),
        CompressionLevel::Best => Compression::best(),
    };

    let mut encoder = GzEncoder::new(Vec::new(), level);
    if encoder.write_all(text.as_bytes()).is_err() {
        return text.to_string();
    }
    match encoder.finish() {
        Ok(bytes) => STANDARD.encode(bytes),
        Err(_) => text.to_string(),
    }
}

/// Decompress gzip+base64 text. Input that is not in the compressed form is
/// returned as-is.
pub fn decompress_text(compressed: &str) -> VikingResult<String> {
    if compressed.is_empty() {
        return Ok(String::new());
    }
    let Ok(bytes) = STANDARD.decode(compressed) else {
        return Ok(compressed.to_string());
    };
    if bytes.len() < 2 || bytes[0] != 0x1f || bytes[1] != 0x8b {
        return Ok(compressed.to_string());
    }

    let mut decoder = GzDecoder::new(&bytes[..]);
    let mut result = String::new();
    decoder.read_to_string(&mut result)?;
    Ok(result)
}

/// Shrink text to roughly `max_tokens` by keeping a proportional prefix of
/// words. Returns the input unchanged when it already fits.
pub fn summarize_text(text: &str, max_tokens: usize, counter: &dyn TokenCounter) -> String {
    if text.is_empty() {
        return String::new();
    }
    let current = counter.count_tokens(text);
    if current <= max_tokens {
        return text.to_string();
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return text.to_string();
    }

    let target = (words.len() * max_tokens / current).min(words.len());
    let mut summary = words[..target].join(" ");
    if target < words.len() {
        summary.push_str("...");
    }
    summary
}

/// Truncate text to fit `max_tokens`, binary-searching the word boundary.
pub fn truncate_text(text: &str, max_tokens: usize, counter: &dyn TokenCounter) -> String {
    if text.is_empty() {
        return String::new();
    }
    if counter.count_tokens(text) <= max_tokens {
        return text.to_string();
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return String::new();
    }

    let (mut low, mut high) = (0usize, words.len());
    while low < high {
        let mid = (low + high + 1) / 2;
        if counter.count_tokens(&words[..mid].join(" ")) <= max_tokens {
            low = mid;
        } else {
            high = mid - 1;
        }
    }

    let mut result = words[..low].join(" ");
    if low < words.len() {
        result.push_str("...");
    }
    result
}

/// Size and token savings from one compression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionStats {
    pub original_size: usize,
    pub compressed_size: usize,
    pub ratio: f64,
    pub tokens_saved: i64,
}

pub fn calculate_stats(
    original: &str,
    compressed: &str,
    counter: &dyn TokenCounter,
) -> CompressionStats {
    let original_size = original.len();
    let compressed_size = compressed.len();
    CompressionStats {
        original_size,
        compressed_size,
        ratio: if original_size > 0 {
            compressed_size as f64 / original_size as f64
        } else {
            0.0
        },
        tokens_saved: counter.count_tokens(original) as i64
            - counter.count_tokens(compressed) as i64,
    }
}
