//! Content fingerprints for duplicate detection.
//!
//! Exact duplicates are caught by a SHA-256 hash of the normalized text.
//! Near duplicates are caught by a 64-bit simhash over stopword-filtered
//! tokens compared by hamming distance: each token contributes its hash
//! bits to a weight vector, and the sign of each weight becomes one bit
//! of the fingerprint, so mostly-identical token sets land within a few
//! bits of each other.

use sha2::{Digest, Sha256};

/// Tokens too common to carry signal for near-duplicate comparison.
const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "from", "that", "this", "will", "into", "over", "than", "after",
    "before", "about", "market", "markets", "news", "report", "reports", "update", "weekly",
    "daily", "today", "latest", "says",
];

const MIN_TOKEN_LEN: usize = 3;
const MAX_TOKEN_LEN: usize = 24;

/// The hamming distance reported when either fingerprint is missing.
pub const MAX_DISTANCE: u32 = 64;

/// Collapse all whitespace runs to single spaces and trim.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercased alphanumeric tokens, stopwords and extreme lengths dropped.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| {
            token.len() >= MIN_TOKEN_LEN
                && token.len() <= MAX_TOKEN_LEN
                && !STOPWORDS.contains(token)
        })
        .map(str::to_string)
        .collect()
}

/// SHA-256 hex digest of the text as given.
pub fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

fn hash_token64(token: &str) -> u64 {
    let digest = Sha256::digest(token.as_bytes());
    u64::from_be_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ])
}

/// 64-bit simhash as a 16-char hex string, empty when the text has no
/// usable tokens.
pub fn simhash64(text: &str) -> String {
    let tokens = tokenize(text);
    if tokens.is_empty() {
        return String::new();
    }
    let mut weights = [0i64; 64];
    for token in &tokens {
        let hash = hash_token64(token);
        for (i, weight) in weights.iter_mut().enumerate() {
            let bit = (hash >> (63 - i)) & 1;
            *weight += if bit == 1 { 1 } else { -1 };
        }
    }
    let mut result: u64 = 0;
    for (i, weight) in weights.iter().enumerate() {
        if *weight >= 0 {
            result |= 1 << (63 - i);
        }
    }
    format!("{:016x}", result)
}

/// Hamming distance between two hex fingerprints. A missing or malformed
/// fingerprint compares as maximally distant, never as a match.
pub fn hamming_distance(hash_a: &str, hash_b: &str) -> u32 {
    let (Ok(a), Ok(b)) = (
        u64::from_str_radix(hash_a, 16),
        u64::from_str_radix(hash_b, 16),
    ) else {
        return MAX_DISTANCE;
    };
    (a ^ b).count_ones()
}
