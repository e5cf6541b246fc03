//! Identifier helpers.
//!
//! Record ids look like `pending-1718000000000-k3x9qa`: a kind prefix, the
//! creation time in epoch milliseconds and a short random suffix. Content
//! hashes use BLAKE3 truncated to 16 hex characters.

use chrono::{DateTime, Utc};
use rand::Rng;

const SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const SUFFIX_LEN: usize = 6;

/// Generate a new record id with the given prefix.
#[must_use]
pub fn new_id(prefix: &str, now: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..SUFFIX_ALPHABET.len());
            char::from(SUFFIX_ALPHABET[idx])
        })
        .collect();
    format!("{prefix}-{}-{suffix}", now.timestamp_millis())
}

/// Stable short hash of a text body.
#[must_use]
pub fn content_hash(text: &str) -> String {
    let hash = blake3::hash(text.as_bytes());
    hash.to_hex()[..16].to_string()
}

/// Lowercase, hyphen-separated slug suitable for a file name.
#[must_use]
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else if ch == '\'' {
            // apostrophes vanish rather than splitting words
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// Normalized form used for name deduplication.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
