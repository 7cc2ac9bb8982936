//! Content hashing for deduplication.

use sha2::{Digest, Sha256};
use vecguard_types::ContentHash;

/// Trim and collapse every whitespace run to a single space. Case is kept.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// SHA-256 of the normalized text.
pub fn content_hash(text: &str) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(normalize_text(text).as_bytes());
    let digest: [u8; 32] = hasher.finalize().into();
    ContentHash::from_digest(&digest)
}
