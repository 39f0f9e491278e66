//! Pipeline identity: version hashes and per-step cache keys.
//!
//! Both are computed over raw source text. Cosmetic edits to a step therefore
//! change its identity, which can cause a cache miss but never a false hit.

mod cache_key;
mod version;

pub use cache_key::{CacheKeyEngine, CacheKeyInputs};
pub use version::{compute_version_hash, spec_version_at_least};

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Returns the SHA-256 hex digest of the canonical JSON form of `value`.
///
/// Object keys are ordered, so logically equal values hash identically.
#[must_use]
pub fn content_hash(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.to_string().as_bytes());
    hex::encode(hasher.finalize())
}
