//! Content-derived cache-busting identifiers.
//!
//! An identifier is a pure function of assembled content bytes: identical
//! content always yields the identical identifier, so unchanged bundles
//! keep their URLs and changed content busts every downstream cache.

use serde::{Deserialize, Serialize};

/// Hex length of the digest-based identifier. 64 bits of blake3 output is
/// plenty for collision resistance across a site's bundle set while
/// keeping URLs short.
const DIGEST_HEX_LEN: usize = 16;

/// Strategy for deriving the cache-busting identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HashcodeGenerator {
    /// Cryptographic digest of the content bytes (default).
    #[default]
    Digest,
    /// 32-bit string hash rendered as decimal. Negative values come out
    /// as `N<abs>` instead of `-<abs>` because the identifier lands in a
    /// URL path segment where `-` can be significant.
    StringHash,
}

impl HashcodeGenerator {
    /// Compute the identifier for assembled content.
    pub fn hashcode(&self, content: &str) -> String {
        match self {
            HashcodeGenerator::Digest => digest_hashcode(content.as_bytes()),
            HashcodeGenerator::StringHash => string_hashcode(content),
        }
    }
}

/// Short URL-safe hex digest of the content bytes.
fn digest_hashcode(bytes: &[u8]) -> String {
    let digest = blake3::hash(bytes);
    hex::encode(&digest.as_bytes()[..DIGEST_HEX_LEN / 2])
}

/// Java-compatible 32-bit string hash (`s[0]*31^(n-1) + ... + s[n-1]`,
/// wrapping), negatives remapped to an `N` prefix.
fn string_hashcode(content: &str) -> String {
    let mut hash: i32 = 0;
    for c in content.encode_utf16() {
        hash = hash.wrapping_mul(31).wrapping_add(i32::from(c));
    }
    if hash < 0 {
        format!("N{}", hash.unsigned_abs())
    } else {
        hash.to_string()
    }
}
