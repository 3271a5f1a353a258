//! Digest selection for idempotency keys and payload hashes.
//!
//! All digests are rendered as lowercase hex so that they can be embedded in
//! store keys directly.

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};

/// Digest algorithm used to hash canonical payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashFunction {
    /// MD5. Fast, 128-bit; collisions are constructible, so prefer SHA-256
    /// when payload validation guards anything sensitive.
    #[default]
    Md5,
    /// SHA-256.
    Sha256,
    /// SHA-512.
    Sha512,
}

impl HashFunction {
    /// Hash `data` and return the lowercase hex digest.
    ///
    /// # Examples
    ///
    /// ```
    /// use idem_core::fingerprint::HashFunction;
    ///
    /// let digest = HashFunction::Sha256.hex_digest(b"test input");
    /// assert_eq!(digest.len(), 64);
    ///
    /// // Same input produces same digest
    /// assert_eq!(digest, HashFunction::Sha256.hex_digest(b"test input"));
    /// ```
    #[must_use]
    pub fn hex_digest(self, data: &[u8]) -> String {
        match self {
            Self::Md5 => hex::encode(digest::<Md5>(data)),
            Self::Sha256 => hex::encode(digest::<Sha256>(data)),
            Self::Sha512 => hex::encode(digest::<Sha512>(data)),
        }
    }

    /// Length of the hex digest in characters.
    #[must_use]
    pub const fn hex_len(self) -> usize {
        match self {
            Self::Md5 => 32,
            Self::Sha256 => 64,
            Self::Sha512 => 128,
        }
    }
}

impl std::fmt::Display for HashFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Md5 => write!(f, "md5"),
            Self::Sha256 => write!(f, "sha256"),
            Self::Sha512 => write!(f, "sha512"),
        }
    }
}

#[inline]
fn digest<D: Digest>(data: &[u8]) -> Vec<u8> {
    let mut hasher = D::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_determinism() {
        let data = b"test input data";
        for function in [HashFunction::Md5, HashFunction::Sha256, HashFunction::Sha512] {
            assert_eq!(
                function.hex_digest(data),
                function.hex_digest(data),
                "Same input must produce same hash"
            );
        }
    }

    #[test]
    fn test_hash_different_data() {
        let hash1 = HashFunction::Sha256.hex_digest(b"input one");
        let hash2 = HashFunction::Sha256.hex_digest(b"input two");

        assert_ne!(hash1, hash2, "Different inputs must produce different hashes");
    }

    #[test]
    fn test_hash_sizes() {
        for function in [HashFunction::Md5, HashFunction::Sha256, HashFunction::Sha512] {
            assert_eq!(function.hex_digest(b"any input").len(), function.hex_len());
        }
    }

    #[test]
    fn test_known_digests() {
        // Well-known digests of the empty string.
        assert_eq!(
            HashFunction::Md5.hex_digest(b""),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
        assert_eq!(
            HashFunction::Sha256.hex_digest(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_functions_disagree() {
        let md5 = HashFunction::Md5.hex_digest(b"same");
        let sha = HashFunction::Sha256.hex_digest(b"same");
        assert_ne!(md5, sha);
    }

    #[test]
    fn test_serde_names() {
        let parsed: Result<HashFunction, _> = serde_json::from_str("\"sha512\"");
        assert!(matches!(parsed, Ok(HashFunction::Sha512)));
        assert_eq!(HashFunction::Md5.to_string(), "md5");
    }
}
