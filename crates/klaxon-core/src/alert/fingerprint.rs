use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Hex characters kept from the SHA-256 digest.
const FINGERPRINT_LEN: usize = 32;

/// Stable identity of "the same underlying condition" across repeated reports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hashes the alert name, the source and the `key=value` label pairs.
    /// Pairs are sorted first, so label order never changes the result.
    pub fn compute<'a, L>(name: &str, source: &str, labels: L) -> Self
    where
        L: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let mut pairs: Vec<String> = labels
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        pairs.sort();

        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        hasher.update(b"\n");
        hasher.update(source.as_bytes());
        hasher.update(b"\n");
        hasher.update(pairs.join("|").as_bytes());
        let digest = hex::encode(hasher.finalize());
        Self(digest[..FINGERPRINT_LEN].to_string())
    }

    pub fn from_stored(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
