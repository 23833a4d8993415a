//! Content addressing for downloaded files.
//!
//! A file is identified by the pair (remote file id, origin id). Two records
//! that point at the same remote file under the same origin always produce
//! the same [`ContentKey`], which is what lets the writer skip repeated
//! downloads and duplicate `files` rows.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentKey(String);

impl ContentKey {
    pub fn derive(remote_file_id: &str, origin_id: &str) -> Self {
        Self(sha256_hex(format!("{remote_file_id}:{origin_id}").as_bytes()))
    }

    /// Wrap a key previously produced by [`ContentKey::derive`], e.g. one read
    /// back from storage.
    pub fn from_stored(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContentKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
