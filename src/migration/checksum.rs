//! Checksum calculation for changesets

use sha2::{Digest, Sha256};

/// Calculate the SHA-256 checksum of an ordered query list
///
/// Each query is framed by its byte length before hashing, so both the query
/// text and the position of every query boundary contribute to the digest.
///
/// # Returns
///
/// Returns the hexadecimal SHA-256 hash.
pub fn checksum<S: AsRef<str>>(queries: &[S]) -> String {
    let mut hasher = Sha256::new();
    for query in queries {
        let bytes = query.as_ref().as_bytes();
        hasher.update((bytes.len() as u64).to_le_bytes());
        hasher.update(bytes);
    }
    format!("{:x}", hasher.finalize())
}
