//! Content hashing for fetched filter lists
//!
//! Lists are fingerprinted with SHA-1 so the options UI can show whether a
//! refresh actually changed anything. Not used for security decisions.

use sha1::{Digest, Sha1};

/// Lower-case hex SHA-1 of the list text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
