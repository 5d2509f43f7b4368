//! Content digests: MD5 as 32 lowercase hex characters.
//!
//! Digests decide "did this file change since the last sync" for working
//! copy entries; they are not a security boundary.

use std::path::Path;

use md5::{Digest, Md5};

/// Digest of `bytes`.
pub fn digest(bytes: &[u8]) -> String {
    hex::encode(Md5::digest(bytes))
}

/// Digest of the file at `path`.
pub fn file_digest(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(digest(&bytes))
}
