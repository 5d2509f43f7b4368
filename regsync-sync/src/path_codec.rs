//! Resource names ⇄ meta file names.
//!
//! Meta files are named after the resource they describe, so a registry
//! name has to become a single safe path segment. Encoding is
//! `application/x-www-form-urlencoded`: alphanumerics and `.-*_` pass
//! through, space becomes `+`, every other byte is `%XX`.

use percent_encoding::percent_decode_str;

use crate::error::{MessageCode, SyncError};

/// Encode a resource name for use inside a file name.
pub fn encode_name(name: &str) -> String {
    form_urlencoded::byte_serialize(name.as_bytes()).collect()
}

/// Inverse of [`encode_name`].
pub fn decode_name(encoded: &str) -> Result<String, SyncError> {
    let spaced = encoded.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .map(|name| name.into_owned())
        .map_err(|_| SyncError::new(MessageCode::NameDecodeFailed).with("name", encoded))
}
