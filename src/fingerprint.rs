//! Request fingerprinting for cassette naming and matching

use sha2::{Digest, Sha256};

use crate::request::Method;

/// Compute the SHA-256 fingerprint of a request, rendered as lowercase hex
///
/// Only the method and the path participate: requests that differ in
/// headers, body or query string share a fingerprint and therefore a
/// cassette.
#[must_use]
pub fn fingerprint(method: Method, path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_str().as_bytes());
    hasher.update(path.as_bytes());
    hex::encode(hasher.finalize())
}
