//! Base64 transport encoding for artifacts

use crate::error::{LabelMergeError, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref BASE64_CHARSET: Regex = Regex::new(r"^[A-Za-z0-9+/=]+$").unwrap();
}

/// Decode a base64 artifact. The input is checked against the strict
/// alphabet (no whitespace, no URL-safe characters) before decoding.
pub fn decode_artifact(input: &str) -> Result<Vec<u8>> {
    if !BASE64_CHARSET.is_match(input) {
        return Err(LabelMergeError::InvalidEncoding(
            "artifact is not valid base64".into(),
        ));
    }
    STANDARD
        .decode(input)
        .map_err(|e| LabelMergeError::InvalidEncoding(e.to_string()))
}

pub fn encode_artifact(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}
