//! JSON encoding and decoding.

use crate::error::{CodecError, CodecResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encode a value to compact JSON bytes.
///
/// Struct fields keep declaration order. `HashMap` entries follow the map's
/// iteration order, so use `BTreeMap` where byte-stable output matters.
///
/// # Errors
///
/// Returns [`CodecError::EncodingFailed`] if the value cannot be represented
/// as JSON, e.g. a map whose keys are not strings or numbers, or a
/// `Serialize` impl that reports an error.
pub fn to_json<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| CodecError::encoding_failed(e.to_string()))
}

/// Encode a value to indented JSON bytes.
///
/// # Errors
///
/// Same as [`to_json`].
pub fn to_json_pretty<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    serde_json::to_vec_pretty(value).map_err(|e| CodecError::encoding_failed(e.to_string()))
}

/// Decode JSON bytes into `T`.
///
/// # Errors
///
/// Returns [`CodecError::DecodingFailed`] if the bytes are not JSON or do not
/// match the shape of `T`.
pub fn from_json<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    serde_json::from_slice(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
}

/// Checks that `bytes` hold exactly one JSON document.
///
/// # Errors
///
/// Returns [`CodecError::DecodingFailed`] describing the first syntax error.
pub fn validate_document(bytes: &[u8]) -> CodecResult<()> {
    serde_json::from_slice::<serde::de::IgnoredAny>(bytes)
        .map(|_| ())
        .map_err(|e| CodecError::decoding_failed(e.to_string()))
}
