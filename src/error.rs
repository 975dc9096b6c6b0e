//! Pipeline error taxonomy.
//!
//! Every stage failure is converted into a uniform failure envelope at the
//! endpoint boundary; the display strings here become the `error` field.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    /// The request itself is malformed (missing `document` key, no `file`
    /// field, unreadable multipart).
    #[error("{0}")]
    BadRequest(String),

    /// Document content does not match any supported type
    /// (pdf, png, jpg, jpeg, gif).
    #[error("unsupported document type: {0}")]
    UnsupportedType(String),

    /// URL fetch failed (network error, non-2xx status, over-size body).
    #[error("failed to fetch document: {0}")]
    Fetch(String),

    /// Base64 payload could not be decoded.
    #[error("invalid base64 payload: {0}")]
    Decode(#[from] base64::DecodeError),

    /// The model's reply is not valid JSON even after cleanup.
    #[error("malformed model response: {0}")]
    MalformedResponse(String),

    /// A page entry is missing a required field.
    #[error("page {page_index}: missing required field `{field}`")]
    MissingField {
        page_index: usize,
        field: &'static str,
    },

    /// A numeric item field could not be coerced to a float.
    #[error("page {page_index}, item {item_index}: cannot coerce `{field}` value {value:?} to a number")]
    TypeCoercion {
        page_index: usize,
        item_index: usize,
        field: &'static str,
        value: String,
    },

    /// The upstream model call failed (auth, quota, transport).
    #[error("upstream model error: {0}")]
    UpstreamService(String),
}
