use serde_json::{Value, json};
use thiserror::Error;

/// Response codes used by the request plane.
pub mod code {
    pub const OK: u16 = 200;
    pub const BAD_REQUEST: u16 = 400;
    pub const NOT_AUTHORIZED: u16 = 401;
    pub const NOT_FOUND: u16 = 404;
    pub const INTERNAL_SERVER_ERROR: u16 = 500;
}

/// A tagged request-plane failure: yields exactly its `code` and `body` on
/// the wire. Untagged handler errors collapse to `INTERNAL_SERVER_ERROR`.
#[derive(Debug, Clone, Error)]
#[error("pipe error {code}: {body}")]
pub struct PipeError {
    pub code: u16,
    pub body: Value,
}

impl PipeError {
    pub fn new(code: u16, body: Value) -> Self {
        Self { code, body }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(code::BAD_REQUEST, json!({ "message": message.into() }))
    }

    pub fn not_authorized(message: impl Into<String>) -> Self {
        Self::new(code::NOT_AUTHORIZED, json!({ "message": message.into() }))
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(code::NOT_FOUND, json!({ "message": message.into() }))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            code::INTERNAL_SERVER_ERROR,
            json!({ "message": message.into() }),
        )
    }

    /// Malformed body/params: reports the offending path alongside the message.
    pub fn validation(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            code::BAD_REQUEST,
            json!({ "path": path.into(), "message": message.into() }),
        )
    }
}
