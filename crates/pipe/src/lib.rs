//! The operator request plane.
//!
//! One `Pipe` per operator identity carries a shared route table over two
//! transports: plaintext-JSON HTTP and a signed-messaging subject. Both
//! deliver the same envelope `{id, method, path, requester, params,
//! pathParams, body, signature}`; the transport verifies the wallet
//! signature so handlers can trust `requester`.

mod auth;
mod error;
mod http;
mod nats;
mod request;
mod router;

pub use auth::verify_envelope;
pub use error::{PipeError, code};
pub use http::{HttpPipeConfig, serve_http};
pub use nats::serve_nats;
pub use request::{Method, PipeEnvelope, PipeRequest, PipeResponse};
pub use router::{Handler, Pipe, handler};
