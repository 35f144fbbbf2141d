use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{PipeError, code};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    GET,
    POST,
    PATCH,
    DELETE,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PATCH => "PATCH",
            Method::DELETE => "DELETE",
        };
        f.write_str(s)
    }
}

impl FromStr for Method {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Method::GET),
            "POST" => Ok(Method::POST),
            "PATCH" => Ok(Method::PATCH),
            "DELETE" => Ok(Method::DELETE),
            _ => Err(()),
        }
    }
}

/// Wire envelope shared by both transports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipeEnvelope {
    pub id: String,
    pub method: Method,
    pub path: String,
    pub requester: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(
        default,
        rename = "pathParams",
        skip_serializing_if = "Option::is_none"
    )]
    pub path_params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Wallet signature over [`PipeEnvelope::signing_payload`].
    pub signature: String,
}

impl PipeEnvelope {
    /// Canonical signed payload: the envelope minus the signature, as JSON
    /// with sorted keys. Both transports verify the requester's signature
    /// over this exact string.
    pub fn signing_payload(&self) -> String {
        json!({
            "id": self.id,
            "method": self.method,
            "path": self.path,
            "requester": self.requester,
            "params": self.params,
            "pathParams": self.path_params,
            "body": self.body,
        })
        .to_string()
    }
}

/// A verified request as seen by handlers; `requester` has been checked
/// against the envelope signature by the transport.
#[derive(Debug, Clone)]
pub struct PipeRequest {
    pub id: String,
    pub requester: Address,
    pub method: Method,
    pub path: String,
    pub path_params: HashMap<String, String>,
    pub params: Value,
    pub body: Option<Value>,
}

impl PipeRequest {
    /// Read `providerId` from the body or query params; provider-scoped
    /// routes require it.
    pub fn provider_id(&self) -> Option<i64> {
        let from_value = |v: &Value| {
            v.get("providerId").and_then(|id| {
                id.as_i64()
                    .or_else(|| id.as_str().and_then(|s| s.parse().ok()))
            })
        };
        self.body
            .as_ref()
            .and_then(from_value)
            .or_else(|| from_value(&self.params))
    }

    /// A required string field from `params` or `body`, validation-checked.
    pub fn string_param(&self, name: &str) -> Result<String, PipeError> {
        let lookup = |v: &Value| v.get(name).and_then(Value::as_str).map(str::to_string);
        self.params
            .get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| self.body.as_ref().and_then(lookup))
            .ok_or_else(|| PipeError::validation(name, "missing required field"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipeResponse {
    pub code: u16,
    pub body: Value,
}

impl PipeResponse {
    pub fn ok(body: Value) -> Self {
        Self {
            code: code::OK,
            body,
        }
    }
}

impl From<PipeError> for PipeResponse {
    fn from(err: PipeError) -> Self {
        Self {
            code: err.code,
            body: err.body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signing_payload_is_stable_across_field_order() {
        let envelope: PipeEnvelope = serde_json::from_value(json!({
            "signature": "0x00",
            "path": "/resources",
            "id": "r-1",
            "method": "GET",
            "requester": "0x0000000000000000000000000000000000000001",
        }))
        .unwrap();
        let reordered: PipeEnvelope = serde_json::from_value(json!({
            "id": "r-1",
            "method": "GET",
            "requester": "0x0000000000000000000000000000000000000001",
            "path": "/resources",
            "signature": "0xff",
        }))
        .unwrap();
        assert_eq!(envelope.signing_payload(), reordered.signing_payload());
    }

    #[test]
    fn provider_id_from_body_params_or_string() {
        let base = PipeRequest {
            id: "1".to_string(),
            requester: Address::ZERO,
            method: Method::POST,
            path: "/x".to_string(),
            path_params: HashMap::new(),
            params: json!({}),
            body: Some(json!({"providerId": 7})),
        };
        assert_eq!(base.provider_id(), Some(7));

        let from_params = PipeRequest {
            body: None,
            params: json!({"providerId": "9"}),
            ..base.clone()
        };
        assert_eq!(from_params.provider_id(), Some(9));

        let missing = PipeRequest {
            body: None,
            params: json!({}),
            ..base
        };
        assert_eq!(missing.provider_id(), None);
    }
}
