use std::collections::HashMap;

use alloy::primitives::{Address, Signature};
use serde_json::{Value, json};

use crate::error::PipeError;
use crate::request::{PipeEnvelope, PipeRequest};

/// Verify the envelope signature and produce a trusted request.
///
/// The signer recovered from `signature` over the canonical signing payload
/// must equal `requester`; handlers never re-check this.
pub fn verify_envelope(envelope: &PipeEnvelope) -> Result<PipeRequest, PipeError> {
    let requester: Address = envelope
        .requester
        .parse()
        .map_err(|_| PipeError::bad_request("invalid requester address"))?;

    let raw = hex::decode(envelope.signature.trim_start_matches("0x"))
        .map_err(|_| PipeError::not_authorized("malformed signature"))?;
    let signature = Signature::try_from(raw.as_slice())
        .map_err(|_| PipeError::not_authorized("malformed signature"))?;

    let payload = envelope.signing_payload();
    let recovered = signature
        .recover_address_from_msg(payload.as_bytes())
        .map_err(|_| PipeError::not_authorized("signature recovery failed"))?;
    if recovered != requester {
        return Err(PipeError::not_authorized("signature does not match requester"));
    }

    let path_params: HashMap<String, String> = envelope
        .path_params
        .as_ref()
        .and_then(Value::as_object)
        .map(|object| {
            object
                .iter()
                .filter_map(|(key, value)| value.as_str().map(|s| (key.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default();

    Ok(PipeRequest {
        id: envelope.id.clone(),
        requester,
        method: envelope.method,
        path: envelope.path.clone(),
        path_params,
        params: envelope.params.clone().unwrap_or_else(|| json!({})),
        body: envelope.body.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Method;
    use alloy::signers::{Signer, local::PrivateKeySigner};

    async fn signed_envelope(signer: &PrivateKeySigner) -> PipeEnvelope {
        let mut envelope = PipeEnvelope {
            id: "req-1".to_string(),
            method: Method::GET,
            path: "/resources".to_string(),
            requester: format!("{:#x}", signer.address()),
            params: Some(json!({"id": 1})),
            path_params: None,
            body: None,
            signature: String::new(),
        };
        let signature = signer
            .sign_message(envelope.signing_payload().as_bytes())
            .await
            .unwrap();
        envelope.signature = format!("0x{}", hex::encode(signature.as_bytes()));
        envelope
    }

    #[tokio::test]
    async fn accepts_a_correctly_signed_envelope() {
        let signer = PrivateKeySigner::random();
        let envelope = signed_envelope(&signer).await;
        let request = verify_envelope(&envelope).unwrap();
        assert_eq!(request.requester, signer.address());
        assert_eq!(request.method, Method::GET);
    }

    #[tokio::test]
    async fn rejects_a_tampered_payload() {
        let signer = PrivateKeySigner::random();
        let mut envelope = signed_envelope(&signer).await;
        envelope.path = "/virtual-providers".to_string();
        let err = verify_envelope(&envelope).unwrap_err();
        assert_eq!(err.code, crate::code::NOT_AUTHORIZED);
    }

    #[tokio::test]
    async fn rejects_a_requester_mismatch() {
        let signer = PrivateKeySigner::random();
        let other = PrivateKeySigner::random();
        let mut envelope = signed_envelope(&signer).await;
        envelope.requester = format!("{:#x}", other.address());
        // Re-sign with the original key so only the claimed requester differs.
        let signature = signer
            .sign_message(envelope.signing_payload().as_bytes())
            .await
            .unwrap();
        envelope.signature = format!("0x{}", hex::encode(signature.as_bytes()));
        let err = verify_envelope(&envelope).unwrap_err();
        assert_eq!(err.code, crate::code::NOT_AUTHORIZED);
    }
}
