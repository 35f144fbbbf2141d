//! Typed access to the marketplace contracts.
//!
//! The daemon consumes the chain through the [`ChainClient`] trait; the
//! [`EvmChainClient`] implementation talks JSON-RPC through alloy. Reads
//! cover provider/offer/agreement records, writes are limited to
//! `closeAgreement` and (for gateway providers) `registerOffer`.

mod client;
mod contracts;
pub mod keypair;
mod types;

pub use client::{ChainClient, ChainError, EvmChainClient, RegisterOfferRequest};
pub use types::{Agreement, AgreementStatus, DetailedOffer, Offer, ProviderRecord};

use alloy::primitives::keccak256;

/// Content identifier of a detail blob: keccak-256 of the bytes, 0x-hex.
///
/// Must agree with the CID the marketplace contracts derive for
/// `detailsLink` fields.
pub fn generate_cid(content: &[u8]) -> String {
    keccak256(content).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cid_is_deterministic_and_prefixed() {
        let a = generate_cid(b"hello");
        let b = generate_cid(b"hello");
        assert_eq!(a, b);
        assert!(a.starts_with("0x"));
        assert_eq!(a.len(), 66);
        assert_ne!(a, generate_cid(b"hello2"));
    }
}
