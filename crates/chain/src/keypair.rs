//! Wallet key helpers for the operator, billing, and owner identities.

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use anyhow::{Result, anyhow};

#[derive(Debug, Clone)]
pub struct Keypair {
    pub private_key: String,
    pub address: Address,
}

/// Generate a fresh wallet keypair.
pub fn generate_keypair() -> Keypair {
    let signer = PrivateKeySigner::random();
    Keypair {
        private_key: format!("0x{}", hex::encode(signer.to_bytes())),
        address: signer.address(),
    }
}

/// Build a signer from a 32-byte hex private key, `0x` prefix optional.
pub fn signer_from_hex(private_key: &str) -> Result<PrivateKeySigner> {
    let key_hex = private_key
        .strip_prefix("0x")
        .or_else(|| private_key.strip_prefix("0X"))
        .unwrap_or(private_key);

    let key_bytes = hex::decode(key_hex).map_err(|e| anyhow!("invalid hex private key: {e}"))?;
    if key_bytes.len() != 32 {
        return Err(anyhow!(
            "private key must be 32 bytes, got {}",
            key_bytes.len()
        ));
    }

    let key_array: [u8; 32] = key_bytes
        .try_into()
        .map_err(|_| anyhow!("private key must be exactly 32 bytes"))?;
    PrivateKeySigner::from_bytes(&key_array.into())
        .map_err(|e| anyhow!("failed to build signer from private key: {e}"))
}

pub fn parse_address(address: &str) -> Result<Address> {
    address
        .parse::<Address>()
        .map_err(|e| anyhow!("invalid address {address}: {e}"))
}
