use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};

/// On-chain provider record as registered in the actor registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub id: u64,
    pub owner: Address,
    /// Identity signing off-chain request traffic; shared by a gateway and
    /// its virtual providers.
    pub operator: Address,
    pub endpoint: String,
    pub details_link: String,
}

/// A priced, stocked item registered by a provider within a protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    pub id: u64,
    pub owner: Address,
    /// Per-second fee drawn from the agreement balance.
    pub fee: U256,
    pub stock: u32,
    pub details_link: String,
}

/// An offer together with its resolved detail blob, the shape service
/// backends consume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailedOffer {
    pub offer: Offer,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgreementStatus {
    Active,
    NotActive,
}

/// A user's purchase of an offer, tracked on-chain with a running balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agreement {
    pub id: u64,
    pub user: Address,
    pub provider: Address,
    pub offer_id: u64,
    pub balance: U256,
    pub status: AgreementStatus,
    pub started_at: u64,
    pub ended_at: Option<u64>,
}

impl Agreement {
    /// Balance exhaustion check used by the sweeper; balances are unsigned,
    /// so "≤ 0" collapses to zero.
    pub fn is_drained(&self) -> bool {
        self.balance.is_zero()
    }
}
