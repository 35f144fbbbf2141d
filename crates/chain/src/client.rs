use alloy::network::EthereumWallet;
use alloy::primitives::{Address, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::SolEvent;
use alloy::transports::RpcError;
use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::contracts::{IActorRegistry, IProtocol};
use crate::types::{Agreement, AgreementStatus, Offer, ProviderRecord};

#[derive(Error, Debug)]
pub enum ChainError {
    /// Network-level failure reaching the RPC node.
    #[error("chain transport error: {0}")]
    Transport(String),

    /// The node answered but the call failed (revert, bad data, rejected tx).
    #[error("contract call failed: {0}")]
    Contract(String),

    #[error("{0}")]
    Other(String),
}

impl ChainError {
    pub fn is_transport(&self) -> bool {
        matches!(self, ChainError::Transport(_))
    }
}

fn convert_error(err: alloy::contract::Error) -> ChainError {
    match err {
        alloy::contract::Error::TransportError(RpcError::Transport(kind)) => {
            ChainError::Transport(kind.to_string())
        }
        other => ChainError::Contract(other.to_string()),
    }
}

#[derive(Debug, Clone)]
pub struct RegisterOfferRequest {
    pub provider_owner: Address,
    pub details_link: String,
    pub fee: U256,
    pub stock: u32,
}

/// Typed reads of marketplace records plus the two writes the daemon makes.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn get_actor(&self, address: Address) -> Result<Option<ProviderRecord>, ChainError>;

    async fn get_registered_protocols(&self, provider_id: u64)
        -> Result<Vec<Address>, ChainError>;

    async fn get_offer(&self, protocol: Address, id: u64) -> Result<Offer, ChainError>;

    async fn get_agreement(&self, protocol: Address, id: u64) -> Result<Agreement, ChainError>;

    async fn get_all_provider_offers(
        &self,
        protocol: Address,
        provider_id: u64,
    ) -> Result<Vec<Offer>, ChainError>;

    async fn close_agreement(&self, protocol: Address, id: u64) -> Result<(), ChainError>;

    /// Register a new offer and return its chain-assigned id.
    async fn register_offer(
        &self,
        protocol: Address,
        request: RegisterOfferRequest,
    ) -> Result<u64, ChainError>;

    fn generate_cid(&self, content: &[u8]) -> String {
        crate::generate_cid(content)
    }
}

/// `ChainClient` over an EVM JSON-RPC endpoint.
#[derive(Clone)]
pub struct EvmChainClient {
    rpc_url: Url,
    signer: PrivateKeySigner,
    registry: Address,
}

impl EvmChainClient {
    pub fn new(rpc_url: &str, signer: PrivateKeySigner, registry: Address) -> Result<Self, ChainError> {
        let rpc_url = rpc_url
            .parse::<Url>()
            .map_err(|e| ChainError::Other(format!("invalid RPC url {rpc_url}: {e}")))?;
        Ok(Self {
            rpc_url,
            signer,
            registry,
        })
    }

    fn provider(&self) -> impl Provider {
        let wallet = EthereumWallet::from(self.signer.clone());
        ProviderBuilder::new()
            .wallet(wallet)
            .connect_http(self.rpc_url.clone())
    }
}

fn actor_to_record(actor: IActorRegistry::Actor) -> Option<ProviderRecord> {
    if actor.ownerAddr == Address::ZERO {
        return None;
    }
    Some(ProviderRecord {
        id: actor.id,
        owner: actor.ownerAddr,
        operator: actor.operatorAddr,
        endpoint: actor.endpoint,
        details_link: actor.detailsLink,
    })
}

fn offer_to_record(offer: IProtocol::Offer) -> Offer {
    Offer {
        id: offer.id,
        owner: offer.ownerAddr,
        fee: offer.fee,
        stock: offer.stockAmount,
        details_link: offer.detailsLink,
    }
}

const AGREEMENT_STATUS_ACTIVE: u8 = 1;

fn agreement_to_record(agreement: IProtocol::Agreement) -> Agreement {
    Agreement {
        id: agreement.id,
        user: agreement.userAddr,
        provider: agreement.providerAddr,
        offer_id: agreement.offerId,
        balance: agreement.balance,
        status: if agreement.status == AGREEMENT_STATUS_ACTIVE {
            AgreementStatus::Active
        } else {
            AgreementStatus::NotActive
        },
        started_at: agreement.startTs,
        ended_at: (agreement.endTs != 0).then_some(agreement.endTs),
    }
}

#[async_trait]
impl ChainClient for EvmChainClient {
    async fn get_actor(&self, address: Address) -> Result<Option<ProviderRecord>, ChainError> {
        let provider = self.provider();
        let registry = IActorRegistry::new(self.registry, &provider);
        let actor = registry
            .getActor(address)
            .call()
            .await
            .map_err(convert_error)?;
        Ok(actor_to_record(actor))
    }

    async fn get_registered_protocols(
        &self,
        provider_id: u64,
    ) -> Result<Vec<Address>, ChainError> {
        let provider = self.provider();
        let registry = IActorRegistry::new(self.registry, &provider);
        registry
            .getRegisteredProtocolsOfProvider(provider_id)
            .call()
            .await
            .map_err(convert_error)
    }

    async fn get_offer(&self, protocol: Address, id: u64) -> Result<Offer, ChainError> {
        let provider = self.provider();
        let contract = IProtocol::new(protocol, &provider);
        let offer = contract.getOffer(id).call().await.map_err(convert_error)?;
        Ok(offer_to_record(offer))
    }

    async fn get_agreement(&self, protocol: Address, id: u64) -> Result<Agreement, ChainError> {
        let provider = self.provider();
        let contract = IProtocol::new(protocol, &provider);
        let agreement = contract
            .getAgreement(id)
            .call()
            .await
            .map_err(convert_error)?;
        Ok(agreement_to_record(agreement))
    }

    async fn get_all_provider_offers(
        &self,
        protocol: Address,
        provider_id: u64,
    ) -> Result<Vec<Offer>, ChainError> {
        let provider = self.provider();
        let contract = IProtocol::new(protocol, &provider);
        let offers = contract
            .getAllProviderOffers(provider_id)
            .call()
            .await
            .map_err(convert_error)?;
        Ok(offers.into_iter().map(offer_to_record).collect())
    }

    async fn close_agreement(&self, protocol: Address, id: u64) -> Result<(), ChainError> {
        let provider = self.provider();
        let contract = IProtocol::new(protocol, &provider);
        let pending = contract
            .closeAgreement(id)
            .send()
            .await
            .map_err(convert_error)?;
        let tx_hash = *pending.tx_hash();
        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        if !receipt.status() {
            return Err(ChainError::Contract(format!(
                "closeAgreement({id}) reverted, tx {tx_hash:?}"
            )));
        }
        debug!("Closed agreement {} in tx {:?}", id, tx_hash);
        Ok(())
    }

    async fn register_offer(
        &self,
        protocol: Address,
        request: RegisterOfferRequest,
    ) -> Result<u64, ChainError> {
        let provider = self.provider();
        let contract = IProtocol::new(protocol, &provider);
        let pending = contract
            .registerOffer(
                request.provider_owner,
                request.details_link.clone(),
                request.fee,
                request.stock,
            )
            .send()
            .await
            .map_err(convert_error)?;
        let tx_hash = *pending.tx_hash();
        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        if !receipt.status() {
            return Err(ChainError::Contract(format!(
                "registerOffer reverted, tx {tx_hash:?}"
            )));
        }
        for log in receipt.inner.logs() {
            if let Ok(event) = IProtocol::OfferRegistered::decode_log_data(&log.inner.data) {
                debug!("Registered offer {} in tx {:?}", event.id, tx_hash);
                return Ok(event.id);
            }
        }
        Err(ChainError::Contract(format!(
            "registerOffer emitted no OfferRegistered event, tx {tx_hash:?}"
        )))
    }
}
