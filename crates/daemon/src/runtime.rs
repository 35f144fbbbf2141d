use std::sync::{Arc, RwLock};

use alloy::primitives::Address;
use anyhow::{anyhow, bail};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use harbor_backend::{Resource, ServiceBackend};
use harbor_chain::{Agreement, ChainClient, ChainError, DetailedOffer, ProviderRecord};
use harbor_db::Store;
use harbor_indexer::IndexerClient;
use harbor_pipe::{Pipe, PipeError};

use crate::config::ProviderTagConfig;
use crate::details::DetailRegistry;
use crate::error::{DaemonError, Result};

/// Detail blob schema every provider must publish: a name, optionally a
/// description and homepage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDetails {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub homepage: Option<String>,
}

pub fn parse_provider_details(content: &str) -> anyhow::Result<ProviderDetails> {
    let details: ProviderDetails =
        serde_json::from_str(content).map_err(|e| anyhow!("invalid provider details: {e}"))?;
    if details.name.trim().is_empty() {
        bail!("provider details must carry a non-empty name");
    }
    Ok(details)
}

/// One physical provider served by this daemon: its on-chain identity, the
/// protocol it operates in, its virtual children, and the wiring into the
/// store, chain, indexer, detail registry, backend, and operator pipe.
pub struct ProviderRuntime {
    pub tag: String,
    pub provider: ProviderRecord,
    pub protocol: Address,
    pub is_gateway: bool,
    pub store: Store,
    pub chain: Arc<dyn ChainClient>,
    pub indexer: IndexerClient,
    pub registry: Arc<DetailRegistry>,
    pub backend: Arc<dyn ServiceBackend>,
    pub pipe: Arc<Pipe>,
    virtual_children: RwLock<Vec<ProviderRecord>>,
}

impl ProviderRuntime {
    /// Startup validation per provider tag. Fatal errors here make the tag
    /// unusable; invalid virtual children are skipped with a warning.
    #[allow(clippy::too_many_arguments)]
    pub async fn initialize(
        config: &ProviderTagConfig,
        store: Store,
        chain: Arc<dyn ChainClient>,
        indexer: IndexerClient,
        registry: Arc<DetailRegistry>,
        backend: Arc<dyn ServiceBackend>,
        pipe: Arc<Pipe>,
    ) -> Result<Arc<Self>> {
        let owner = config.owner_key.address();
        let actor = chain.get_actor(owner).await?.ok_or_else(|| {
            DaemonError::Config(format!(
                "provider {}: owner {owner:#x} is not registered on-chain",
                config.tag
            ))
        })?;

        let details = registry.resolve(&actor.details_link).ok_or_else(|| {
            DaemonError::Config(format!(
                "provider {}: details {} not found in the detail registry",
                config.tag, actor.details_link
            ))
        })?;
        let parsed = parse_provider_details(&details)
            .map_err(|e| DaemonError::Config(format!("provider {}: {e}", config.tag)))?;

        let protocol = match config.protocol_address {
            Some(protocol) => protocol,
            None => {
                let protocols = chain.get_registered_protocols(actor.id).await?;
                let first = protocols.first().copied().ok_or_else(|| {
                    DaemonError::Config(format!(
                        "provider {}: no registered protocols and no PROTOCOL_ADDRESS configured",
                        config.tag
                    ))
                })?;
                warn!(
                    "Provider {}: PROTOCOL_ADDRESS not set, using first registered protocol {:#x}",
                    config.tag, first
                );
                first
            }
        };

        let offers = chain.get_all_provider_offers(protocol, actor.id).await?;
        for offer in &offers {
            if !registry.contains(&offer.details_link) {
                return Err(DaemonError::Config(format!(
                    "provider {}: offer {} details {} not found in the detail registry",
                    config.tag, offer.id, offer.details_link
                )));
            }
        }

        store
            .save_provider(actor.id as i64, &format!("{owner:#x}"), false, None)
            .await?;
        store.ensure_protocol(&format!("{protocol:#x}")).await?;

        info!(
            "✅ Provider {} ready: \"{}\" (id {}, {} offers, protocol {:#x})",
            config.tag,
            parsed.name,
            actor.id,
            offers.len(),
            protocol
        );

        let runtime = Arc::new(Self {
            tag: config.tag.clone(),
            provider: actor,
            protocol,
            is_gateway: config.is_gateway,
            store,
            chain,
            indexer,
            registry,
            backend,
            pipe,
            virtual_children: RwLock::new(Vec::new()),
        });
        runtime.load_virtual_children().await;
        Ok(runtime)
    }

    /// Re-verify each persisted virtual child; failures skip the child but
    /// never the gateway.
    async fn load_virtual_children(&self) {
        let rows = match self.store.virtual_children(self.db_id()).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Failed to load virtual providers from the store: {}", e);
                return;
            }
        };
        for row in rows {
            match self.validate_virtual_child(&row.owner_address).await {
                Ok(record) => {
                    info!(
                        "Loaded virtual provider {} ({:#x}) behind gateway {}",
                        record.id, record.owner, self.provider.id
                    );
                    self.virtual_children.write().unwrap().push(record);
                }
                Err(e) => {
                    warn!(
                        "Skipping unusable virtual provider {}: {}",
                        row.owner_address, e
                    );
                }
            }
        }
    }

    async fn validate_virtual_child(&self, owner_address: &str) -> anyhow::Result<ProviderRecord> {
        let owner: Address = owner_address
            .parse()
            .map_err(|_| anyhow!("invalid owner address"))?;
        let actor = self
            .chain
            .get_actor(owner)
            .await?
            .ok_or_else(|| anyhow!("not registered on-chain"))?;

        let details = self
            .registry
            .resolve(&actor.details_link)
            .ok_or_else(|| anyhow!("details {} missing from the registry", actor.details_link))?;
        parse_provider_details(&details)?;

        if actor.operator != self.provider.operator {
            bail!("operator does not match the gateway");
        }
        if actor.endpoint != self.provider.endpoint {
            bail!("endpoint does not match the gateway");
        }

        let offers = self
            .chain
            .get_all_provider_offers(self.protocol, actor.id)
            .await?;
        for offer in &offers {
            if !self.registry.contains(&offer.details_link) {
                bail!("offer {} details {} missing", offer.id, offer.details_link);
            }
        }
        Ok(actor)
    }

    pub fn db_id(&self) -> i64 {
        self.provider.id as i64
    }

    pub fn protocol_str(&self) -> String {
        format!("{:#x}", self.protocol)
    }

    pub fn virtual_children(&self) -> Vec<ProviderRecord> {
        self.virtual_children.read().unwrap().clone()
    }

    pub fn add_virtual_child(&self, record: ProviderRecord) {
        self.virtual_children.write().unwrap().push(record);
    }

    pub fn virtual_child_by_owner(&self, owner: Address) -> Option<ProviderRecord> {
        self.virtual_children
            .read()
            .unwrap()
            .iter()
            .find(|c| c.owner == owner)
            .cloned()
    }

    /// The provider's own id plus each virtual child's id.
    pub fn provider_ids(&self) -> Vec<i64> {
        let mut ids = vec![self.db_id()];
        ids.extend(
            self.virtual_children
                .read()
                .unwrap()
                .iter()
                .map(|c| c.id as i64),
        );
        ids
    }

    /// The actor responsible for an event's provider address: the provider
    /// itself iff the owner matches, else the matching virtual child.
    pub fn find_actor(&self, event_provider: Address) -> Option<ProviderRecord> {
        if event_provider == self.provider.owner {
            return Some(self.provider.clone());
        }
        self.virtual_child_by_owner(event_provider)
    }

    /// Register the backend's provider-scoped routes under every id this
    /// runtime fronts.
    pub fn register_service_routes(&self) {
        let ids = self.provider_ids();
        for route in self.backend.service_routes() {
            self.pipe
                .register_provider_route(route.method, &route.path, &ids, route.handler);
        }
    }

    /// Chain-typed offer plus its resolved detail blob; a missing blob is
    /// logged, not fatal.
    pub async fn detailed_offer(&self, offer_id: u64) -> std::result::Result<DetailedOffer, ChainError> {
        let offer = self.chain.get_offer(self.protocol, offer_id).await?;
        let details = self.registry.resolve(&offer.details_link);
        if details.is_none() {
            warn!(
                "Offer {} details {} not found in the detail registry",
                offer.id, offer.details_link
            );
        }
        Ok(DetailedOffer { offer, details })
    }

    /// Load a resource for a request handler: it must exist, be active, be
    /// owned by the requester, and belong to one of this runtime's providers.
    pub async fn authorize_and_load_resource(
        &self,
        id: i64,
        protocol_address: &str,
        requester: Address,
    ) -> std::result::Result<(Resource, Agreement), PipeError> {
        let resource = self
            .store
            .get_resource(id, protocol_address, Some(&format!("{requester:#x}")))
            .await
            .map_err(|e| PipeError::internal(e.to_string()))?
            .ok_or_else(|| PipeError::not_found("no such resource"))?;
        if !resource.is_active {
            return Err(PipeError::not_found("resource is no longer active"));
        }
        if !self.provider_ids().contains(&resource.provider_id) {
            return Err(PipeError::not_found("no such resource"));
        }
        let agreement = self
            .chain
            .get_agreement(self.protocol, id as u64)
            .await
            .map_err(|e| PipeError::internal(e.to_string()))?;
        Ok((resource, agreement))
    }
}
