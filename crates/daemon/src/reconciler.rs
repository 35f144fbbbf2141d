use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use anyhow::anyhow;
use tracing::{debug, error, info, warn};

use harbor_db::{DeploymentStatus, NewResource, Store};
use harbor_indexer::{GetAgreementsQuery, GetEventsQuery, IndexedEvent, IndexerClient, IndexerError};

use crate::constants::{
    EVENT_AGREEMENT_CLOSED, EVENT_AGREEMENT_CREATED, LAST_PROCESSED_BLOCK_KEY,
    RESOURCE_POLL_INTERVAL,
};
use crate::error::{DaemonError, Result};
use crate::names::random_name;
use crate::runtime::ProviderRuntime;
use crate::state::SharedState;
use crate::watcher::spawn_resource_watcher;

/// Event-driven agreement reconciler.
///
/// Replays `AgreementCreated`/`AgreementClosed` events in block windows of
/// `window` blocks, strictly ordered, and drives resource creation and
/// closure through each responsible provider runtime. The block cursor is
/// persisted under `LAST_PROCESSED_BLOCK` and only held back by indexer
/// transport failures.
pub struct Reconciler {
    state: SharedState,
    store: Store,
    indexer: IndexerClient,
    by_protocol: BTreeMap<String, Vec<Arc<ProviderRuntime>>>,
    window: u64,
    interval: Duration,
}

impl Reconciler {
    pub fn new(
        state: SharedState,
        store: Store,
        indexer: IndexerClient,
        runtimes: Vec<Arc<ProviderRuntime>>,
        window: u64,
        interval: Duration,
    ) -> Self {
        let mut by_protocol: BTreeMap<String, Vec<Arc<ProviderRuntime>>> = BTreeMap::new();
        for runtime in runtimes {
            by_protocol
                .entry(runtime.protocol_str())
                .or_default()
                .push(runtime);
        }
        Self {
            state,
            store,
            indexer,
            by_protocol,
            window,
            interval,
        }
    }

    pub async fn run(self) {
        info!(
            "🔄 Reconciler started (window {} blocks, every {:?})",
            self.window, self.interval
        );
        loop {
            if self.state.is_shutting_down() {
                break;
            }
            match self.run_once().await {
                Ok(()) => {}
                Err(DaemonError::Terminated) => break,
                Err(DaemonError::Other(e)) if crate::error::is_termination(&e) => break,
                Err(e) => error!("Reconciler tick failed: {}", e),
            }
            if !self.state.sleep_cancellable(self.interval).await {
                break;
            }
        }
        info!("Reconciler stopped");
    }

    /// One reconciliation tick: fetch the next block window per protocol,
    /// apply events in order, advance the cursor.
    pub async fn run_once(&self) -> Result<()> {
        let last_indexed = match self.indexer.latest_processed_block().await {
            Ok(Some(block)) => {
                self.state.note_indexer_success();
                block
            }
            Ok(None) => {
                self.state.note_indexer_success();
                return Ok(());
            }
            Err(e) if e.is_transport() => {
                self.state.note_indexer_failure(&self.indexer).await;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let last = match self.store.get_config(LAST_PROCESSED_BLOCK_KEY).await? {
            Some(value) => value.parse::<u64>().unwrap_or(last_indexed),
            None => {
                // Fresh daemon: start at the current head instead of
                // replaying all of history.
                self.store
                    .set_config(LAST_PROCESSED_BLOCK_KEY, &last_indexed.to_string())
                    .await?;
                debug!("Initialized block cursor at {}", last_indexed);
                return Ok(());
            }
        };
        if last_indexed <= last {
            return Ok(());
        }

        let from = last + 1;
        let to = last + self.window;
        let mut advance = true;

        for (protocol, runtimes) in &self.by_protocol {
            let events = match self.fetch_window(protocol, from, to).await {
                Ok(events) => {
                    self.state.note_indexer_success();
                    events
                }
                Err(e) if e.is_transport() => {
                    self.state.note_indexer_failure(&self.indexer).await;
                    advance = false;
                    continue;
                }
                Err(e) => {
                    error!("Failed to fetch events for protocol {}: {}", protocol, e);
                    continue;
                }
            };

            for event in &events {
                if self.state.is_shutting_down() {
                    return Ok(());
                }
                match self.dispatch(protocol, event, runtimes).await {
                    Ok(()) => {}
                    Err(DaemonError::Indexer(e)) if e.is_transport() => {
                        self.state.note_indexer_failure(&self.indexer).await;
                        advance = false;
                    }
                    Err(e) => {
                        error!(
                            "Failed to process {} at block {}: {}",
                            event.name, event.block_number, e
                        );
                    }
                }
            }
        }

        if advance {
            let new_last = if last + self.window < last_indexed {
                last + self.window
            } else {
                last_indexed
            };
            if new_last > last {
                self.store
                    .set_config(LAST_PROCESSED_BLOCK_KEY, &new_last.to_string())
                    .await?;
                debug!("Advanced block cursor to {}", new_last);
            }
        }
        Ok(())
    }

    /// Fetch and order one window of agreement events for a protocol.
    async fn fetch_window(
        &self,
        protocol: &str,
        from: u64,
        to: u64,
    ) -> std::result::Result<Vec<IndexedEvent>, IndexerError> {
        let mut events = Vec::new();
        for name in [EVENT_AGREEMENT_CREATED, EVENT_AGREEMENT_CLOSED] {
            let batch = self
                .indexer
                .get_events(&GetEventsQuery {
                    contract_address: Some(protocol.to_string()),
                    event_name: Some(name.to_string()),
                    from_block: Some(from),
                    to_block: Some(to),
                    auto_paginate: true,
                    ..Default::default()
                })
                .await?;
            events.extend(batch);
        }
        // Authoritative ordering: ascending block number, then log index.
        // The stable sort keeps a same-block create ahead of its close when
        // the indexer supplies no log indices.
        events.sort_by_key(|e| (e.block_number, e.log_index.map(|i| i as i128).unwrap_or(-1)));
        Ok(events)
    }

    async fn dispatch(
        &self,
        protocol: &str,
        event: &IndexedEvent,
        runtimes: &[Arc<ProviderRuntime>],
    ) -> Result<()> {
        let Some(raw_provider) = event.provider_address() else {
            warn!(
                "Event {} at block {} carries no provider address",
                event.name, event.block_number
            );
            return Ok(());
        };
        let Ok(provider) = raw_provider.parse::<Address>() else {
            warn!("Event {} carries a malformed provider address", event.name);
            return Ok(());
        };

        for runtime in runtimes {
            let Some(actor) = runtime.find_actor(provider) else {
                continue;
            };
            match event.name.as_str() {
                EVENT_AGREEMENT_CREATED => {
                    self.handle_created(runtime, actor.id, event, protocol).await?
                }
                EVENT_AGREEMENT_CLOSED => self.handle_closed(runtime, event, protocol).await?,
                other => debug!("Ignoring event {}", other),
            }
        }
        Ok(())
    }

    async fn handle_created(
        &self,
        runtime: &Arc<ProviderRuntime>,
        actor_id: u64,
        event: &IndexedEvent,
        protocol: &str,
    ) -> Result<()> {
        let Some(id) = event.agreement_id() else {
            warn!("AgreementCreated at block {} has no id", event.block_number);
            return Ok(());
        };

        // Idempotency: the reconciler is the sole writer of resource rows,
        // and creation only happens when no row exists.
        if self
            .store
            .get_resource(id as i64, protocol, None)
            .await?
            .is_some()
        {
            debug!("Resource {} already exists, skipping creation", id);
            return Ok(());
        }

        let agreements = self
            .indexer
            .get_agreements(&GetAgreementsQuery {
                protocol_address: protocol.to_string(),
                id: Some(id),
                auto_paginate: true,
                ..Default::default()
            })
            .await?;
        let Some(agreement) = agreements.into_iter().next() else {
            warn!("Agreement {} not found in the indexer", id);
            return Ok(());
        };

        let offer = runtime.detailed_offer(agreement.offer_id).await?;

        match runtime.backend.create(&agreement, &offer).await {
            Ok(details) => {
                let status = details.status;
                let name = details.name.clone().unwrap_or_else(random_name);
                self.store
                    .create_resource(NewResource {
                        id: id as i64,
                        protocol_address: protocol.to_string(),
                        name,
                        owner_address: format!("{:#x}", agreement.user),
                        details: details.details_json(),
                        deployment_status: status,
                        offer_id: agreement.offer_id as i64,
                        provider_id: actor_id as i64,
                    })
                    .await?;
                info!("🆕 Resource {} created, status {:?}", id, status);
                if status != DeploymentStatus::Running {
                    spawn_resource_watcher(
                        self.state.clone(),
                        runtime.clone(),
                        id as i64,
                        RESOURCE_POLL_INTERVAL,
                    )
                    .await;
                }
            }
            Err(e) => {
                error!("Backend failed to provision agreement {}: {}", id, e);
                self.store
                    .create_resource(NewResource {
                        id: id as i64,
                        protocol_address: protocol.to_string(),
                        name: random_name(),
                        owner_address: format!("{:#x}", agreement.user),
                        details: serde_json::json!({}),
                        deployment_status: DeploymentStatus::Failed,
                        offer_id: agreement.offer_id as i64,
                        provider_id: actor_id as i64,
                    })
                    .await?;
            }
        }
        Ok(())
    }

    async fn handle_closed(
        &self,
        runtime: &Arc<ProviderRuntime>,
        event: &IndexedEvent,
        protocol: &str,
    ) -> Result<()> {
        let Some(id) = event.agreement_id() else {
            warn!("AgreementClosed at block {} has no id", event.block_number);
            return Ok(());
        };

        let Some(resource) = self.store.get_resource(id as i64, protocol, None).await? else {
            // Created and closed before we ever saw the creation.
            return Ok(());
        };
        if !resource.is_active {
            return Ok(());
        }

        // Backend teardown failures are logged; the row is closed regardless.
        let teardown = async {
            let agreement = runtime.chain.get_agreement(runtime.protocol, id).await?;
            let offer = runtime.detailed_offer(agreement.offer_id).await?;
            runtime
                .backend
                .delete(&agreement, &offer, &resource)
                .await
                .map_err(|e| anyhow!(e))?;
            Ok::<_, anyhow::Error>(())
        };
        if let Err(e) = teardown.await {
            error!("Backend teardown for agreement {} failed: {}", id, e);
        }

        self.store.delete_resource(id as i64, protocol).await?;
        info!("🗑️ Resource {} closed", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(name: &str, block: u64, log_index: Option<u64>, id: u64) -> IndexedEvent {
        IndexedEvent {
            block_number: block,
            log_index,
            name: name.to_string(),
            args: json!({"id": id}),
        }
    }

    #[test]
    fn window_ordering_is_block_then_log_index() {
        let mut events = vec![
            event(EVENT_AGREEMENT_CREATED, 102, Some(0), 3),
            event(EVENT_AGREEMENT_CREATED, 100, Some(1), 1),
            event(EVENT_AGREEMENT_CLOSED, 100, Some(0), 9),
            event(EVENT_AGREEMENT_CLOSED, 101, None, 1),
        ];
        events.sort_by_key(|e| (e.block_number, e.log_index.map(|i| i as i128).unwrap_or(-1)));

        let order: Vec<(u64, &str)> = events
            .iter()
            .map(|e| (e.block_number, e.name.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                (100, EVENT_AGREEMENT_CLOSED),
                (100, EVENT_AGREEMENT_CREATED),
                (101, EVENT_AGREEMENT_CLOSED),
                (102, EVENT_AGREEMENT_CREATED),
            ]
        );
    }

    #[test]
    fn same_block_create_precedes_close_without_log_indices() {
        // Concatenation order is created-first; the stable sort must keep it.
        let mut events = vec![
            event(EVENT_AGREEMENT_CREATED, 100, None, 8),
            event(EVENT_AGREEMENT_CLOSED, 100, None, 8),
        ];
        events.sort_by_key(|e| (e.block_number, e.log_index.map(|i| i as i128).unwrap_or(-1)));
        assert_eq!(events[0].name, EVENT_AGREEMENT_CREATED);
        assert_eq!(events[1].name, EVENT_AGREEMENT_CLOSED);
    }
}
