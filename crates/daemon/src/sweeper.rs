use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use harbor_chain::AgreementStatus;
use harbor_indexer::GetAgreementsQuery;

use crate::runtime::ProviderRuntime;
use crate::state::SharedState;

/// Periodic balance enforcement: list every active agreement for each
/// provider and its virtual children, and force-close the drained ones
/// on-chain. The reconciler picks up the resulting `AgreementClosed` events
/// and drives the backend teardown.
pub struct BalanceSweeper {
    state: SharedState,
    runtimes: Vec<Arc<ProviderRuntime>>,
    interval: Duration,
    in_progress: AtomicBool,
}

impl BalanceSweeper {
    pub fn new(state: SharedState, runtimes: Vec<Arc<ProviderRuntime>>, interval: Duration) -> Self {
        Self {
            state,
            runtimes,
            interval,
            in_progress: AtomicBool::new(false),
        }
    }

    pub async fn run(&self) {
        info!("💰 Balance sweeper started (every {:?})", self.interval);
        // First sweep at boot, then on the interval.
        self.tick().await;
        loop {
            if !self.state.sleep_cancellable(self.interval).await {
                break;
            }
            if self.state.is_shutting_down() {
                break;
            }
            self.tick().await;
        }
        info!("Balance sweeper stopped");
    }

    /// One sweep. Ticks are serialized: an overlapping tick is dropped.
    pub async fn tick(&self) {
        if self.in_progress.swap(true, Ordering::SeqCst) {
            debug!("Balance sweep already in progress, dropping tick");
            return;
        }
        for runtime in &self.runtimes {
            self.sweep_runtime(runtime).await;
        }
        self.in_progress.store(false, Ordering::SeqCst);
    }

    async fn sweep_runtime(&self, runtime: &Arc<ProviderRuntime>) {
        let protocol = runtime.protocol_str();
        let mut owners = vec![runtime.provider.owner];
        owners.extend(runtime.virtual_children().iter().map(|c| c.owner));

        // The same agreement can surface under several listings; close once.
        let mut seen: HashSet<u64> = HashSet::new();

        for owner in owners {
            let agreements = match runtime
                .indexer
                .get_agreements(&GetAgreementsQuery {
                    protocol_address: protocol.clone(),
                    provider_address: Some(format!("{owner:#x}")),
                    status: Some(AgreementStatus::Active),
                    auto_paginate: true,
                    ..Default::default()
                })
                .await
            {
                Ok(agreements) => {
                    self.state.note_indexer_success();
                    agreements
                }
                Err(e) => {
                    if e.is_transport() {
                        self.state.note_indexer_failure(&runtime.indexer).await;
                    } else {
                        warn!("Balance sweep listing failed for {:#x}: {}", owner, e);
                    }
                    continue;
                }
            };

            for agreement in agreements {
                if !seen.insert(agreement.id) {
                    continue;
                }
                if !agreement.is_drained() {
                    continue;
                }
                info!("💸 Agreement {} is out of balance, closing", agreement.id);
                if let Err(e) = runtime
                    .chain
                    .close_agreement(runtime.protocol, agreement.id)
                    .await
                {
                    error!("Failed to close agreement {}: {}", agreement.id, e);
                }
            }
        }
    }
}
