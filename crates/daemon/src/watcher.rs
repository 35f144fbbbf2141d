use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use harbor_backend::{Resource, ResourceDetails};
use harbor_db::{DeploymentStatus, ResourceUpdate};

use crate::runtime::ProviderRuntime;
use crate::state::SharedState;

/// Spawn a cooperative task that polls the backend until the resource
/// reports `Running`, then records the final details and exits. The task is
/// tracked on the shared state so shutdown can wait for it.
pub async fn spawn_resource_watcher(
    state: SharedState,
    runtime: Arc<ProviderRuntime>,
    resource_id: i64,
    poll_interval: Duration,
) {
    let watcher_state = state.clone();
    state
        .spawn_watcher(async move {
            let protocol = runtime.protocol_str();
            info!("👁️ Watching resource {} until it is running", resource_id);

            loop {
                if watcher_state.is_shutting_down() {
                    break;
                }

                let resource = match runtime.store.get_resource(resource_id, &protocol, None).await
                {
                    Ok(Some(resource)) => resource,
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Watcher failed to load resource {}: {}", resource_id, e);
                        if !watcher_state.sleep_cancellable(poll_interval).await {
                            break;
                        }
                        continue;
                    }
                };
                if !resource.is_active || resource.deployment_status == DeploymentStatus::Running {
                    break;
                }

                match poll_backend(&runtime, &resource).await {
                    Ok(Some(details)) => {
                        let update = ResourceUpdate {
                            deployment_status: Some(DeploymentStatus::Running),
                            details: Some(details.details_json()),
                            ..Default::default()
                        };
                        if let Err(e) = runtime
                            .store
                            .update_resource(resource_id, &protocol, update)
                            .await
                        {
                            warn!("Failed to record resource {} as running: {}", resource_id, e);
                        } else {
                            info!("🟢 Resource {} is running", resource_id);
                        }
                        break;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        debug!("Poll for resource {} failed: {}", resource_id, e);
                    }
                }

                if !watcher_state.sleep_cancellable(poll_interval).await {
                    break;
                }
            }
        })
        .await;
}

/// One poll cycle; `Some` when the backend reports the resource running.
async fn poll_backend(
    runtime: &ProviderRuntime,
    resource: &Resource,
) -> anyhow::Result<Option<ResourceDetails>> {
    let agreement = runtime
        .chain
        .get_agreement(runtime.protocol, resource.id as u64)
        .await?;
    let offer = runtime.detailed_offer(agreement.offer_id).await?;
    let details = runtime.backend.get_details(&agreement, &offer, resource).await?;
    Ok((details.status == DeploymentStatus::Running).then_some(details))
}
