use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use futures::StreamExt;
use serde_json::json;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::error::code;
use crate::request::{PipeEnvelope, PipeResponse};
use crate::router::Pipe;

/// Serve the operator pipe over the signed-messaging bus until `shutdown`
/// resolves.
///
/// Delivery ordering is not guaranteed by the bus; handlers own their
/// idempotency. The envelope and its signature check are identical to the
/// HTTP transport.
pub async fn serve_nats(
    pipe: Arc<Pipe>,
    nats_url: &str,
    shutdown: impl Future<Output = ()> + Send,
) -> anyhow::Result<()> {
    let client = timeout(Duration::from_secs(5), async_nats::connect(nats_url))
        .await
        .map_err(|_| anyhow!("timed out connecting to NATS at {nats_url}"))??;

    let subject = format!("pipe.{:#x}", pipe.operator());
    let mut subscription = client.subscribe(subject.clone()).await?;
    info!("📡 Signed-messaging listener on {}", subject);

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            maybe = subscription.next() => {
                let Some(message) = maybe else { break };
                let response = match serde_json::from_slice::<PipeEnvelope>(&message.payload) {
                    Ok(envelope) => pipe.dispatch_envelope(envelope).await,
                    Err(e) => PipeResponse {
                        code: code::BAD_REQUEST,
                        body: json!({ "message": format!("malformed envelope: {e}") }),
                    },
                };
                if let Some(reply) = message.reply {
                    let payload = serde_json::to_vec(&response).unwrap_or_default();
                    if let Err(e) = client.publish(reply, payload.into()).await {
                        warn!("Failed to publish pipe reply: {}", e);
                    }
                }
            }
        }
    }

    info!("Signed-messaging listener on {} stopped", subject);
    Ok(())
}
