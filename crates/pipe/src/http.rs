use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;
use tracing::info;

use crate::request::{PipeEnvelope, PipeResponse};
use crate::router::Pipe;

#[derive(Debug, Clone)]
pub struct HttpPipeConfig {
    pub port: u16,
    pub rate_limit: u32,
    pub rate_limit_window: Duration,
}

/// Fixed-window request counter per requester address.
struct FixedWindow {
    limit: u32,
    window: Duration,
    hits: HashMap<String, (Instant, u32)>,
}

impl FixedWindow {
    fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            hits: HashMap::new(),
        }
    }

    fn allow(&mut self, key: &str) -> bool {
        let now = Instant::now();
        let entry = self.hits.entry(key.to_string()).or_insert((now, 0));
        if now.duration_since(entry.0) >= self.window {
            *entry = (now, 0);
        }
        entry.1 += 1;
        entry.1 <= self.limit
    }
}

#[derive(Clone)]
struct HttpState {
    pipe: Arc<Pipe>,
    limiter: Arc<Mutex<FixedWindow>>,
}

async fn handle_envelope(
    State(state): State<HttpState>,
    Json(envelope): Json<PipeEnvelope>,
) -> (StatusCode, Json<PipeResponse>) {
    let rate_key = envelope.requester.to_ascii_lowercase();
    let allowed = state.limiter.lock().unwrap().allow(&rate_key);
    if !allowed {
        let response = PipeResponse {
            code: StatusCode::TOO_MANY_REQUESTS.as_u16(),
            body: json!({ "message": "rate limit exceeded" }),
        };
        return (StatusCode::TOO_MANY_REQUESTS, Json(response));
    }

    let response = state.pipe.dispatch_envelope(envelope).await;
    let status =
        StatusCode::from_u16(response.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(response))
}

/// Serve the operator pipe over HTTP until `shutdown` resolves.
pub async fn serve_http(
    pipe: Arc<Pipe>,
    config: HttpPipeConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let state = HttpState {
        pipe,
        limiter: Arc::new(Mutex::new(FixedWindow::new(
            config.rate_limit,
            config.rate_limit_window,
        ))),
    };
    let app = Router::new()
        .route("/", post(handle_envelope))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!("🔌 Operator pipe listening on port {}", config.port);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("Operator pipe on port {} stopped", config.port);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_window_resets_after_the_window() {
        let mut limiter = FixedWindow::new(2, Duration::from_millis(10));
        assert!(limiter.allow("a"));
        assert!(limiter.allow("a"));
        assert!(!limiter.allow("a"));
        // A different requester has its own window.
        assert!(limiter.allow("b"));

        std::thread::sleep(Duration::from_millis(15));
        assert!(limiter.allow("a"));
    }
}
