use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::Address;
use axum::Router;
use axum::routing::get;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use harbor_backend::ServiceBackend;
use harbor_chain::{ChainClient, EvmChainClient};
use harbor_db::Store;
use harbor_indexer::IndexerClient;
use harbor_pipe::{HttpPipeConfig, Pipe, serve_http, serve_nats};

use crate::config::DaemonConfig;
use crate::constants::{DATA_DIR, DETAILS_DIR, EXIT_FORCED, EXIT_TERMINATED};
use crate::details::DetailRegistry;
use crate::error::{DaemonError, Result};
use crate::gateway::register_gateway_routes;
use crate::reconciler::Reconciler;
use crate::routes::{OperatorContext, register_operator_routes};
use crate::runtime::ProviderRuntime;
use crate::state::SharedState;
use crate::sweeper::BalanceSweeper;

pub fn init_logging(level: &str) {
    let level = if level == "warning" { "warn" } else { level };
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Signal handling: first SIGINT/SIGTERM starts a graceful shutdown, a
/// second SIGINT forces immediate exit.
fn spawn_signal_handler(state: SharedState) {
    tokio::spawn(async move {
        let mut sigint = match signal::unix::signal(signal::unix::SignalKind::interrupt()) {
            Ok(sig) => sig,
            Err(e) => {
                error!("Failed to install SIGINT handler: {}. Graceful shutdown disabled.", e);
                return;
            }
        };
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}. Graceful shutdown disabled.", e);
                return;
            }
        };

        tokio::select! {
            _ = sigint.recv() => {
                warn!("⚠️ Received SIGINT, initiating graceful shutdown (Ctrl-C again to force)");
                state.set_shutdown();
                tokio::spawn(async move {
                    if let Ok(mut sigint2) = signal::unix::signal(signal::unix::SignalKind::interrupt()) {
                        sigint2.recv().await;
                        eprintln!("🛑 Second SIGINT received, forcing immediate shutdown");
                        error!("🛑 Second SIGINT received, forcing immediate shutdown");
                        std::process::exit(EXIT_FORCED);
                    }
                });
            }
            _ = sigterm.recv() => {
                warn!("⚠️ Received SIGTERM, initiating graceful shutdown");
                state.set_shutdown();
            }
        }
    });
}

async fn serve_health(port: u16, state: SharedState) -> anyhow::Result<()> {
    let app = Router::new().route("/health", get(|| async { "Running" }));
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("❤️ Healthcheck endpoint on port {}", port);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { state.cancelled().await })
        .await?;
    Ok(())
}

/// Boot the daemon and run it until a termination signal.
///
/// Boot order: store → detail registry sync → provider runtimes (chain and
/// indexer consulted for validation) → listeners, reconciler, and sweeper.
/// Runtime state settles before any listener accepts a request.
pub async fn run_daemon(config: DaemonConfig, backend: Arc<dyn ServiceBackend>) -> Result<i32> {
    info!("🚀 Starting harbor provider daemon");
    info!("🔗 RPC host: {}", config.rpc_host);
    info!("🔎 Indexer: {}", config.indexer_endpoint);

    let store = Store::connect(&config.database_url).await?;
    let registry = Arc::new(DetailRegistry::sync_from_disk(store.clone(), DETAILS_DIR).await?);
    let indexer = IndexerClient::new(&config.indexer_endpoint)?;

    let state = SharedState::new();
    spawn_signal_handler(state.clone());

    // One pipe per operator identity, shared across sibling providers.
    let mut pipes: HashMap<Address, (Arc<Pipe>, u16)> = HashMap::new();
    let mut runtimes: Vec<Arc<ProviderRuntime>> = Vec::new();

    for provider_config in &config.providers {
        let operator = provider_config.operator_key.address();
        let pipe = match pipes.get(&operator) {
            Some((pipe, _)) => pipe.clone(),
            None => {
                let pipe = Arc::new(Pipe::new(operator));
                register_operator_routes(
                    &pipe,
                    Arc::new(OperatorContext {
                        store: store.clone(),
                        registry: registry.clone(),
                        data_dir: DATA_DIR.into(),
                    }),
                );
                pipes.insert(
                    operator,
                    (pipe.clone(), provider_config.operator_pipe_port),
                );
                pipe
            }
        };

        let chain: Arc<dyn ChainClient> = Arc::new(EvmChainClient::new(
            &config.rpc_host,
            provider_config.billing_key.clone(),
            config.registry_address,
        )?);

        match ProviderRuntime::initialize(
            provider_config,
            store.clone(),
            chain,
            indexer.clone(),
            registry.clone(),
            backend.clone(),
            pipe,
        )
        .await
        {
            Ok(runtime) => {
                runtime.register_service_routes();
                if runtime.is_gateway {
                    register_gateway_routes(runtime.clone());
                }
                runtimes.push(runtime);
            }
            Err(e) => {
                error!(
                    "Provider {} failed startup validation and is unusable: {}",
                    provider_config.tag, e
                );
            }
        }
    }

    if runtimes.is_empty() {
        return Err(DaemonError::Config(
            "no provider passed startup validation".to_string(),
        ));
    }

    // Runtime state is settled; start accepting traffic.
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    let health_state = state.clone();
    let health_port = config.port;
    tasks.push(tokio::spawn(async move {
        if let Err(e) = serve_health(health_port, health_state).await {
            error!("Healthcheck server error: {}", e);
        }
    }));

    for (operator, (pipe, port)) in &pipes {
        let http_pipe = pipe.clone();
        let http_state = state.clone();
        let http_config = HttpPipeConfig {
            port: *port,
            rate_limit: config.rate_limit,
            rate_limit_window: config.rate_limit_window,
        };
        tasks.push(tokio::spawn(async move {
            if let Err(e) = serve_http(http_pipe, http_config, async move {
                http_state.cancelled().await;
            })
            .await
            {
                error!("Operator pipe error: {}", e);
            }
        }));

        match &config.nats_url {
            Some(nats_url) => {
                let nats_pipe = pipe.clone();
                let nats_state = state.clone();
                let nats_url = nats_url.clone();
                tasks.push(tokio::spawn(async move {
                    if let Err(e) = serve_nats(nats_pipe, &nats_url, async move {
                        nats_state.cancelled().await;
                    })
                    .await
                    {
                        error!("Signed-messaging listener error: {}", e);
                    }
                }));
            }
            None => {
                info!(
                    "NATS_URL not set, operator {:#x} serves HTTP only",
                    operator
                );
            }
        }
    }

    let sweeper = BalanceSweeper::new(
        state.clone(),
        runtimes.clone(),
        config.balance_check_interval,
    );
    tasks.push(tokio::spawn(async move { sweeper.run().await }));

    let reconciler = Reconciler::new(
        state.clone(),
        store.clone(),
        indexer.clone(),
        runtimes.clone(),
        config.block_process_range,
        config.agreement_check_interval,
    );
    tasks.push(tokio::spawn(reconciler.run()));

    info!("✅ Daemon initialized, {} provider(s) running", runtimes.len());

    state.cancelled().await;

    info!("🔄 Shutting down: waiting for watchers and background loops...");
    state.join_watchers().await;
    for task in tasks {
        let _ = task.await;
    }
    info!("✅ Graceful shutdown complete");
    Ok(EXIT_TERMINATED)
}
