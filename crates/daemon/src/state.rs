use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use harbor_indexer::IndexerClient;

struct Inner {
    shutdown: watch::Sender<bool>,
    force_shutdown: AtomicBool,
    indexer_unhealthy_logged: AtomicBool,
    watchers: Mutex<JoinSet<()>>,
}

/// Process-wide cooperative state: the cancellation flag, the resource
/// watcher pool, and the indexer-health log guard.
#[derive(Clone)]
pub struct SharedState {
    inner: Arc<Inner>,
}

impl SharedState {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                shutdown,
                force_shutdown: AtomicBool::new(false),
                indexer_unhealthy_logged: AtomicBool::new(false),
                watchers: Mutex::new(JoinSet::new()),
            }),
        }
    }

    pub fn set_shutdown(&self) {
        self.inner.shutdown.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    pub fn set_force_shutdown(&self) {
        self.inner.force_shutdown.store(true, Ordering::SeqCst);
        self.inner.shutdown.send_replace(true);
    }

    pub fn is_force_shutdown(&self) -> bool {
        self.inner.force_shutdown.load(Ordering::SeqCst)
    }

    /// Resolves once shutdown has been requested.
    pub async fn cancelled(&self) {
        let mut rx = self.inner.shutdown.subscribe();
        let _ = rx.wait_for(|stopping| *stopping).await;
    }

    /// Sleep that wakes early on shutdown. Returns `false` when interrupted.
    pub async fn sleep_cancellable(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.cancelled() => false,
        }
    }

    /// Track a resource watcher so shutdown can wait for it.
    pub async fn spawn_watcher<F>(&self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.inner.watchers.lock().await.spawn(task);
    }

    /// Cleanup barrier: wait for every in-flight watcher to exit.
    pub async fn join_watchers(&self) {
        let mut watchers = self.inner.watchers.lock().await;
        while let Some(result) = watchers.join_next().await {
            if let Err(e) = result {
                if !e.is_cancelled() {
                    warn!("Resource watcher panicked: {}", e);
                }
            }
        }
    }

    pub async fn watcher_count(&self) -> usize {
        self.inner.watchers.lock().await.len()
    }

    /// Record an indexer failure. Probes `is_healthy` and, on the first
    /// unhealthy observation, logs exactly one line. Returns whether a line
    /// was emitted.
    pub async fn note_indexer_failure(&self, indexer: &IndexerClient) -> bool {
        if indexer.is_healthy().await {
            return false;
        }
        let already = self
            .inner
            .indexer_unhealthy_logged
            .swap(true, Ordering::SeqCst);
        if !already {
            error!("⚠️ Indexer is not healthy");
        }
        !already
    }

    /// Record a successful indexer call; emits one recovery line if the
    /// unhealthy flag was set. Returns whether a line was emitted.
    pub fn note_indexer_success(&self) -> bool {
        let was_unhealthy = self
            .inner
            .indexer_unhealthy_logged
            .swap(false, Ordering::SeqCst);
        if was_unhealthy {
            info!("✅ Indexer is healthy");
        }
        was_unhealthy
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}
