use thiserror::Error;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("chain error: {0}")]
    Chain(#[from] harbor_chain::ChainError),

    #[error("indexer error: {0}")]
    Indexer(#[from] harbor_indexer::IndexerError),

    #[error("terminated")]
    Terminated,

    #[error("other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, DaemonError>;

/// Marker pushed into error chains when the cancellation token fired.
#[derive(Debug, Error)]
#[error("terminated")]
pub struct Termination;

/// Walk the cause chain looking for a termination marker; loops exit quietly
/// when they find one.
pub fn is_termination(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| cause.downcast_ref::<Termination>().is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn finds_termination_through_context_layers() {
        let err = anyhow::Error::new(Termination)
            .context("watcher stopped")
            .context("reconciler tick");
        assert!(is_termination(&err));

        let plain = anyhow::anyhow!("network down").context("reconciler tick");
        assert!(!is_termination(&plain));
    }
}
