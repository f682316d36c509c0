pub mod classify;
pub mod engine;
pub mod sync;

pub use classify::Classifier;
pub use engine::Engine;
pub use sync::Synchronizer;

/// Errors crossing the sync/classify/engine boundary.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Source(#[from] doorman_source::SourceError),
    #[error(transparent)]
    Store(#[from] doorman_store::StoreError),
    /// The classified view failed to serialize. This is an invariant
    /// violation, not an external fault, and terminates the engine.
    #[error("cannot serialize classified view: {0}")]
    Serialize(#[from] serde_json::Error),
}
