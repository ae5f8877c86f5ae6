//! Error types for the processor.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProcessorError>;

#[derive(Debug, Error)]
pub enum ProcessorError {
    /// `run()` was called while another `run()` is still in progress.
    #[error("the processor is already running; concurrent calls to run() are not allowed")]
    AlreadyRunning,

    /// `run()` was called on a processor that has already run and stopped.
    /// A stopped processor is permanently dead - create a new instance to
    /// resume processing.
    #[error("the processor has been stopped; create a new instance to resume processing")]
    Stopped,

    /// The caller used a partition client after closing it.
    #[error("partition client for partition {0} is closed")]
    ClientClosed(String),

    /// Unknown load-balancing strategy name.
    #[error("unknown load balancing strategy: {0:?}")]
    UnknownStrategy(String),

    /// Invalid construction-time configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Coordination store failure. Fatal for the current run: an outage of
    /// the coordination layer cannot be worked around locally.
    #[error("checkpoint store error: {0}")]
    Store(#[from] conveyor_checkpoints::StoreError),

    /// Transport failure, including the distinguished ownership-lost
    /// condition (see [`ProcessorError::is_ownership_lost`]).
    #[error(transparent)]
    Transport(#[from] conveyor_core::Error),
}

impl ProcessorError {
    /// Whether this error means the partition's ownership was lost to
    /// another consumer. The partition client that returned it is dead;
    /// the processor itself keeps running.
    pub fn is_ownership_lost(&self) -> bool {
        matches!(self, ProcessorError::Transport(e) if e.is_ownership_lost())
    }
}
