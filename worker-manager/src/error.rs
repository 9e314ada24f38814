//! Error types for the worker manager

use crate::worker::WorkerClass;
use unsafe_linux_process::UnsafeLinuxError;

/// Main error type for manager operations
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("Invalid manager configuration: {details}")]
    InvalidConfig { details: String },

    #[error("Manager failed to start: {reason}")]
    StartupFailed { reason: String },

    #[error("Failed to spawn {class} worker #{id}: {source}")]
    SpawnFailed {
        class: WorkerClass,
        id: u32,
        #[source]
        source: UnsafeLinuxError,
    },

    #[error("Restart channel failed: {details}")]
    ChannelFailed { details: String },
}

/// Errors raised by the process-shared restart-request channel
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Restart channel is full")]
    Full,

    #[error("Failed to notify the manager: {details}")]
    NotifyFailed { details: String },
}
