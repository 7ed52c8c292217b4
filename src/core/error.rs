//! Error taxonomy for adapter operations.
//!
//! Every operation reports failure through its own result; nothing here is
//! ever raised past the dispatcher.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    /// Read or write attempted without an active peripheral
    #[error("not connected")]
    NotConnected,

    /// The radio refused to start discovery
    #[error("bluetooth radio unavailable: {0}")]
    RadioUnavailable(String),

    #[error("peripheral not found: {0}")]
    PeripheralNotFound(String),

    #[error("service not found: {0}")]
    ServiceNotFound(String),

    #[error("characteristic not found: {0}")]
    CharacteristicNotFound(String),

    /// Connect refused because another peripheral is active
    #[error("already connected to {0}")]
    AlreadyConnected(String),

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("adapter has been destroyed")]
    Shutdown,

    #[error("invalid message: {0}")]
    InvalidMessage(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failure reported by the BLE stack, passed through verbatim
    #[error(transparent)]
    Ble(#[from] anyhow::Error),
}

impl AdapterError {
    pub(crate) fn radio_unavailable(cause: anyhow::Error) -> Self {
        Self::RadioUnavailable(format!("{cause:#}"))
    }
}
