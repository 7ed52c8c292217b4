//! Adapter state management
//! This module defines the observable state of the adapter, published by the
//! dispatcher after every transition.

use serde::Serialize;

/// Connection slot of the adapter. At most one peripheral is ever active.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting { uuid: String },
    Connected { uuid: String },
}

impl ConnectionStatus {
    /// Identifier of the active peripheral, if connected
    pub fn connected_uuid(&self) -> Option<&str> {
        match self {
            Self::Connected { uuid } => Some(uuid),
            _ => None,
        }
    }
}

/// Snapshot of the adapter
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct AdapterStatus {
    pub connection: ConnectionStatus,
    /// Size of the live discovered set
    pub discovered: usize,
    pub destroyed: bool,
}
