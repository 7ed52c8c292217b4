//! BLE message adapter
//! Exposes Bluetooth Low Energy scan, connect, read and write as
//! request/response operations for a host messaging framework.

// Module declarations
pub mod config;
pub mod core;
pub mod logging;
pub mod state;

pub use crate::config::{AdapterConfig, ConnectPolicy};
pub use crate::core::{
    AdapterError, Dispatcher, DispatcherHandle, Operation, OperationKind, OperationOutput,
    OperationRequest, OperationResult, Response,
};
pub use crate::state::{AdapterStatus, ConnectionStatus};
