//! Core functionality of the adapter
//! This module contains the radio capability, the scanner, the message
//! model and the dispatcher that sequences operations against the radio.

pub mod bluetooth;
pub mod dispatcher;
pub mod error;
pub mod message;

// Re-export commonly used types
pub use dispatcher::{Dispatcher, DispatcherHandle};
pub use error::AdapterError;
pub use message::{Operation, OperationKind, OperationOutput, OperationRequest, OperationResult, Response};
