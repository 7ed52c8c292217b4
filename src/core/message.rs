//! Message model
//! Inbound messages name any of the four operations by field; they are
//! turned into an explicit, ordered batch of [`Operation`]s before reaching
//! the dispatcher. Each executed operation produces one [`Response`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::bluetooth::types::PeripheralInfo;
use crate::core::error::AdapterError;

/// Either a single UUID or a list of UUIDs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UuidFilter {
    One(String),
    Many(Vec<String>),
}

impl UuidFilter {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(uuid) => vec![uuid],
            Self::Many(uuids) => uuids,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    #[serde(default)]
    pub service_uuids: Option<UuidFilter>,
    /// Scan window in milliseconds
    #[serde(default)]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    /// Identifier of the peripheral to connect to
    pub uuid: String,
    pub service_uuid: String,
    /// Window for the scan run when nothing has been discovered yet
    #[serde(default)]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadRequest {
    pub characteristic_uuid: String,
    pub service_uuid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteRequest {
    pub characteristic_uuid: String,
    pub service_uuid: String,
    pub value: Vec<u8>,
    /// Overrides the configured write mode for this write
    #[serde(default)]
    pub without_response: Option<bool>,
}

/// Wire form of a message. Every field is optional and independent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan: Option<ScanRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect: Option<ConnectRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<ReadRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write: Option<WriteRequest>,
}

impl OperationRequest {
    pub fn from_json(raw: &str) -> Result<Self, AdapterError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// The requested operations in execution order: scan, connect, read, write.
    pub fn into_operations(self) -> Vec<Operation> {
        let mut operations = Vec::with_capacity(4);
        if let Some(scan) = self.scan {
            operations.push(Operation::Scan(scan));
        }
        if let Some(connect) = self.connect {
            operations.push(Operation::Connect(connect));
        }
        if let Some(read) = self.read {
            operations.push(Operation::Read(read));
        }
        if let Some(write) = self.write {
            operations.push(Operation::Write(write));
        }
        operations
    }
}

/// Message as delivered by the host framework
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostMessage {
    #[serde(default)]
    pub payload: Option<OperationRequest>,
}

impl HostMessage {
    /// Accepts both the enveloped `{"payload": {...}}` form and a bare request.
    pub fn from_json(raw: &str) -> Result<OperationRequest, AdapterError> {
        let value: Value = serde_json::from_str(raw)?;
        if value.get("payload").is_some() {
            let message: HostMessage = serde_json::from_value(value)?;
            Ok(message.payload.unwrap_or_default())
        } else {
            Ok(serde_json::from_value(value)?)
        }
    }
}

/// One adapter operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Scan(ScanRequest),
    Connect(ConnectRequest),
    Read(ReadRequest),
    Write(WriteRequest),
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Scan(_) => OperationKind::Scan,
            Self::Connect(_) => OperationKind::Connect,
            Self::Read(_) => OperationKind::Read,
            Self::Write(_) => OperationKind::Write,
        }
    }

    pub fn scan(service_uuids: &[&str], timeout: Duration) -> Self {
        Self::Scan(ScanRequest {
            service_uuids: Some(UuidFilter::Many(service_uuids.iter().map(|s| s.to_string()).collect())),
            timeout: Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)),
        })
    }

    pub fn connect(uuid: &str, service_uuid: &str) -> Self {
        Self::Connect(ConnectRequest {
            uuid: uuid.to_string(),
            service_uuid: service_uuid.to_string(),
            timeout: None,
        })
    }

    pub fn read(service_uuid: &str, characteristic_uuid: &str) -> Self {
        Self::Read(ReadRequest {
            characteristic_uuid: characteristic_uuid.to_string(),
            service_uuid: service_uuid.to_string(),
        })
    }

    pub fn write(service_uuid: &str, characteristic_uuid: &str, value: impl Into<Vec<u8>>) -> Self {
        Self::Write(WriteRequest {
            characteristic_uuid: characteristic_uuid.to_string(),
            service_uuid: service_uuid.to_string(),
            value: value.into(),
            without_response: None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Scan,
    Connect,
    Read,
    Write,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scan => "scan",
            Self::Connect => "connect",
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

/// Success payload of an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutput {
    Scanned(Vec<PeripheralInfo>),
    Connected { uuid: String },
    Read(Vec<u8>),
    Written { characteristic_uuid: String },
}

pub type OperationResult = Result<OperationOutput, AdapterError>;

/// Result of one executed operation
#[derive(Debug)]
pub struct Response {
    pub operation: OperationKind,
    pub result: OperationResult,
}

impl Response {
    pub fn new(operation: OperationKind, result: OperationResult) -> Self {
        Self { operation, result }
    }

    /// The result in its wire shape:
    /// scan → `[{uuid, ...}]`, connect → `{status, uuid}`, read → `[bytes]`,
    /// write → `{status, characteristicUuid}`, failure → `{error}`.
    pub fn payload(&self) -> Value {
        match &self.result {
            Ok(OperationOutput::Scanned(peripherals)) => json!(peripherals),
            Ok(OperationOutput::Connected { uuid }) => json!({ "status": "connected", "uuid": uuid }),
            Ok(OperationOutput::Read(bytes)) => json!(bytes),
            Ok(OperationOutput::Written { characteristic_uuid }) => {
                json!({ "status": "written", "characteristicUuid": characteristic_uuid })
            }
            Err(e) => json!({ "error": e.to_string() }),
        }
    }

    /// `{"operation": ..., "result": ...}`, the per-operation envelope
    pub fn to_json(&self) -> Value {
        json!({ "operation": self.operation, "result": self.payload() })
    }
}
