//! Shared wire types for homeagent.
//!
//! - [`zeroconf`]: JSON bodies spoken to LAN smart switches.
//! - The crate root: newline-delimited JSON IPC between the daemon's
//!   bridge adapter socket and its clients.

use serde::{Deserialize, Serialize};

pub mod zeroconf;

/// Maximum message size for IPC (4KB)
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024;

/// Maximum accessory serial length accepted over IPC
const MAX_SERIAL_LENGTH: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Unique request ID for correlation and debugging
    pub id: u64,
    #[serde(flatten)]
    pub request: Request,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "data")]
pub enum Request {
    Ping,
    Version,
    ListAccessories,
    GetAccessory { serial: String },
    /// Remote on/off command; `serial` is a relay pin or a smart-switch IP.
    SetOn { serial: String, on: bool },
}

impl Request {
    /// Validate request parameters before dispatch
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Request::Ping | Request::Version | Request::ListAccessories => Ok(()),
            Request::GetAccessory { serial } => validate_serial(serial),
            Request::SetOn { serial, .. } => validate_serial(serial),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Request::Ping => "Ping",
            Request::Version => "Version",
            Request::ListAccessories => "ListAccessories",
            Request::GetAccessory { .. } => "GetAccessory",
            Request::SetOn { .. } => "SetOn",
        }
    }
}

/// Serial numbers are pin numbers or IPv4/IPv6 literals, nothing else.
pub fn validate_serial(serial: &str) -> Result<(), String> {
    if serial.is_empty() {
        return Err("Serial must not be empty".into());
    }
    if serial.len() > MAX_SERIAL_LENGTH {
        return Err(format!("Serial too long (max {} chars)", MAX_SERIAL_LENGTH));
    }
    if !serial
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == ':' || c == '-')
    {
        return Err("Serial contains invalid characters".into());
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Request ID this response corresponds to
    pub id: u64,
    #[serde(flatten)]
    pub response: Response,
}

impl ResponseEnvelope {
    pub fn new(id: u64, response: Response) -> Self {
        Self { id, response }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum Response {
    #[serde(rename = "ok")]
    Ok(ResponseData),
    #[serde(rename = "error")]
    Error { message: String },
}

impl Response {
    pub fn ok(data: ResponseData) -> Self {
        Response::Ok(data)
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Response::Error {
            message: msg.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accessories: Option<Vec<AccessoryInfo>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accessory: Option<AccessoryInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
}

impl ResponseData {
    pub fn string(v: impl Into<String>) -> Self { Self { value: Some(v.into()), ..Self::default() } }
    pub fn list(a: Vec<AccessoryInfo>) -> Self { Self { accessories: Some(a), ..Self::default() } }
    pub fn single(a: AccessoryInfo) -> Self { Self { accessory: Some(a), ..Self::default() } }
    pub fn outcome(o: impl Into<String>) -> Self { Self { outcome: Some(o.into()), ..Self::default() } }
}

/// Externally visible snapshot of one accessory and its current values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessoryInfo {
    pub name: String,
    pub serial: String,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
}
