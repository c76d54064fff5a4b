//! Wire types for the smart-switch LAN ("zeroconf" / DIY mode) protocol.
//!
//! Every request is a JSON `POST` to `http://<ip>:8081/zeroconf/<verb>` and
//! must echo the device's own `deviceid`; an empty id is accepted for the
//! initial info query.

use serde::{Deserialize, Serialize};

/// Fixed local control port of the device.
pub const ZEROCONF_PORT: u16 = 8081;

/// Info query endpoint.
pub const INFO_PATH: &str = "/zeroconf/info";

/// Switch command endpoint.
pub const SWITCH_PATH: &str = "/zeroconf/switch";

/// Requested relay position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchPosition {
    On,
    Off,
}

impl SwitchPosition {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwitchPosition::On => "on",
            SwitchPosition::Off => "off",
        }
    }
}

impl From<bool> for SwitchPosition {
    fn from(on: bool) -> Self {
        if on {
            SwitchPosition::On
        } else {
            SwitchPosition::Off
        }
    }
}

/// `data` member of a request. Serializes to `{}` for info queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub switch: Option<SwitchPosition>,
}

/// Request body shared by both endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZeroconfRequest {
    pub deviceid: String,
    pub data: CommandData,
}

impl ZeroconfRequest {
    /// Info query; pass an empty id during discovery.
    pub fn info(deviceid: impl Into<String>) -> Self {
        Self {
            deviceid: deviceid.into(),
            data: CommandData::default(),
        }
    }

    pub fn switch(deviceid: impl Into<String>, position: SwitchPosition) -> Self {
        Self {
            deviceid: deviceid.into(),
            data: CommandData {
                switch: Some(position),
            },
        }
    }
}

/// Response to `/zeroconf/info`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InfoResponse {
    #[serde(default)]
    pub seq: i64,
    #[serde(default)]
    pub error: i64,
    #[serde(default)]
    pub data: DeviceInfo,
}

/// Device state block. Only `switch` and `deviceid` are used by the agent;
/// the rest is kept for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(default)]
    pub switch: String,
    #[serde(default)]
    pub startup: String,
    #[serde(default)]
    pub pulse: String,
    #[serde(default, rename = "pulseWidth")]
    pub pulse_width: i64,
    #[serde(default)]
    pub ssid: String,
    #[serde(default, rename = "otaUnlock")]
    pub ota_unlock: bool,
    #[serde(default, rename = "fwVersion")]
    pub fw_version: String,
    #[serde(default)]
    pub deviceid: String,
    #[serde(default)]
    pub bssid: String,
    #[serde(default, rename = "signalStrength", alias = "signalstrength")]
    pub signal_strength: i64,
}

impl DeviceInfo {
    pub fn is_on(&self) -> bool {
        self.switch == "on"
    }
}
