//! LAN smart-switch client (Sonoff "DIY mode" zeroconf API)
//!
//! Every command first asks the device for its `deviceid`, then issues the
//! real request. Failures collapse to `false` / `""` at this boundary; the
//! `try_*` variants keep the error for callers that want it.

use reqwest::Client;
use tracing::{debug, warn};

use ha_protocol::zeroconf::{InfoResponse, SwitchPosition, ZeroconfRequest, INFO_PATH, SWITCH_PATH, ZEROCONF_PORT};

use crate::error::{AgentError, Result};

#[derive(Debug, Clone)]
pub struct SmartSwitchClient {
    http: Client,
    port: u16,
}

impl Default for SmartSwitchClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SmartSwitchClient {
    pub fn new() -> Self {
        Self::with_port(ZEROCONF_PORT)
    }

    pub fn with_port(port: u16) -> Self {
        Self {
            http: Client::new(),
            port,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn url(&self, ip: &str, path: &str) -> String {
        if ip.contains(':') {
            format!("http://[{}]:{}{}", ip, self.port, path)
        } else {
            format!("http://{}:{}{}", ip, self.port, path)
        }
    }

    async fn post(&self, ip: &str, path: &str, body: &ZeroconfRequest) -> Result<reqwest::Response> {
        self.http
            .post(self.url(ip, path))
            .json(body)
            .send()
            .await
            .map_err(|e| AgentError::http(ip, e))
    }

    async fn post_info(&self, ip: &str, deviceid: &str) -> Result<InfoResponse> {
        let resp = self.post(ip, INFO_PATH, &ZeroconfRequest::info(deviceid)).await?;
        let body = resp.bytes().await.map_err(|e| AgentError::BadResponse {
            host: ip.to_string(),
            reason: e.to_string(),
        })?;
        serde_json::from_slice(&body).map_err(|e| AgentError::BadResponse {
            host: ip.to_string(),
            reason: format!("undecodable info response: {}", e),
        })
    }

    /// Query the device id, keeping the failure reason
    pub async fn try_fetch_identity(&self, ip: &str) -> Result<String> {
        let info = self.post_info(ip, "").await?;
        Ok(info.data.deviceid)
    }

    /// Device id, or `""` on any failure
    pub async fn fetch_identity(&self, ip: &str) -> String {
        match self.try_fetch_identity(ip).await {
            Ok(id) => id,
            Err(e) => {
                debug!("Identity query for {} failed: {}", ip, e);
                String::new()
            }
        }
    }

    /// Id to address a command with. A device that answered with garbage still
    /// gets the command with an empty id; one that did not answer gets nothing.
    async fn command_identity(&self, ip: &str) -> Option<String> {
        match self.try_fetch_identity(ip).await {
            Ok(id) => Some(id),
            Err(e) if e.is_transport() => {
                warn!("Smart switch {} unreachable: {}", ip, e);
                None
            }
            Err(e) => {
                warn!("Problems decoding smart switch {} info: {}", ip, e);
                Some(String::new())
            }
        }
    }

    /// Switch the relay. `true` iff the switch request got any HTTP response.
    pub async fn set_state(&self, ip: &str, on: bool) -> bool {
        let Some(deviceid) = self.command_identity(ip).await else {
            return false;
        };
        let request = ZeroconfRequest::switch(deviceid, SwitchPosition::from(on));
        match self.post(ip, SWITCH_PATH, &request).await {
            Ok(_) => {
                debug!("Smart switch {} set {}", ip, SwitchPosition::from(on).as_str());
                true
            }
            Err(e) => {
                warn!("Failed to switch {} {}: {}", ip, SwitchPosition::from(on).as_str(), e);
                false
            }
        }
    }

    /// Current relay state; `false` on any failure
    pub async fn get_state(&self, ip: &str) -> bool {
        match self.try_get_state(ip).await {
            Ok(on) => on,
            Err(e) => {
                debug!("State query for {} failed: {}", ip, e);
                false
            }
        }
    }

    pub async fn try_get_state(&self, ip: &str) -> Result<bool> {
        let deviceid = self
            .command_identity(ip)
            .await
            .ok_or_else(|| AgentError::http(ip, "identity query failed"))?;
        let info = self.post_info(ip, &deviceid).await?;
        Ok(info.data.is_on())
    }
}
