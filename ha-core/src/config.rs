//! Agent Settings
//!
//! Persistent settings stored as JSON in `settings.json` next to the
//! executable. A missing file is replaced by a template and the operator is
//! asked to edit it.

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use ha_protocol::validate_serial;

use crate::constants::{defaults, onewire, paths};
use crate::error::{AgentError, Result};
use crate::hw::board;

/// Full agent configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub bridge: BridgeSettings,

    #[serde(default)]
    pub gpio: GpioSettings,

    #[serde(default)]
    pub relays: RelaySettings,

    #[serde(default)]
    pub dht: DhtSettings,

    #[serde(default)]
    pub onewire: OneWireSettings,

    #[serde(default)]
    pub smart_switches: SmartSwitchSettings,

    /// Developer debug logging
    #[serde(default)]
    pub debug: bool,
}

/// Identity advertised by the accessory bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSettings {
    #[serde(default = "default_bridge_name")]
    pub name: String,

    #[serde(default = "default_bridge_model")]
    pub model: String,

    /// Unix socket the bridge adapter listens on
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpioSettings {
    #[serde(default = "default_gpio_root")]
    pub sysfs_root: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelaySettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub devices: Vec<RelayDevice>,
}

/// Relay flavour; decides how the accessory is presented and how "on" maps to the pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "RawRelayKind")]
pub enum RelayKind {
    Lamp,
    Switch,
    Cooler,
}

/// Accepts both the names and the legacy numeric codes (0 lamp, 1 switch, 2 cooler)
#[derive(Deserialize)]
#[serde(untagged)]
enum RawRelayKind {
    Code(u8),
    Name(String),
}

impl TryFrom<RawRelayKind> for RelayKind {
    type Error = String;

    fn try_from(raw: RawRelayKind) -> std::result::Result<Self, Self::Error> {
        match raw {
            RawRelayKind::Code(0) => Ok(RelayKind::Lamp),
            RawRelayKind::Code(1) => Ok(RelayKind::Switch),
            RawRelayKind::Code(2) => Ok(RelayKind::Cooler),
            RawRelayKind::Code(n) => Err(format!("unknown relay kind code {}", n)),
            RawRelayKind::Name(name) => match name.to_ascii_lowercase().as_str() {
                "lamp" => Ok(RelayKind::Lamp),
                "switch" => Ok(RelayKind::Switch),
                "cooler" => Ok(RelayKind::Cooler),
                other => Err(format!("unknown relay kind '{}'", other)),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayDevice {
    pub id: u32,
    pub kind: RelayKind,
    pub name: String,

    /// Physical header pin
    pub pin: u8,

    /// Only meaningful for coolers: "on" releases the relay
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub invert: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DhtSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_dht_name")]
    pub name: String,

    #[serde(default = "default_dht_pin")]
    pub pin: u8,

    #[serde(default = "default_dht_vcc_pin")]
    pub vcc_pin: u8,

    #[serde(default = "default_true")]
    pub auto_recovery: bool,

    #[serde(default = "default_interval")]
    pub update_interval_secs: u64,

    #[serde(default = "default_iio_root")]
    pub iio_root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneWireSettings {
    #[serde(default)]
    pub enabled: bool,

    /// Bus id to display name
    #[serde(default)]
    pub sensors: BTreeMap<String, String>,

    #[serde(default = "default_onewire_vcc_pin")]
    pub vcc_pin: u8,

    #[serde(default = "default_true")]
    pub auto_recovery: bool,

    #[serde(default = "default_interval")]
    pub update_interval_secs: u64,

    #[serde(default = "default_w1_root")]
    pub bus_root: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SmartSwitchSettings {
    #[serde(default)]
    pub enabled: bool,

    /// LAN IP to display name
    #[serde(default)]
    pub devices: BTreeMap<String, String>,
}

// Default value functions
fn default_bridge_name() -> String { defaults::BRIDGE_NAME.to_string() }
fn default_bridge_model() -> String { defaults::BRIDGE_MODEL.to_string() }
fn default_socket_path() -> PathBuf { PathBuf::from(paths::SOCKET_PATH) }
fn default_gpio_root() -> PathBuf { PathBuf::from(paths::GPIO_SYSFS_ROOT) }
fn default_iio_root() -> PathBuf { PathBuf::from(paths::IIO_DEVICES_ROOT) }
fn default_w1_root() -> PathBuf { PathBuf::from(paths::W1_BUS_ROOT) }
fn default_dht_name() -> String { defaults::DHT_NAME.to_string() }
fn default_dht_pin() -> u8 { defaults::DHT_PIN }
fn default_dht_vcc_pin() -> u8 { defaults::DHT_VCC_PIN }
fn default_onewire_vcc_pin() -> u8 { defaults::ONEWIRE_VCC_PIN }
fn default_interval() -> u64 { defaults::UPDATE_INTERVAL_SECS }
fn default_true() -> bool { true }

/// Older configurations wrote `invert` as 0/1
fn deserialize_flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Int(n) => n > 0,
    })
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            name: default_bridge_name(),
            model: default_bridge_model(),
            socket_path: default_socket_path(),
        }
    }
}

impl Default for GpioSettings {
    fn default() -> Self {
        Self { sysfs_root: default_gpio_root() }
    }
}

impl Default for DhtSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            name: default_dht_name(),
            pin: default_dht_pin(),
            vcc_pin: default_dht_vcc_pin(),
            auto_recovery: true,
            update_interval_secs: default_interval(),
            iio_root: default_iio_root(),
        }
    }
}

impl Default for OneWireSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            sensors: BTreeMap::new(),
            vcc_pin: default_onewire_vcc_pin(),
            auto_recovery: true,
            update_interval_secs: default_interval(),
            bus_root: default_w1_root(),
        }
    }
}

impl DhtSettings {
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }
}

impl OneWireSettings {
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }
}

impl Settings {
    /// First-run document: every subsystem off, one example entry each
    pub fn template() -> Self {
        let mut settings = Self::default();
        settings.relays.devices.push(RelayDevice {
            id: 1,
            kind: RelayKind::Lamp,
            name: "Lamp".to_string(),
            pin: 5,
            invert: false,
        });
        settings
            .onewire
            .sensors
            .insert("28-000000000000".to_string(), "Outside".to_string());
        settings
            .smart_switches
            .devices
            .insert("192.168.1.50".to_string(), "Heater".to_string());
        settings
    }

    pub fn relay_by_id(&self, id: u32) -> Option<&RelayDevice> {
        self.relays.devices.iter().find(|r| r.id == id)
    }

    pub fn relay_by_pin(&self, pin: u8) -> Option<&RelayDevice> {
        self.relays.devices.iter().find(|r| r.pin == pin)
    }

    /// Reject configurations the agent cannot run. Disabled subsystems are not checked.
    pub fn validate(&self) -> Result<()> {
        if self.relays.enabled {
            let mut ids = HashSet::new();
            for relay in &self.relays.devices {
                if !ids.insert(relay.id) {
                    return Err(AgentError::invalid_config(
                        "relays.devices",
                        format!("duplicate relay id {}", relay.id),
                    ));
                }
                check_pin(&format!("relays.devices[{}].pin", relay.id), relay.pin)?;
            }
        }

        if self.dht.enabled {
            check_pin("dht.pin", self.dht.pin)?;
            check_pin("dht.vcc_pin", self.dht.vcc_pin)?;
            check_interval("dht.update_interval_secs", self.dht.update_interval_secs)?;
        }

        if self.onewire.enabled {
            let pattern = Regex::new(onewire::ID_PATTERN)
                .map_err(|e| AgentError::config(format!("bad one-wire id pattern: {}", e)))?;
            for id in self.onewire.sensors.keys() {
                if !pattern.is_match(id) {
                    return Err(AgentError::invalid_config(
                        "onewire.sensors",
                        format!("'{}' is not a one-wire bus id", id),
                    ));
                }
            }
            check_pin("onewire.vcc_pin", self.onewire.vcc_pin)?;
            check_interval("onewire.update_interval_secs", self.onewire.update_interval_secs)?;
        }

        if self.smart_switches.enabled {
            // Keys double as accessory serials, so they must be addressable over IPC
            for ip in self.smart_switches.devices.keys() {
                validate_serial(ip).map_err(|reason| {
                    AgentError::invalid_config("smart_switches.devices", format!("'{}': {}", ip, reason))
                })?;
            }
        }

        Ok(())
    }
}

fn check_pin(field: &str, pin: u8) -> Result<()> {
    if board::is_gpio_pin(pin) {
        Ok(())
    } else {
        Err(AgentError::invalid_config(field, format!("pin {} is not a GPIO line", pin)))
    }
}

fn check_interval(field: &str, secs: u64) -> Result<()> {
    if secs == 0 {
        Err(AgentError::invalid_config(field, "interval must be greater than zero"))
    } else {
        Ok(())
    }
}

/// Result of [`load_settings`]
#[derive(Debug)]
pub enum LoadOutcome {
    Loaded(Settings),
    /// No file existed; a template was written here
    CreatedTemplate(PathBuf),
}

/// `settings.json` in the directory holding the running executable
pub fn default_settings_path() -> Result<PathBuf> {
    let exe = std::env::current_exe()?;
    let dir = exe
        .parent()
        .ok_or_else(|| AgentError::config("Could not determine program directory"))?;
    debug!("Program is running from: {}", dir.display());
    Ok(dir.join(paths::SETTINGS_FILE))
}

/// Load settings from `path`, writing a template if the file does not exist
pub fn load_settings(path: &Path) -> Result<LoadOutcome> {
    if !path.exists() {
        info!("Configuration file {} not found, creating a template", path.display());
        save_settings(path, &Settings::template())?;
        return Ok(LoadOutcome::CreatedTemplate(path.to_path_buf()));
    }

    let content = fs::read_to_string(path).map_err(|source| AgentError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;

    let settings: Settings = serde_json::from_str(&content)
        .map_err(|e| AgentError::config(format!("Failed to parse {}: {}", path.display(), e)))?;

    debug!("Settings loaded from {}", path.display());
    Ok(LoadOutcome::Loaded(settings))
}

/// Save settings to JSON file.
/// Uses atomic write (temp file + rename) to prevent corruption on crash
pub fn save_settings(path: &Path, settings: &Settings) -> Result<()> {
    let json = serde_json::to_string_pretty(settings)?;

    let temp_path = path.with_extension("json.tmp");
    fs::write(&temp_path, json).map_err(|source| AgentError::FileWrite {
        path: temp_path.clone(),
        source,
    })?;

    fs::rename(&temp_path, path).map_err(|source| AgentError::FileWrite {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_creates_template() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("settings.json");

        match load_settings(&path).unwrap() {
            LoadOutcome::CreatedTemplate(p) => assert_eq!(p, path),
            other => panic!("expected template, got {:?}", other),
        }
        assert!(path.exists());
        assert!(!tmp.path().join("settings.json.tmp").exists());

        // The template loads back and passes validation
        let LoadOutcome::Loaded(settings) = load_settings(&path).unwrap() else {
            panic!("template did not load");
        };
        assert_eq!(settings.relays.devices.len(), 1);
        assert!(!settings.relays.enabled);
        settings.validate().unwrap();
    }

    #[test]
    fn test_partial_document_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("settings.json");
        fs::write(&path, r#"{"dht": {"enabled": true}}"#).unwrap();

        let LoadOutcome::Loaded(settings) = load_settings(&path).unwrap() else {
            panic!("expected loaded settings");
        };
        assert!(settings.dht.enabled);
        assert_eq!(settings.dht.pin, 7);
        assert_eq!(settings.dht.vcc_pin, 13);
        assert!(settings.dht.auto_recovery);
        assert_eq!(settings.dht.update_interval(), Duration::from_secs(60));
        assert_eq!(settings.onewire.vcc_pin, 11);
        assert_eq!(settings.bridge.name, "IOT Home Agent");
    }

    #[test]
    fn test_relay_kind_names_and_legacy_codes() {
        let json = r#"{"relays": {"enabled": true, "devices": [
            {"id": 1, "kind": "lamp", "name": "Lamp", "pin": 5},
            {"id": 2, "kind": 1, "name": "Pump", "pin": 12},
            {"id": 3, "kind": "Cooler", "name": "Fan", "pin": 16, "invert": 1}
        ]}}"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        let kinds: Vec<RelayKind> = settings.relays.devices.iter().map(|d| d.kind).collect();
        assert_eq!(kinds, vec![RelayKind::Lamp, RelayKind::Switch, RelayKind::Cooler]);
        assert!(settings.relay_by_id(3).unwrap().invert);
        assert_eq!(settings.relay_by_pin(12).unwrap().name, "Pump");

        assert!(serde_json::from_str::<RelayKind>("7").is_err());
        assert!(serde_json::from_str::<RelayKind>("\"heater\"").is_err());
        assert_eq!(serde_json::to_string(&RelayKind::Cooler).unwrap(), "\"cooler\"");
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("settings.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(load_settings(&path), Err(AgentError::Config(_))));
    }

    #[test]
    fn test_validate_duplicate_relay_ids() {
        let mut settings = Settings::template();
        settings.relays.enabled = true;
        let mut dup = settings.relays.devices[0].clone();
        dup.pin = 12;
        settings.relays.devices.push(dup);
        assert!(matches!(settings.validate(), Err(AgentError::InvalidConfig { .. })));
    }

    #[test]
    fn test_validate_pins_and_intervals() {
        let mut settings = Settings::default();
        settings.relays.enabled = true;
        settings.relays.devices.push(RelayDevice {
            id: 1,
            kind: RelayKind::Lamp,
            name: "Ground".into(),
            pin: 6,
            invert: false,
        });
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.dht.enabled = true;
        settings.dht.update_interval_secs = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_onewire_ids() {
        let mut settings = Settings::default();
        settings.onewire.enabled = true;
        settings.onewire.sensors.insert("28-0316a2795aff".into(), "Outside".into());
        settings.validate().unwrap();

        settings.onewire.sensors.insert("../../etc".into(), "Bad".into());
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_switch_addresses() {
        let mut settings = Settings::default();
        settings.smart_switches.enabled = true;
        settings.smart_switches.devices.insert("192.168.1.50".into(), "Heater".into());
        settings.validate().unwrap();

        settings.smart_switches.devices.insert("fe80::1".into(), "Lamp plug".into());
        settings.validate().unwrap();

        for bad in ["10.0.0.1/zeroconf", "plug_1.lan", " ", ""] {
            let mut settings = settings.clone();
            settings.smart_switches.devices.insert(bad.into(), "Bad".into());
            assert!(settings.validate().is_err(), "{:?} accepted", bad);
        }
    }

    #[test]
    fn test_save_roundtrip_preserves_devices() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("settings.json");
        let mut settings = Settings::template();
        settings.debug = true;
        save_settings(&path, &settings).unwrap();

        let LoadOutcome::Loaded(loaded) = load_settings(&path).unwrap() else {
            panic!("expected loaded settings");
        };
        assert!(loaded.debug);
        assert_eq!(loaded.relays.devices, settings.relays.devices);
        assert_eq!(loaded.smart_switches.devices, settings.smart_switches.devices);
    }
}
