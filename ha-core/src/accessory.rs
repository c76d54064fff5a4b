//! Accessory model and the bridge boundary
//!
//! The core never talks to a home-automation protocol directly. It hands
//! [`Accessory`] descriptions to an [`AccessoryBridge`] once at startup and
//! pushes characteristic updates afterwards. [`LocalBridge`] is the
//! in-process implementation the daemon serves over its socket.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::{debug, trace};

use ha_protocol::AccessoryInfo;

use crate::constants::defaults::MANUFACTURER;

/// How the accessory is presented to the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessoryKind {
    Lightbulb,
    Switch,
    Fan,
    /// Temperature only (one-wire probe)
    TemperatureSensor,
    /// Temperature and humidity (DHT22)
    Thermostat,
}

impl AccessoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessoryKind::Lightbulb => "lightbulb",
            AccessoryKind::Switch => "switch",
            AccessoryKind::Fan => "fan",
            AccessoryKind::TemperatureSensor => "temperature_sensor",
            AccessoryKind::Thermostat => "thermostat",
        }
    }

    /// Characteristics an accessory of this kind carries
    pub fn characteristics(&self) -> &'static [Characteristic] {
        match self {
            AccessoryKind::Lightbulb | AccessoryKind::Switch | AccessoryKind::Fan => &[Characteristic::On],
            AccessoryKind::TemperatureSensor => &[Characteristic::CurrentTemperature],
            AccessoryKind::Thermostat => &[
                Characteristic::CurrentTemperature,
                Characteristic::CurrentRelativeHumidity,
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Characteristic {
    On,
    CurrentTemperature,
    CurrentRelativeHumidity,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CharacteristicValue {
    Bool(bool),
    Float(f64),
}

impl From<bool> for CharacteristicValue {
    fn from(v: bool) -> Self {
        CharacteristicValue::Bool(v)
    }
}

impl From<f64> for CharacteristicValue {
    fn from(v: f64) -> Self {
        CharacteristicValue::Float(v)
    }
}

/// An accessory as registered with the bridge, including current values
#[derive(Debug, Clone, PartialEq)]
pub struct Accessory {
    pub name: String,
    /// Relay pin, switch IP, one-wire id or `dht-<pin>`; unique per run
    pub serial: String,
    pub manufacturer: String,
    pub kind: AccessoryKind,
    pub values: BTreeMap<Characteristic, CharacteristicValue>,
}

impl Accessory {
    /// New accessory with every characteristic of `kind` at its zero value
    pub fn new(name: impl Into<String>, serial: impl Into<String>, kind: AccessoryKind) -> Self {
        let values = kind
            .characteristics()
            .iter()
            .map(|c| {
                let zero = match c {
                    Characteristic::On => CharacteristicValue::Bool(false),
                    _ => CharacteristicValue::Float(0.0),
                };
                (*c, zero)
            })
            .collect();
        Self {
            name: name.into(),
            serial: serial.into(),
            manufacturer: MANUFACTURER.to_string(),
            kind,
            values,
        }
    }

    pub fn with_value(mut self, characteristic: Characteristic, value: impl Into<CharacteristicValue>) -> Self {
        self.values.insert(characteristic, value.into());
        self
    }

    pub fn on(&self) -> Option<bool> {
        match self.values.get(&Characteristic::On) {
            Some(CharacteristicValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    fn float(&self, c: Characteristic) -> Option<f64> {
        match self.values.get(&c) {
            Some(CharacteristicValue::Float(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn temperature(&self) -> Option<f64> {
        self.float(Characteristic::CurrentTemperature)
    }

    pub fn humidity(&self) -> Option<f64> {
        self.float(Characteristic::CurrentRelativeHumidity)
    }

    pub fn to_info(&self) -> AccessoryInfo {
        AccessoryInfo {
            name: self.name.clone(),
            serial: self.serial.clone(),
            kind: self.kind.as_str().to_string(),
            on: self.on(),
            temperature: self.temperature(),
            humidity: self.humidity(),
        }
    }
}

/// Receiving side of the core: an external accessory bridge.
#[cfg_attr(test, mockall::automock)]
pub trait AccessoryBridge: Send + Sync {
    /// Called once per accessory before any publish for it
    fn register(&self, accessory: Accessory);

    /// Push a fresh value; unknown serials are ignored
    fn publish(&self, serial: &str, characteristic: Characteristic, value: CharacteristicValue);
}

/// Identity of the bridge itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeIdentity {
    pub name: String,
    pub model: String,
    pub manufacturer: String,
}

/// In-memory bridge keeping the latest value of every characteristic
pub struct LocalBridge {
    identity: BridgeIdentity,
    accessories: RwLock<Vec<Accessory>>,
}

impl LocalBridge {
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            identity: BridgeIdentity {
                name: name.into(),
                model: model.into(),
                manufacturer: MANUFACTURER.to_string(),
            },
            accessories: RwLock::new(Vec::new()),
        }
    }

    pub fn identity(&self) -> &BridgeIdentity {
        &self.identity
    }

    /// Registered accessories in registration order
    pub fn accessories(&self) -> Vec<Accessory> {
        self.accessories.read().clone()
    }

    pub fn get(&self, serial: &str) -> Option<Accessory> {
        self.accessories.read().iter().find(|a| a.serial == serial).cloned()
    }

    pub fn len(&self) -> usize {
        self.accessories.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.accessories.read().is_empty()
    }

    pub fn snapshot(&self) -> Vec<AccessoryInfo> {
        self.accessories.read().iter().map(Accessory::to_info).collect()
    }
}

impl AccessoryBridge for LocalBridge {
    fn register(&self, accessory: Accessory) {
        let mut accessories = self.accessories.write();
        if let Some(existing) = accessories.iter_mut().find(|a| a.serial == accessory.serial) {
            debug!("Re-registering accessory {} ({})", accessory.name, accessory.serial);
            *existing = accessory;
            return;
        }
        debug!(
            "Registered {} accessory {} ({})",
            accessory.kind.as_str(),
            accessory.name,
            accessory.serial
        );
        accessories.push(accessory);
    }

    fn publish(&self, serial: &str, characteristic: Characteristic, value: CharacteristicValue) {
        let mut accessories = self.accessories.write();
        match accessories.iter_mut().find(|a| a.serial == serial) {
            Some(accessory) => {
                trace!("{} {:?} = {:?}", serial, characteristic, value);
                accessory.values.insert(characteristic, value);
            }
            None => debug!("Dropping update for unregistered accessory {}", serial),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_accessory_has_zeroed_characteristics() {
        let dht = Accessory::new("DHT22", "dht-7", AccessoryKind::Thermostat);
        assert_eq!(dht.temperature(), Some(0.0));
        assert_eq!(dht.humidity(), Some(0.0));
        assert_eq!(dht.on(), None);

        let lamp = Accessory::new("Lamp", "5", AccessoryKind::Lightbulb).with_value(Characteristic::On, true);
        assert_eq!(lamp.on(), Some(true));
        assert_eq!(lamp.temperature(), None);
    }

    #[test]
    fn test_publish_updates_registered_accessory() {
        let bridge = LocalBridge::new("Agent", "RPi");
        bridge.register(Accessory::new("Outside", "28-0316a2795aff", AccessoryKind::TemperatureSensor));

        bridge.publish("28-0316a2795aff", Characteristic::CurrentTemperature, 21.25f64.into());
        bridge.publish("unknown", Characteristic::On, true.into());

        let info = bridge.get("28-0316a2795aff").unwrap().to_info();
        assert_eq!(info.temperature, Some(21.25));
        assert_eq!(info.kind, "temperature_sensor");
        assert_eq!(bridge.len(), 1);
    }

    #[test]
    fn test_register_same_serial_replaces() {
        let bridge = LocalBridge::new("Agent", "RPi");
        bridge.register(Accessory::new("Lamp", "5", AccessoryKind::Lightbulb));
        bridge.register(Accessory::new("Desk lamp", "5", AccessoryKind::Lightbulb));
        assert_eq!(bridge.len(), 1);
        assert_eq!(bridge.snapshot()[0].name, "Desk lamp");
    }

    #[test]
    fn test_identity() {
        let bridge = LocalBridge::new("IOT Home Agent", "Raspberry Pi");
        assert_eq!(bridge.identity().manufacturer, "homeagent");
        assert!(bridge.is_empty());
    }
}
