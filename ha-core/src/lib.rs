//! homeagent Core Library
//!
//! Turns relays, a DHT22, DS18B20 probes and LAN smart plugs attached to a
//! Raspberry Pi into accessories for a home-automation bridge.
//!
//! # Module Structure
//!
//! - `hw/` - GPIO, relay board, supply recovery, DHT and one-wire sensors
//! - `smartswitch` - LAN smart plug client
//! - `accessory` - accessory model and the bridge boundary
//! - `registry` - devices built from configuration, remote command routing
//! - `polling` - periodic sensor tasks
//! - `config` - JSON settings
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ha_core::{DeviceRegistry, LocalBridge, Settings, SysfsGpio};
//!
//! let settings = Settings::default();
//! let gpio = Arc::new(SysfsGpio::new(&settings.gpio.sysfs_root));
//! let registry = DeviceRegistry::new(&settings, gpio);
//! let bridge = LocalBridge::new(&settings.bridge.name, &settings.bridge.model);
//! registry.register_accessories(&bridge);
//! ```

pub mod accessory;
pub mod config;
pub mod constants;
pub mod error;
pub mod hw;
pub mod polling;
pub mod registry;
pub mod smartswitch;

// Re-export error types
pub use error::{AgentError, Result};

pub use accessory::{
    Accessory, AccessoryBridge, AccessoryKind, BridgeIdentity, Characteristic, CharacteristicValue,
    LocalBridge,
};
pub use config::{
    default_settings_path, load_settings, save_settings, LoadOutcome, RelayDevice, RelayKind, Settings,
};
pub use hw::{
    parse_w1_slave, DhtDriver, DhtReader, DhtSample, DhtSensor, Gpio, GpioOp, IioDhtDriver, Level,
    MockGpio, OneWireBus, OneWireManager, OneWireSensor, PinMode, PinRecovery, RelayController,
    SysfsGpio,
};
pub use polling::{dht_tick, onewire_tick, spawn_dht_poller, spawn_onewire_poller, Shutdown};
pub use registry::{
    CommandOutcome, CommandRouter, DeviceRegistry, RegistryBuilder, RelayBinding, SmartSwitchDevice,
};
pub use smartswitch::SmartSwitchClient;
