//! Device registry and remote command routing
//!
//! The registry is built once from [`Settings`] and owns every device for the
//! life of the process. Kind-specific behaviour (which level means "on",
//! which accessory type is shown) is decided here, at build time.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::accessory::{Accessory, AccessoryBridge, AccessoryKind, Characteristic};
use crate::config::{RelayDevice, RelayKind, Settings};
use crate::hw::board;
use crate::hw::dht::{DhtDriver, DhtReader, DhtSensor, IioDhtDriver};
use crate::hw::gpio::Gpio;
use crate::hw::onewire::{OneWireBus, OneWireManager};
use crate::hw::recovery::PinRecovery;
use crate::hw::relay::RelayController;
use crate::smartswitch::SmartSwitchClient;

/// A configured relay with its on/off mapping resolved
#[derive(Debug, Clone, PartialEq)]
pub struct RelayBinding {
    pub device: RelayDevice,
    /// "on" releases the relay instead of energizing it
    pub inverted: bool,
}

impl RelayBinding {
    pub fn new(device: RelayDevice) -> Self {
        let inverted = device.kind == RelayKind::Cooler && device.invert;
        Self { device, inverted }
    }

    pub fn serial(&self) -> String {
        self.device.pin.to_string()
    }

    pub fn accessory_kind(&self) -> AccessoryKind {
        match self.device.kind {
            RelayKind::Lamp => AccessoryKind::Lightbulb,
            RelayKind::Switch => AccessoryKind::Switch,
            RelayKind::Cooler => AccessoryKind::Fan,
        }
    }

    /// Logical state as seen by the bridge. An unreadable pin reports off,
    /// whatever the polarity.
    pub fn is_on(&self, relays: &RelayController) -> bool {
        match relays.read_pin(self.device.pin) {
            Ok(energized) => energized != self.inverted,
            Err(e) => {
                warn!("Failed to read relay '{}' on pin {}: {}", self.device.name, self.device.pin, e);
                false
            }
        }
    }

    pub fn apply(&self, relays: &RelayController, on: bool) -> bool {
        let serial = self.serial();
        if on != self.inverted {
            relays.turn_on(&serial)
        } else {
            relays.turn_off(&serial)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmartSwitchDevice {
    pub network_id: String,
    pub ip_address: String,
    pub display_name: String,
}

/// Result of a remote on/off command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Applied,
    Failed,
    UnknownDevice,
}

impl CommandOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandOutcome::Applied => "applied",
            CommandOutcome::Failed => "failed",
            CommandOutcome::UnknownDevice => "unknown_device",
        }
    }
}

/// All configured devices
pub struct DeviceRegistry {
    relays: RelayController,
    relay_bindings: Vec<RelayBinding>,
    switches: Vec<SmartSwitchDevice>,
    switch_client: SmartSwitchClient,
    dht: Option<Arc<Mutex<DhtSensor>>>,
    onewire: Option<Arc<Mutex<OneWireManager>>>,
    recovery: Arc<PinRecovery>,
}

/// Builder so tests can swap the DHT driver, switch port and dwell
pub struct RegistryBuilder<'a> {
    settings: &'a Settings,
    gpio: Arc<dyn Gpio>,
    dht_driver: Option<Box<dyn DhtDriver>>,
    switch_client: Option<SmartSwitchClient>,
    dwell: Option<Duration>,
    dht_retry_delay: Option<Duration>,
}

impl<'a> RegistryBuilder<'a> {
    pub fn new(settings: &'a Settings, gpio: Arc<dyn Gpio>) -> Self {
        Self {
            settings,
            gpio,
            dht_driver: None,
            switch_client: None,
            dwell: None,
            dht_retry_delay: None,
        }
    }

    pub fn dht_driver(mut self, driver: Box<dyn DhtDriver>) -> Self {
        self.dht_driver = Some(driver);
        self
    }

    pub fn switch_client(mut self, client: SmartSwitchClient) -> Self {
        self.switch_client = Some(client);
        self
    }

    pub fn recovery_dwell(mut self, dwell: Duration) -> Self {
        self.dwell = Some(dwell);
        self
    }

    pub fn dht_retry_delay(mut self, delay: Duration) -> Self {
        self.dht_retry_delay = Some(delay);
        self
    }

    pub fn build(self) -> DeviceRegistry {
        let settings = self.settings;
        let mut recovery = PinRecovery::new(self.gpio.clone());
        if let Some(dwell) = self.dwell {
            recovery = recovery.with_dwell(dwell);
        }
        let recovery = Arc::new(recovery);

        let mut relay_bindings = Vec::new();
        if settings.relays.enabled {
            let mut devices = settings.relays.devices.clone();
            devices.sort_by_key(|d| d.id);
            relay_bindings = devices.into_iter().map(RelayBinding::new).collect();
        }

        let mut switches = Vec::new();
        if settings.smart_switches.enabled {
            switches = settings
                .smart_switches
                .devices
                .iter()
                .map(|(ip, name)| SmartSwitchDevice {
                    network_id: ip.clone(),
                    ip_address: ip.clone(),
                    display_name: name.clone(),
                })
                .collect();
        }

        let dht = if settings.dht.enabled {
            let driver = self
                .dht_driver
                .unwrap_or_else(|| Box::new(IioDhtDriver::new(&settings.dht.iio_root)) as Box<dyn DhtDriver>);
            let mut reader = DhtReader::new(
                driver,
                recovery.clone(),
                settings.dht.vcc_pin,
                settings.dht.auto_recovery,
            );
            if let Some(delay) = self.dht_retry_delay {
                reader = reader.with_retry_delay(delay);
            }
            Some(Arc::new(Mutex::new(DhtSensor::new(
                settings.dht.name.clone(),
                settings.dht.pin,
                reader,
            ))))
        } else {
            None
        };

        let onewire = if settings.onewire.enabled {
            Some(Arc::new(Mutex::new(OneWireManager::new(
                OneWireBus::new(&settings.onewire.bus_root),
                recovery.clone(),
                settings.onewire.vcc_pin,
                settings.onewire.auto_recovery,
                &settings.onewire.sensors,
            ))))
        } else {
            None
        };

        DeviceRegistry {
            relays: RelayController::new(self.gpio),
            relay_bindings,
            switches,
            switch_client: self.switch_client.unwrap_or_default(),
            dht,
            onewire,
            recovery,
        }
    }
}

impl DeviceRegistry {
    pub fn new(settings: &Settings, gpio: Arc<dyn Gpio>) -> Self {
        RegistryBuilder::new(settings, gpio).build()
    }

    pub fn builder(settings: &Settings, gpio: Arc<dyn Gpio>) -> RegistryBuilder<'_> {
        RegistryBuilder::new(settings, gpio)
    }

    pub fn relay_bindings(&self) -> &[RelayBinding] {
        &self.relay_bindings
    }

    pub fn relay_by_id(&self, id: u32) -> Option<&RelayBinding> {
        self.relay_bindings.iter().find(|b| b.device.id == id)
    }

    pub fn relay_by_pin(&self, pin: u8) -> Option<&RelayBinding> {
        self.relay_bindings.iter().find(|b| b.device.pin == pin)
    }

    pub fn smart_switches(&self) -> &[SmartSwitchDevice] {
        &self.switches
    }

    pub fn smart_switch(&self, ip: &str) -> Option<&SmartSwitchDevice> {
        self.switches.iter().find(|s| s.ip_address == ip)
    }

    pub fn dht(&self) -> Option<Arc<Mutex<DhtSensor>>> {
        self.dht.clone()
    }

    /// Accessory serial of the DHT sensor
    pub fn dht_serial(&self) -> Option<String> {
        self.dht.as_ref().map(|d| format!("dht-{}", d.lock().pin))
    }

    pub fn onewire(&self) -> Option<Arc<Mutex<OneWireManager>>> {
        self.onewire.clone()
    }

    pub fn recovery(&self) -> &Arc<PinRecovery> {
        &self.recovery
    }

    pub fn relays(&self) -> &RelayController {
        &self.relays
    }

    pub fn switch_client(&self) -> &SmartSwitchClient {
        &self.switch_client
    }

    /// Register every enabled device with the bridge.
    ///
    /// Blocks: relay states are read from GPIO and one-wire discovery may
    /// power-cycle the probe rail several times. Returns the number registered.
    pub fn register_accessories(&self, bridge: &dyn AccessoryBridge) -> usize {
        let mut count = 0;

        if !self.relay_bindings.is_empty() {
            info!("Loading relay support");
        }
        for binding in &self.relay_bindings {
            info!(
                "Found relay {} '{}' ({:?}) on pin {}",
                binding.device.id, binding.device.name, binding.device.kind, binding.device.pin
            );
            let on = binding.is_on(&self.relays);
            bridge.register(
                Accessory::new(&binding.device.name, binding.serial(), binding.accessory_kind())
                    .with_value(Characteristic::On, on),
            );
            count += 1;
        }

        if !self.switches.is_empty() {
            info!("Loading smart switch support");
        }
        for switch in &self.switches {
            info!("Found smart switch {} named {}", switch.ip_address, switch.display_name);
            bridge.register(Accessory::new(
                &switch.display_name,
                &switch.network_id,
                AccessoryKind::Lightbulb,
            ));
            count += 1;
        }

        if let (Some(dht), Some(serial)) = (&self.dht, self.dht_serial()) {
            info!("Loading DHT22 sensor support");
            let name = dht.lock().name.clone();
            bridge.register(Accessory::new(name, serial, AccessoryKind::Thermostat));
            count += 1;
        }

        if let Some(onewire) = &self.onewire {
            info!("Loading one-wire sensor support");
            let active = onewire.lock().discover();
            for sensor in active {
                bridge.register(
                    Accessory::new(&sensor.name, &sensor.id, AccessoryKind::TemperatureSensor)
                        .with_value(Characteristic::CurrentTemperature, sensor.last_known_temperature),
                );
                count += 1;
            }
        }

        info!("Registered {} accessories", count);
        count
    }

    /// Query each smart switch once and publish what it reports
    pub async fn refresh_smart_switches(&self, bridge: &dyn AccessoryBridge) {
        for switch in &self.switches {
            match self.switch_client.try_get_state(&switch.ip_address).await {
                Ok(on) => bridge.publish(&switch.network_id, Characteristic::On, on.into()),
                Err(e) => debug!("Initial state of {} unknown: {}", switch.ip_address, e),
            }
        }
    }
}

/// Entry point for remote on/off commands coming from the bridge
#[derive(Clone)]
pub struct CommandRouter {
    registry: Arc<DeviceRegistry>,
    bridge: Arc<dyn AccessoryBridge>,
}

impl CommandRouter {
    pub fn new(registry: Arc<DeviceRegistry>, bridge: Arc<dyn AccessoryBridge>) -> Self {
        Self { registry, bridge }
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Route `on`/`off` for the accessory with `serial`; publishes the
    /// requested state back to the bridge when the command went through.
    pub async fn handle_command(&self, serial: &str, on: bool) -> CommandOutcome {
        let outcome = if let Some(binding) = board::parse_pin(serial).and_then(|pin| self.registry.relay_by_pin(pin)) {
            debug!("Relay '{}' commanded {}", binding.device.name, if on { "on" } else { "off" });
            if binding.apply(self.registry.relays(), on) {
                CommandOutcome::Applied
            } else {
                CommandOutcome::Failed
            }
        } else if let Some(switch) = self.registry.smart_switch(serial) {
            debug!("Smart switch '{}' commanded {}", switch.display_name, if on { "on" } else { "off" });
            if self.registry.switch_client().set_state(&switch.ip_address, on).await {
                CommandOutcome::Applied
            } else {
                CommandOutcome::Failed
            }
        } else {
            warn!("Command for unknown accessory {}", serial);
            CommandOutcome::UnknownDevice
        };

        if outcome == CommandOutcome::Applied {
            self.bridge.publish(serial, Characteristic::On, on.into());
        }
        outcome
    }
}
