//! Registry, bridge and pollers wired together over mock hardware

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ha_core::{
    dht_tick, onewire_tick, AccessoryKind, AgentError, CommandOutcome, CommandRouter, DeviceRegistry,
    DhtDriver, Level, LocalBridge, MockGpio, RelayDevice, RelayKind, Result, Settings, SmartSwitchClient,
};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn relay(id: u32, kind: RelayKind, name: &str, pin: u8, invert: bool) -> RelayDevice {
    RelayDevice {
        id,
        kind,
        name: name.to_string(),
        pin,
        invert,
    }
}

struct FixedDriver(f64, f64);

impl DhtDriver for FixedDriver {
    fn read(&mut self, _pin: u8) -> Result<(f64, f64)> {
        Ok((self.0, self.1))
    }
}

struct DeadDriver;

impl DhtDriver for DeadDriver {
    fn read(&mut self, pin: u8) -> Result<(f64, f64)> {
        Err(AgentError::DhtRead { pin, reason: "no response".into() })
    }
}

fn add_probe(root: &Path, id: &str, millidegrees: i32) {
    let dir = root.join("devices").join(id);
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("w1_slave"),
        format!("4b 01 4b 46 7f ff 05 10 e1 : crc=e1 YES\n4b 01 4b 46 7f ff 05 10 e1 t={}\n", millidegrees),
    )
    .unwrap();
}

#[tokio::test]
async fn test_lamp_and_inverted_cooler() {
    let mut settings = Settings::default();
    settings.relays.enabled = true;
    settings.relays.devices = vec![
        relay(1, RelayKind::Lamp, "Lamp", 5, false),
        relay(2, RelayKind::Cooler, "Cooler", 6, true),
    ];

    let gpio = Arc::new(MockGpio::new());
    let registry = Arc::new(DeviceRegistry::new(&settings, gpio.clone()));
    let bridge = Arc::new(LocalBridge::new("IOT Home Agent", "Raspberry Pi"));

    assert_eq!(registry.register_accessories(bridge.as_ref()), 2);
    assert_eq!(bridge.len(), 2);
    let kinds: Vec<AccessoryKind> = bridge.accessories().iter().map(|a| a.kind).collect();
    assert_eq!(kinds, vec![AccessoryKind::Lightbulb, AccessoryKind::Fan]);

    let router = CommandRouter::new(registry, bridge.clone());

    assert_eq!(router.handle_command("5", true).await, CommandOutcome::Applied);
    assert_eq!(gpio.writes_to(5), vec![Level::Low]);

    assert_eq!(router.handle_command("6", true).await, CommandOutcome::Applied);
    assert_eq!(gpio.writes_to(6), vec![Level::High]);

    assert_eq!(router.handle_command("6", false).await, CommandOutcome::Applied);
    assert_eq!(gpio.writes_to(6), vec![Level::High, Level::Low]);

    assert_eq!(bridge.get("5").unwrap().on(), Some(true));
    assert_eq!(bridge.get("6").unwrap().on(), Some(false));
}

#[tokio::test]
async fn test_all_device_classes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/zeroconf/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "seq": 1, "error": 0, "data": {"switch": "on", "deviceid": "10009f8e7d"}
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/zeroconf/switch"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"seq": 2, "error": 0})))
        .expect(1)
        .mount(&server)
        .await;

    let w1 = TempDir::new().unwrap();
    add_probe(w1.path(), "28-0316a2795aff", 21500);
    add_probe(w1.path(), "28-0416b1c2d3e4", -3250);

    let mut settings = Settings::default();
    settings.relays.enabled = true;
    settings.relays.devices = vec![relay(1, RelayKind::Switch, "Pump", 12, false)];
    settings.smart_switches.enabled = true;
    settings.smart_switches.devices = BTreeMap::from([("127.0.0.1".to_string(), "Heater".to_string())]);
    settings.dht.enabled = true;
    settings.onewire.enabled = true;
    settings.onewire.bus_root = w1.path().to_path_buf();
    settings.onewire.sensors = BTreeMap::from([
        ("28-0316a2795aff".to_string(), "Outside".to_string()),
        ("28-0416b1c2d3e4".to_string(), "Freezer".to_string()),
        ("28-0516aaaaaaaa".to_string(), "Gone".to_string()),
    ]);
    settings.validate().unwrap();

    let gpio = Arc::new(MockGpio::new());
    let registry = Arc::new(
        DeviceRegistry::builder(&settings, gpio.clone())
            .dht_driver(Box::new(FixedDriver(22.5, 41.0)))
            .switch_client(SmartSwitchClient::with_port(server.address().port()))
            .recovery_dwell(Duration::ZERO)
            .dht_retry_delay(Duration::ZERO)
            .build(),
    );
    let bridge = Arc::new(LocalBridge::new("IOT Home Agent", "Raspberry Pi"));

    // relay + switch + dht + two reachable probes
    assert_eq!(registry.register_accessories(bridge.as_ref()), 5);
    assert_eq!(registry.recovery().cycles(), 3);
    assert!(bridge.get("28-0516aaaaaaaa").is_none());
    assert_eq!(bridge.get("28-0416b1c2d3e4").unwrap().temperature(), Some(-3.25));

    registry.refresh_smart_switches(bridge.as_ref()).await;
    assert_eq!(bridge.get("127.0.0.1").unwrap().on(), Some(true));

    let router = CommandRouter::new(registry.clone(), bridge.clone());
    assert_eq!(router.handle_command("127.0.0.1", false).await, CommandOutcome::Applied);
    assert_eq!(bridge.get("127.0.0.1").unwrap().on(), Some(false));
    assert_eq!(router.handle_command("12", true).await, CommandOutcome::Applied);
    assert_eq!(router.handle_command("10.9.9.9", true).await, CommandOutcome::UnknownDevice);

    let serial = registry.dht_serial().unwrap();
    let dht = registry.dht().unwrap();
    let sample = dht_tick(&dht, &serial, bridge.as_ref());
    assert!(sample.valid);
    let acc = bridge.get(&serial).unwrap();
    assert_eq!(acc.temperature(), Some(22.5));
    assert_eq!(acc.humidity(), Some(41.0));

    add_probe(w1.path(), "28-0316a2795aff", 19000);
    let onewire = registry.onewire().unwrap();
    assert_eq!(onewire_tick(&onewire, bridge.as_ref()), 2);
    assert_eq!(bridge.get("28-0316a2795aff").unwrap().temperature(), Some(19.0));
}

#[test]
fn test_dead_dht_publishes_zero_and_recovers_once() {
    let mut settings = Settings::default();
    settings.dht.enabled = true;
    settings.dht.auto_recovery = true;

    let gpio = Arc::new(MockGpio::new());
    let registry = DeviceRegistry::builder(&settings, gpio.clone())
        .dht_driver(Box::new(DeadDriver))
        .recovery_dwell(Duration::ZERO)
        .dht_retry_delay(Duration::ZERO)
        .build();
    let bridge = LocalBridge::new("IOT Home Agent", "Raspberry Pi");
    assert_eq!(registry.register_accessories(&bridge), 1);

    let serial = registry.dht_serial().unwrap();
    let sample = dht_tick(&registry.dht().unwrap(), &serial, &bridge);

    assert!(!sample.valid);
    assert_eq!(registry.recovery().cycles(), 1);
    assert_eq!(gpio.writes_to(settings.dht.vcc_pin), vec![Level::Low, Level::High]);
    assert_eq!(bridge.get(&serial).unwrap().temperature(), Some(0.0));
}
