//! DS18B20 one-wire temperature probes
//!
//! The kernel `w1-therm` driver exposes each probe as
//! `<bus-root>/devices/<id>/w1_slave`. All probes share one supply pin,
//! so recovering one power-cycles them all.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::constants::onewire::{DISCOVERY_ATTEMPTS, MASTER_SLAVES, SLAVE_FILE, TEMP_MARKER};
use crate::constants::temperature::MILLIDEGREE_DIVISOR;
use crate::error::{AgentError, Result};
use crate::hw::recovery::PinRecovery;

/// Extract the temperature from `w1_slave` content.
///
/// Uses the last `t=` marker; the remainder (trailing whitespace trimmed)
/// must be an integer number of millidegrees.
pub fn parse_w1_slave(content: &str) -> Result<f64> {
    let idx = content.rfind(TEMP_MARKER).ok_or(AgentError::OneWireRead)?;
    let raw = content[idx + TEMP_MARKER.len()..].trim_end();
    let milli: i64 = raw.parse().map_err(|_| AgentError::OneWireRead)?;
    Ok(milli as f64 / MILLIDEGREE_DIVISOR)
}

/// Filesystem view of the one-wire bus
#[derive(Debug, Clone)]
pub struct OneWireBus {
    root: PathBuf,
}

impl OneWireBus {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn slave_path(&self, id: &str) -> PathBuf {
        self.root.join("devices").join(id).join(SLAVE_FILE)
    }

    pub fn is_present(&self, id: &str) -> bool {
        self.slave_path(id).exists()
    }

    pub fn read_temperature(&self, id: &str) -> Result<f64> {
        let content = fs::read_to_string(self.slave_path(id)).map_err(|_| AgentError::OneWireRead)?;
        parse_w1_slave(&content)
    }

    /// Ids the bus master currently sees
    pub fn list_slaves(&self) -> Result<Vec<String>> {
        let path = self.root.join(MASTER_SLAVES);
        let content = fs::read_to_string(&path).map_err(|source| AgentError::FileRead { path, source })?;
        let mut ids: Vec<String> = content.split('\n').map(str::to_string).collect();
        // The file ends with a newline, leaving an empty tail entry
        if ids.last().map_or(false, |s| s.is_empty()) {
            ids.pop();
        }
        Ok(ids)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OneWireSensor {
    pub id: String,
    pub name: String,
    pub last_known_temperature: f64,
    pub presence_verified: bool,
    pub active: bool,
}

impl OneWireSensor {
    fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            last_known_temperature: 0.0,
            presence_verified: false,
            active: false,
        }
    }
}

/// Owns every configured probe; only its poller mutates it
pub struct OneWireManager {
    bus: OneWireBus,
    recovery: Arc<PinRecovery>,
    vcc_pin: u8,
    auto_recovery: bool,
    sensors: Vec<OneWireSensor>,
}

impl OneWireManager {
    /// `configured` maps bus id to display name; iteration order is id order
    pub fn new(
        bus: OneWireBus,
        recovery: Arc<PinRecovery>,
        vcc_pin: u8,
        auto_recovery: bool,
        configured: &BTreeMap<String, String>,
    ) -> Self {
        Self {
            bus,
            recovery,
            vcc_pin,
            auto_recovery,
            sensors: configured.iter().map(|(id, name)| OneWireSensor::new(id, name)).collect(),
        }
    }

    pub fn sensors(&self) -> &[OneWireSensor] {
        &self.sensors
    }

    pub fn active_sensors(&self) -> impl Iterator<Item = &OneWireSensor> {
        self.sensors.iter().filter(|s| s.active)
    }

    /// Startup presence check and initial read for every configured probe.
    ///
    /// A missing probe gets up to `DISCOVERY_ATTEMPTS` rail recoveries. Probes
    /// still missing, or present but unreadable, stay inactive for the run.
    pub fn discover(&mut self) -> Vec<OneWireSensor> {
        self.log_bus_inventory();

        for idx in 0..self.sensors.len() {
            let id = self.sensors[idx].id.clone();
            let mut present = self.bus.is_present(&id);
            let mut attempts = 0;
            while !present && self.auto_recovery && attempts < DISCOVERY_ATTEMPTS {
                attempts += 1;
                info!("Recovering one-wire sensors, {} was not found on the system", id);
                self.recovery.recover(self.vcc_pin);
                present = self.bus.is_present(&id);
            }

            let sensor = &mut self.sensors[idx];
            if !present {
                if attempts > 0 {
                    warn!("Tried {} times to recover sensor {} without success", attempts, id);
                }
                warn!("Unable to find one-wire sensor {} ({}), excluding it until restart", sensor.name, id);
                continue;
            }
            sensor.presence_verified = true;

            match self.bus.read_temperature(&id) {
                Ok(t) => {
                    info!("Found sensor: {} ({}) temperature: {:.2}°C", sensor.name, id, t);
                    sensor.last_known_temperature = t;
                    sensor.active = true;
                }
                Err(e) => {
                    warn!("Sensor {} ({}) is present but unreadable: {}", sensor.name, id, e);
                }
            }
        }

        self.active_sensors().cloned().collect()
    }

    /// Read every active probe. Returns `(id, temperature)` for the ones that
    /// answered; a failed probe triggers a rail recovery and keeps its stale value.
    pub fn poll(&mut self) -> Vec<(String, f64)> {
        let mut readings = Vec::new();
        for idx in 0..self.sensors.len() {
            if !self.sensors[idx].active {
                continue;
            }
            let id = self.sensors[idx].id.clone();
            match self.bus.read_temperature(&id) {
                Ok(t) => {
                    debug!("One-wire sensor {} ({}) read {:.2}°C", self.sensors[idx].name, id, t);
                    self.sensors[idx].last_known_temperature = t;
                    readings.push((id, t));
                }
                Err(e) => {
                    warn!("Unable to read one-wire sensor {}: {}", id, e);
                    if self.auto_recovery {
                        info!("Running recovery on pin {}", self.vcc_pin);
                        self.recovery.recover(self.vcc_pin);
                    }
                }
            }
        }
        readings
    }

    fn log_bus_inventory(&self) {
        let slaves = match self.bus.list_slaves() {
            Ok(slaves) => slaves,
            Err(e) => {
                debug!("Could not enumerate one-wire bus: {}", e);
                return;
            }
        };

        for sensor in &self.sensors {
            if !slaves.contains(&sensor.id) {
                debug!("Configured sensor {} is not listed by the bus master", sensor.id);
            }
        }
        for id in slaves.iter().filter(|id| !id.is_empty()) {
            if !self.sensors.iter().any(|s| &s.id == id) {
                info!("Unconfigured one-wire device on bus: {}", id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::mock::MockGpio;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    const SAMPLE: &str = "72 01 4b 46 7f ff 0e 10 57 : crc=57 YES\n72 01 4b 46 7f ff 0e 10 57 t=23562\n";

    fn add_probe(root: &Path, id: &str, content: &str) {
        let dir = root.join("devices").join(id);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(SLAVE_FILE), content).unwrap();
    }

    fn manager(root: &Path, ids: &[&str], auto_recovery: bool) -> (Arc<PinRecovery>, OneWireManager) {
        let recovery = Arc::new(PinRecovery::new(Arc::new(MockGpio::new())).with_dwell(Duration::ZERO));
        let configured: BTreeMap<String, String> =
            ids.iter().map(|id| (id.to_string(), format!("probe {}", id))).collect();
        let mgr = OneWireManager::new(OneWireBus::new(root), recovery.clone(), 11, auto_recovery, &configured);
        (recovery, mgr)
    }

    #[test]
    fn test_parse_w1_slave() {
        assert_eq!(parse_w1_slave(SAMPLE).unwrap(), 23.562);
        assert!((parse_w1_slave("t=-1250\n").unwrap() + 1.25).abs() < 1e-4);
        assert!((parse_w1_slave("t=1 t=8000").unwrap() - 8.0).abs() < 1e-4);
    }

    #[test]
    fn test_parse_failures_share_one_kind() {
        assert!(matches!(parse_w1_slave("crc=57 YES\n"), Err(AgentError::OneWireRead)));
        assert!(matches!(parse_w1_slave("t=abc\n"), Err(AgentError::OneWireRead)));
        assert!(matches!(parse_w1_slave("t=\n"), Err(AgentError::OneWireRead)));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let tmp = TempDir::new().unwrap();
        let bus = OneWireBus::new(tmp.path());
        assert!(matches!(bus.read_temperature("28-000000000001"), Err(AgentError::OneWireRead)));
    }

    #[test]
    fn test_list_slaves_drops_trailing_entry() {
        let tmp = TempDir::new().unwrap();
        let master = tmp.path().join(MASTER_SLAVES);
        fs::create_dir_all(master.parent().unwrap()).unwrap();
        fs::write(&master, "28-0316a2795aff\n28-0416b1c2d3e4\n").unwrap();

        let bus = OneWireBus::new(tmp.path());
        assert_eq!(bus.list_slaves().unwrap(), vec!["28-0316a2795aff", "28-0416b1c2d3e4"]);
    }

    #[test]
    fn test_absent_sensor_gets_three_recoveries() {
        let tmp = TempDir::new().unwrap();
        add_probe(tmp.path(), "28-00000000000a", SAMPLE);
        add_probe(tmp.path(), "28-00000000000b", SAMPLE);
        add_probe(tmp.path(), "28-00000000000d", SAMPLE);
        let (recovery, mut mgr) = manager(
            tmp.path(),
            &["28-00000000000a", "28-00000000000b", "28-00000000000c", "28-00000000000d"],
            true,
        );

        let active = mgr.discover();

        assert_eq!(recovery.cycles(), 3);
        let ids: Vec<&str> = active.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["28-00000000000a", "28-00000000000b", "28-00000000000d"]);
        let missing = &mgr.sensors()[2];
        assert!(!missing.active);
        assert!(!missing.presence_verified);
    }

    #[test]
    fn test_discovery_without_recovery() {
        let tmp = TempDir::new().unwrap();
        let (recovery, mut mgr) = manager(tmp.path(), &["28-00000000000c"], false);
        assert!(mgr.discover().is_empty());
        assert_eq!(recovery.cycles(), 0);
    }

    #[test]
    fn test_present_but_unreadable_is_excluded() {
        let tmp = TempDir::new().unwrap();
        add_probe(tmp.path(), "28-00000000000e", "crc=00 NO\n");
        let (recovery, mut mgr) = manager(tmp.path(), &["28-00000000000e"], true);

        assert!(mgr.discover().is_empty());
        assert!(mgr.sensors()[0].presence_verified);
        assert_eq!(recovery.cycles(), 0);
    }

    #[test]
    fn test_poll_keeps_stale_value_and_recovers() {
        let tmp = TempDir::new().unwrap();
        add_probe(tmp.path(), "28-00000000000a", SAMPLE);
        let (recovery, mut mgr) = manager(tmp.path(), &["28-00000000000a"], true);
        mgr.discover();

        add_probe(tmp.path(), "28-00000000000a", "t=19000\n");
        let readings = mgr.poll();
        assert_eq!(readings.len(), 1);
        assert!((readings[0].1 - 19.0).abs() < 1e-4);

        add_probe(tmp.path(), "28-00000000000a", "garbage\n");
        assert!(mgr.poll().is_empty());
        assert_eq!(recovery.cycles(), 1);
        assert!((mgr.sensors()[0].last_known_temperature - 19.0).abs() < 1e-4);
        assert!(mgr.sensors()[0].active);
    }
}
