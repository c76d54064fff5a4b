//! DHT22 temperature/humidity sensor
//!
//! A single driver attempt fails often on this part, so reads are retried
//! with a pause between attempts. When every attempt fails the supply rail
//! is power-cycled (if enabled) and a zeroed, invalid sample is returned.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::constants::dht::{HUMIDITY_INPUT, IIO_NAME_PREFIX, MAX_ATTEMPTS, RETRY_DELAY, TEMP_INPUT};
use crate::constants::temperature::MILLIDEGREE_DIVISOR;
use crate::error::{AgentError, Result};
use crate::hw::recovery::PinRecovery;

/// One reading. `valid == false` means the values are the zero sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DhtSample {
    pub temperature: f64,
    pub humidity: f64,
    pub valid: bool,
}

impl DhtSample {
    pub fn new(temperature: f64, humidity: f64) -> Self {
        Self { temperature, humidity, valid: true }
    }

    pub fn invalid() -> Self {
        Self::default()
    }
}

/// A single read attempt against the sensor on `pin`
pub trait DhtDriver: Send {
    fn read(&mut self, pin: u8) -> Result<(f64, f64)>;
}

/// Kernel `dht11` IIO driver backend (`dtoverlay=dht11,gpiopin=N`).
///
/// The kernel owns the data line; `pin` only labels errors.
pub struct IioDhtDriver {
    root: PathBuf,
    device: Option<PathBuf>,
}

impl IioDhtDriver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), device: None }
    }

    fn locate(&mut self, pin: u8) -> Result<PathBuf> {
        if let Some(dev) = &self.device {
            return Ok(dev.clone());
        }

        let entries = fs::read_dir(&self.root).map_err(|e| AgentError::DhtRead {
            pin,
            reason: format!("cannot list {}: {}", self.root.display(), e),
        })?;

        let mut candidates: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                fs::read_to_string(path.join("name"))
                    .map(|name| name.trim().starts_with(IIO_NAME_PREFIX))
                    .unwrap_or(false)
            })
            .collect();
        candidates.sort();

        let dev = candidates.into_iter().next().ok_or_else(|| AgentError::DhtRead {
            pin,
            reason: format!("no DHT device under {}", self.root.display()),
        })?;
        debug!("Using IIO device {} for DHT on pin {}", dev.display(), pin);
        self.device = Some(dev.clone());
        Ok(dev)
    }

    fn read_channel(path: &Path, pin: u8) -> Result<f64> {
        let raw = fs::read_to_string(path).map_err(|e| AgentError::DhtRead {
            pin,
            reason: format!("{}: {}", path.display(), e),
        })?;
        let milli: i64 = raw.trim().parse().map_err(|_| AgentError::DhtRead {
            pin,
            reason: format!("unparsable value '{}' in {}", raw.trim(), path.display()),
        })?;
        Ok(milli as f64 / MILLIDEGREE_DIVISOR)
    }
}

impl DhtDriver for IioDhtDriver {
    fn read(&mut self, pin: u8) -> Result<(f64, f64)> {
        let dev = self.locate(pin)?;
        let temperature = Self::read_channel(&dev.join(TEMP_INPUT), pin)?;
        let humidity = Self::read_channel(&dev.join(HUMIDITY_INPUT), pin)?;
        Ok((temperature, humidity))
    }
}

/// Bounded-retry reader with optional rail recovery
pub struct DhtReader {
    driver: Box<dyn DhtDriver>,
    recovery: Arc<PinRecovery>,
    vcc_pin: u8,
    auto_recovery: bool,
    max_attempts: u32,
    retry_delay: Duration,
}

impl DhtReader {
    pub fn new(
        driver: Box<dyn DhtDriver>,
        recovery: Arc<PinRecovery>,
        vcc_pin: u8,
        auto_recovery: bool,
    ) -> Self {
        Self {
            driver,
            recovery,
            vcc_pin,
            auto_recovery,
            max_attempts: MAX_ATTEMPTS,
            retry_delay: RETRY_DELAY,
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn read_temperature_humidity(&mut self, pin: u8) -> DhtSample {
        let mut last_err = None;
        for attempt in 1..=self.max_attempts {
            match self.driver.read(pin) {
                Ok((temperature, humidity)) => {
                    debug!(
                        "Temperature = {}*C, Humidity = {}% (retried {} times)",
                        temperature,
                        humidity,
                        attempt - 1
                    );
                    return DhtSample::new(temperature, humidity);
                }
                Err(e) => {
                    trace!("DHT attempt {}/{} on pin {} failed: {}", attempt, self.max_attempts, pin, e);
                    last_err = Some(e);
                    if attempt < self.max_attempts && !self.retry_delay.is_zero() {
                        thread::sleep(self.retry_delay);
                    }
                }
            }
        }

        if let Some(e) = last_err {
            warn!("Failed to read DHT sensor on pin {}: {}", pin, e);
        }
        if self.auto_recovery {
            self.recovery.recover(self.vcc_pin);
        }
        DhtSample::invalid()
    }
}

/// The configured DHT22 and its last sample
pub struct DhtSensor {
    pub name: String,
    pub pin: u8,
    reader: DhtReader,
    last: DhtSample,
}

impl DhtSensor {
    pub fn new(name: impl Into<String>, pin: u8, reader: DhtReader) -> Self {
        Self {
            name: name.into(),
            pin,
            reader,
            last: DhtSample::invalid(),
        }
    }

    pub fn vcc_pin(&self) -> u8 {
        self.reader.vcc_pin
    }

    pub fn last(&self) -> DhtSample {
        self.last
    }

    /// Read and remember the result, sentinel included
    pub fn poll(&mut self) -> DhtSample {
        self.last = self.reader.read_temperature_humidity(self.pin);
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::gpio::Level;
    use crate::hw::mock::MockGpio;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    struct ScriptedDriver {
        script: VecDeque<Result<(f64, f64)>>,
        calls: Arc<AtomicU32>,
    }

    impl ScriptedDriver {
        fn failing(calls: Arc<AtomicU32>) -> Self {
            Self { script: VecDeque::new(), calls }
        }
    }

    impl DhtDriver for ScriptedDriver {
        fn read(&mut self, pin: u8) -> Result<(f64, f64)> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script.pop_front().unwrap_or(Err(AgentError::DhtRead {
                pin,
                reason: "timeout".into(),
            }))
        }
    }

    fn reader(driver: ScriptedDriver, auto_recovery: bool) -> (Arc<MockGpio>, Arc<PinRecovery>, DhtReader) {
        let gpio = Arc::new(MockGpio::new());
        let recovery = Arc::new(PinRecovery::new(gpio.clone()).with_dwell(Duration::ZERO));
        let reader = DhtReader::new(Box::new(driver), recovery.clone(), 13, auto_recovery)
            .with_retry_delay(Duration::ZERO);
        (gpio, recovery, reader)
    }

    #[test]
    fn test_success_after_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut driver = ScriptedDriver::failing(calls.clone());
        driver.script.push_back(Err(AgentError::DhtRead { pin: 7, reason: "checksum".into() }));
        driver.script.push_back(Ok((21.5, 40.2)));
        let (_gpio, recovery, mut reader) = reader(driver, true);

        let sample = reader.read_temperature_humidity(7);
        assert_eq!(sample, DhtSample::new(21.5, 40.2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(recovery.cycles(), 0);
    }

    #[test]
    fn test_failure_without_recovery() {
        let calls = Arc::new(AtomicU32::new(0));
        let (gpio, recovery, mut reader) = reader(ScriptedDriver::failing(calls.clone()), false);

        let sample = reader.read_temperature_humidity(7);
        assert_eq!((sample.temperature, sample.humidity), (0.0, 0.0));
        assert!(!sample.valid);
        assert_eq!(calls.load(Ordering::SeqCst), 10);
        assert_eq!(recovery.cycles(), 0);
        assert!(gpio.ops().is_empty());
    }

    #[test]
    fn test_one_recovery_per_failed_read() {
        let calls = Arc::new(AtomicU32::new(0));
        let (gpio, recovery, mut reader) = reader(ScriptedDriver::failing(calls), true);

        reader.read_temperature_humidity(7);
        assert_eq!(recovery.cycles(), 1);
        assert_eq!(gpio.writes_to(13), vec![Level::Low, Level::High]);

        reader.read_temperature_humidity(7);
        assert_eq!(recovery.cycles(), 2);
    }

    #[test]
    fn test_sensor_keeps_last_sample() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut driver = ScriptedDriver::failing(calls);
        driver.script.push_back(Ok((19.0, 55.0)));
        let (_gpio, _recovery, reader) = reader(driver, false);
        let mut sensor = DhtSensor::new("Living room", 7, reader);

        assert!(!sensor.last().valid);
        sensor.poll();
        assert_eq!(sensor.last(), DhtSample::new(19.0, 55.0));
        sensor.poll();
        assert!(!sensor.last().valid);
        assert_eq!(sensor.vcc_pin(), 13);
    }

    #[test]
    fn test_iio_driver_reads_channels() {
        let tmp = TempDir::new().unwrap();
        let other = tmp.path().join("iio:device0");
        fs::create_dir_all(&other).unwrap();
        fs::write(other.join("name"), "ads1015\n").unwrap();
        let dev = tmp.path().join("iio:device1");
        fs::create_dir_all(&dev).unwrap();
        fs::write(dev.join("name"), "dht11@4\n").unwrap();
        fs::write(dev.join(TEMP_INPUT), "23400\n").unwrap();
        fs::write(dev.join(HUMIDITY_INPUT), "51700\n").unwrap();

        let mut driver = IioDhtDriver::new(tmp.path());
        let (t, h) = driver.read(7).unwrap();
        assert!((t - 23.4).abs() < 1e-4);
        assert!((h - 51.7).abs() < 1e-4);
    }

    #[test]
    fn test_iio_driver_missing_device() {
        let tmp = TempDir::new().unwrap();
        let mut driver = IioDhtDriver::new(tmp.path());
        assert!(matches!(driver.read(7), Err(AgentError::DhtRead { pin: 7, .. })));
    }
}
