//! Supply-rail power cycling
//!
//! Sensors that wedge (DS18B20 dropping off the bus, a DHT22 that stops
//! answering) get their VCC pin pulled low and released again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

use crate::constants::recovery::DWELL;
use crate::hw::gpio::{Gpio, Level, PinMode};

pub struct PinRecovery {
    gpio: Arc<dyn Gpio>,
    dwell: Duration,
    cycles: AtomicU64,
}

impl PinRecovery {
    pub fn new(gpio: Arc<dyn Gpio>) -> Self {
        Self {
            gpio,
            dwell: DWELL,
            cycles: AtomicU64::new(0),
        }
    }

    /// Override the off and settle times (tests use zero)
    pub fn with_dwell(mut self, dwell: Duration) -> Self {
        self.dwell = dwell;
        self
    }

    pub fn dwell(&self) -> Duration {
        self.dwell
    }

    /// Power-cycle `pin`: LOW, wait, HIGH, wait.
    ///
    /// Blocks for twice the dwell. GPIO failures are logged and the cycle
    /// carries on so the rail is never left deliberately off.
    pub fn recover(&self, pin: u8) {
        info!("Powering off pin {}", pin);
        self.drive(pin, Level::Low);
        self.pause();

        self.drive(pin, Level::High);
        info!("Powering on pin {}", pin);
        self.pause();

        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    /// Completed recovery cycles since construction
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    fn drive(&self, pin: u8, level: Level) {
        if let Err(e) = self.gpio.set_mode(pin, PinMode::Output) {
            warn!("Recovery: failed to set pin {} to output: {}", pin, e);
        }
        if let Err(e) = self.gpio.write(pin, level) {
            warn!("Recovery: failed to drive pin {} {:?}: {}", pin, level, e);
        }
    }

    fn pause(&self) {
        if !self.dwell.is_zero() {
            thread::sleep(self.dwell);
        }
    }
}
