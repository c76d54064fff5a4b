//! Active-low relay board control
//!
//! Pins arrive as strings because they travel as accessory serial numbers.
//! A serial that is not a pin number is ignored rather than reported.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::hw::board;
use crate::hw::gpio::{Gpio, Level, PinMode};

#[derive(Clone)]
pub struct RelayController {
    gpio: Arc<dyn Gpio>,
}

impl RelayController {
    pub fn new(gpio: Arc<dyn Gpio>) -> Self {
        Self { gpio }
    }

    /// `true` when the relay is energized (line held LOW)
    pub fn read_state(&self, raw_pin: &str) -> bool {
        let Some(pin) = board::parse_pin(raw_pin) else {
            debug!("Ignoring state read for malformed pin '{}'", raw_pin);
            return false;
        };
        debug!("Reading state for pin {}", pin);
        match self.read_pin(pin) {
            Ok(on) => on,
            Err(e) => {
                warn!("Failed to read relay on pin {}: {}", pin, e);
                false
            }
        }
    }

    /// Energize the relay. Returns whether the level was driven.
    pub fn turn_on(&self, raw_pin: &str) -> bool {
        self.apply(raw_pin, Level::Low)
    }

    /// Release the relay. Returns whether the level was driven.
    pub fn turn_off(&self, raw_pin: &str) -> bool {
        self.apply(raw_pin, Level::High)
    }

    pub fn read_pin(&self, pin: u8) -> Result<bool> {
        self.gpio.set_mode(pin, PinMode::Output)?;
        Ok(self.gpio.read(pin)? == Level::Low)
    }

    pub fn drive_pin(&self, pin: u8, level: Level) -> Result<()> {
        self.gpio.set_mode(pin, PinMode::Output)?;
        self.gpio.write(pin, level)
    }

    fn apply(&self, raw_pin: &str, level: Level) -> bool {
        let Some(pin) = board::parse_pin(raw_pin) else {
            debug!("Ignoring relay command for malformed pin '{}'", raw_pin);
            return false;
        };
        debug!(
            "Turning power {} for relay on pin {}",
            if level == Level::Low { "on" } else { "off" },
            pin
        );
        match self.drive_pin(pin, level) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to drive relay on pin {}: {}", pin, e);
                false
            }
        }
    }
}
