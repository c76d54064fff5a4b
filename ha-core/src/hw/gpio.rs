//! GPIO abstraction and the Linux sysfs backend
//!
//! All pins are physical header numbers; backends translate to kernel
//! line numbers through [`super::board`].

use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use crate::error::{AgentError, Result};
use crate::hw::board;

/// Pin direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Input,
    Output,
}

impl PinMode {
    fn as_sysfs(&self) -> &'static str {
        match self {
            PinMode::Input => "in",
            PinMode::Output => "out",
        }
    }

    /// Value written to `direction` when the mode changes. "high" switches
    /// to output with the line already released on an active-low board.
    fn direction_request(&self) -> &'static str {
        match self {
            PinMode::Input => "in",
            PinMode::Output => "high",
        }
    }
}

/// Logic level on a line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl Level {
    fn as_sysfs(&self) -> &'static str {
        match self {
            Level::Low => "0",
            Level::High => "1",
        }
    }
}

/// Digital I/O primitives the core is built on.
///
/// Implementations must be callable from any thread: relay commands arrive
/// on bridge connection tasks while pollers run recovery on the blocking pool.
pub trait Gpio: Send + Sync {
    fn set_mode(&self, pin: u8, mode: PinMode) -> Result<()>;
    fn write(&self, pin: u8, level: Level) -> Result<()>;
    fn read(&self, pin: u8) -> Result<Level>;
}

/// `/sys/class/gpio` backend
pub struct SysfsGpio {
    root: PathBuf,
    exported: Mutex<HashSet<u8>>,
}

impl SysfsGpio {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            exported: Mutex::new(HashSet::new()),
        }
    }

    fn line(pin: u8) -> Result<u8> {
        board::physical_to_bcm(pin)
            .ok_or_else(|| AgentError::InvalidPin(format!("physical pin {} is not a GPIO line", pin)))
    }

    fn line_dir(&self, bcm: u8) -> PathBuf {
        self.root.join(format!("gpio{}", bcm))
    }

    /// Export the line once per process; already-exported lines are left alone
    fn ensure_exported(&self, pin: u8, bcm: u8) -> Result<PathBuf> {
        let dir = self.line_dir(bcm);
        let mut exported = self.exported.lock();
        if exported.contains(&bcm) || dir.exists() {
            exported.insert(bcm);
            return Ok(dir);
        }

        let export = self.root.join("export");
        debug!("Exporting GPIO line {} (physical pin {})", bcm, pin);
        fs::write(&export, bcm.to_string()).map_err(|e| AgentError::GpioWrite {
            pin,
            reason: format!("Failed to export line {}: {}", bcm, e),
        })?;
        exported.insert(bcm);
        Ok(dir)
    }
}

impl Gpio for SysfsGpio {
    fn set_mode(&self, pin: u8, mode: PinMode) -> Result<()> {
        let bcm = Self::line(pin)?;
        let direction = self.ensure_exported(pin, bcm)?.join("direction");

        // Rewriting "out" resets the line low, which would energize an
        // active-low relay that is currently held off.
        if let Ok(current) = fs::read_to_string(&direction) {
            if current.trim() == mode.as_sysfs() {
                trace!("Pin {} already in mode {:?}", pin, mode);
                return Ok(());
            }
        }

        let request = mode.direction_request();
        fs::write(&direction, request).map_err(|e| AgentError::GpioWrite {
            pin,
            reason: format!("Failed to set direction {}: {}", request, e),
        })
    }

    fn write(&self, pin: u8, level: Level) -> Result<()> {
        let bcm = Self::line(pin)?;
        let value = self.ensure_exported(pin, bcm)?.join("value");
        fs::write(&value, level.as_sysfs()).map_err(|e| AgentError::GpioWrite {
            pin,
            reason: format!("Failed to write {}: {}", level.as_sysfs(), e),
        })
    }

    fn read(&self, pin: u8) -> Result<Level> {
        let bcm = Self::line(pin)?;
        let value = self.ensure_exported(pin, bcm)?.join("value");
        let content = fs::read_to_string(&value).map_err(|e| AgentError::GpioRead {
            pin,
            reason: format!("Failed to read: {}", e),
        })?;

        match content.trim() {
            "0" => Ok(Level::Low),
            "1" => Ok(Level::High),
            other => Err(AgentError::GpioRead {
                pin,
                reason: format!("Unexpected value '{}'", other),
            }),
        }
    }
}
