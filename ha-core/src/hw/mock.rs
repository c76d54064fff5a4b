//! In-memory GPIO for tests and dry runs
//!
//! Records every primitive call so tests can assert the exact sequence of
//! mode changes and writes that reached the "hardware".

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

use crate::error::{AgentError, Result};
use crate::hw::gpio::{Gpio, Level, PinMode};

/// One recorded primitive call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpioOp {
    Mode(u8, PinMode),
    Write(u8, Level),
    Read(u8),
}

struct MockState {
    levels: HashMap<u8, Level>,
    ops: Vec<GpioOp>,
    failing: HashSet<u8>,
    idle_level: Level,
}

/// Mock GPIO; lines that were never written read as the idle level (HIGH,
/// i.e. an active-low relay board at rest).
pub struct MockGpio {
    state: Mutex<MockState>,
}

impl MockGpio {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                levels: HashMap::new(),
                ops: Vec::new(),
                failing: HashSet::new(),
                idle_level: Level::High,
            }),
        }
    }

    /// Preset a line level without recording an operation
    pub fn with_level(self, pin: u8, level: Level) -> Self {
        self.state.lock().levels.insert(pin, level);
        self
    }

    /// Make every primitive on `pin` fail
    pub fn fail_pin(&self, pin: u8) {
        self.state.lock().failing.insert(pin);
    }

    pub fn level(&self, pin: u8) -> Level {
        let state = self.state.lock();
        state.levels.get(&pin).copied().unwrap_or(state.idle_level)
    }

    pub fn ops(&self) -> Vec<GpioOp> {
        self.state.lock().ops.clone()
    }

    /// Levels written to `pin`, in order
    pub fn writes_to(&self, pin: u8) -> Vec<Level> {
        self.state
            .lock()
            .ops
            .iter()
            .filter_map(|op| match op {
                GpioOp::Write(p, level) if *p == pin => Some(*level),
                _ => None,
            })
            .collect()
    }
}

impl Default for MockGpio {
    fn default() -> Self {
        Self::new()
    }
}

impl Gpio for MockGpio {
    fn set_mode(&self, pin: u8, mode: PinMode) -> Result<()> {
        let mut state = self.state.lock();
        state.ops.push(GpioOp::Mode(pin, mode));
        if state.failing.contains(&pin) {
            return Err(AgentError::GpioWrite { pin, reason: "mock failure".into() });
        }
        Ok(())
    }

    fn write(&self, pin: u8, level: Level) -> Result<()> {
        let mut state = self.state.lock();
        state.ops.push(GpioOp::Write(pin, level));
        if state.failing.contains(&pin) {
            return Err(AgentError::GpioWrite { pin, reason: "mock failure".into() });
        }
        state.levels.insert(pin, level);
        Ok(())
    }

    fn read(&self, pin: u8) -> Result<Level> {
        let mut state = self.state.lock();
        state.ops.push(GpioOp::Read(pin));
        if state.failing.contains(&pin) {
            return Err(AgentError::GpioRead { pin, reason: "mock failure".into() });
        }
        Ok(state.levels.get(&pin).copied().unwrap_or(state.idle_level))
    }
}
