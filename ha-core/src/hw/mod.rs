//! Hardware interaction modules
//!
//! GPIO primitives, the relay board, supply-rail recovery and the two
//! sensor families attached to the header.

pub mod board;
pub mod dht;
pub mod gpio;
pub mod mock;
pub mod onewire;
pub mod recovery;
pub mod relay;

pub use dht::{DhtDriver, DhtReader, DhtSample, DhtSensor, IioDhtDriver};
pub use gpio::{Gpio, Level, PinMode, SysfsGpio};
pub use mock::{GpioOp, MockGpio};
pub use onewire::{parse_w1_slave, OneWireBus, OneWireManager, OneWireSensor};
pub use recovery::PinRecovery;
pub use relay::RelayController;
