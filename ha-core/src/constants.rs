//! Constants and configuration values for homeagent
//!
//! Centralizes magic numbers, sysfs paths and configuration defaults.

use std::time::Duration;

/// System paths
pub mod paths {
    /// Default configuration file name, looked up next to the executable
    pub const SETTINGS_FILE: &str = "settings.json";

    /// Linux sysfs GPIO class directory
    pub const GPIO_SYSFS_ROOT: &str = "/sys/class/gpio";

    /// One-wire bus root; devices live under `<root>/devices/<id>`
    pub const W1_BUS_ROOT: &str = "/sys/bus/w1";

    /// Industrial I/O devices (the kernel `dht11` driver registers here)
    pub const IIO_DEVICES_ROOT: &str = "/sys/bus/iio/devices";

    /// Default bridge adapter socket
    pub const SOCKET_PATH: &str = "/run/homeagent.sock";

    /// systemd journal socket, used to decide where logs go
    pub const JOURNALD_SOCKET: &str = "/run/systemd/journal/socket";
}

/// Supply-rail power cycling
pub mod recovery {
    use super::Duration;

    /// Time the rail is held off, then the settle time after power returns
    pub const DWELL: Duration = Duration::from_secs(10);
}

/// One-wire (DS18B20) constants
pub mod onewire {
    /// Per-device data file
    pub const SLAVE_FILE: &str = "w1_slave";

    /// Bus master enumeration file, relative to the bus root
    pub const MASTER_SLAVES: &str = "devices/w1_bus_master1/w1_master_slaves";

    /// Raw temperature marker inside `w1_slave`
    pub const TEMP_MARKER: &str = "t=";

    /// Presence re-checks (each preceded by a power cycle) at discovery
    pub const DISCOVERY_ATTEMPTS: u32 = 3;

    /// Bus ids look like `28-0316a2795aff`
    pub const ID_PATTERN: &str = r"^[0-9a-f]{2}-[0-9a-f]{12}$";
}

/// DHT22 constants
pub mod dht {
    use super::Duration;

    /// Driver attempts per read before giving up
    pub const MAX_ATTEMPTS: u32 = 10;

    /// The sensor needs ~2s between conversions
    pub const RETRY_DELAY: Duration = Duration::from_secs(2);

    /// IIO device name prefix
    pub const IIO_NAME_PREFIX: &str = "dht";

    pub const TEMP_INPUT: &str = "in_temp_input";
    pub const HUMIDITY_INPUT: &str = "in_humidityrelative_input";
}

/// Millidegree / milli-percent conversion used by sysfs sensor files
pub mod temperature {
    pub const MILLIDEGREE_DIVISOR: f64 = 1000.0;
}

/// Defaults written into a freshly generated settings file
pub mod defaults {
    pub const BRIDGE_NAME: &str = "IOT Home Agent";
    pub const BRIDGE_MODEL: &str = "Raspberry Pi";
    pub const MANUFACTURER: &str = "homeagent";
    pub const UPDATE_INTERVAL_SECS: u64 = 60;
    pub const DHT_NAME: &str = "DHT22";
    pub const DHT_PIN: u8 = 7;
    pub const DHT_VCC_PIN: u8 = 13;
    pub const ONEWIRE_VCC_PIN: u8 = 11;
}
