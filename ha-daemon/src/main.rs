//! homeagent daemon (homeagentd)
//!
//! Exposes relays, a DHT22, DS18B20 probes and LAN smart plugs attached to
//! a Raspberry Pi as accessories of a home-automation bridge.
//!
//! # Startup
//! - Logging (journald when available, stdout otherwise)
//! - Configuration (a template is written on first run)
//! - GPIO, device registry, accessory registration
//! - Sensor pollers and the bridge adapter socket
//! - Runs until SIGINT/SIGTERM, then stops pollers and removes the socket

mod server;

use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{reload, Registry};

use ha_core::constants::paths::JOURNALD_SOCKET;
use ha_core::{
    default_settings_path, load_settings, spawn_dht_poller, spawn_onewire_poller, AccessoryBridge,
    CommandRouter, DeviceRegistry, LoadOutcome, LocalBridge, Settings, Shutdown, SysfsGpio,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable holding the log filter
const LOG_ENV: &str = "HOMEAGENT_LOG";

#[derive(Debug, Parser)]
#[command(name = "homeagentd", version, about = "IOT home agent: relays, sensors and smart plugs as accessories")]
struct Cli {
    /// Settings file (default: settings.json next to the executable)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Bridge adapter socket, overrides the configured one
    #[arg(short, long, value_name = "PATH")]
    socket: Option<PathBuf>,

    /// Validate the configuration, print a summary and exit
    #[arg(long)]
    check: bool,
}

type LogHandle = reload::Handle<EnvFilter, Registry>;

/// Install the global subscriber. The returned handle lets the settings'
/// debug flag raise the level once the file has been read.
fn init_logging() -> (LogHandle, bool) {
    let level = std::env::var(LOG_ENV).unwrap_or_else(|_| "info".to_string());
    let (filter, handle) = reload::Layer::new(EnvFilter::new(&level));

    let journald = if Path::new(JOURNALD_SOCKET).exists() {
        match tracing_journald::layer() {
            Ok(layer) => Some(layer),
            Err(e) => {
                eprintln!("Failed to create journald layer: {}, falling back to stdout", e);
                None
            }
        }
    } else {
        None
    };

    let use_journald = journald.is_some();
    let registry = tracing_subscriber::registry().with(filter);
    match journald {
        Some(layer) => registry.with(layer).init(),
        None => registry
            .with(tracing_subscriber::fmt::layer().with_target(false).with_level(true))
            .init(),
    }

    (handle, use_journald)
}

fn install_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());

        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        // stderr ends up in the journal when running as a service
        eprintln!("PANIC at {}: {}", location, message);
    }));
}

fn print_summary(path: &Path, settings: &Settings) {
    println!("Configuration {} is valid", path.display());
    println!("  bridge:         {} ({})", settings.bridge.name, settings.bridge.model);
    println!("  socket:         {}", settings.bridge.socket_path.display());
    let count = |enabled: bool, n: usize| if enabled { n.to_string() } else { "disabled".to_string() };
    println!("  relays:         {}", count(settings.relays.enabled, settings.relays.devices.len()));
    println!("  smart switches: {}", count(settings.smart_switches.enabled, settings.smart_switches.devices.len()));
    println!("  dht22:          {}", count(settings.dht.enabled, 1));
    println!("  one-wire:       {}", count(settings.onewire.enabled, settings.onewire.sensors.len()));
}

async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("SIGNAL: Received SIGINT"),
                _ = term.recv() => info!("SIGNAL: Received SIGTERM"),
            }
        }
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to wait for SIGINT: {}", e);
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    install_panic_hook();
    let cli = Cli::parse();

    let (log_handle, use_journald) = init_logging();
    info!("Welcome to IOT Home Agent v{}", VERSION);
    info!("Logging to {}", if use_journald { "systemd journal" } else { "stdout" });

    // Configuration
    let config_path = match cli.config {
        Some(path) => path,
        None => default_settings_path()?,
    };
    let mut settings = match load_settings(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?
    {
        LoadOutcome::Loaded(settings) => settings,
        LoadOutcome::CreatedTemplate(path) => {
            info!("Created settings file {}", path.display());
            info!("Edit the configuration and run this program again");
            return Ok(());
        }
    };

    if settings.debug {
        if let Err(e) = log_handle.reload(EnvFilter::new("debug")) {
            warn!("Could not raise log level: {}", e);
        }
        warn!("!!! WARNING !!! Developer debug logging is turned on");
        debug!("{:#?}", settings);
    }

    if let Some(socket) = cli.socket {
        settings.bridge.socket_path = socket;
    }

    settings.validate().context("invalid configuration")?;
    info!("Settings loaded from {}", config_path.display());

    if cli.check {
        print_summary(&config_path, &settings);
        return Ok(());
    }

    // Hardware and devices
    info!("Initializing GPIO interface at {}", settings.gpio.sysfs_root.display());
    let gpio = Arc::new(SysfsGpio::new(&settings.gpio.sysfs_root));
    let registry = Arc::new(DeviceRegistry::new(&settings, gpio));
    let bridge = Arc::new(LocalBridge::new(&settings.bridge.name, &settings.bridge.model));
    let dyn_bridge: Arc<dyn AccessoryBridge> = bridge.clone();

    // Relay reads and one-wire discovery block, possibly for a long time
    let registered = {
        let registry = registry.clone();
        let bridge = dyn_bridge.clone();
        tokio::task::spawn_blocking(move || registry.register_accessories(bridge.as_ref()))
            .await
            .context("accessory registration panicked")?
    };

    if !registry.smart_switches().is_empty() {
        let registry = registry.clone();
        let bridge = dyn_bridge.clone();
        tokio::spawn(async move { registry.refresh_smart_switches(bridge.as_ref()).await });
    }

    // Pollers
    let shutdown = Shutdown::new();
    let mut pollers = Vec::new();
    if let (Some(dht), Some(serial)) = (registry.dht(), registry.dht_serial()) {
        pollers.push(spawn_dht_poller(
            dht,
            serial,
            dyn_bridge.clone(),
            settings.dht.update_interval(),
            shutdown.clone(),
        ));
    }
    if let Some(onewire) = registry.onewire() {
        pollers.push(spawn_onewire_poller(
            onewire,
            dyn_bridge.clone(),
            settings.onewire.update_interval(),
            shutdown.clone(),
        ));
    }

    // Bridge adapter
    let ctx = Arc::new(server::ServerContext {
        bridge: bridge.clone(),
        router: CommandRouter::new(registry.clone(), dyn_bridge.clone()),
    });
    let socket_path = settings.bridge.socket_path.clone();
    let mut server = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { server::run_server(&socket_path, ctx, shutdown).await })
    };

    info!("All functions loaded! {} accessories on bridge '{}'", registered, settings.bridge.name);

    // A server that dies early (bind failure) ends the daemon too
    let finished = tokio::select! {
        _ = wait_for_signal() => None,
        result = &mut server => Some(result),
    };

    info!("SHUTDOWN: stopping pollers and bridge adapter");
    shutdown.trigger();
    for poller in pollers {
        let _ = poller.await;
    }

    let result = match finished {
        Some(result) => result,
        None => server.await,
    };
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!("Server error: {:#}", e);
            return Err(e);
        }
        Err(e) => error!("Server task failed: {}", e),
    }

    info!("SHUTDOWN: Daemon terminated gracefully");
    Ok(())
}
