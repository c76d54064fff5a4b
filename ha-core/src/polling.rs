//! Periodic sensor polling
//!
//! One task per sensor class. The first tick fires one full period after
//! start; the hardware work of each tick runs on the blocking pool and is
//! awaited, so ticks of one class never overlap.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::accessory::{AccessoryBridge, Characteristic};
use crate::hw::dht::{DhtSample, DhtSensor};
use crate::hw::onewire::OneWireManager;

/// Shared stop signal for the pollers
#[derive(Clone, Default)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves once [`trigger`](Self::trigger) has been called
    pub async fn wait(&self) {
        let mut notified = std::pin::pin!(self.notify.notified());
        notified.as_mut().enable();
        if self.is_triggered() {
            return;
        }
        notified.await;
    }
}

/// Read the DHT once and publish both values, sentinel included
pub fn dht_tick(sensor: &Mutex<DhtSensor>, serial: &str, bridge: &dyn AccessoryBridge) -> DhtSample {
    let sample = sensor.lock().poll();
    bridge.publish(serial, Characteristic::CurrentRelativeHumidity, sample.humidity.into());
    bridge.publish(serial, Characteristic::CurrentTemperature, sample.temperature.into());
    sample
}

/// Read every active probe and publish the ones that answered
pub fn onewire_tick(manager: &Mutex<OneWireManager>, bridge: &dyn AccessoryBridge) -> usize {
    let readings = manager.lock().poll();
    for (id, temperature) in &readings {
        bridge.publish(id, Characteristic::CurrentTemperature, (*temperature).into());
    }
    readings.len()
}

pub fn spawn_dht_poller(
    sensor: Arc<Mutex<DhtSensor>>,
    serial: String,
    bridge: Arc<dyn AccessoryBridge>,
    period: Duration,
    shutdown: Shutdown,
) -> JoinHandle<()> {
    spawn_poller("dht", period, shutdown, move || {
        let sample = dht_tick(&sensor, &serial, bridge.as_ref());
        debug!(
            "DHT tick: {:.1}°C {:.1}% (valid: {})",
            sample.temperature, sample.humidity, sample.valid
        );
    })
}

pub fn spawn_onewire_poller(
    manager: Arc<Mutex<OneWireManager>>,
    bridge: Arc<dyn AccessoryBridge>,
    period: Duration,
    shutdown: Shutdown,
) -> JoinHandle<()> {
    spawn_poller("onewire", period, shutdown, move || {
        let published = onewire_tick(&manager, bridge.as_ref());
        debug!("One-wire tick: {} readings published", published);
    })
}

fn spawn_poller<F>(name: &'static str, period: Duration, shutdown: Shutdown, tick: F) -> JoinHandle<()>
where
    F: Fn() + Send + Sync + 'static,
{
    let tick = Arc::new(tick);
    tokio::spawn(async move {
        info!("{} poller started (every {:?})", name, period);
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = ticker.tick() => {}
            }
            if shutdown.is_triggered() {
                break;
            }

            let tick = tick.clone();
            if let Err(e) = tokio::task::spawn_blocking(move || tick()).await {
                error!("{} poller tick panicked: {}", name, e);
            }
        }
        info!("{} poller stopped", name);
    })
}
