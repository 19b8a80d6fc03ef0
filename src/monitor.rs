use crate::{
    ble::{BleManager, SensorConnection},
    error::{MonitorError, Result},
    telemetry::{SnapshotHandle, TelemetryEngine},
    types::{ConnectionParams, DeviceProfile, DisplaySnapshot, SensorInfo},
};
use btleplug::api::Peripheral as _;
use futures::stream::StreamExt;
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex as StdMutex, OnceLock,
    },
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Poll period of the background connection watchdog
const WATCHDOG_POLL_MS: u64 = 100;

/// Milliseconds since the process-wide monotonic epoch
///
/// The epoch is fixed the first time any caller asks; all cadence timing and
/// session clocks share it.
fn now_ms() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let elapsed = EPOCH.get_or_init(Instant::now).elapsed();
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// High-level interface for monitoring a BLE cycling sensor
///
/// `SensorMonitor` ties the pieces together: it scans for peripherals,
/// classifies them into a [`DeviceProfile`], connects and subscribes to the
/// matching measurement characteristic, and runs the telemetry engine on a
/// background task that decodes every notification into the shared display
/// snapshot.
///
/// The monitor never writes to the peripheral; the data path is strictly
/// sensor-to-host.
///
/// # Examples
///
/// ```no_run
/// use xdsmon::SensorMonitor;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let monitor = SensorMonitor::connect_first().await?;
///     println!("Connected to {} ({})", monitor.sensor_info().name, monitor.profile());
///
///     monitor.start_monitoring().await?;
///
///     let snap = monitor.snapshot();
///     println!("{} W at {} RPM", snap.power, snap.cadence);
///
///     monitor.stop();
///     Ok(())
/// }
/// ```
pub struct SensorMonitor {
    connection: Arc<Mutex<Option<SensorConnection>>>,
    sensor_info: SensorInfo,
    profile: DeviceProfile,
    snapshot: SnapshotHandle,
    // Engine is handed to the notification task on start; single writer.
    engine: Arc<StdMutex<Option<TelemetryEngine>>>,
    stop: Arc<AtomicBool>,
    last_data_ms: Arc<AtomicU64>,
    monitoring_active: Arc<AtomicBool>,
}

impl SensorMonitor {
    /// Connect to the best available cycling sensor with default settings
    ///
    /// Scans for peripherals, keeps the ones that classify into a known
    /// profile, and connects to the one with the strongest signal.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::DeviceNotFound`] if the scan produced no
    /// recognizable sensor, or any connection error from the underlying BLE
    /// stack.
    pub async fn connect_first() -> Result<Self> {
        Self::connect_first_with_params(ConnectionParams::default()).await
    }

    /// Connect to the best available cycling sensor with custom parameters
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::DeviceNotFound`] if no recognizable sensor
    /// was found within the configured retry attempts, or any BLE
    /// connection error.
    pub async fn connect_first_with_params(params: ConnectionParams) -> Result<Self> {
        let ble_manager = BleManager::new().await?;

        let mut attempt = 0;
        let best = loop {
            let sensors = ble_manager.scan_for_sensors(&params).await?;

            let mut candidates: Vec<SensorInfo> =
                sensors.into_iter().filter(SensorInfo::is_candidate).collect();
            candidates.sort_by(|a, b| b.rssi.cmp(&a.rssi));

            if let Some(best) = candidates.into_iter().next() {
                break best;
            }

            attempt += 1;
            if attempt >= params.retry_attempts {
                return Err(MonitorError::DeviceNotFound);
            }
            info!("No sensor found, rescanning ({attempt}/{})", params.retry_attempts);
        };

        Self::connect(&ble_manager, best, &params).await
    }

    /// Connect to a specific sensor from an earlier scan
    ///
    /// Runs a fresh scan to re-resolve the peripheral before connecting, so
    /// the `sensor_info` may come from a previous [`BleManager`] session.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::UnknownProfile`] if the peripheral cannot be
    /// classified, or any BLE connection error.
    pub async fn connect_to_sensor(
        sensor_info: SensorInfo,
        params: ConnectionParams,
    ) -> Result<Self> {
        let ble_manager = BleManager::new().await?;
        ble_manager.scan_for_sensors(&params).await?;
        Self::connect(&ble_manager, sensor_info, &params).await
    }

    async fn connect(
        ble_manager: &BleManager,
        sensor_info: SensorInfo,
        params: &ConnectionParams,
    ) -> Result<Self> {
        let connection = ble_manager.connect_to_sensor(&sensor_info, params).await?;
        let profile = connection.profile();

        let mut engine = TelemetryEngine::new();
        engine.begin_session(profile, now_ms());
        let snapshot = engine.snapshot_handle();

        Ok(Self {
            connection: Arc::new(Mutex::new(Some(connection))),
            sensor_info,
            profile,
            snapshot,
            engine: Arc::new(StdMutex::new(Some(engine))),
            stop: Arc::new(AtomicBool::new(false)),
            last_data_ms: Arc::new(AtomicU64::new(now_ms())),
            monitoring_active: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Information about the connected sensor
    #[must_use]
    pub const fn sensor_info(&self) -> &SensorInfo {
        &self.sensor_info
    }

    /// Profile decided for this connection
    #[must_use]
    pub const fn profile(&self) -> DeviceProfile {
        self.profile
    }

    /// Start streaming telemetry from the sensor
    ///
    /// Spawns the notification task that feeds every payload into the
    /// telemetry engine, plus a watchdog that polls the stop flag and the
    /// connection liveness every 100 ms and disconnects cleanly when asked
    /// to stop. Calling this more than once has no effect.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Disconnected`] if the connection is already
    /// gone, or [`MonitorError::Ble`] if the notification stream cannot be
    /// opened.
    pub async fn start_monitoring(&self) -> Result<()> {
        if self.monitoring_active.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let (peripheral, char_uuid) = {
            let guard = self.connection.lock().await;
            let conn = guard.as_ref().ok_or(MonitorError::Disconnected)?;
            (conn.peripheral(), conn.measurement_char().uuid)
        };

        let mut engine = self
            .engine
            .lock()
            .map_err(|_| MonitorError::Other("telemetry engine lock poisoned".to_string()))?
            .take()
            .ok_or_else(|| MonitorError::Other("monitoring already consumed engine".to_string()))?;

        let mut stream = peripheral.notifications().await?;

        let stop = Arc::clone(&self.stop);
        let last_data_ms = Arc::clone(&self.last_data_ms);
        tokio::spawn(async move {
            while let Some(notification) = stream.next().await {
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                if notification.uuid == char_uuid {
                    let now = now_ms();
                    last_data_ms.store(now, Ordering::Relaxed);
                    engine.on_payload(&notification.value, now);
                }
            }
            engine.end_session();
            debug!("Notification stream ended");
        });

        let connection = Arc::clone(&self.connection);
        let stop = Arc::clone(&self.stop);
        tokio::spawn(async move {
            let mut poll = tokio::time::interval(Duration::from_millis(WATCHDOG_POLL_MS));
            loop {
                poll.tick().await;

                if stop.load(Ordering::Relaxed) {
                    let conn = connection.lock().await.take();
                    if let Some(conn) = conn {
                        info!("Stop requested, disconnecting from sensor");
                        conn.disconnect().await.ok();
                    }
                    break;
                }

                let connected = match connection.lock().await.as_ref() {
                    Some(conn) => conn.is_connected().await,
                    None => false,
                };
                if !connected {
                    warn!("Sensor connection lost");
                    stop.store(true, Ordering::Relaxed);
                    break;
                }
            }
        });

        info!("Monitoring started ({})", self.profile);
        Ok(())
    }

    /// Copy of the latest display snapshot
    #[must_use]
    pub fn snapshot(&self) -> DisplaySnapshot {
        self.snapshot.read()
    }

    /// Handle to the shared snapshot, for a rendering loop
    #[must_use]
    pub fn snapshot_handle(&self) -> SnapshotHandle {
        self.snapshot.clone()
    }

    /// Milliseconds since the last notification arrived
    ///
    /// A sensor that stops pedaling goes quiet and eventually sleeps; a
    /// display layer can use this to show a "no data" notice. This is
    /// separate from the cadence estimator's 2500 ms stall rule.
    #[must_use]
    pub fn millis_since_data(&self) -> u64 {
        now_ms().saturating_sub(self.last_data_ms.load(Ordering::Relaxed))
    }

    /// Check if the sensor is still connected
    pub async fn is_connected(&self) -> bool {
        if let Some(conn) = self.connection.lock().await.as_ref() {
            conn.is_connected().await
        } else {
            false
        }
    }

    /// Request a graceful stop
    ///
    /// The watchdog task observes the flag within its next poll, then
    /// unsubscribes and disconnects. In-flight payload decodes complete
    /// normally.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Whether a stop was requested or the connection was lost
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Disconnect from the sensor immediately
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Ble`] if disconnection fails.
    pub async fn disconnect(&self) -> Result<()> {
        self.stop();
        let conn = self.connection.lock().await.take();
        if let Some(conn) = conn {
            conn.disconnect().await?;
        }
        Ok(())
    }
}

/// Disconnect on a background task when a runtime is available
///
/// Returns whether the cleanup task was spawned. A monitor dropped from a
/// non-async context has no runtime to spawn on; the connection is then
/// left to the OS teardown at process exit.
fn spawn_disconnect(connection: Arc<Mutex<Option<SensorConnection>>>) -> bool {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        return false;
    };

    handle.spawn(async move {
        let value = connection.lock().await.take();
        if let Some(conn) = value {
            let _ = conn.disconnect().await;
        }
    });
    true
}

impl Drop for SensorMonitor {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        spawn_disconnect(self.connection.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms_is_monotonic() {
        let a = now_ms();
        let b = now_ms();
        assert!(b >= a);
    }

    #[test]
    fn test_now_ms_advances() {
        let a = now_ms();
        std::thread::sleep(Duration::from_millis(5));
        assert!(now_ms() > a);
    }

    #[test]
    fn test_drop_cleanup_without_runtime_does_not_panic() {
        let connection: Arc<Mutex<Option<SensorConnection>>> = Arc::new(Mutex::new(None));
        assert!(!spawn_disconnect(connection));
    }

    #[tokio::test]
    async fn test_drop_cleanup_spawns_on_current_runtime() {
        let connection: Arc<Mutex<Option<SensorConnection>>> = Arc::new(Mutex::new(None));
        assert!(spawn_disconnect(connection));
    }
}
