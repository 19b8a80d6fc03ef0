use btleplug::{
    api::{BDAddr, Central, Characteristic, Manager as _, Peripheral as _, ScanFilter},
    platform::{Manager, Peripheral},
};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{sync::Mutex, time::timeout};
use tracing::{debug, info};

use crate::{
    error::{MonitorError, Result},
    types::{ConnectionParams, DeviceProfile, SensorInfo},
};

/// BLE manager for cycling sensor discovery and connection
pub struct BleManager {
    manager: Manager,
    peripherals: Arc<Mutex<HashMap<BDAddr, Peripheral>>>,
}

impl BleManager {
    /// Create a new BLE manager
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Ble`] if the Bluetooth adapter cannot be
    /// initialized.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await?;

        Ok(Self {
            manager,
            peripherals: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Scan for nearby peripherals and report them all
    ///
    /// No service filter is applied: the caller classifies each result with
    /// [`SensorInfo::profile`] and decides what to connect to, which lets a
    /// scan listing also show the peripherals that were rejected.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::DeviceNotFound`] if no Bluetooth adapter is
    /// available, or [`MonitorError::Ble`] for other Bluetooth failures.
    pub async fn scan_for_sensors(&self, params: &ConnectionParams) -> Result<Vec<SensorInfo>> {
        info!("Starting scan for cycling sensors...");

        let adapters = self.manager.adapters().await?;
        if adapters.is_empty() {
            return Err(MonitorError::DeviceNotFound);
        }

        let central = &adapters[0];

        central.start_scan(ScanFilter::default()).await?;

        tokio::time::sleep(Duration::from_millis(params.scan_timeout_ms)).await;

        central.stop_scan().await?;

        let peripherals = central.peripherals().await?;
        let mut sensors = Vec::new();
        for peripheral in peripherals {
            let sensor_info = Self::extract_sensor_info(&peripheral).await;

            if sensor_info.is_candidate() {
                info!(
                    "Found {}: {} (RSSI {})",
                    sensor_info.profile(),
                    sensor_info.name,
                    sensor_info.rssi
                );
            }

            self.peripherals
                .lock()
                .await
                .insert(peripheral.address(), peripheral);

            sensors.push(sensor_info);
        }

        info!(
            "Scan completed. {} peripheral(s), {} recognized sensor(s)",
            sensors.len(),
            sensors.iter().filter(|s| s.is_candidate()).count()
        );
        Ok(sensors)
    }

    /// Connect to a scanned peripheral and subscribe to its measurement stream
    ///
    /// The profile decided from advertisement data selects which GATT
    /// service and characteristic to look for. When the advertisement was
    /// inconclusive, classification is retried once against the full
    /// discovered service table before giving up.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::DeviceNotFound`] if the peripheral is no
    /// longer known, [`MonitorError::Timeout`] if connecting times out,
    /// [`MonitorError::UnknownProfile`] if no known profile matches, or
    /// [`MonitorError::ServiceNotFound`] if the expected GATT entries are
    /// missing after discovery.
    pub async fn connect_to_sensor(
        &self,
        sensor_info: &SensorInfo,
        params: &ConnectionParams,
    ) -> Result<SensorConnection> {
        info!("Connecting to sensor: {}", sensor_info.name);

        let address = sensor_info
            .mac_address
            .as_deref()
            .ok_or(MonitorError::DeviceNotFound)?;

        let peripherals = self.peripherals.lock().await;
        let peripheral = peripherals
            .iter()
            .find(|(addr, _)| addr.to_string() == address)
            .map(|(_, p)| p.clone())
            .ok_or(MonitorError::DeviceNotFound)?;
        drop(peripherals);

        let connect_future = peripheral.connect();
        timeout(Duration::from_millis(params.timeout_ms), connect_future)
            .await
            .map_err(|_| MonitorError::Timeout {
                timeout_ms: params.timeout_ms,
            })?
            .map_err(|e| MonitorError::ConnectionFailed(e.to_string()))?;

        peripheral.discover_services().await?;

        let mut profile = sensor_info.profile();
        if profile == DeviceProfile::Unknown {
            // Advertisement data can omit the service list; the discovered
            // GATT table is authoritative.
            let discovered: Vec<String> = peripheral
                .services()
                .iter()
                .map(|s| s.uuid.to_string())
                .collect();
            profile = DeviceProfile::classify(&discovered, &sensor_info.name);
            debug!("Refined classification after discovery: {profile}");
        }

        if profile == DeviceProfile::Unknown {
            peripheral.disconnect().await.ok();
            return Err(MonitorError::UnknownProfile {
                name: sensor_info.name.clone(),
            });
        }

        let measurement_char = Self::resolve_measurement_char(&peripheral, profile)?;

        peripheral.subscribe(&measurement_char).await?;

        info!(
            "Successfully connected to {} as {}",
            sensor_info.name, profile
        );

        Ok(SensorConnection {
            peripheral,
            measurement_char,
            profile,
        })
    }

    /// Locate the measurement characteristic for `profile` by UUID substring
    ///
    /// Vendor firmware pads the 128-bit UUID suffix inconsistently, so both
    /// the service and characteristic are matched on their short-code
    /// fragment rather than compared for equality.
    fn resolve_measurement_char(
        peripheral: &Peripheral,
        profile: DeviceProfile,
    ) -> Result<Characteristic> {
        let (Some(service_fragment), Some(char_fragment)) =
            (profile.service_fragment(), profile.characteristic_fragment())
        else {
            return Err(MonitorError::Protocol(
                "unknown profile has no measurement characteristic".to_string(),
            ));
        };

        let services = peripheral.services();
        let service = services
            .iter()
            .find(|s| s.uuid.to_string().contains(service_fragment))
            .ok_or_else(|| {
                MonitorError::ServiceNotFound(format!("service containing \"{service_fragment}\""))
            })?;

        service
            .characteristics
            .iter()
            .find(|c| c.uuid.to_string().contains(char_fragment))
            .cloned()
            .ok_or_else(|| {
                MonitorError::ServiceNotFound(format!(
                    "characteristic containing \"{char_fragment}\""
                ))
            })
    }

    /// Extract sensor information from BLE advertisement properties
    async fn extract_sensor_info(peripheral: &Peripheral) -> SensorInfo {
        if let Ok(Some(properties)) = peripheral.properties().await {
            let name = properties.local_name.clone().unwrap_or_default();
            let rssi = properties.rssi.unwrap_or(0);
            let service_uuids = properties
                .services
                .iter()
                .map(std::string::ToString::to_string)
                .collect();

            SensorInfo {
                name,
                mac_address: Some(properties.address.to_string()),
                rssi,
                service_uuids,
            }
        } else {
            SensorInfo::new(String::new(), 0)
        }
    }
}

/// Active, subscribed connection to a cycling sensor
pub struct SensorConnection {
    peripheral: Peripheral,
    measurement_char: Characteristic,
    profile: DeviceProfile,
}

impl SensorConnection {
    /// Profile decided for this connection
    #[must_use]
    pub const fn profile(&self) -> DeviceProfile {
        self.profile
    }

    /// The subscribed measurement characteristic
    #[must_use]
    pub const fn measurement_char(&self) -> &Characteristic {
        &self.measurement_char
    }

    /// Clone of the underlying peripheral, for the notification task
    #[must_use]
    pub fn peripheral(&self) -> Peripheral {
        self.peripheral.clone()
    }

    /// Check if the sensor is still connected
    pub async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    /// Unsubscribe and disconnect from the sensor
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Ble`] if disconnection fails. A failed
    /// unsubscribe is ignored; the disconnect tears the subscription down
    /// anyway.
    pub async fn disconnect(&self) -> Result<()> {
        self.peripheral.unsubscribe(&self.measurement_char).await.ok();
        self.peripheral.disconnect().await?;
        Ok(())
    }

    /// Get the sensor's address
    #[must_use]
    pub fn address(&self) -> BDAddr {
        self.peripheral.address()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ble_manager_creation() {
        let manager = BleManager::new().await;
        assert!(manager.is_ok());
    }
}
