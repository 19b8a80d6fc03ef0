use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{
    CADENCE_SPEED_SERVICE, CSC_MEASUREMENT_CHAR, CYCLING_POWER_SERVICE, HEART_RATE_MEASUREMENT_CHAR,
    HEART_RATE_SERVICE, POWER_MEASUREMENT_CHAR, XDS_POWER_SERVICE,
};

/// Wire format spoken by a connected peripheral
///
/// The profile is fixed once a connection is established and selects which
/// payload parser and cadence time base are active for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceProfile {
    /// XDS proprietary power meter (service `0x1828`)
    XdsPower,
    /// Standard Cycling Power Service meter (service `0x1818`)
    StandardPower,
    /// Heart rate strap (service `0x180D`)
    HeartRate,
    /// Cycling speed/cadence sensor (service `0x1816`)
    CadenceSpeed,
    /// No known service or name pattern matched
    Unknown,
}

/// Known service fragments in match priority order
///
/// A peripheral advertising more than one of these is classified by the
/// first fragment that matches, so the proprietary XDS service outranks the
/// standard profiles.
const SERVICE_PRIORITY: [(&str, DeviceProfile); 4] = [
    (XDS_POWER_SERVICE, DeviceProfile::XdsPower),
    (CYCLING_POWER_SERVICE, DeviceProfile::StandardPower),
    (HEART_RATE_SERVICE, DeviceProfile::HeartRate),
    (CADENCE_SPEED_SERVICE, DeviceProfile::CadenceSpeed),
];

impl DeviceProfile {
    /// Classify a peripheral from its advertised service UUIDs and name
    ///
    /// Service UUIDs are matched by substring against the known 16-bit
    /// service codes to tolerate vendor suffix variance in the full 128-bit
    /// strings. When no service matches, an advertised name containing
    /// `"XDS"` (case-sensitive) selects the proprietary profile.
    #[must_use]
    pub fn classify(service_uuids: &[String], name: &str) -> Self {
        for (fragment, profile) in SERVICE_PRIORITY {
            if service_uuids.iter().any(|uuid| uuid.contains(fragment)) {
                return profile;
            }
        }

        if name.contains("XDS") {
            return Self::XdsPower;
        }

        Self::Unknown
    }

    /// UUID fragment of the GATT service carrying this profile's data
    ///
    /// Returns `None` for [`DeviceProfile::Unknown`].
    #[must_use]
    pub const fn service_fragment(self) -> Option<&'static str> {
        match self {
            Self::XdsPower => Some(XDS_POWER_SERVICE),
            Self::StandardPower => Some(CYCLING_POWER_SERVICE),
            Self::HeartRate => Some(HEART_RATE_SERVICE),
            Self::CadenceSpeed => Some(CADENCE_SPEED_SERVICE),
            Self::Unknown => None,
        }
    }

    /// UUID fragment of the measurement characteristic to subscribe to
    #[must_use]
    pub const fn characteristic_fragment(self) -> Option<&'static str> {
        match self {
            Self::XdsPower | Self::StandardPower => Some(POWER_MEASUREMENT_CHAR),
            Self::HeartRate => Some(HEART_RATE_MEASUREMENT_CHAR),
            Self::CadenceSpeed => Some(CSC_MEASUREMENT_CHAR),
            Self::Unknown => None,
        }
    }
}

impl fmt::Display for DeviceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::XdsPower => write!(f, "XDS Power Meter"),
            Self::StandardPower => write!(f, "Cycling Power Meter"),
            Self::HeartRate => write!(f, "Heart Rate Strap"),
            Self::CadenceSpeed => write!(f, "Cadence/Speed Sensor"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Information about a discovered peripheral
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorInfo {
    /// Advertised local name, empty when the peripheral is anonymous
    pub name: String,
    /// Device MAC address
    pub mac_address: Option<String>,
    /// Signal strength (RSSI)
    pub rssi: i16,
    /// Full UUID strings of the advertised services
    pub service_uuids: Vec<String>,
}

impl SensorInfo {
    /// Create new sensor info
    #[must_use]
    pub const fn new(name: String, rssi: i16) -> Self {
        Self {
            name,
            mac_address: None,
            rssi,
            service_uuids: Vec::new(),
        }
    }

    /// Classify this peripheral into a [`DeviceProfile`]
    #[must_use]
    pub fn profile(&self) -> DeviceProfile {
        DeviceProfile::classify(&self.service_uuids, &self.name)
    }

    /// Whether this peripheral looks like a sensor worth connecting to
    #[must_use]
    pub fn is_candidate(&self) -> bool {
        self.profile() != DeviceProfile::Unknown
    }
}

/// Latest decoded and aggregated values for live display
///
/// Published by the telemetry engine after every payload and read by the
/// rendering loop through a shared lock. A reader always observes a complete
/// update, never a half-written one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DisplaySnapshot {
    /// Instantaneous power in watts
    pub power: i32,
    /// Session average power in watts
    pub avg_power: u32,
    /// Session maximum power in watts
    pub max_power: u16,
    /// Instantaneous cadence in RPM
    pub cadence: u32,
    /// Session average cadence in RPM (idle samples excluded)
    pub avg_cadence: u32,
    /// Left pedal balance percentage
    pub left_balance: u16,
    /// Right pedal balance percentage
    pub right_balance: u16,
    /// Crank angle in degrees
    pub crank_angle: i16,
    /// Heart rate in beats per minute
    pub heart_rate: u16,
    /// Seconds elapsed since the session started
    pub elapsed_secs: u64,
}

/// Connection parameters
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    /// Connection timeout in milliseconds
    pub timeout_ms: u64,
    /// Scan timeout in milliseconds
    pub scan_timeout_ms: u64,
    /// Retry attempts for scanning
    pub retry_attempts: u32,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            scan_timeout_ms: 5_000,
            retry_attempts: 3,
        }
    }
}
