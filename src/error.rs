use thiserror::Error;

/// Errors that can occur when working with BLE cycling sensors
#[derive(Error, Debug)]
pub enum MonitorError {
    /// Bluetooth Low Energy related errors
    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),

    /// No usable sensor found during scanning
    #[error("No cycling sensor found")]
    DeviceNotFound,

    /// Device connection failed
    #[error("Failed to connect to sensor: {0}")]
    ConnectionFailed(String),

    /// Device disconnected unexpectedly
    #[error("Sensor disconnected")]
    Disconnected,

    /// Advertised services and name matched none of the known profiles
    ///
    /// Raised at connection time; a session is never started against an
    /// unclassified peripheral.
    #[error("Unrecognized sensor \"{name}\" - no known service advertised")]
    UnknownProfile {
        /// Advertised name of the rejected peripheral
        name: String,
    },

    /// Expected GATT service or characteristic missing on the device
    #[error("Service or characteristic not found: {0}")]
    ServiceNotFound(String),

    /// Operation timeout
    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("Other error: {0}")]
    Other(String),
}

/// Result type for sensor monitoring operations
pub type Result<T> = std::result::Result<T, MonitorError>;

impl MonitorError {
    /// Check if this error indicates a connection issue
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Ble(_) | Self::ConnectionFailed(_) | Self::Disconnected | Self::DeviceNotFound
        )
    }

    /// Check if this error is recoverable by retrying the operation
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::DeviceNotFound)
    }

    /// Check if this error means the peripheral is fundamentally unusable
    ///
    /// Classification and GATT-table failures will not go away on retry
    /// against the same device.
    #[must_use]
    pub const fn is_unsupported_device(&self) -> bool {
        matches!(self, Self::UnknownProfile { .. } | Self::ServiceNotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let connection_error = MonitorError::ConnectionFailed("test".to_string());
        assert!(connection_error.is_connection_error());
        assert!(!connection_error.is_recoverable());
        assert!(!connection_error.is_unsupported_device());

        let timeout_error = MonitorError::Timeout { timeout_ms: 5000 };
        assert!(!timeout_error.is_connection_error());
        assert!(timeout_error.is_recoverable());

        let profile_error = MonitorError::UnknownProfile {
            name: "Mystery Widget".to_string(),
        };
        assert!(!profile_error.is_connection_error());
        assert!(!profile_error.is_recoverable());
        assert!(profile_error.is_unsupported_device());
    }

    #[test]
    fn test_error_display() {
        let error = MonitorError::UnknownProfile {
            name: "Garmin Watch".to_string(),
        };
        let error_string = format!("{error}");
        assert!(error_string.contains("Unrecognized sensor"));
        assert!(error_string.contains("Garmin Watch"));
    }
}
