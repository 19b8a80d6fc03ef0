#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! # xdsmon 🚴
//!
//! A Rust library for monitoring XDS power meters and standard Bluetooth Low
//! Energy cycling sensors (cycling power, cadence/speed, heart rate).
//!
//! The library classifies a discovered peripheral from its advertised GATT
//! services, decodes each notification payload into physical quantities
//! (power, cadence, left/right balance, crank angle, heart rate), and keeps a
//! running session aggregate (max, average, elapsed time) for live display.
//!
//! ## Supported wire formats
//!
//! - **XDS proprietary power** (service `0x1828`): fixed little-endian layout
//!   with total/left/right power, crank angle, and a cumulative crank
//!   revolution counter. The crank counter is converted to RPM against the
//!   wall clock.
//! - **Standard cycling power** (CPS, service `0x1818`): flag-driven
//!   `0x2A63` measurement with instantaneous power and optional pedal power
//!   balance.
//! - **Heart rate** (HRS, service `0x180D`): `0x2A37` measurement, 8- or
//!   16-bit beats per minute.
//! - **Cadence/speed** (CSCS, service `0x1816`): `0x2A5B` measurement with a
//!   cumulative crank revolution counter timed in 1/1024-second ticks.
//!
//! ## Quick Start
//!
//! ```no_run
//! use xdsmon::SensorMonitor;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Discover the strongest recognized sensor and start streaming
//!     let monitor = SensorMonitor::connect_first().await?;
//!     monitor.start_monitoring().await?;
//!
//!     loop {
//!         tokio::time::sleep(std::time::Duration::from_millis(500)).await;
//!         let snap = monitor.snapshot();
//!         println!(
//!             "{} W | {} RPM | {}/{} balance",
//!             snap.power, snap.cadence, snap.left_balance, snap.right_balance
//!         );
//!         if !monitor.is_connected().await {
//!             break;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

/// Bluetooth Low Energy communication module
pub mod ble;
/// Error types and handling
pub mod error;
/// High-level sensor monitoring interface
pub mod monitor;
/// Payload layouts and per-format parsers
pub mod protocol;
/// Cadence estimation, session aggregation, and the telemetry engine
pub mod telemetry;
/// Type definitions and data structures
pub mod types;

// Re-export the main types for convenient usage
pub use error::{MonitorError, Result};
pub use monitor::SensorMonitor;
pub use protocol::DecodedSample;
pub use telemetry::{CadenceEstimator, SessionStats, SnapshotHandle, TelemetryEngine, TimeBase};
pub use types::{ConnectionParams, DeviceProfile, DisplaySnapshot, SensorInfo};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// XDS proprietary power service UUID fragment
///
/// XDS power meters expose their measurement stream under a service whose
/// UUID contains `1828`. Matching is done by substring against the full UUID
/// string because different firmware revisions pad the vendor suffix
/// differently.
pub const XDS_POWER_SERVICE: &str = "1828";

/// Standard Cycling Power Service (CPS) UUID fragment
pub const CYCLING_POWER_SERVICE: &str = "1818";

/// Heart Rate Service (HRS) UUID fragment
pub const HEART_RATE_SERVICE: &str = "180d";

/// Cycling Speed and Cadence Service (CSCS) UUID fragment
pub const CADENCE_SPEED_SERVICE: &str = "1816";

/// Cycling Power Measurement characteristic UUID fragment
///
/// Shared by the XDS proprietary service and standard CPS; the payload
/// layouts differ and are told apart by the owning service.
pub const POWER_MEASUREMENT_CHAR: &str = "2a63";

/// Heart Rate Measurement characteristic UUID fragment
pub const HEART_RATE_MEASUREMENT_CHAR: &str = "2a37";

/// CSC Measurement characteristic UUID fragment
pub const CSC_MEASUREMENT_CHAR: &str = "2a5b";
