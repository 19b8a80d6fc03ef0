use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

use crate::{
    protocol::{parse_csc, parse_heart_rate, parse_standard_power, parse_xds_power, DecodedSample},
    types::{DeviceProfile, DisplaySnapshot},
};

/// Maximum plausible cadence for the wall-clock estimator, in RPM
///
/// Values above this are measurement noise from jittery notification timing
/// and are clamped rather than rejected.
pub const WALL_CLOCK_RPM_LIMIT: u32 = 200;

/// Counter-stall timeout for the wall-clock estimator, in milliseconds
///
/// If the crank counter has not advanced for longer than this, the rider has
/// stopped pedaling and the displayed cadence drops to zero.
pub const STALL_TIMEOUT_MS: u64 = 2500;

/// Protocol ticks per minute (1024 ticks per second)
const TICKS_PER_MINUTE: u64 = 61_440;

const MS_PER_MINUTE: u64 = 60_000;

/// Difference between two 16-bit cumulative counter readings
///
/// The counters wrap at 65536, so the wrapped difference is
/// `65536 - prev + current`, which is exactly what two's-complement wrapping
/// subtraction computes. The result is always in `0..=65535`.
#[must_use]
pub const fn wraparound_delta(prev: u16, current: u16) -> u16 {
    current.wrapping_sub(prev)
}

/// Time base for cadence estimation, selected by the active profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeBase {
    /// Decode timestamps in wall-clock milliseconds (XDS profile)
    #[default]
    WallClock,
    /// The payload's own 1/1024-second event-time field (CSC profile)
    ProtocolTicks,
}

/// Time reference accompanying one crank counter reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeRef {
    /// Wall-clock milliseconds at decode time
    Millis(u64),
    /// The payload's 16-bit last-crank-event time in protocol ticks
    Ticks(u16),
}

/// Converts a cumulative crank revolution counter into instantaneous RPM
///
/// One estimator instance lives per session. The counter and its time
/// reference both wrap at 65536; both deltas are computed mod 65536. The
/// wall-clock base clamps to [`WALL_CLOCK_RPM_LIMIT`] and zeroes the display
/// after [`STALL_TIMEOUT_MS`] without counter movement. The protocol-tick
/// base has no independent stall timer and simply emits zero whenever the
/// counter does not advance.
#[derive(Debug)]
pub struct CadenceEstimator {
    time_base: TimeBase,
    first_sample: bool,
    last_revs: u16,
    last_ticks: u16,
    last_ms: u64,
    display_rpm: u32,
}

impl CadenceEstimator {
    /// Create an estimator for the given time base
    #[must_use]
    pub const fn new(time_base: TimeBase) -> Self {
        Self {
            time_base,
            first_sample: true,
            last_revs: 0,
            last_ticks: 0,
            last_ms: 0,
            display_rpm: 0,
        }
    }

    /// Reset to the start-of-session state, switching time base if needed
    pub const fn reset(&mut self, time_base: TimeBase) {
        *self = Self::new(time_base);
    }

    /// Active time base
    #[must_use]
    pub const fn time_base(&self) -> TimeBase {
        self.time_base
    }

    /// Feed one counter reading and return the cadence to display
    ///
    /// The first reading of a session only records state and yields zero.
    pub fn update(&mut self, revs: u16, time: TimeRef) -> u32 {
        match time {
            TimeRef::Millis(now_ms) => self.update_wall_clock(revs, now_ms),
            TimeRef::Ticks(event_ticks) => self.update_ticks(revs, event_ticks),
        }
    }

    fn update_wall_clock(&mut self, revs: u16, now_ms: u64) -> u32 {
        if self.first_sample {
            self.first_sample = false;
            self.last_revs = revs;
            self.last_ms = now_ms;
            self.display_rpm = 0;
            return 0;
        }

        let count_delta = wraparound_delta(self.last_revs, revs);
        let time_delta = now_ms.saturating_sub(self.last_ms);

        if count_delta > 0 && time_delta > 0 {
            let rpm = u64::from(count_delta) * MS_PER_MINUTE / time_delta;
            self.display_rpm = u32::try_from(rpm)
                .unwrap_or(WALL_CLOCK_RPM_LIMIT)
                .min(WALL_CLOCK_RPM_LIMIT);
            self.last_revs = revs;
            self.last_ms = now_ms;
        } else if count_delta == 0 && time_delta > STALL_TIMEOUT_MS {
            self.display_rpm = 0;
        }
        // Counter unchanged inside the stall window: hold the last value.

        self.display_rpm
    }

    fn update_ticks(&mut self, revs: u16, event_ticks: u16) -> u32 {
        if self.first_sample {
            self.first_sample = false;
            self.last_revs = revs;
            self.last_ticks = event_ticks;
            self.display_rpm = 0;
            return 0;
        }

        let count_delta = wraparound_delta(self.last_revs, revs);
        let tick_delta = wraparound_delta(self.last_ticks, event_ticks);

        if count_delta > 0 && tick_delta > 0 {
            let rpm = u64::from(count_delta) * TICKS_PER_MINUTE / u64::from(tick_delta);
            self.display_rpm = u32::try_from(rpm).unwrap_or(u32::MAX);
            self.last_revs = revs;
            self.last_ticks = event_ticks;
        } else {
            // No crank event since the last notification. This base has no
            // stall timer, so report stopped immediately.
            self.display_rpm = 0;
        }

        self.display_rpm
    }
}

/// Running session statistics
///
/// Zero cadence samples are excluded from the cadence average so that it
/// reflects pedaling effort rather than idle time.
#[derive(Debug)]
pub struct SessionStats {
    sum_power: u64,
    power_samples: u32,
    sum_cadence: u64,
    cadence_samples: u32,
    max_power: u16,
    started_ms: u64,
}

impl SessionStats {
    /// Create statistics for a session starting at `now_ms`
    #[must_use]
    pub const fn new(now_ms: u64) -> Self {
        Self {
            sum_power: 0,
            power_samples: 0,
            sum_cadence: 0,
            cadence_samples: 0,
            max_power: 0,
            started_ms: now_ms,
        }
    }

    /// Clear all accumulators and restart the session clock
    pub const fn reset(&mut self, now_ms: u64) {
        *self = Self::new(now_ms);
    }

    /// Record one power sample in watts
    pub const fn record_power(&mut self, watts: u16) {
        self.sum_power += watts as u64;
        self.power_samples += 1;
        if watts > self.max_power {
            self.max_power = watts;
        }
    }

    /// Record one cadence sample in RPM; zero samples are ignored
    pub const fn record_cadence(&mut self, rpm: u32) {
        if rpm > 0 {
            self.sum_cadence += rpm as u64;
            self.cadence_samples += 1;
        }
    }

    /// Session average power, zero when no samples were recorded
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn average_power(&self) -> u32 {
        if self.power_samples == 0 {
            0
        } else {
            (self.sum_power / self.power_samples as u64) as u32
        }
    }

    /// Session average cadence over non-zero samples
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn average_cadence(&self) -> u32 {
        if self.cadence_samples == 0 {
            0
        } else {
            (self.sum_cadence / self.cadence_samples as u64) as u32
        }
    }

    /// Maximum power seen this session
    #[must_use]
    pub const fn max_power(&self) -> u16 {
        self.max_power
    }

    /// Whole seconds elapsed since the session started
    #[must_use]
    pub const fn elapsed_secs(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.started_ms) / 1000
    }
}

/// Thread-safe holder of the latest [`DisplaySnapshot`]
///
/// Cloned handles share one snapshot. The telemetry engine publishes a full
/// snapshot after each payload; readers copy it out under the same lock, so
/// a half-updated snapshot is never observable.
#[derive(Debug, Clone, Default)]
pub struct SnapshotHandle {
    inner: Arc<Mutex<DisplaySnapshot>>,
}

impl SnapshotHandle {
    /// Copy out the latest snapshot
    #[must_use]
    pub fn read(&self) -> DisplaySnapshot {
        *self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, snapshot: DisplaySnapshot) {
        *self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = snapshot;
    }
}

/// Dispatcher state over the life of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No active profile; payloads are dropped
    Idle,
    /// Profile selected and session counters reset, awaiting the first payload
    Profiled,
    /// At least one payload decoded this session
    Streaming,
}

/// Routes payloads to the active parser and maintains the session state
///
/// The engine is the `on_payload` hot path: it decodes the notification with
/// the parser matching the active profile, merges present fields into the
/// live display values (absent fields keep their prior value), feeds the
/// cadence estimator and session statistics, and publishes a consistent
/// snapshot. Malformed payloads are dropped without touching any state; they
/// never end the session.
///
/// The engine itself is single-writer: the BLE notification task owns it
/// exclusively and readers only touch the shared [`SnapshotHandle`].
#[derive(Debug)]
pub struct TelemetryEngine {
    state: EngineState,
    profile: DeviceProfile,
    cadence: CadenceEstimator,
    stats: SessionStats,
    live: DisplaySnapshot,
    snapshot: SnapshotHandle,
}

impl Default for TelemetryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryEngine {
    /// Create an idle engine with no active profile
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: EngineState::Idle,
            profile: DeviceProfile::Unknown,
            cadence: CadenceEstimator::new(TimeBase::WallClock),
            stats: SessionStats::new(0),
            live: DisplaySnapshot::default(),
            snapshot: SnapshotHandle::default(),
        }
    }

    /// Current dispatcher state
    #[must_use]
    pub const fn state(&self) -> EngineState {
        self.state
    }

    /// Active device profile
    #[must_use]
    pub const fn profile(&self) -> DeviceProfile {
        self.profile
    }

    /// Handle shared with the rendering loop
    #[must_use]
    pub fn snapshot_handle(&self) -> SnapshotHandle {
        self.snapshot.clone()
    }

    /// Copy of the latest published snapshot
    #[must_use]
    pub fn current_snapshot(&self) -> DisplaySnapshot {
        self.snapshot.read()
    }

    /// Start a monitoring session for `profile` at time `now_ms`
    ///
    /// Resets the cadence estimator, session statistics, and the published
    /// snapshot. The time base follows the profile: XDS counters are timed
    /// against the wall clock, CSC counters against their own event-time
    /// field.
    pub fn begin_session(&mut self, profile: DeviceProfile, now_ms: u64) {
        let time_base = match profile {
            DeviceProfile::CadenceSpeed => TimeBase::ProtocolTicks,
            _ => TimeBase::WallClock,
        };

        self.profile = profile;
        self.cadence.reset(time_base);
        self.stats.reset(now_ms);
        self.live = DisplaySnapshot::default();
        self.snapshot.publish(self.live);
        self.state = EngineState::Profiled;
    }

    /// End the session and return to the idle state
    pub const fn end_session(&mut self) {
        self.state = EngineState::Idle;
    }

    /// Decode one notification payload received at `now_ms`
    ///
    /// Never fails: unroutable or malformed payloads are logged at debug
    /// level and dropped with all session state untouched.
    pub fn on_payload(&mut self, data: &[u8], now_ms: u64) {
        if self.state == EngineState::Idle {
            debug!("payload dropped: no active session");
            return;
        }

        let sample = match self.profile {
            DeviceProfile::XdsPower => parse_xds_power(data),
            DeviceProfile::StandardPower => parse_standard_power(data),
            DeviceProfile::HeartRate => parse_heart_rate(data),
            DeviceProfile::CadenceSpeed => parse_csc(data),
            DeviceProfile::Unknown => {
                debug!("payload dropped: unknown profile");
                return;
            }
        };

        if sample.is_empty() {
            debug!(len = data.len(), "payload dropped: below minimum length");
            return;
        }

        self.merge_sample(&sample, now_ms);
        self.snapshot.publish(self.live);
        self.state = EngineState::Streaming;
    }

    fn merge_sample(&mut self, sample: &DecodedSample, now_ms: u64) {
        if let Some(power) = sample.power {
            self.live.power = i32::from(power);
            self.stats.record_power(u16::try_from(power.max(0)).unwrap_or(0));
        }

        // XDS reports per-pedal watts; the balance split is derived here.
        if let (Some(left), Some(right)) = (sample.left_power, sample.right_power) {
            let (left_pct, right_pct) = balance_from_power(left, right);
            self.live.left_balance = left_pct;
            self.live.right_balance = right_pct;
        }

        // Standard power reports the split directly.
        if let (Some(left), Some(right)) = (sample.left_balance, sample.right_balance) {
            self.live.left_balance = left;
            self.live.right_balance = right;
        }

        if let Some(angle) = sample.crank_angle {
            self.live.crank_angle = angle;
        }

        if let Some(bpm) = sample.heart_rate {
            self.live.heart_rate = bpm;
        }

        if let Some(revs) = sample.crank_revs {
            let time = match self.cadence.time_base() {
                TimeBase::WallClock => Some(TimeRef::Millis(now_ms)),
                TimeBase::ProtocolTicks => sample.crank_event_ticks.map(TimeRef::Ticks),
            };
            if let Some(time) = time {
                let rpm = self.cadence.update(revs, time);
                self.live.cadence = rpm;
                self.stats.record_cadence(rpm);
            }
        }

        self.live.avg_power = self.stats.average_power();
        self.live.max_power = self.stats.max_power();
        self.live.avg_cadence = self.stats.average_cadence();
        self.live.elapsed_secs = self.stats.elapsed_secs(now_ms);
    }
}

/// Split total pedaling effort into left/right percentages
///
/// Uses magnitudes so a transient negative reading cannot push a percentage
/// out of range. When both magnitudes are zero, both percentages are zero;
/// otherwise they sum to exactly 100.
#[must_use]
pub fn balance_from_power(left: i16, right: i16) -> (u16, u16) {
    let left_mag = u32::from(left.unsigned_abs());
    let right_mag = u32::from(right.unsigned_abs());
    let total = left_mag + right_mag;

    if total == 0 {
        return (0, 0);
    }

    #[allow(clippy::cast_possible_truncation)]
    let left_pct = (left_mag * 100 / total) as u16;
    (left_pct, 100 - left_pct)
}

#[cfg(test)]
mod tests {
    use super::*;

    const XDS_FIRST: [u8; 11] = [
        0x64, 0x00, 0x32, 0x00, 0x32, 0x00, 0x0A, 0x00, 0x05, 0x00, 0x00,
    ];

    fn xds_payload(power: i16, revs: u16) -> [u8; 11] {
        let mut data = XDS_FIRST;
        data[0..2].copy_from_slice(&power.to_le_bytes());
        data[8..10].copy_from_slice(&revs.to_le_bytes());
        data
    }

    #[test]
    fn test_wraparound_delta_plain() {
        assert_eq!(wraparound_delta(5, 6), 1);
        assert_eq!(wraparound_delta(100, 100), 0);
        assert_eq!(wraparound_delta(0, 65535), 65535);
    }

    #[test]
    fn test_wraparound_delta_wrapped() {
        // 65534 -> 2 crosses the wrap point: (65536 - 65534) + 2 = 4
        assert_eq!(wraparound_delta(65534, 2), 4);
        assert_eq!(wraparound_delta(65535, 0), 1);
    }

    #[test]
    fn test_wraparound_delta_identity() {
        for (a, b) in [(0u16, 0u16), (1, 65535), (40000, 39999), (12345, 54321)] {
            let expected = if b >= a {
                u32::from(b) - u32::from(a)
            } else {
                65536 - u32::from(a) + u32::from(b)
            };
            assert_eq!(u32::from(wraparound_delta(a, b)), expected);
        }
    }

    #[test]
    fn test_wall_clock_first_sample_is_zero() {
        let mut est = CadenceEstimator::new(TimeBase::WallClock);
        assert_eq!(est.update(5, TimeRef::Millis(1000)), 0);
    }

    #[test]
    fn test_wall_clock_basic_rpm() {
        // One revolution in 500 ms -> 120 RPM
        let mut est = CadenceEstimator::new(TimeBase::WallClock);
        est.update(5, TimeRef::Millis(1000));
        assert_eq!(est.update(6, TimeRef::Millis(1500)), 120);
    }

    #[test]
    fn test_wall_clock_counter_wrap() {
        let mut est = CadenceEstimator::new(TimeBase::WallClock);
        est.update(65534, TimeRef::Millis(0));
        // Delta 4 revs over 2000 ms -> 120 RPM
        assert_eq!(est.update(2, TimeRef::Millis(2000)), 120);
    }

    #[test]
    fn test_wall_clock_rpm_clamp() {
        let mut est = CadenceEstimator::new(TimeBase::WallClock);
        est.update(0, TimeRef::Millis(0));
        // 100 revs in 100 ms would be 60000 RPM; clamps to the limit.
        assert_eq!(est.update(100, TimeRef::Millis(100)), WALL_CLOCK_RPM_LIMIT);
    }

    #[test]
    fn test_wall_clock_stall_hold_then_zero() {
        let mut est = CadenceEstimator::new(TimeBase::WallClock);
        est.update(10, TimeRef::Millis(0));
        assert_eq!(est.update(11, TimeRef::Millis(500)), 120);

        // Counter stalls: previous value holds inside the timeout window.
        assert_eq!(est.update(11, TimeRef::Millis(1500)), 120);
        assert_eq!(est.update(11, TimeRef::Millis(2900)), 120);

        // Past 2500 ms since the last counter movement the rider is stopped.
        assert_eq!(est.update(11, TimeRef::Millis(3100)), 0);
    }

    #[test]
    fn test_wall_clock_recovers_after_stall() {
        let mut est = CadenceEstimator::new(TimeBase::WallClock);
        est.update(10, TimeRef::Millis(0));
        est.update(11, TimeRef::Millis(500));
        assert_eq!(est.update(11, TimeRef::Millis(3500)), 0);
        // Pedaling resumes; delta is measured from the last counter change.
        let rpm = est.update(12, TimeRef::Millis(4000));
        assert_eq!(rpm, u32::try_from(60_000 / 3500).unwrap());
    }

    #[test]
    fn test_tick_base_basic_rpm() {
        let mut est = CadenceEstimator::new(TimeBase::ProtocolTicks);
        est.update(16, TimeRef::Ticks(0));
        // 2 revs in 1024 ticks (one second) -> 120 RPM
        assert_eq!(est.update(18, TimeRef::Ticks(1024)), 120);
    }

    #[test]
    fn test_tick_base_event_time_wrap() {
        let mut est = CadenceEstimator::new(TimeBase::ProtocolTicks);
        est.update(100, TimeRef::Ticks(65024));
        // Tick counter wraps: delta = (65536 - 65024) + 512 = 1024 ticks.
        assert_eq!(est.update(102, TimeRef::Ticks(512)), 120);
    }

    #[test]
    fn test_tick_base_unclamped() {
        let mut est = CadenceEstimator::new(TimeBase::ProtocolTicks);
        est.update(0, TimeRef::Ticks(0));
        // 100 revs in 1024 ticks is 6000 RPM; this base does not clamp.
        assert_eq!(est.update(100, TimeRef::Ticks(1024)), 6000);
    }

    #[test]
    fn test_tick_base_stall_emits_zero() {
        let mut est = CadenceEstimator::new(TimeBase::ProtocolTicks);
        est.update(16, TimeRef::Ticks(0));
        est.update(18, TimeRef::Ticks(1024));
        // Same counter, same event time: stopped, no hold window.
        assert_eq!(est.update(18, TimeRef::Ticks(1024)), 0);
    }

    #[test]
    fn test_estimator_reset_clears_state() {
        let mut est = CadenceEstimator::new(TimeBase::WallClock);
        est.update(10, TimeRef::Millis(0));
        est.update(12, TimeRef::Millis(500));
        est.reset(TimeBase::WallClock);
        // After reset the next reading is a first sample again.
        assert_eq!(est.update(50, TimeRef::Millis(9000)), 0);
    }

    #[test]
    fn test_session_stats_averages() {
        let mut stats = SessionStats::new(0);
        stats.record_power(100);
        stats.record_power(200);
        stats.record_power(150);
        assert_eq!(stats.average_power(), 150);
        assert_eq!(stats.max_power(), 200);
    }

    #[test]
    fn test_session_stats_zero_count_average() {
        let stats = SessionStats::new(0);
        assert_eq!(stats.average_power(), 0);
        assert_eq!(stats.average_cadence(), 0);
    }

    #[test]
    fn test_session_stats_cadence_excludes_idle() {
        let mut stats = SessionStats::new(0);
        stats.record_cadence(90);
        stats.record_cadence(0);
        stats.record_cadence(0);
        stats.record_cadence(110);
        // Idle samples do not drag the average down.
        assert_eq!(stats.average_cadence(), 100);
    }

    #[test]
    fn test_session_stats_elapsed() {
        let stats = SessionStats::new(10_000);
        assert_eq!(stats.elapsed_secs(10_000), 0);
        assert_eq!(stats.elapsed_secs(73_500), 63);
    }

    #[test]
    fn test_balance_from_power() {
        assert_eq!(balance_from_power(50, 50), (50, 50));
        assert_eq!(balance_from_power(70, 30), (70, 30));
        assert_eq!(balance_from_power(0, 0), (0, 0));
        assert_eq!(balance_from_power(100, 0), (100, 0));
    }

    #[test]
    fn test_balance_invariant_sums_to_hundred() {
        for (left, right) in [(1i16, 999i16), (333, 667), (-40, 60), (13, 7)] {
            let (l, r) = balance_from_power(left, right);
            assert_eq!(l + r, 100, "left={left} right={right}");
        }
    }

    #[test]
    fn test_engine_idle_drops_payloads() {
        let mut engine = TelemetryEngine::new();
        engine.on_payload(&XDS_FIRST, 1000);
        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(engine.current_snapshot(), DisplaySnapshot::default());
    }

    #[test]
    fn test_engine_first_xds_payload() {
        let mut engine = TelemetryEngine::new();
        engine.begin_session(DeviceProfile::XdsPower, 1000);
        assert_eq!(engine.state(), EngineState::Profiled);

        engine.on_payload(&XDS_FIRST, 1000);
        assert_eq!(engine.state(), EngineState::Streaming);

        let snap = engine.current_snapshot();
        assert_eq!(snap.power, 100);
        assert_eq!(snap.cadence, 0); // first counter sample
        assert_eq!(snap.left_balance, 50);
        assert_eq!(snap.right_balance, 50);
        assert_eq!(snap.crank_angle, 10);
        assert_eq!(snap.max_power, 100);
        assert_eq!(snap.avg_power, 100);
    }

    #[test]
    fn test_engine_second_payload_computes_cadence() {
        let mut engine = TelemetryEngine::new();
        engine.begin_session(DeviceProfile::XdsPower, 1000);
        engine.on_payload(&XDS_FIRST, 1000);
        // Counter 5 -> 6 over 500 ms: 120 RPM
        engine.on_payload(&xds_payload(100, 6), 1500);

        let snap = engine.current_snapshot();
        assert_eq!(snap.cadence, 120);
        assert_eq!(snap.avg_cadence, 120);
    }

    #[test]
    fn test_engine_malformed_payload_leaves_snapshot_unchanged() {
        let mut engine = TelemetryEngine::new();
        engine.begin_session(DeviceProfile::XdsPower, 1000);
        engine.on_payload(&XDS_FIRST, 1000);
        let before = engine.current_snapshot();

        engine.on_payload(&[0x01, 0x02, 0x03], 2000);

        assert_eq!(engine.current_snapshot(), before);
        assert_eq!(engine.state(), EngineState::Streaming);
    }

    #[test]
    fn test_engine_absent_fields_keep_prior_values() {
        let mut engine = TelemetryEngine::new();
        engine.begin_session(DeviceProfile::CadenceSpeed, 0);

        engine.on_payload(&[0x02, 0x10, 0x00, 0x00, 0x00], 0);
        engine.on_payload(&[0x02, 0x12, 0x00, 0x00, 0x04], 1000);

        let snap = engine.current_snapshot();
        assert_eq!(snap.cadence, 120);
        // No power field in CSC payloads; power stays at its prior value.
        assert_eq!(snap.power, 0);
        assert_eq!(snap.heart_rate, 0);
    }

    #[test]
    fn test_engine_heart_rate_session() {
        let mut engine = TelemetryEngine::new();
        engine.begin_session(DeviceProfile::HeartRate, 0);
        engine.on_payload(&[0x00, 0x48], 100);
        assert_eq!(engine.current_snapshot().heart_rate, 72);
    }

    #[test]
    fn test_engine_begin_session_resets_aggregates() {
        let mut engine = TelemetryEngine::new();
        engine.begin_session(DeviceProfile::XdsPower, 0);
        engine.on_payload(&xds_payload(250, 5), 0);
        assert_eq!(engine.current_snapshot().max_power, 250);

        engine.begin_session(DeviceProfile::XdsPower, 60_000);
        let snap = engine.current_snapshot();
        assert_eq!(snap, DisplaySnapshot::default());

        engine.on_payload(&xds_payload(100, 1), 60_500);
        let snap = engine.current_snapshot();
        assert_eq!(snap.max_power, 100);
        assert_eq!(snap.avg_power, 100);
        assert_eq!(snap.elapsed_secs, 0);
    }

    #[test]
    fn test_engine_glitch_power_not_aggregated_as_spike() {
        let mut engine = TelemetryEngine::new();
        engine.begin_session(DeviceProfile::XdsPower, 0);
        engine.on_payload(&xds_payload(3500, 5), 0);

        let snap = engine.current_snapshot();
        assert_eq!(snap.power, 0);
        assert_eq!(snap.max_power, 0);
        // Balance from the same payload is still valid.
        assert_eq!(snap.left_balance, 50);
    }

    #[test]
    fn test_engine_end_session_returns_to_idle() {
        let mut engine = TelemetryEngine::new();
        engine.begin_session(DeviceProfile::HeartRate, 0);
        engine.on_payload(&[0x00, 0x48], 100);
        engine.end_session();
        assert_eq!(engine.state(), EngineState::Idle);

        // Payloads after the session ends are dropped.
        engine.on_payload(&[0x00, 0x60], 200);
        assert_eq!(engine.current_snapshot().heart_rate, 72);
    }

    #[test]
    fn test_snapshot_handle_shares_updates() {
        let mut engine = TelemetryEngine::new();
        let handle = engine.snapshot_handle();
        engine.begin_session(DeviceProfile::HeartRate, 0);
        engine.on_payload(&[0x00, 0x48], 100);
        assert_eq!(handle.read().heart_rate, 72);
    }

    #[test]
    fn test_engine_standard_power_balance() {
        let mut engine = TelemetryEngine::new();
        engine.begin_session(DeviceProfile::StandardPower, 0);
        engine.on_payload(&[0x01, 0x00, 0x96, 0x00, 120], 100);

        let snap = engine.current_snapshot();
        assert_eq!(snap.power, 150);
        assert_eq!(snap.right_balance, 60);
        assert_eq!(snap.left_balance, 40);
    }
}
