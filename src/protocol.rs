use bytes::Buf;

/// Minimum payload length for the XDS proprietary power format
pub const XDS_MIN_LEN: usize = 10;

/// Minimum payload length for the standard cycling power format
pub const CPS_MIN_LEN: usize = 4;

/// Power readings above this many watts are treated as sensor glitches
///
/// XDS units occasionally emit a corrupt spike on wake-up; the reading is
/// clamped to zero while the cadence and balance fields of the same payload
/// stay valid.
pub const XDS_POWER_GLITCH_LIMIT: i16 = 3000;

/// CPS flags bit 0: pedal power balance byte present
const CPS_FLAG_BALANCE_PRESENT: u16 = 0x0001;

/// HRS flags bit 0: heart rate value is 16-bit
const HRS_FLAG_HR_16BIT: u8 = 0x01;

/// CSC flags bit 0: wheel revolution data present
const CSC_FLAG_WHEEL_PRESENT: u8 = 0x01;

/// CSC flags bit 1: crank revolution data present
const CSC_FLAG_CRANK_PRESENT: u8 = 0x02;

/// Read an unsigned 16-bit little-endian field at `offset`
///
/// # Panics
///
/// Panics if `offset + 1` is past the end of `data`. Callers bounds-check
/// the payload length before reading.
#[must_use]
pub fn read_u16_le(data: &[u8], offset: usize) -> u16 {
    u16::from(data[offset]) | (u16::from(data[offset + 1]) << 8)
}

/// Read a signed 16-bit little-endian field at `offset`
///
/// Reinterprets the same 16 bits as two's-complement signed.
///
/// # Panics
///
/// Panics if `offset + 1` is past the end of `data`.
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub fn read_s16_le(data: &[u8], offset: usize) -> i16 {
    read_u16_le(data, offset) as i16
}

/// Fields decoded from one notification payload
///
/// Each field is present or absent per payload; the telemetry engine merges
/// present fields into the live display and leaves prior values untouched
/// for absent ones. A too-short payload decodes to the empty sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecodedSample {
    /// Instantaneous power in watts
    pub power: Option<i16>,
    /// Left pedal power in watts (XDS only)
    pub left_power: Option<i16>,
    /// Right pedal power in watts (XDS only)
    pub right_power: Option<i16>,
    /// Left pedal balance percentage (standard power only)
    pub left_balance: Option<u16>,
    /// Right pedal balance percentage (standard power only)
    pub right_balance: Option<u16>,
    /// Crank angle in degrees (XDS only)
    pub crank_angle: Option<i16>,
    /// Cumulative crank revolution counter, wraps at 65536
    pub crank_revs: Option<u16>,
    /// Last crank event time in 1/1024-second ticks (CSC only)
    pub crank_event_ticks: Option<u16>,
    /// Heart rate in beats per minute
    pub heart_rate: Option<u16>,
    /// Trailing device status byte (XDS only)
    pub status: Option<u8>,
}

impl DecodedSample {
    /// Whether the payload produced no fields at all
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.power.is_none()
            && self.left_power.is_none()
            && self.right_power.is_none()
            && self.left_balance.is_none()
            && self.right_balance.is_none()
            && self.crank_angle.is_none()
            && self.crank_revs.is_none()
            && self.crank_event_ticks.is_none()
            && self.heart_rate.is_none()
            && self.status.is_none()
    }
}

/// Parse an XDS proprietary power payload
///
/// Fixed little-endian layout:
/// - bytes 0-1: total power (signed)
/// - bytes 2-3: left power (signed)
/// - bytes 4-5: right power (signed)
/// - bytes 6-7: crank angle (signed)
/// - bytes 8-9: cumulative crank revolutions (unsigned)
/// - byte 10: status byte, present only on 11-byte payloads
///
/// Payloads shorter than [`XDS_MIN_LEN`] decode to the empty sample. Power
/// above [`XDS_POWER_GLITCH_LIMIT`] is clamped to zero.
#[must_use]
pub fn parse_xds_power(data: &[u8]) -> DecodedSample {
    if data.len() < XDS_MIN_LEN {
        return DecodedSample::default();
    }

    let mut power = read_s16_le(data, 0);
    if power > XDS_POWER_GLITCH_LIMIT {
        power = 0;
    }

    DecodedSample {
        power: Some(power),
        left_power: Some(read_s16_le(data, 2)),
        right_power: Some(read_s16_le(data, 4)),
        crank_angle: Some(read_s16_le(data, 6)),
        crank_revs: Some(read_u16_le(data, 8)),
        status: if data.len() >= 11 { Some(data[10]) } else { None },
        ..DecodedSample::default()
    }
}

/// Parse a standard Cycling Power Measurement (`0x2A63`) payload
///
/// A leading 16-bit flags field selects optional sub-fields. Only
/// instantaneous power and the pedal power balance are decoded; accumulated
/// torque and revolution data are acknowledged by the flag layout but not
/// consumed.
#[must_use]
pub fn parse_standard_power(data: &[u8]) -> DecodedSample {
    if data.len() < CPS_MIN_LEN {
        return DecodedSample::default();
    }

    let mut buf = data;
    let flags = buf.get_u16_le();
    let power = buf.get_i16_le();

    // Balance byte is in half-percent units referenced to the right pedal.
    // Raw values past 200 (100%) are out of range and pinned there.
    let (left, right) = if flags & CPS_FLAG_BALANCE_PRESENT != 0 && buf.remaining() >= 1 {
        let right = (u16::from(buf.get_u8()) / 2).min(100);
        (100 - right, right)
    } else {
        (0, 0)
    };

    DecodedSample {
        power: Some(power),
        left_balance: Some(left),
        right_balance: Some(right),
        ..DecodedSample::default()
    }
}

/// Parse a Heart Rate Measurement (`0x2A37`) payload
///
/// Flags bit 0 selects an 8-bit (clear) or 16-bit (set) heart rate value at
/// offset 1.
#[must_use]
pub fn parse_heart_rate(data: &[u8]) -> DecodedSample {
    if data.len() < 2 {
        return DecodedSample::default();
    }

    let mut buf = data;
    let flags = buf.get_u8();

    let heart_rate = if flags & HRS_FLAG_HR_16BIT != 0 {
        if buf.remaining() < 2 {
            return DecodedSample::default();
        }
        buf.get_u16_le()
    } else {
        u16::from(buf.get_u8())
    };

    DecodedSample {
        heart_rate: Some(heart_rate),
        ..DecodedSample::default()
    }
}

/// Parse a CSC Measurement (`0x2A5B`) payload
///
/// Flags bit 0 marks 6 bytes of wheel revolution data (skipped, not
/// decoded); bit 1 marks the 16-bit cumulative crank revolution counter
/// followed by the 16-bit last crank event time in 1/1024-second ticks.
#[must_use]
pub fn parse_csc(data: &[u8]) -> DecodedSample {
    if data.is_empty() {
        return DecodedSample::default();
    }

    let mut buf = data;
    let flags = buf.get_u8();

    if flags & CSC_FLAG_WHEEL_PRESENT != 0 {
        if buf.remaining() < 6 {
            return DecodedSample::default();
        }
        buf.advance(6);
    }

    if flags & CSC_FLAG_CRANK_PRESENT != 0 {
        if buf.remaining() < 4 {
            return DecodedSample::default();
        }
        let crank_revs = buf.get_u16_le();
        let crank_event_ticks = buf.get_u16_le();
        return DecodedSample {
            crank_revs: Some(crank_revs),
            crank_event_ticks: Some(crank_event_ticks),
            ..DecodedSample::default()
        };
    }

    DecodedSample::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    // 100 W total, 50/50 W left/right, 10 deg, 5 revs, status 0
    const XDS_SAMPLE: [u8; 11] = [
        0x64, 0x00, 0x32, 0x00, 0x32, 0x00, 0x0A, 0x00, 0x05, 0x00, 0x00,
    ];

    #[test]
    fn test_read_u16_le() {
        let data = [0x34, 0x12, 0xFF, 0xFF];
        assert_eq!(read_u16_le(&data, 0), 0x1234);
        assert_eq!(read_u16_le(&data, 2), 0xFFFF);
    }

    #[test]
    fn test_read_s16_le_sign() {
        let data = [0xFF, 0xFF, 0x00, 0x80];
        assert_eq!(read_s16_le(&data, 0), -1);
        assert_eq!(read_s16_le(&data, 2), i16::MIN);
    }

    #[test]
    fn test_xds_full_payload() {
        let sample = parse_xds_power(&XDS_SAMPLE);
        assert_eq!(sample.power, Some(100));
        assert_eq!(sample.left_power, Some(50));
        assert_eq!(sample.right_power, Some(50));
        assert_eq!(sample.crank_angle, Some(10));
        assert_eq!(sample.crank_revs, Some(5));
        assert_eq!(sample.status, Some(0));
        assert_eq!(sample.heart_rate, None);
    }

    #[test]
    fn test_xds_ten_byte_payload_has_no_status() {
        let sample = parse_xds_power(&XDS_SAMPLE[..10]);
        assert_eq!(sample.power, Some(100));
        assert_eq!(sample.crank_revs, Some(5));
        assert_eq!(sample.status, None);
    }

    #[test]
    fn test_xds_short_payload_is_empty() {
        let sample = parse_xds_power(&[0x64, 0x00, 0x32]);
        assert!(sample.is_empty());
    }

    #[test]
    fn test_xds_glitch_power_clamped_to_zero() {
        // 3500 W spike: power clamps, cadence counter in the same payload
        // remains usable.
        let mut data = XDS_SAMPLE;
        data[0..2].copy_from_slice(&3500u16.to_le_bytes());
        let sample = parse_xds_power(&data);
        assert_eq!(sample.power, Some(0));
        assert_eq!(sample.crank_revs, Some(5));
        assert_eq!(sample.left_power, Some(50));

        // Exactly at the limit is accepted as-is.
        data[0..2].copy_from_slice(&3000u16.to_le_bytes());
        assert_eq!(parse_xds_power(&data).power, Some(3000));
    }

    #[test]
    fn test_xds_negative_power_preserved() {
        let mut data = XDS_SAMPLE;
        data[0..2].copy_from_slice(&(-3i16).to_le_bytes());
        assert_eq!(parse_xds_power(&data).power, Some(-3));
    }

    #[test]
    fn test_xds_decode_is_idempotent() {
        assert_eq!(parse_xds_power(&XDS_SAMPLE), parse_xds_power(&XDS_SAMPLE));
    }

    #[test]
    fn test_standard_power_with_balance() {
        // flags bit0 set, power 150 W, balance raw 120 -> right 60 / left 40
        let data = [0x01, 0x00, 0x96, 0x00, 120];
        let sample = parse_standard_power(&data);
        assert_eq!(sample.power, Some(150));
        assert_eq!(sample.right_balance, Some(60));
        assert_eq!(sample.left_balance, Some(40));
    }

    #[test]
    fn test_standard_power_without_balance() {
        let data = [0x00, 0x00, 0x96, 0x00];
        let sample = parse_standard_power(&data);
        assert_eq!(sample.power, Some(150));
        assert_eq!(sample.left_balance, Some(0));
        assert_eq!(sample.right_balance, Some(0));
    }

    #[test]
    fn test_standard_power_balance_sums_to_hundred() {
        for raw in 0..=200u8 {
            let data = [0x01, 0x00, 0x00, 0x00, raw];
            let sample = parse_standard_power(&data);
            let left = sample.left_balance.unwrap();
            let right = sample.right_balance.unwrap();
            assert_eq!(left + right, 100, "raw balance byte {raw}");
        }
    }

    #[test]
    fn test_standard_power_short_payload_is_empty() {
        assert!(parse_standard_power(&[0x01, 0x00, 0x96]).is_empty());
    }

    #[test]
    fn test_heart_rate_8bit() {
        let sample = parse_heart_rate(&[0x00, 0x48]);
        assert_eq!(sample.heart_rate, Some(72));
    }

    #[test]
    fn test_heart_rate_16bit() {
        let sample = parse_heart_rate(&[0x01, 0x2C, 0x01]);
        assert_eq!(sample.heart_rate, Some(300));

        // 16-bit flag with only one value byte is malformed.
        assert!(parse_heart_rate(&[0x01, 0x2C]).is_empty());
    }

    #[test]
    fn test_heart_rate_short_payload_is_empty() {
        assert!(parse_heart_rate(&[0x00]).is_empty());
        assert!(parse_heart_rate(&[]).is_empty());
    }

    #[test]
    fn test_csc_crank_only() {
        let data = [0x02, 0x10, 0x00, 0x00, 0x04];
        let sample = parse_csc(&data);
        assert_eq!(sample.crank_revs, Some(16));
        assert_eq!(sample.crank_event_ticks, Some(1024));
    }

    #[test]
    fn test_csc_wheel_and_crank() {
        // 6 bytes of wheel data are skipped before the crank fields.
        let data = [
            0x03, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, 0x10, 0x00, 0x00, 0x04,
        ];
        let sample = parse_csc(&data);
        assert_eq!(sample.crank_revs, Some(16));
        assert_eq!(sample.crank_event_ticks, Some(1024));
    }

    #[test]
    fn test_csc_wheel_only_yields_no_fields() {
        let data = [0x01, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF];
        assert!(parse_csc(&data).is_empty());
    }

    #[test]
    fn test_csc_truncated_payloads_are_empty() {
        assert!(parse_csc(&[]).is_empty());
        // Wheel flagged but wheel data truncated
        assert!(parse_csc(&[0x01, 0xAA, 0xBB]).is_empty());
        // Crank flagged but event time missing
        assert!(parse_csc(&[0x02, 0x10, 0x00, 0x00]).is_empty());
    }
}
