//! ACP24 infrared frame codec.
//!
//! A frame is nine bytes sent LSB first after a short header:
//!
//! | byte | meaning                                         |
//! |------|-------------------------------------------------|
//! | 0-4  | reserved, always zero                           |
//! | 5    | power, `0x20` on / `0x00` off                   |
//! | 6    | mode code                                       |
//! | 7    | low nibble: target temperature minus 15 °C      |
//! | 8    | bits 0-2 fan code, bits 6-7 set for sleep preset |
//!
//! The frame has no checksum; the reserved bytes are the only integrity check.

use crate::{
    config::DeviceConfig,
    error::{ConfigError, DecodeError},
    pulse::{PulseSequence, PulseSequenceBuilder},
    types::{ClimateMode, ClimateState, FanLevel, Preset},
};

pub const ACP24_CARRIER_HZ: u32 = 38_000;

const HEADER_MARK_US: u32 = 400;
const HEADER_SPACE_US: u32 = 975;
const BIT_MARK_US: u32 = 400;
const ONE_SPACE_US: u32 = 1_350;
const ZERO_SPACE_US: u32 = 975;
const MIN_GAP_US: u32 = 17_500;

pub const FRAME_BYTES: usize = 9;
const FRAME_BITS: usize = FRAME_BYTES * 8;
/// Header pair, one mark/space pair per bit, trailing mark.
pub const MIN_FRAME_LEN: usize = 2 + FRAME_BITS * 2 + 1;

const RESERVED_BYTES: usize = 5;
const POWER_BYTE: usize = 5;
const MODE_BYTE: usize = 6;
const TEMP_BYTE: usize = 7;
const FAN_BYTE: usize = 8;

const POWER_ON: u8 = 0x20;
const POWER_OFF: u8 = 0x00;

const MODE_AUTO: u8 = 0x20;
const MODE_COOL: u8 = 0x18;
const MODE_DRY: u8 = 0x10;
const MODE_FAN_ONLY: u8 = 0x38;
const MODE_HEAT: u8 = 0x08;

const FAN_AUTO: u8 = 0;
const FAN_LOW: u8 = 1;
const FAN_MEDIUM: u8 = 3;
const FAN_HIGH: u8 = 4;
const FAN_MASK: u8 = 0x07;
const SLEEP_FLAG: u8 = 0xC0;

const TEMP_OFFSET_C: f32 = 15.0;
const TEMP_CODE_MASK: u8 = 0x0F;
const TEMP_LIMIT_MIN_C: f32 = TEMP_OFFSET_C;
const TEMP_LIMIT_MAX_C: f32 = TEMP_OFFSET_C + TEMP_CODE_MASK as f32;
// The stock remote always reports 24 °C in dry mode.
const DRY_TEMP_C: f32 = 24.0;

pub const DEFAULT_TOLERANCE_PERCENT: u8 = 25;

pub trait IrCodec {
    fn encode(&self, state: &ClimateState) -> PulseSequence;
    fn decode(&self, sequence: &PulseSequence) -> Result<ClimateState, DecodeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acp24Frame(pub [u8; FRAME_BYTES]);

impl Acp24Frame {
    pub fn from_state(state: &ClimateState, min_temp_c: f32, max_temp_c: f32) -> Self {
        let mut bytes = [0_u8; FRAME_BYTES];

        let mode_code = match state.mode {
            ClimateMode::Off => None,
            ClimateMode::Heat => Some(MODE_HEAT),
            ClimateMode::Cool => Some(MODE_COOL),
            ClimateMode::FanOnly => Some(MODE_FAN_ONLY),
            ClimateMode::Dry => Some(MODE_DRY),
            ClimateMode::Auto => Some(MODE_AUTO),
        };
        match mode_code {
            Some(code) => {
                bytes[POWER_BYTE] = POWER_ON;
                bytes[MODE_BYTE] = code;
            }
            None => bytes[POWER_BYTE] = POWER_OFF,
        }

        let temp_c = if state.mode == ClimateMode::Dry {
            DRY_TEMP_C
        } else {
            state.target_temp_c.clamp(min_temp_c, max_temp_c)
        };
        bytes[TEMP_BYTE] =
            (temp_c.round() - TEMP_OFFSET_C).clamp(0.0, f32::from(TEMP_CODE_MASK)) as u8;

        let fan_code = match state.fan {
            FanLevel::Auto => FAN_AUTO,
            FanLevel::Low => FAN_LOW,
            FanLevel::Medium => FAN_MEDIUM,
            FanLevel::High => FAN_HIGH,
        };
        bytes[FAN_BYTE] = match state.preset {
            Preset::Sleep => fan_code | SLEEP_FLAG,
            Preset::None => fan_code,
        };

        Self(bytes)
    }

    pub fn to_state(&self) -> Result<ClimateState, DecodeError> {
        let bytes = &self.0;

        if let Some((byte, value)) = bytes[..RESERVED_BYTES]
            .iter()
            .enumerate()
            .find(|(_, value)| **value != 0)
        {
            return Err(DecodeError::Reserved {
                byte,
                value: *value,
            });
        }

        let mode = if bytes[POWER_BYTE] == POWER_OFF {
            ClimateMode::Off
        } else {
            match bytes[MODE_BYTE] {
                MODE_AUTO => ClimateMode::Auto,
                MODE_COOL => ClimateMode::Cool,
                MODE_DRY => ClimateMode::Dry,
                MODE_FAN_ONLY => ClimateMode::FanOnly,
                MODE_HEAT => ClimateMode::Heat,
                other => return Err(DecodeError::UnknownMode(other)),
            }
        };

        let target_temp_c = f32::from(bytes[TEMP_BYTE] & TEMP_CODE_MASK) + TEMP_OFFSET_C;

        let fan = match bytes[FAN_BYTE] & FAN_MASK {
            FAN_AUTO => FanLevel::Auto,
            FAN_LOW => FanLevel::Low,
            FAN_MEDIUM => FanLevel::Medium,
            FAN_HIGH => FanLevel::High,
            other => return Err(DecodeError::UnknownFan(other)),
        };

        let preset = if bytes[FAN_BYTE] & SLEEP_FLAG == SLEEP_FLAG {
            Preset::Sleep
        } else {
            Preset::None
        };

        Ok(ClimateState {
            mode,
            target_temp_c,
            fan,
            preset,
        })
    }

    pub fn to_hex(&self) -> String {
        self.0
            .iter()
            .map(|byte| format!("{byte:02X}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Acp24Codec {
    min_temp_c: f32,
    max_temp_c: f32,
    tolerance_percent: u8,
    repeat: u8,
}

impl Acp24Codec {
    pub fn for_device(config: &DeviceConfig) -> Result<Self, ConfigError> {
        let (min, max) = (config.min_temp_c(), config.max_temp_c());
        if min < TEMP_LIMIT_MIN_C || max > TEMP_LIMIT_MAX_C {
            return Err(ConfigError::UnencodableRange {
                min,
                max,
                limit_min: TEMP_LIMIT_MIN_C,
                limit_max: TEMP_LIMIT_MAX_C,
            });
        }

        Ok(Self {
            min_temp_c: min,
            max_temp_c: max,
            tolerance_percent: DEFAULT_TOLERANCE_PERCENT,
            repeat: 1,
        })
    }

    pub fn with_tolerance(mut self, percent: u8) -> Self {
        self.tolerance_percent = percent.min(99);
        self
    }

    pub fn with_repeat(mut self, repeat: u8) -> Self {
        self.repeat = repeat.max(1);
        self
    }

    pub fn frame(&self, state: &ClimateState) -> Acp24Frame {
        Acp24Frame::from_state(state, self.min_temp_c, self.max_temp_c)
    }

    pub fn decode_frame(&self, sequence: &PulseSequence) -> Result<Acp24Frame, DecodeError> {
        let timings = sequence.timings();
        let start = timings
            .iter()
            .position(|timing| *timing > 0)
            .unwrap_or(timings.len());
        let timings = &timings[start..];

        if timings.len() < MIN_FRAME_LEN {
            return Err(DecodeError::TooShort {
                len: timings.len(),
                min: MIN_FRAME_LEN,
            });
        }

        let mut reader = TimingReader {
            timings,
            pos: 0,
            tolerance_percent: self.tolerance_percent,
        };

        if !reader.expect_mark(HEADER_MARK_US) || !reader.expect_space(HEADER_SPACE_US) {
            return Err(DecodeError::Header);
        }

        let mut bytes = [0_u8; FRAME_BYTES];
        for (index, byte) in bytes.iter_mut().enumerate() {
            for bit in 0..8 {
                if !reader.expect_mark(BIT_MARK_US) {
                    return Err(DecodeError::Bit { byte: index, bit });
                }
                match reader.read_bit_space() {
                    Some(true) => *byte |= 1 << bit,
                    Some(false) => {}
                    None => return Err(DecodeError::Bit { byte: index, bit }),
                }
            }
        }

        Ok(Acp24Frame(bytes))
    }
}

impl IrCodec for Acp24Codec {
    fn encode(&self, state: &ClimateState) -> PulseSequence {
        let frame = self.frame(state);
        let frames = usize::from(self.repeat);
        let mut builder =
            PulseSequenceBuilder::with_capacity(ACP24_CARRIER_HZ, frames * (MIN_FRAME_LEN + 1) + 1);

        for _ in 0..frames {
            builder.mark(HEADER_MARK_US).space(HEADER_SPACE_US);
            for byte in frame.0 {
                for bit in 0..8 {
                    builder.mark(BIT_MARK_US);
                    if byte & (1 << bit) != 0 {
                        builder.space(ONE_SPACE_US);
                    } else {
                        builder.space(ZERO_SPACE_US);
                    }
                }
            }
            builder.mark(BIT_MARK_US).space(MIN_GAP_US);
        }
        builder.mark(BIT_MARK_US);

        builder.build()
    }

    fn decode(&self, sequence: &PulseSequence) -> Result<ClimateState, DecodeError> {
        self.decode_frame(sequence)?.to_state()
    }
}

struct TimingReader<'a> {
    timings: &'a [i32],
    pos: usize,
    tolerance_percent: u8,
}

impl TimingReader<'_> {
    fn expect_mark(&mut self, expected_us: u32) -> bool {
        match self.timings.get(self.pos) {
            Some(&timing) if timing > 0 && self.within(timing.unsigned_abs(), expected_us) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn expect_space(&mut self, expected_us: u32) -> bool {
        match self.timings.get(self.pos) {
            Some(&timing) if timing < 0 && self.within(timing.unsigned_abs(), expected_us) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    /// One and zero spaces overlap at wide tolerances; the closer nominal value wins.
    fn read_bit_space(&mut self) -> Option<bool> {
        let timing = *self.timings.get(self.pos)?;
        if timing >= 0 {
            return None;
        }
        let actual = timing.unsigned_abs();

        let one = self.within(actual, ONE_SPACE_US);
        let zero = self.within(actual, ZERO_SPACE_US);
        let bit = match (one, zero) {
            (true, true) => actual.abs_diff(ONE_SPACE_US) < actual.abs_diff(ZERO_SPACE_US),
            (true, false) => true,
            (false, true) => false,
            (false, false) => return None,
        };

        self.pos += 1;
        Some(bit)
    }

    fn within(&self, actual_us: u32, expected_us: u32) -> bool {
        let tolerance = u64::from(self.tolerance_percent);
        let expected = u64::from(expected_us);
        let low = expected * (100 - tolerance) / 100;
        let high = expected * (100 + tolerance) / 100;
        (low..=high).contains(&u64::from(actual_us))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::DeviceSettings;

    fn codec() -> Acp24Codec {
        let config = DeviceConfig::from_settings(DeviceSettings::default()).unwrap();
        Acp24Codec::for_device(&config).unwrap()
    }

    fn state(mode: ClimateMode, temp: f32, fan: FanLevel, preset: Preset) -> ClimateState {
        ClimateState {
            mode,
            target_temp_c: temp,
            fan,
            preset,
        }
    }

    #[test]
    fn builds_expected_frame_bytes() {
        let frame = codec().frame(&state(ClimateMode::Cool, 22.0, FanLevel::Low, Preset::None));
        assert_eq!(frame.0, [0, 0, 0, 0, 0, 0x20, 0x18, 7, 1]);
        assert_eq!(frame.to_hex(), "00,00,00,00,00,20,18,07,01");
    }

    #[test]
    fn sleep_with_low_fan_is_the_night_mode_code() {
        let frame = codec().frame(&state(ClimateMode::Cool, 26.0, FanLevel::Low, Preset::Sleep));
        assert_eq!(frame.0[8], 0xC1);
    }

    #[test]
    fn off_clears_power_and_mode() {
        let frame = codec().frame(&state(ClimateMode::Off, 20.0, FanLevel::High, Preset::None));
        assert_eq!(frame.0[5], 0x00);
        assert_eq!(frame.0[6], 0x00);
        assert_eq!(frame.0[7], 5);
        assert_eq!(frame.0[8], 4);
    }

    #[test]
    fn dry_mode_always_sends_24() {
        let codec = codec();
        let dry = state(ClimateMode::Dry, 19.0, FanLevel::Auto, Preset::None);

        assert_eq!(codec.frame(&dry).0[7], 9);
        let decoded = codec.decode(&codec.encode(&dry)).unwrap();
        assert_eq!(decoded.target_temp_c, 24.0);
    }

    #[test]
    fn encoded_sequence_has_header_bits_trailer_and_final_mark() {
        let sequence = codec().encode(&state(ClimateMode::Auto, 24.0, FanLevel::Auto, Preset::None));

        assert_eq!(sequence.len(), MIN_FRAME_LEN + 2);
        assert_eq!(sequence.carrier_hz(), ACP24_CARRIER_HZ);
        assert_eq!(&sequence.timings()[..2], &[400, -975]);
        let tail = &sequence.timings()[sequence.len() - 3..];
        assert_eq!(tail, &[400, -17_500, 400]);
    }

    #[test]
    fn repeat_adds_whole_frames() {
        let codec = codec().with_repeat(2);
        let sequence = codec.encode(&state(ClimateMode::Cool, 22.0, FanLevel::Low, Preset::None));
        assert_eq!(sequence.len(), 2 * (MIN_FRAME_LEN + 1) + 1);
        assert!(codec.decode(&sequence).is_ok());
    }

    #[test]
    fn encode_is_deterministic() {
        let codec = codec();
        let input = state(ClimateMode::FanOnly, 27.0, FanLevel::Medium, Preset::Sleep);
        assert_eq!(codec.encode(&input), codec.encode(&input));
    }

    #[test]
    fn decode_inverts_encode_for_supported_states() {
        let config = DeviceConfig::from_settings(DeviceSettings::default()).unwrap();
        let codec = Acp24Codec::for_device(&config).unwrap();

        for &mode in config.supported_modes() {
            for &fan in config.fan_levels() {
                for &preset in config.presets() {
                    let mut temp = config.min_temp_c();
                    while temp <= config.max_temp_c() {
                        if mode != ClimateMode::Dry || temp == 24.0 {
                            let input = state(mode, temp, fan, preset);
                            assert_eq!(codec.decode(&codec.encode(&input)).unwrap(), input);
                        }
                        temp += config.temp_step_c();
                    }
                }
            }
        }
    }

    #[test]
    fn short_sequences_are_rejected_not_padded() {
        let sequence = PulseSequence::from_timings(ACP24_CARRIER_HZ, &[400, -975, 400]);
        assert_eq!(
            codec().decode(&sequence).unwrap_err(),
            DecodeError::TooShort {
                len: 3,
                min: MIN_FRAME_LEN
            }
        );
    }

    #[test]
    fn tolerates_receiver_jitter_and_leading_gap() {
        let codec = codec();
        let input = state(ClimateMode::Cool, 23.0, FanLevel::High, Preset::None);
        let mut jittered: Vec<i32> = vec![-30_000];
        jittered.extend(
            codec
                .encode(&input)
                .timings()
                .iter()
                .map(|timing| if *timing > 0 { timing + 60 } else { timing + 80 }),
        );

        let received = PulseSequence::from_timings(ACP24_CARRIER_HZ, &jittered);
        assert_eq!(codec.decode(&received).unwrap(), input);
    }

    #[test]
    fn rejects_bad_header() {
        let codec = codec();
        let mut timings = codec
            .encode(&state(ClimateMode::Cool, 22.0, FanLevel::Low, Preset::None))
            .timings()
            .to_vec();
        timings[0] = 9_000;

        let sequence = PulseSequence::from_timings(ACP24_CARRIER_HZ, &timings);
        assert_eq!(codec.decode(&sequence).unwrap_err(), DecodeError::Header);
    }

    #[test]
    fn rejects_out_of_tolerance_bit() {
        let codec = codec();
        let mut timings = codec
            .encode(&state(ClimateMode::Cool, 22.0, FanLevel::Low, Preset::None))
            .timings()
            .to_vec();
        // Space of byte 1, bit 2.
        timings[2 + (8 + 2) * 2 + 1] = -3_000;

        let sequence = PulseSequence::from_timings(ACP24_CARRIER_HZ, &timings);
        assert_eq!(
            codec.decode(&sequence).unwrap_err(),
            DecodeError::Bit { byte: 1, bit: 2 }
        );
    }

    #[test]
    fn rejects_non_zero_reserved_bytes() {
        let frame = Acp24Frame([0, 0, 0x40, 0, 0, 0x20, 0x18, 7, 1]);
        assert_eq!(
            frame.to_state().unwrap_err(),
            DecodeError::Reserved {
                byte: 2,
                value: 0x40
            }
        );
    }

    #[test]
    fn rejects_unknown_mode_and_fan_codes() {
        let frame = Acp24Frame([0, 0, 0, 0, 0, 0x20, 0x30, 7, 1]);
        assert_eq!(frame.to_state().unwrap_err(), DecodeError::UnknownMode(0x30));

        let frame = Acp24Frame([0, 0, 0, 0, 0, 0x20, 0x18, 7, 2]);
        assert_eq!(frame.to_state().unwrap_err(), DecodeError::UnknownFan(2));
    }

    #[test]
    fn range_outside_four_bit_field_is_unencodable() {
        let settings = DeviceSettings {
            min_temp_c: 10.0,
            default_target_c: 20.0,
            ..DeviceSettings::default()
        };
        let config = DeviceConfig::from_settings(settings).unwrap();

        assert!(matches!(
            Acp24Codec::for_device(&config).unwrap_err(),
            ConfigError::UnencodableRange { .. }
        ));
    }
}
