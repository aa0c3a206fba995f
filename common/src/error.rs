use thiserror::Error;

/// Static configuration problems. Fatal at startup.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("config: device id must not be empty")]
    MissingId,

    #[error("config: temperature bounds must be finite (min {min}, max {max})")]
    NonFiniteBounds { min: f32, max: f32 },

    #[error("config: temperature bounds are inverted (min {min} > max {max})")]
    InvertedBounds { min: f32, max: f32 },

    #[error("config: temperature step must be positive, got {0}")]
    NonPositiveStep(f32),

    #[error("config: at least one climate mode must be supported")]
    NoModes,

    #[error("config: at least one fan level must be configured")]
    NoFanLevels,

    #[error("config: default target {value} outside [{min}, {max}]")]
    DefaultTargetOutOfRange { value: f32, min: f32, max: f32 },

    #[error("config: clock `{0}` is referenced but no clock was provided")]
    MissingClock(String),

    #[error("config: range [{min}, {max}] cannot be encoded (supported [{limit_min}, {limit_max}])")]
    UnencodableRange {
        min: f32,
        max: f32,
        limit_min: f32,
        limit_max: f32,
    },
}

/// Rejected commands. The controller state is unchanged when one is returned.
#[derive(Error, Debug)]
pub enum ClimateError {
    #[error("unsupported mode: {0}")]
    UnsupportedMode(String),

    #[error("unsupported fan level: {0}")]
    UnsupportedFanLevel(String),

    #[error("unsupported preset: {0}")]
    UnsupportedPreset(String),

    #[error("temperature {value} outside [{min}, {max}]")]
    OutOfRange { value: f32, min: f32, max: f32 },

    #[error("transmit failed: {0}")]
    Transport(#[from] TransportError),
}

impl ClimateError {
    /// True for errors caused by the command itself rather than the hardware.
    pub fn is_rejected_command(&self) -> bool {
        !matches!(self, Self::Transport(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("decode: sequence has {len} entries, minimum frame is {min}")]
    TooShort { len: usize, min: usize },

    #[error("decode: header mismatch")]
    Header,

    #[error("decode: byte {byte} bit {bit} does not match a mark/space pair")]
    Bit { byte: usize, bit: usize },

    #[error("decode: reserved byte {byte} is {value:#04x}, expected zero")]
    Reserved { byte: usize, value: u8 },

    #[error("decode: unknown mode code {0:#04x}")]
    UnknownMode(u8),

    #[error("decode: unknown fan code {0:#04x}")]
    UnknownFan(u8),

    #[error("decode: frame describes a state this device does not support: {0}")]
    Unsupported(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    #[error("transport hardware error: {0}")]
    Hardware(String),
}
