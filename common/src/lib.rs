pub mod clock;
pub mod codec;
pub mod config;
pub mod controller;
pub mod error;
pub mod pulse;
pub mod schedule;
pub mod topics;
pub mod transport;
pub mod types;

pub use clock::Clock;
pub use codec::{Acp24Codec, Acp24Frame, IrCodec};
pub use config::{
    DeviceConfig, DeviceSettings, IrHardwareConfig, NetworkConfig, PersistedState, RuntimeConfig,
};
pub use controller::{new_climate_controller, ClimateController};
pub use error::{ClimateError, ConfigError, DecodeError, TransportError};
pub use pulse::{PulseSequence, PulseSequenceBuilder};
pub use schedule::{DayOfWeek, Schedule, ScheduleAction, ScheduleEntry};
pub use topics::*;
pub use transport::{DisabledTransport, Transport};
pub use types::{
    ClimateMode, ClimateState, ClimateStatePayload, ControllerStatus, FanLevel, Preset,
    TransmitDiagnostics,
};
