use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ClimateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClimateMode {
    Off,
    Heat,
    Cool,
    FanOnly,
    Dry,
    Auto,
}

impl ClimateMode {
    pub const ALL: [ClimateMode; 6] = [
        Self::Off,
        Self::Heat,
        Self::Cool,
        Self::FanOnly,
        Self::Dry,
        Self::Auto,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Heat => "HEAT",
            Self::Cool => "COOL",
            Self::FanOnly => "FAN_ONLY",
            Self::Dry => "DRY",
            Self::Auto => "AUTO",
        }
    }
}

impl FromStr for ClimateMode {
    type Err = ClimateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let upper = value.trim().to_ascii_uppercase();
        match upper.as_str() {
            "OFF" => Ok(Self::Off),
            "HEAT" => Ok(Self::Heat),
            "COOL" => Ok(Self::Cool),
            "FAN_ONLY" | "FAN" => Ok(Self::FanOnly),
            "DRY" => Ok(Self::Dry),
            "AUTO" => Ok(Self::Auto),
            _ => Err(ClimateError::UnsupportedMode(value.trim().to_string())),
        }
    }
}

/// Fan levels are ordered from automatic to the strongest setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FanLevel {
    Auto,
    Low,
    Medium,
    High,
}

impl FanLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "AUTO",
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }
}

impl FromStr for FanLevel {
    type Err = ClimateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let upper = value.trim().to_ascii_uppercase();
        match upper.as_str() {
            "AUTO" => Ok(Self::Auto),
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            _ => Err(ClimateError::UnsupportedFanLevel(value.trim().to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Preset {
    None,
    Sleep,
}

impl Preset {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Sleep => "SLEEP",
        }
    }
}

impl FromStr for Preset {
    type Err = ClimateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let upper = value.trim().to_ascii_uppercase();
        match upper.as_str() {
            "NONE" => Ok(Self::None),
            "SLEEP" => Ok(Self::Sleep),
            _ => Err(ClimateError::UnsupportedPreset(value.trim().to_string())),
        }
    }
}

/// Desired device state as last accepted by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClimateState {
    pub mode: ClimateMode,
    #[serde(rename = "targetTemp")]
    pub target_temp_c: f32,
    pub fan: FanLevel,
    #[serde(default = "default_preset")]
    pub preset: Preset,
}

fn default_preset() -> Preset {
    Preset::None
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransmitDiagnostics {
    #[serde(rename = "sentFrames")]
    pub sent_frames: u64,
    #[serde(rename = "failedSends")]
    pub failed_sends: u64,
    #[serde(rename = "receivedFrames")]
    pub received_frames: u64,
    #[serde(rename = "rejectedFrames")]
    pub rejected_frames: u64,
    #[serde(rename = "lastError")]
    pub last_error: Option<String>,
    #[serde(rename = "lastTransmitEpoch")]
    pub last_transmit_epoch: Option<i64>,
    #[serde(rename = "lastReceiveEpoch")]
    pub last_receive_epoch: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub id: String,
    pub mode: &'static str,
    #[serde(rename = "targetTemp")]
    pub target_temp: f32,
    pub fan: &'static str,
    pub preset: &'static str,
    #[serde(rename = "supportedModes")]
    pub supported_modes: Vec<&'static str>,
    #[serde(rename = "supportedFanLevels")]
    pub supported_fan_levels: Vec<&'static str>,
    #[serde(rename = "supportedPresets")]
    pub supported_presets: Vec<&'static str>,
    #[serde(rename = "minTemp")]
    pub min_temp: f32,
    #[serde(rename = "maxTemp")]
    pub max_temp: f32,
    #[serde(rename = "tempStep")]
    pub temp_step: f32,
    pub diagnostics: TransmitDiagnostics,
    #[serde(rename = "scheduleEnabled")]
    pub schedule_enabled: bool,
    #[serde(rename = "nextScheduleEventEpoch")]
    pub next_schedule_event_epoch: Option<i64>,
    #[serde(rename = "timeSynced")]
    pub time_synced: bool,
    pub timezone: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClimateStatePayload {
    pub mode: &'static str,
    pub target: f32,
    pub fan: &'static str,
    pub preset: &'static str,
    #[serde(rename = "lastTransmitEpoch")]
    pub last_transmit_epoch: Option<i64>,
    #[serde(rename = "lastReceiveEpoch")]
    pub last_receive_epoch: Option<i64>,
}
