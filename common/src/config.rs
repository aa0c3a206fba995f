use serde::{Deserialize, Serialize};

use crate::{
    error::ConfigError,
    types::{ClimateMode, ClimateState, FanLevel, Preset},
};

pub const ACP24_TEMP_MIN_C: f32 = 18.0;
pub const ACP24_TEMP_MAX_C: f32 = 30.0;

/// Raw device options as they appear in the runtime configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSettings {
    pub id: String,
    pub supported_modes: Vec<ClimateMode>,
    pub min_temp_c: f32,
    pub max_temp_c: f32,
    pub temp_step_c: f32,
    pub fan_levels: Vec<FanLevel>,
    #[serde(default)]
    pub presets: Vec<Preset>,
    pub default_target_c: f32,
    #[serde(default)]
    pub time_id: Option<String>,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            id: "acp24_climate".to_string(),
            supported_modes: vec![
                ClimateMode::Off,
                ClimateMode::Cool,
                ClimateMode::Dry,
                ClimateMode::FanOnly,
                ClimateMode::Auto,
            ],
            min_temp_c: ACP24_TEMP_MIN_C,
            max_temp_c: ACP24_TEMP_MAX_C,
            temp_step_c: 1.0,
            fan_levels: vec![
                FanLevel::Auto,
                FanLevel::Low,
                FanLevel::Medium,
                FanLevel::High,
            ],
            presets: vec![Preset::None, Preset::Sleep],
            default_target_c: 24.0,
            time_id: Some("sntp_time".to_string()),
        }
    }
}

/// Validated, immutable device parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfig {
    id: String,
    supported_modes: Vec<ClimateMode>,
    min_temp_c: f32,
    max_temp_c: f32,
    temp_step_c: f32,
    fan_levels: Vec<FanLevel>,
    presets: Vec<Preset>,
    default_target_c: f32,
    time_id: Option<String>,
}

impl DeviceConfig {
    pub fn from_settings(settings: DeviceSettings) -> Result<Self, ConfigError> {
        let DeviceSettings {
            id,
            mut supported_modes,
            min_temp_c,
            max_temp_c,
            temp_step_c,
            mut fan_levels,
            mut presets,
            default_target_c,
            time_id,
        } = settings;

        let id = id.trim().to_string();
        if id.is_empty() {
            return Err(ConfigError::MissingId);
        }

        if !min_temp_c.is_finite() || !max_temp_c.is_finite() {
            return Err(ConfigError::NonFiniteBounds {
                min: min_temp_c,
                max: max_temp_c,
            });
        }
        if min_temp_c > max_temp_c {
            return Err(ConfigError::InvertedBounds {
                min: min_temp_c,
                max: max_temp_c,
            });
        }
        if !temp_step_c.is_finite() || temp_step_c <= 0.0 {
            return Err(ConfigError::NonPositiveStep(temp_step_c));
        }

        supported_modes.sort();
        supported_modes.dedup();
        if supported_modes.is_empty() {
            return Err(ConfigError::NoModes);
        }

        fan_levels.sort();
        fan_levels.dedup();
        if fan_levels.is_empty() {
            return Err(ConfigError::NoFanLevels);
        }

        presets.push(Preset::None);
        presets.sort();
        presets.dedup();

        if !default_target_c.is_finite() || !(min_temp_c..=max_temp_c).contains(&default_target_c)
        {
            return Err(ConfigError::DefaultTargetOutOfRange {
                value: default_target_c,
                min: min_temp_c,
                max: max_temp_c,
            });
        }

        let time_id = time_id
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let mut config = Self {
            id,
            supported_modes,
            min_temp_c,
            max_temp_c,
            temp_step_c,
            fan_levels,
            presets,
            default_target_c,
            time_id,
        };
        config.default_target_c = config.snap_temperature(default_target_c);
        Ok(config)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn supported_modes(&self) -> &[ClimateMode] {
        &self.supported_modes
    }

    pub fn supports_mode(&self, mode: ClimateMode) -> bool {
        self.supported_modes.contains(&mode)
    }

    pub fn min_temp_c(&self) -> f32 {
        self.min_temp_c
    }

    pub fn max_temp_c(&self) -> f32 {
        self.max_temp_c
    }

    pub fn temp_step_c(&self) -> f32 {
        self.temp_step_c
    }

    pub fn contains_temperature(&self, value: f32) -> bool {
        value.is_finite() && (self.min_temp_c..=self.max_temp_c).contains(&value)
    }

    pub fn fan_levels(&self) -> &[FanLevel] {
        &self.fan_levels
    }

    pub fn supports_fan(&self, level: FanLevel) -> bool {
        self.fan_levels.contains(&level)
    }

    pub fn presets(&self) -> &[Preset] {
        &self.presets
    }

    pub fn supports_preset(&self, preset: Preset) -> bool {
        self.presets.contains(&preset)
    }

    pub fn default_target_c(&self) -> f32 {
        self.default_target_c
    }

    pub fn time_id(&self) -> Option<&str> {
        self.time_id.as_deref()
    }

    /// Rounds to the nearest step counted from the lower bound, never past the upper bound.
    pub fn snap_temperature(&self, value: f32) -> f32 {
        let steps = ((value - self.min_temp_c) / self.temp_step_c).round();
        let snapped = self.min_temp_c + steps * self.temp_step_c;
        snapped.clamp(self.min_temp_c, self.max_temp_c)
    }

    pub fn default_state(&self) -> ClimateState {
        let mode = if self.supports_mode(ClimateMode::Off) {
            ClimateMode::Off
        } else {
            self.supported_modes[0]
        };

        ClimateState {
            mode,
            target_temp_c: self.default_target_c,
            fan: self.fan_levels[0],
            preset: Preset::None,
        }
    }

    /// Checks that every field of `state` is something this device accepts.
    pub fn validate_state(&self, state: &ClimateState) -> Result<(), String> {
        if !self.supports_mode(state.mode) {
            return Err(format!("mode {}", state.mode.as_str()));
        }
        if !self.contains_temperature(state.target_temp_c) {
            return Err(format!("target {}", state.target_temp_c));
        }
        if !self.supports_fan(state.fan) {
            return Err(format!("fan {}", state.fan.as_str()));
        }
        if !self.supports_preset(state.preset) {
            return Err(format!("preset {}", state.preset.as_str()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            mqtt_host: "192.168.1.100".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IrHardwareConfig {
    pub sender_pin: i32,
    #[serde(default)]
    pub receiver_pin: Option<i32>,
    pub tx_rmt_channel: u8,
    pub rx_rmt_channel: u8,
    pub carrier_khz: u32,
    pub tolerance_percent: u8,
    pub repeat: u8,
}

impl Default for IrHardwareConfig {
    fn default() -> Self {
        Self {
            sender_pin: 4,
            receiver_pin: None,
            tx_rmt_channel: 0,
            rx_rmt_channel: 4,
            carrier_khz: 38,
            tolerance_percent: 25,
            repeat: 1,
        }
    }
}

impl IrHardwareConfig {
    pub fn sanitize(&mut self) {
        if self.sender_pin < 0 {
            self.sender_pin = 4;
        }

        if matches!(self.receiver_pin, Some(pin) if pin < 0 || pin == self.sender_pin) {
            self.receiver_pin = None;
        }

        if self.tx_rmt_channel > 7 {
            self.tx_rmt_channel = 0;
        }
        if self.rx_rmt_channel > 7 || self.rx_rmt_channel == self.tx_rmt_channel {
            self.rx_rmt_channel = (self.tx_rmt_channel + 4) % 8;
        }

        self.carrier_khz = self.carrier_khz.clamp(10, 100);
        self.tolerance_percent = self.tolerance_percent.clamp(5, 50);
        self.repeat = self.repeat.clamp(1, 4);
    }
}

/// Last accepted state, restored at startup without transmitting.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PersistedState {
    #[serde(default)]
    pub last: Option<ClimateState>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub device: DeviceSettings,
    #[serde(default)]
    pub ir: IrHardwareConfig,
    pub network: NetworkConfig,
    pub timezone: String,
    #[serde(default)]
    pub state: PersistedState,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            device: DeviceSettings::default(),
            ir: IrHardwareConfig::default(),
            network: NetworkConfig::default(),
            timezone: "Europe/Budapest".to_string(),
            state: PersistedState::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn settings(min: f32, max: f32, step: f32) -> DeviceSettings {
        DeviceSettings {
            min_temp_c: min,
            max_temp_c: max,
            temp_step_c: step,
            default_target_c: min,
            ..DeviceSettings::default()
        }
    }

    #[test]
    fn default_settings_validate() {
        let config = DeviceConfig::from_settings(DeviceSettings::default()).unwrap();

        assert_eq!(config.id(), "acp24_climate");
        assert!(!config.supports_mode(ClimateMode::Heat));
        assert_eq!(config.presets(), &[Preset::None, Preset::Sleep]);
        assert_eq!(config.time_id(), Some("sntp_time"));
        assert_eq!(config.default_state().mode, ClimateMode::Off);
        assert_eq!(config.default_state().target_temp_c, 24.0);
    }

    #[test]
    fn rejects_inverted_bounds() {
        let err = DeviceConfig::from_settings(settings(30.0, 16.0, 1.0)).unwrap_err();
        assert!(matches!(err, ConfigError::InvertedBounds { .. }));
    }

    #[test]
    fn rejects_non_positive_step() {
        let err = DeviceConfig::from_settings(settings(16.0, 30.0, 0.0)).unwrap_err();
        assert_eq!(err, ConfigError::NonPositiveStep(0.0));

        let err = DeviceConfig::from_settings(settings(16.0, 30.0, -0.5)).unwrap_err();
        assert_eq!(err, ConfigError::NonPositiveStep(-0.5));
    }

    #[test]
    fn rejects_empty_mode_and_fan_sets() {
        let mut raw = DeviceSettings::default();
        raw.supported_modes.clear();
        assert_eq!(
            DeviceConfig::from_settings(raw).unwrap_err(),
            ConfigError::NoModes
        );

        let mut raw = DeviceSettings::default();
        raw.fan_levels.clear();
        assert_eq!(
            DeviceConfig::from_settings(raw).unwrap_err(),
            ConfigError::NoFanLevels
        );
    }

    #[test]
    fn rejects_default_target_outside_bounds() {
        let mut raw = DeviceSettings::default();
        raw.default_target_c = 35.0;
        assert!(matches!(
            DeviceConfig::from_settings(raw).unwrap_err(),
            ConfigError::DefaultTargetOutOfRange { .. }
        ));
    }

    #[test]
    fn collapses_duplicates_and_always_offers_no_preset() {
        let mut raw = DeviceSettings::default();
        raw.fan_levels = vec![FanLevel::High, FanLevel::Low, FanLevel::High];
        raw.presets = vec![Preset::Sleep];
        raw.time_id = Some("  ".to_string());

        let config = DeviceConfig::from_settings(raw).unwrap();
        assert_eq!(config.fan_levels(), &[FanLevel::Low, FanLevel::High]);
        assert_eq!(config.presets(), &[Preset::None, Preset::Sleep]);
        assert_eq!(config.time_id(), None);
        assert_eq!(config.default_state().fan, FanLevel::Low);
    }

    #[test]
    fn snaps_to_half_degree_steps() {
        let config = DeviceConfig::from_settings(settings(16.0, 30.0, 0.5)).unwrap();
        assert_eq!(config.snap_temperature(21.3), 21.5);
        assert_eq!(config.snap_temperature(21.2), 21.0);
        assert_eq!(config.snap_temperature(30.0), 30.0);
    }

    #[test]
    fn snapping_never_exceeds_upper_bound() {
        let config = DeviceConfig::from_settings(settings(16.0, 29.5, 2.0)).unwrap();
        assert_eq!(config.snap_temperature(29.4), 29.5);
    }

    #[test]
    fn sanitize_separates_tx_and_rx_channels() {
        let mut ir = IrHardwareConfig {
            sender_pin: 5,
            receiver_pin: Some(5),
            tx_rmt_channel: 3,
            rx_rmt_channel: 3,
            carrier_khz: 500,
            tolerance_percent: 90,
            repeat: 0,
        };
        ir.sanitize();

        assert_eq!(ir.receiver_pin, None);
        assert_eq!(ir.rx_rmt_channel, 7);
        assert_eq!(ir.carrier_khz, 100);
        assert_eq!(ir.tolerance_percent, 50);
        assert_eq!(ir.repeat, 1);
    }

    #[test]
    fn runtime_config_round_trips_through_json() {
        let runtime = RuntimeConfig::default();
        let raw = serde_json::to_string(&runtime).unwrap();
        let parsed: RuntimeConfig = serde_json::from_str(&raw).unwrap();

        assert_eq!(parsed.device, runtime.device);
        assert_eq!(parsed.ir, runtime.ir);
        assert_eq!(parsed.state, runtime.state);
    }
}
