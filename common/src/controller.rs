use log::{debug, info, warn};

use crate::{
    clock::Clock,
    codec::{Acp24Codec, IrCodec},
    config::DeviceConfig,
    error::{ClimateError, ConfigError, DecodeError, TransportError},
    pulse::PulseSequence,
    schedule::ScheduleAction,
    transport::Transport,
    types::{
        ClimateMode, ClimateState, ClimateStatePayload, ControllerStatus, FanLevel, Preset,
        TransmitDiagnostics,
    },
};

/// Builds a controller for an ACP24 unit from a validated configuration.
///
/// Fails when the configuration references a clock that was not supplied or
/// when its temperature range cannot be expressed on the wire.
pub fn new_climate_controller<T: Transport>(
    config: DeviceConfig,
    transport: T,
    clock: Option<Box<dyn Clock>>,
) -> Result<ClimateController<T>, ConfigError> {
    let codec = Acp24Codec::for_device(&config)?;
    ClimateController::with_codec(config, codec, transport, clock)
}

/// Authoritative desired state of one IR climate device.
///
/// Every accepted setter call encodes the new state and sends it exactly once.
/// State is committed only after the transport accepts the frame.
pub struct ClimateController<T, C = Acp24Codec> {
    config: DeviceConfig,
    codec: C,
    transport: T,
    clock: Option<Box<dyn Clock>>,
    state: ClimateState,
    diagnostics: TransmitDiagnostics,
}

impl<T: Transport, C: IrCodec> ClimateController<T, C> {
    pub fn with_codec(
        config: DeviceConfig,
        codec: C,
        transport: T,
        clock: Option<Box<dyn Clock>>,
    ) -> Result<Self, ConfigError> {
        if let Some(time_id) = config.time_id() {
            if clock.is_none() {
                return Err(ConfigError::MissingClock(time_id.to_string()));
            }
        }

        let state = config.default_state();
        Ok(Self {
            config,
            codec,
            transport,
            clock,
            state,
            diagnostics: TransmitDiagnostics::default(),
        })
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn state(&self) -> &ClimateState {
        &self.state
    }

    pub fn diagnostics(&self) -> &TransmitDiagnostics {
        &self.diagnostics
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn set_mode(&mut self, mode: ClimateMode) -> Result<(), ClimateError> {
        self.check_mode(mode)?;
        self.commit(ClimateState { mode, ..self.state })
    }

    pub fn set_target_temperature(&mut self, value: f32) -> Result<(), ClimateError> {
        let target_temp_c = self.check_temperature(value)?;
        self.commit(ClimateState {
            target_temp_c,
            ..self.state
        })
    }

    pub fn set_fan_level(&mut self, fan: FanLevel) -> Result<(), ClimateError> {
        self.check_fan(fan)?;
        self.commit(ClimateState { fan, ..self.state })
    }

    pub fn set_preset(&mut self, preset: Preset) -> Result<(), ClimateError> {
        self.check_preset(preset)?;
        self.commit(ClimateState { preset, ..self.state })
    }

    /// Sends the current state again without changing it.
    pub fn transmit_state(&mut self) -> Result<(), ClimateError> {
        let state = self.state;
        self.transmit(&state)?;
        Ok(())
    }

    /// Adopts a previously persisted state without transmitting it.
    pub fn restore_state(&mut self, state: ClimateState) -> Result<(), ClimateError> {
        self.check_mode(state.mode)?;
        let target_temp_c = self.check_temperature(state.target_temp_c)?;
        self.check_fan(state.fan)?;
        self.check_preset(state.preset)?;

        self.state = ClimateState {
            target_temp_c,
            ..state
        };
        Ok(())
    }

    /// Applies only the fields that differ from the current state.
    ///
    /// Returns whether anything was transmitted.
    pub fn apply_schedule_action(&mut self, action: &ScheduleAction) -> Result<bool, ClimateError> {
        let mut changed = false;

        if action.mode != self.state.mode {
            self.set_mode(action.mode)?;
            changed = true;
        }

        if let Some(target) = action.target_temp_c {
            let snapped = self.check_temperature(target)?;
            if (snapped - self.state.target_temp_c).abs() > f32::EPSILON {
                self.set_target_temperature(snapped)?;
                changed = true;
            }
        }

        if let Some(fan) = action.fan {
            if fan != self.state.fan {
                self.set_fan_level(fan)?;
                changed = true;
            }
        }

        Ok(changed)
    }

    /// Handles a frame captured by the IR receiver.
    ///
    /// Malformed or unsupported frames are dropped and counted; a valid frame
    /// replaces the state, its target snapped onto the configured step grid.
    /// Nothing is transmitted in either case.
    pub fn on_receive(&mut self, sequence: &PulseSequence) -> bool {
        let decoded = self.codec.decode(sequence).and_then(|state| {
            self.config
                .validate_state(&state)
                .map(|()| ClimateState {
                    target_temp_c: self.config.snap_temperature(state.target_temp_c),
                    ..state
                })
                .map_err(DecodeError::Unsupported)
        });

        match decoded {
            Ok(state) => {
                info!(
                    "{}: received mode={} target={} fan={} preset={}",
                    self.config.id(),
                    state.mode.as_str(),
                    state.target_temp_c,
                    state.fan.as_str(),
                    state.preset.as_str()
                );
                self.state = state;
                self.diagnostics.received_frames = self.diagnostics.received_frames.saturating_add(1);
                self.diagnostics.last_receive_epoch = self.now_epoch();
                true
            }
            Err(err) => {
                debug!(
                    "{}: ignoring IR frame with {} timings: {err}",
                    self.config.id(),
                    sequence.len()
                );
                self.diagnostics.rejected_frames = self.diagnostics.rejected_frames.saturating_add(1);
                false
            }
        }
    }

    pub fn status(
        &self,
        schedule_enabled: bool,
        next_schedule_event_epoch: Option<i64>,
        time_synced: bool,
        timezone: &str,
    ) -> ControllerStatus {
        ControllerStatus {
            id: self.config.id().to_string(),
            mode: self.state.mode.as_str(),
            target_temp: self.state.target_temp_c,
            fan: self.state.fan.as_str(),
            preset: self.state.preset.as_str(),
            supported_modes: self
                .config
                .supported_modes()
                .iter()
                .map(|mode| mode.as_str())
                .collect(),
            supported_fan_levels: self
                .config
                .fan_levels()
                .iter()
                .map(|fan| fan.as_str())
                .collect(),
            supported_presets: self
                .config
                .presets()
                .iter()
                .map(|preset| preset.as_str())
                .collect(),
            min_temp: self.config.min_temp_c(),
            max_temp: self.config.max_temp_c(),
            temp_step: self.config.temp_step_c(),
            diagnostics: self.diagnostics.clone(),
            schedule_enabled,
            next_schedule_event_epoch,
            time_synced,
            timezone: timezone.to_string(),
        }
    }

    pub fn state_payload(&self) -> ClimateStatePayload {
        ClimateStatePayload {
            mode: self.state.mode.as_str(),
            target: self.state.target_temp_c,
            fan: self.state.fan.as_str(),
            preset: self.state.preset.as_str(),
            last_transmit_epoch: self.diagnostics.last_transmit_epoch,
            last_receive_epoch: self.diagnostics.last_receive_epoch,
        }
    }

    fn check_mode(&self, mode: ClimateMode) -> Result<(), ClimateError> {
        if self.config.supports_mode(mode) {
            Ok(())
        } else {
            Err(ClimateError::UnsupportedMode(mode.as_str().to_string()))
        }
    }

    fn check_temperature(&self, value: f32) -> Result<f32, ClimateError> {
        if self.config.contains_temperature(value) {
            Ok(self.config.snap_temperature(value))
        } else {
            Err(ClimateError::OutOfRange {
                value,
                min: self.config.min_temp_c(),
                max: self.config.max_temp_c(),
            })
        }
    }

    fn check_fan(&self, fan: FanLevel) -> Result<(), ClimateError> {
        if self.config.supports_fan(fan) {
            Ok(())
        } else {
            Err(ClimateError::UnsupportedFanLevel(fan.as_str().to_string()))
        }
    }

    fn check_preset(&self, preset: Preset) -> Result<(), ClimateError> {
        if self.config.supports_preset(preset) {
            Ok(())
        } else {
            Err(ClimateError::UnsupportedPreset(preset.as_str().to_string()))
        }
    }

    fn commit(&mut self, next: ClimateState) -> Result<(), ClimateError> {
        self.transmit(&next)?;
        self.state = next;
        Ok(())
    }

    fn transmit(&mut self, state: &ClimateState) -> Result<(), TransportError> {
        let sequence = self.codec.encode(state);
        debug!(
            "{}: sending mode={} target={} fan={} preset={} ({} timings, {}us)",
            self.config.id(),
            state.mode.as_str(),
            state.target_temp_c,
            state.fan.as_str(),
            state.preset.as_str(),
            sequence.len(),
            sequence.total_duration_us()
        );

        match self.transport.send(&sequence) {
            Ok(()) => {
                self.diagnostics.sent_frames = self.diagnostics.sent_frames.saturating_add(1);
                self.diagnostics.last_error = None;
                self.diagnostics.last_transmit_epoch = self.now_epoch();
                Ok(())
            }
            Err(err) => {
                warn!("{}: IR transmit failed: {err}", self.config.id());
                self.diagnostics.failed_sends = self.diagnostics.failed_sends.saturating_add(1);
                self.diagnostics.last_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    fn now_epoch(&self) -> Option<i64> {
        self.clock
            .as_ref()
            .and_then(|clock| clock.now())
            .map(|now| now.timestamp())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, FixedOffset, TimeZone};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{config::DeviceSettings, transport::DisabledTransport};

    #[derive(Default)]
    struct RecordingTransport {
        sent: Vec<PulseSequence>,
        fail: bool,
    }

    impl Transport for RecordingTransport {
        fn send(&mut self, sequence: &PulseSequence) -> Result<(), TransportError> {
            if self.fail {
                return Err(TransportError::Unavailable("no emitter".to_string()));
            }
            self.sent.push(sequence.clone());
            Ok(())
        }
    }

    struct FixedClock(Option<DateTime<FixedOffset>>);

    impl Clock for FixedClock {
        fn now(&self) -> Option<DateTime<FixedOffset>> {
            self.0
        }
    }

    fn fixed_clock() -> Box<dyn Clock> {
        let now = FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2026, 7, 1, 12, 0, 0)
            .unwrap();
        Box::new(FixedClock(Some(now)))
    }

    fn controller_with(settings: DeviceSettings) -> ClimateController<RecordingTransport> {
        let config = DeviceConfig::from_settings(settings).unwrap();
        new_climate_controller(config, RecordingTransport::default(), Some(fixed_clock())).unwrap()
    }

    fn controller() -> ClimateController<RecordingTransport> {
        controller_with(DeviceSettings::default())
    }

    fn half_degree_controller() -> ClimateController<RecordingTransport> {
        controller_with(DeviceSettings {
            min_temp_c: 16.0,
            max_temp_c: 30.0,
            temp_step_c: 0.5,
            ..DeviceSettings::default()
        })
    }

    #[test]
    fn starts_from_config_defaults() {
        let controller = controller();
        assert_eq!(
            *controller.state(),
            ClimateState {
                mode: ClimateMode::Off,
                target_temp_c: 24.0,
                fan: FanLevel::Auto,
                preset: Preset::None,
            }
        );
        assert!(controller.transport().sent.is_empty());
    }

    #[test]
    fn referenced_clock_must_be_supplied() {
        let config = DeviceConfig::from_settings(DeviceSettings::default()).unwrap();
        let err = new_climate_controller(config, RecordingTransport::default(), None)
            .err()
            .unwrap();
        assert_eq!(err, ConfigError::MissingClock("sntp_time".to_string()));

        let config = DeviceConfig::from_settings(DeviceSettings {
            time_id: None,
            ..DeviceSettings::default()
        })
        .unwrap();
        assert!(new_climate_controller(config, RecordingTransport::default(), None).is_ok());
    }

    #[test]
    fn target_snaps_to_nearest_step() {
        let mut controller = half_degree_controller();

        controller.set_target_temperature(21.3).unwrap();
        assert_eq!(controller.state().target_temp_c, 21.5);

        controller.set_target_temperature(16.0).unwrap();
        assert_eq!(controller.state().target_temp_c, 16.0);

        controller.set_target_temperature(29.9).unwrap();
        assert_eq!(controller.state().target_temp_c, 30.0);
    }

    #[test]
    fn out_of_range_target_is_rejected_and_state_kept() {
        let mut controller = half_degree_controller();
        controller.set_target_temperature(22.0).unwrap();
        let before = *controller.state();

        for value in [15.9, 30.1, -5.0, f32::NAN, f32::INFINITY] {
            let err = controller.set_target_temperature(value).unwrap_err();
            assert!(matches!(err, ClimateError::OutOfRange { .. }));
            assert_eq!(*controller.state(), before);
        }
        assert_eq!(controller.transport().sent.len(), 1);
    }

    #[test]
    fn unknown_mode_name_is_rejected_and_mode_kept() {
        let mut controller = controller();
        controller.set_mode(ClimateMode::Cool).unwrap();

        let result = "turbo"
            .parse::<ClimateMode>()
            .and_then(|mode| controller.set_mode(mode));

        assert!(matches!(result, Err(ClimateError::UnsupportedMode(name)) if name == "turbo"));
        assert_eq!(controller.state().mode, ClimateMode::Cool);
    }

    #[test]
    fn mode_outside_supported_set_is_rejected() {
        let mut controller = controller();
        let err = controller.set_mode(ClimateMode::Heat).unwrap_err();

        assert!(matches!(err, ClimateError::UnsupportedMode(name) if name == "HEAT"));
        assert_eq!(controller.state().mode, ClimateMode::Off);
        assert!(controller.transport().sent.is_empty());
    }

    #[test]
    fn unconfigured_fan_level_is_rejected() {
        let mut controller = controller_with(DeviceSettings {
            fan_levels: vec![FanLevel::Auto, FanLevel::High],
            ..DeviceSettings::default()
        });

        let err = controller.set_fan_level(FanLevel::Medium).unwrap_err();
        assert!(matches!(err, ClimateError::UnsupportedFanLevel(_)));
        assert_eq!(controller.state().fan, FanLevel::Auto);

        controller.set_fan_level(FanLevel::High).unwrap();
        assert_eq!(controller.state().fan, FanLevel::High);
    }

    #[test]
    fn unconfigured_preset_is_rejected() {
        let mut controller = controller_with(DeviceSettings {
            presets: Vec::new(),
            ..DeviceSettings::default()
        });

        let err = controller.set_preset(Preset::Sleep).unwrap_err();
        assert!(matches!(err, ClimateError::UnsupportedPreset(_)));
    }

    #[test]
    fn every_accepted_setter_sends_exactly_one_frame() {
        let mut controller = controller();

        controller.set_mode(ClimateMode::Cool).unwrap();
        controller.set_target_temperature(22.0).unwrap();
        controller.set_fan_level(FanLevel::Low).unwrap();
        controller.set_preset(Preset::Sleep).unwrap();
        controller.set_fan_level(FanLevel::Low).unwrap();

        assert_eq!(controller.transport().sent.len(), 5);
        assert_eq!(controller.diagnostics().sent_frames, 5);
        assert!(controller.diagnostics().last_transmit_epoch.is_some());

        let codec = Acp24Codec::for_device(controller.config()).unwrap();
        let last = controller.transport().sent.last().unwrap();
        assert_eq!(codec.decode(last).unwrap(), *controller.state());
    }

    #[test]
    fn failed_send_leaves_state_unchanged() {
        let mut controller = controller();
        controller.transport.fail = true;

        let err = controller.set_mode(ClimateMode::Cool).unwrap_err();

        assert!(matches!(err, ClimateError::Transport(_)));
        assert!(!err.is_rejected_command());
        assert_eq!(controller.state().mode, ClimateMode::Off);
        assert_eq!(controller.diagnostics().failed_sends, 1);
        assert_eq!(
            controller.diagnostics().last_error.as_deref(),
            Some("transport unavailable: no emitter")
        );
    }

    #[test]
    fn transmit_state_resends_without_changing_state() {
        let mut controller = controller();
        controller.set_mode(ClimateMode::Auto).unwrap();
        let before = *controller.state();

        controller.transmit_state().unwrap();

        assert_eq!(*controller.state(), before);
        assert_eq!(controller.transport().sent.len(), 2);
        assert_eq!(controller.transport().sent[0], controller.transport().sent[1]);
    }

    #[test]
    fn received_frame_updates_state_without_sending() {
        let mut controller = controller();
        let codec = Acp24Codec::for_device(controller.config()).unwrap();
        let remote = ClimateState {
            mode: ClimateMode::FanOnly,
            target_temp_c: 27.0,
            fan: FanLevel::High,
            preset: Preset::None,
        };

        assert!(controller.on_receive(&codec.encode(&remote)));
        assert_eq!(*controller.state(), remote);
        assert!(controller.transport().sent.is_empty());
        assert_eq!(controller.diagnostics().received_frames, 1);
        assert!(controller.diagnostics().last_receive_epoch.is_some());
    }

    #[test]
    fn malformed_or_unsupported_frames_are_dropped() {
        let mut controller = controller();
        let codec = Acp24Codec::for_device(controller.config()).unwrap();
        let before = *controller.state();

        let short = PulseSequence::from_timings(38_000, &[400, -975, 400]);
        assert!(!controller.on_receive(&short));

        let heat = ClimateState {
            mode: ClimateMode::Heat,
            target_temp_c: 22.0,
            fan: FanLevel::Auto,
            preset: Preset::None,
        };
        assert!(!controller.on_receive(&codec.encode(&heat)));

        assert_eq!(*controller.state(), before);
        assert_eq!(controller.diagnostics().rejected_frames, 2);
    }

    #[test]
    fn received_target_is_snapped_onto_step_grid() {
        let mut controller = controller_with(DeviceSettings {
            min_temp_c: 18.0,
            max_temp_c: 30.0,
            temp_step_c: 2.0,
            ..DeviceSettings::default()
        });
        let codec = Acp24Codec::for_device(controller.config()).unwrap();
        let remote = ClimateState {
            mode: ClimateMode::Cool,
            target_temp_c: 19.0,
            fan: FanLevel::Low,
            preset: Preset::None,
        };

        assert!(controller.on_receive(&codec.encode(&remote)));
        assert_eq!(
            *controller.state(),
            ClimateState {
                target_temp_c: 20.0,
                ..remote
            }
        );
    }

    #[test]
    fn disabled_transport_reports_failure_and_keeps_state() {
        let config = DeviceConfig::from_settings(DeviceSettings {
            time_id: None,
            ..DeviceSettings::default()
        })
        .unwrap();
        let mut controller = new_climate_controller(config, DisabledTransport, None).unwrap();
        let before = *controller.state();

        let err = controller.set_mode(ClimateMode::Cool).unwrap_err();

        assert!(!err.is_rejected_command());
        assert_eq!(*controller.state(), before);
        assert_eq!(controller.diagnostics().sent_frames, 0);
        assert_eq!(controller.diagnostics().failed_sends, 1);
        assert_eq!(
            controller.diagnostics().last_error.as_deref(),
            Some("transport unavailable: IR transmitter not initialised")
        );
    }

    #[test]
    fn restore_validates_and_does_not_transmit() {
        let mut controller = half_degree_controller();
        let persisted = ClimateState {
            mode: ClimateMode::Cool,
            target_temp_c: 23.2,
            fan: FanLevel::Medium,
            preset: Preset::None,
        };

        controller.restore_state(persisted).unwrap();
        assert_eq!(controller.state().target_temp_c, 23.0);
        assert!(controller.transport().sent.is_empty());

        let invalid = ClimateState {
            mode: ClimateMode::Heat,
            ..persisted
        };
        assert!(controller.restore_state(invalid).is_err());
        assert_eq!(controller.state().mode, ClimateMode::Cool);
    }

    #[test]
    fn schedule_action_only_sends_differences() {
        let mut controller = controller();
        let action = ScheduleAction {
            mode: ClimateMode::Cool,
            target_temp_c: Some(22.0),
            fan: None,
        };

        assert!(controller.apply_schedule_action(&action).unwrap());
        assert_eq!(controller.transport().sent.len(), 2);

        assert!(!controller.apply_schedule_action(&action).unwrap());
        assert_eq!(controller.transport().sent.len(), 2);
        assert_eq!(controller.state().mode, ClimateMode::Cool);
        assert_eq!(controller.state().target_temp_c, 22.0);
    }

    #[test]
    fn status_reports_capabilities_and_diagnostics() {
        let mut controller = controller();
        controller.set_mode(ClimateMode::Dry).unwrap();

        let status = controller.status(true, Some(1_700_000_000), true, "Europe/Budapest");
        assert_eq!(status.mode, "DRY");
        assert_eq!(
            status.supported_modes,
            vec!["OFF", "COOL", "FAN_ONLY", "DRY", "AUTO"]
        );
        assert_eq!(status.supported_fan_levels, vec!["AUTO", "LOW", "MEDIUM", "HIGH"]);
        assert_eq!(status.diagnostics.sent_frames, 1);

        let payload = controller.state_payload();
        assert_eq!(payload.mode, "DRY");
        assert_eq!(payload.target, 24.0);
    }
}
