use core::convert::TryInto;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, OnceLock, PoisonError,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use chrono::Utc;
use embedded_svc::{
    http::{Headers, Method},
    io::{Read, Write},
    mqtt::client::{Details, EventPayload, QoS},
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    gpio::{AnyInputPin, AnyOutputPin},
    rmt::{CHANNEL0, CHANNEL1, CHANNEL2, CHANNEL3, RMT},
};
#[cfg(any(esp32, esp32s3))]
use esp_idf_hal::rmt::{CHANNEL4, CHANNEL5, CHANNEL6, CHANNEL7};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, prelude::Peripherals},
    http::server::{Configuration as HttpConfiguration, EspHttpConnection, EspHttpServer, Request},
    log::EspLogger,
    mqtt::client::{EspMqttClient, EspMqttConnection, MqttClientConfiguration},
    nvs::{EspDefaultNvsPartition, EspNvs},
    sntp::{EspSntp, SyncStatus},
    wifi::{BlockingWifi, EspWifi},
};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use acp24_common::{
    codec::ACP24_CARRIER_HZ, Acp24Codec, ClimateController, ClimateError, ClimateMode, Clock,
    ControllerStatus, DeviceConfig, DisabledTransport, FanLevel, IrHardwareConfig, NetworkConfig,
    Preset, PulseSequence, RuntimeConfig, Schedule, ScheduleAction, Transport,
    TOPIC_CLIMATE_SCHEDULE_STATE, TOPIC_CLIMATE_STATE, TOPIC_CMD_FAN, TOPIC_CMD_MODE,
    TOPIC_CMD_PRESET, TOPIC_CMD_SCHEDULE, TOPIC_CMD_TARGET, TOPIC_IR_RECEIVED,
};

use crate::{
    ir::{RmtReceiver, RmtTransport},
    zone_clock::ZoneClock,
};

const NVS_NAMESPACE: &str = "acp24";
const NVS_RUNTIME_KEY: &str = "runtime_json";
const NVS_SCHEDULE_KEY: &str = "schedule_json";
const NVS_BUFFER_BYTES: usize = 4096;
const MAX_HTTP_BODY: usize = 4096;
const MAX_MQTT_PAYLOAD_BYTES: usize = 4096;
const WATCHDOG_TIMEOUT_SEC: u32 = 30;
const STATE_SAVE_DEBOUNCE_MS: u64 = 2_000;
const STATE_SAVE_RETRY_MS: u64 = 1_000;
const STATE_PUBLISH_INTERVAL_MS: u64 = 10_000;
const WIFI_RESTART_GRACE_MS: u64 = 300_000;
const WIFI_CONNECT_ATTEMPTS: u32 = 5;
const WIFI_RETRY_DELAY_MS: u64 = 3_000;

type EspController = ClimateController<Box<dyn Transport + Send>>;

#[derive(Clone)]
struct SharedState {
    controller: Arc<Mutex<EspController>>,
    schedule: Arc<Mutex<Schedule>>,
    clock: ZoneClock,
    state_save_deadline_ms: Arc<Mutex<Option<u64>>>,
    mqtt_connected: Arc<AtomicBool>,
}

#[derive(Clone)]
struct NvsStore {
    partition: EspDefaultNvsPartition,
    lock: Arc<Mutex<()>>,
}

#[derive(Debug, Serialize)]
struct TimeStatus {
    #[serde(rename = "timeSynced")]
    time_synced: bool,
    timezone: String,
    #[serde(rename = "nowEpoch")]
    now_epoch: i64,
}

#[derive(Debug, Deserialize)]
struct TimezoneUpdate {
    timezone: String,
}

/// A parsed user command, shared by the HTTP and MQTT surfaces.
#[derive(Debug, Clone, Copy)]
enum Command {
    Mode(ClimateMode),
    Target(f32),
    Fan(FanLevel),
    Preset(Preset),
    Resend,
}

impl Command {
    fn apply(self, controller: &mut EspController) -> Result<(), ClimateError> {
        match self {
            Self::Mode(mode) => controller.set_mode(mode),
            Self::Target(target) => controller.set_target_temperature(target),
            Self::Fan(fan) => controller.set_fan_level(fan),
            Self::Preset(preset) => controller.set_preset(preset),
            Self::Resend => controller.transmit_state(),
        }
    }
}

fn parse_mode(value: &str) -> Result<Command, String> {
    value
        .parse::<ClimateMode>()
        .map(Command::Mode)
        .map_err(|err| err.to_string())
}

fn parse_target(value: &str) -> Result<Command, String> {
    value
        .trim()
        .parse::<f32>()
        .map(Command::Target)
        .map_err(|_| "Invalid temperature value".to_string())
}

fn parse_fan(value: &str) -> Result<Command, String> {
    value
        .parse::<FanLevel>()
        .map(Command::Fan)
        .map_err(|err| err.to_string())
}

fn parse_preset(value: &str) -> Result<Command, String> {
    value
        .parse::<Preset>()
        .map(Command::Preset)
        .map_err(|err| err.to_string())
}

/// RMT channels handed out at most once each.
struct RmtChannels {
    channel0: Option<CHANNEL0>,
    channel1: Option<CHANNEL1>,
    channel2: Option<CHANNEL2>,
    channel3: Option<CHANNEL3>,
    #[cfg(any(esp32, esp32s3))]
    channel4: Option<CHANNEL4>,
    #[cfg(any(esp32, esp32s3))]
    channel5: Option<CHANNEL5>,
    #[cfg(any(esp32, esp32s3))]
    channel6: Option<CHANNEL6>,
    #[cfg(any(esp32, esp32s3))]
    channel7: Option<CHANNEL7>,
}

impl RmtChannels {
    fn new(rmt: RMT) -> Self {
        Self {
            channel0: Some(rmt.channel0),
            channel1: Some(rmt.channel1),
            channel2: Some(rmt.channel2),
            channel3: Some(rmt.channel3),
            #[cfg(any(esp32, esp32s3))]
            channel4: Some(rmt.channel4),
            #[cfg(any(esp32, esp32s3))]
            channel5: Some(rmt.channel5),
            #[cfg(any(esp32, esp32s3))]
            channel6: Some(rmt.channel6),
            #[cfg(any(esp32, esp32s3))]
            channel7: Some(rmt.channel7),
        }
    }
}

macro_rules! with_rmt_channel {
    ($channels:expr, $index:expr, |$channel:ident| $body:expr) => {{
        fn taken<T>(slot: &mut Option<T>, index: u8) -> anyhow::Result<T> {
            slot.take()
                .ok_or_else(|| anyhow!("RMT channel {index} is already in use"))
        }

        match $index {
            0 => { let $channel = taken(&mut $channels.channel0, 0)?; $body }
            1 => { let $channel = taken(&mut $channels.channel1, 1)?; $body }
            2 => { let $channel = taken(&mut $channels.channel2, 2)?; $body }
            3 => { let $channel = taken(&mut $channels.channel3, 3)?; $body }
            #[cfg(any(esp32, esp32s3))]
            4 => { let $channel = taken(&mut $channels.channel4, 4)?; $body }
            #[cfg(any(esp32, esp32s3))]
            5 => { let $channel = taken(&mut $channels.channel5, 5)?; $body }
            #[cfg(any(esp32, esp32s3))]
            6 => { let $channel = taken(&mut $channels.channel6, 6)?; $body }
            #[cfg(any(esp32, esp32s3))]
            7 => { let $channel = taken(&mut $channels.channel7, 7)?; $body }
            other => Err(anyhow!("unsupported RMT channel: {other}")),
        }
    }};
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let nvs_store = NvsStore {
        partition: nvs_partition.clone(),
        lock: Arc::new(Mutex::new(())),
    };

    let mut runtime = nvs_store.load_runtime_config().unwrap_or_else(|err| {
        warn!("failed to load runtime config from NVS: {err:#}");
        RuntimeConfig::default()
    });
    runtime.ir.sanitize();
    ensure_wifi_defaults(&mut runtime);

    let config = DeviceConfig::from_settings(runtime.device.clone())
        .context("invalid device configuration")?;
    let codec = Acp24Codec::for_device(&config)
        .context("device range cannot be encoded")?
        .with_tolerance(runtime.ir.tolerance_percent)
        .with_repeat(runtime.ir.repeat);

    let Peripherals { modem, rmt, .. } = Peripherals::take()?;
    let mut channels = RmtChannels::new(rmt);

    let transport: Box<dyn Transport + Send> = match init_transport(&mut channels, &runtime.ir) {
        Ok(transport) => {
            info!(
                "IR transmitter on RMT channel{} / GPIO{} @ {}kHz",
                runtime.ir.tx_rmt_channel, runtime.ir.sender_pin, runtime.ir.carrier_khz
            );
            Box::new(transport)
        }
        Err(err) => {
            warn!("failed to initialize IR transmitter, running disabled: {err:#}");
            Box::new(DisabledTransport)
        }
    };

    let receiver = runtime.ir.receiver_pin.and_then(|pin| {
        match init_receiver(&mut channels, pin, runtime.ir.rx_rmt_channel) {
            Ok(receiver) => {
                info!(
                    "IR receiver on RMT channel{} / GPIO{pin}",
                    runtime.ir.rx_rmt_channel
                );
                Some(receiver)
            }
            Err(err) => {
                warn!("failed to initialize IR receiver: {err:#}");
                None
            }
        }
    });

    let wifi = connect_wifi(modem, sys_loop, nvs_partition, &runtime.network)
        .context("wifi startup failed")?;
    disable_wifi_power_save();

    let sntp = EspSntp::new_default().context("failed to start SNTP")?;
    info!("SNTP initialized");

    init_watchdog(WATCHDOG_TIMEOUT_SEC)?;

    let clock = ZoneClock::new(&runtime.timezone);
    let mut controller =
        ClimateController::with_codec(config, codec, transport, Some(Box::new(clock.clone())))
            .context("failed to create climate controller")?;

    if let Some(last) = runtime.state.last {
        if let Err(err) = controller.restore_state(last) {
            warn!("ignoring persisted climate state: {err}");
        }
    }

    let mut schedule = nvs_store.load_schedule().unwrap_or_else(|err| {
        warn!("failed to load schedule from NVS: {err:#}");
        Schedule::default()
    });
    schedule.normalize(controller.config());

    let shared_state = SharedState {
        controller: Arc::new(Mutex::new(controller)),
        schedule: Arc::new(Mutex::new(schedule)),
        clock: clock.clone(),
        state_save_deadline_ms: Arc::new(Mutex::new(None)),
        mqtt_connected: Arc::new(AtomicBool::new(false)),
    };

    let (mqtt_client, mqtt_conn) = create_mqtt_client(&runtime.network)?;
    let mqtt_client = Arc::new(Mutex::new(mqtt_client));

    subscribe_topics(&mqtt_client)?;
    spawn_mqtt_receiver(
        shared_state.clone(),
        nvs_store.clone(),
        mqtt_conn,
        mqtt_client.clone(),
    )?;
    if let Some(receiver) = receiver {
        spawn_ir_receiver(shared_state.clone(), receiver)?;
    }
    spawn_control_loop(shared_state.clone(), nvs_store.clone(), mqtt_client)?;

    let server = create_http_server(shared_state, nvs_store)?;

    // Keep services alive for the program lifetime.
    let _wifi = wifi;
    let _server = server;

    loop {
        if !clock.is_synced() && sntp.get_sync_status() == SyncStatus::Completed {
            clock.mark_synced(true);
            info!("time synchronized, zone {}", clock.timezone());
        }
        thread::sleep(Duration::from_secs(1));
    }
}

fn ensure_wifi_defaults(runtime: &mut RuntimeConfig) {
    if runtime.network.wifi_ssid.is_empty() {
        if let Some(ssid) = option_env!("WIFI_SSID") {
            runtime.network.wifi_ssid = ssid.to_string();
        }
    }

    if runtime.network.wifi_pass.is_empty() {
        if let Some(pass) = option_env!("WIFI_PASS") {
            runtime.network.wifi_pass = pass.to_string();
        }
    }
}

fn init_transport(channels: &mut RmtChannels, ir: &IrHardwareConfig) -> anyhow::Result<RmtTransport> {
    if ir.sender_pin < 0 {
        return Err(anyhow!("invalid sender pin: {}", ir.sender_pin));
    }

    // SAFETY: the pin number comes from validated config and is claimed only here.
    let pin = unsafe { AnyOutputPin::new(ir.sender_pin) };
    with_rmt_channel!(channels, ir.tx_rmt_channel, |channel| {
        RmtTransport::new(channel, pin, ir.carrier_khz)
    })
}

fn init_receiver(channels: &mut RmtChannels, pin: i32, rmt_channel: u8) -> anyhow::Result<RmtReceiver> {
    if pin < 0 {
        return Err(anyhow!("invalid receiver pin: {pin}"));
    }

    // SAFETY: sanitize() guarantees the receiver pin differs from the sender pin.
    let pin = unsafe { AnyInputPin::new(pin) };
    with_rmt_channel!(channels, rmt_channel, |channel| RmtReceiver::new(channel, pin))
}

fn connect_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    network: &NetworkConfig,
) -> anyhow::Result<EspWifi<'static>> {
    let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
    let mut wifi = BlockingWifi::wrap(&mut esp_wifi, sys_loop)?;

    if network.wifi_ssid.trim().is_empty() {
        return Err(anyhow!("wifi credentials missing"));
    }

    let auth_method = if network.wifi_pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: network
            .wifi_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: network
            .wifi_pass
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    wifi.start()?;
    info!("wifi started, connecting to `{}`", network.wifi_ssid);

    let mut attempt = 1;
    loop {
        let result = wifi.connect().and_then(|()| wifi.wait_netif_up());
        match result {
            Ok(()) => {
                info!("wifi connected on attempt {attempt}");
                break;
            }
            Err(err) if attempt < WIFI_CONNECT_ATTEMPTS => {
                warn!("wifi connect attempt {attempt}/{WIFI_CONNECT_ATTEMPTS} failed: {err:#}");
                let _ = wifi.disconnect();
                thread::sleep(Duration::from_millis(WIFI_RETRY_DELAY_MS));
                attempt += 1;
            }
            Err(err) => {
                return Err(anyhow!(
                    "all {WIFI_CONNECT_ATTEMPTS} wifi connect attempts failed: {err:#}"
                ));
            }
        }
    }

    drop(wifi);
    Ok(esp_wifi)
}

fn create_mqtt_client(
    network: &NetworkConfig,
) -> anyhow::Result<(EspMqttClient<'static>, EspMqttConnection)> {
    let url = format!("mqtt://{}:{}", network.mqtt_host, network.mqtt_port);

    let conf = MqttClientConfiguration {
        client_id: Some("acp24-controller"),
        username: (!network.mqtt_user.is_empty()).then_some(network.mqtt_user.as_str()),
        password: (!network.mqtt_pass.is_empty()).then_some(network.mqtt_pass.as_str()),
        ..Default::default()
    };

    Ok(EspMqttClient::new(url.as_str(), &conf)?)
}

fn subscribe_topics(mqtt: &Arc<Mutex<EspMqttClient<'static>>>) -> anyhow::Result<()> {
    let topics = [
        TOPIC_CMD_MODE,
        TOPIC_CMD_TARGET,
        TOPIC_CMD_FAN,
        TOPIC_CMD_PRESET,
        TOPIC_CMD_SCHEDULE,
        TOPIC_IR_RECEIVED,
    ];

    let mut mqtt = lock(mqtt);
    for topic in topics {
        mqtt.subscribe(topic, QoS::AtMostOnce)?;
    }

    Ok(())
}

fn spawn_mqtt_receiver(
    state: SharedState,
    nvs_store: NvsStore,
    mut conn: EspMqttConnection,
    mqtt: Arc<Mutex<EspMqttClient<'static>>>,
) -> anyhow::Result<()> {
    thread::Builder::new()
        .name("mqtt-rx".into())
        .stack_size(12 * 1024)
        .spawn(move || loop {
            match conn.next() {
                Ok(event) => {
                    state.mqtt_connected.store(true, Ordering::Relaxed);

                    let EventPayload::Received {
                        topic: Some(topic),
                        data,
                        details: Details::Complete,
                        ..
                    } = event.payload()
                    else {
                        continue;
                    };

                    if data.len() > MAX_MQTT_PAYLOAD_BYTES {
                        warn!(
                            "dropping oversized MQTT payload on topic {} ({} bytes)",
                            topic,
                            data.len()
                        );
                        continue;
                    }

                    if let Ok(message) = core::str::from_utf8(data) {
                        if let Err(err) =
                            handle_mqtt_message(&state, &nvs_store, topic, message.trim())
                        {
                            warn!("mqtt message handling failed: {err:#}");
                        }
                    }
                }
                Err(err) => {
                    state.mqtt_connected.store(false, Ordering::Relaxed);
                    warn!("mqtt receive loop error: {err:?}");
                    thread::sleep(Duration::from_secs(2));
                    if let Err(sub_err) = subscribe_topics(&mqtt) {
                        warn!("mqtt re-subscribe failed: {sub_err:#}");
                    }
                }
            }
        })
        .context("failed to spawn mqtt receiver thread")?;
    Ok(())
}

fn spawn_ir_receiver(state: SharedState, mut receiver: RmtReceiver) -> anyhow::Result<()> {
    thread::Builder::new()
        .name("ir-rx".into())
        .stack_size(8 * 1024)
        .spawn(move || loop {
            match receiver.next_frame(ACP24_CARRIER_HZ) {
                Ok(Some(sequence)) => {
                    let accepted = lock(&state.controller).on_receive(&sequence);
                    if accepted {
                        queue_state_save(&state, monotonic_ms());
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    warn!("IR receive failed: {err:#}");
                    thread::sleep(Duration::from_secs(1));
                }
            }
        })
        .context("failed to spawn IR receiver thread")?;
    Ok(())
}

fn spawn_control_loop(
    state: SharedState,
    nvs_store: NvsStore,
    mqtt: Arc<Mutex<EspMqttClient<'static>>>,
) -> anyhow::Result<()> {
    thread::Builder::new()
        .name("control-loop".into())
        .stack_size(12 * 1024)
        .spawn(move || {
            if let Err(err) = add_current_task_to_watchdog() {
                warn!("failed to register control loop with watchdog: {err:#}");
            }

            let mut last_state_publish_ms = 0_u64;
            let mut wifi_disconnected_since_ms: Option<u64> = None;
            let mut last_action: Option<ScheduleAction> = None;

            loop {
                feed_watchdog();
                let now_ms = monotonic_ms();

                if is_wifi_station_connected() {
                    wifi_disconnected_since_ms = None;
                } else if let Some(disconnected_since_ms) = wifi_disconnected_since_ms {
                    if now_ms.saturating_sub(disconnected_since_ms) >= WIFI_RESTART_GRACE_MS {
                        warn!(
                            "wifi disconnected for {}s; restarting device for recovery",
                            WIFI_RESTART_GRACE_MS / 1000
                        );
                        thread::sleep(Duration::from_millis(100));
                        unsafe { esp_idf_svc::sys::esp_restart() };
                    }
                } else {
                    wifi_disconnected_since_ms = Some(now_ms);
                }

                if let Some(now) = state.clock.now() {
                    let action = lock(&state.schedule).current_action(now);
                    if action != last_action {
                        last_action = action;
                        if let Some(action) = action {
                            apply_schedule(&state, &action, now_ms);
                        }
                    }
                }

                flush_pending_state_save(&nvs_store, &state, now_ms);

                if now_ms.saturating_sub(last_state_publish_ms) >= STATE_PUBLISH_INTERVAL_MS {
                    last_state_publish_ms = now_ms;
                    if let Err(err) = publish_state(&state, &mqtt) {
                        warn!("state publish failed: {err:#}");
                    }
                }

                thread::sleep(Duration::from_millis(200));
            }
        })
        .context("failed to spawn control loop thread")?;
    Ok(())
}

fn apply_schedule(state: &SharedState, action: &ScheduleAction, now_ms: u64) {
    let result = lock(&state.controller).apply_schedule_action(action);
    match result {
        Ok(true) => {
            info!("schedule applied: {action:?}");
            queue_state_save(state, now_ms);
        }
        Ok(false) => {}
        Err(err) => warn!("schedule action {action:?} failed: {err}"),
    }
}

fn publish_state(
    state: &SharedState,
    mqtt: &Arc<Mutex<EspMqttClient<'static>>>,
) -> anyhow::Result<()> {
    let payload = serde_json::to_vec(&lock(&state.controller).state_payload())?;
    let schedule_payload = serde_json::to_vec(&*lock(&state.schedule))?;

    let mut client = lock(mqtt);
    client.publish(TOPIC_CLIMATE_STATE, QoS::AtLeastOnce, true, &payload)?;
    client.publish(
        TOPIC_CLIMATE_SCHEDULE_STATE,
        QoS::AtLeastOnce,
        true,
        &schedule_payload,
    )?;
    Ok(())
}

fn handle_mqtt_message(
    state: &SharedState,
    nvs_store: &NvsStore,
    topic: &str,
    message: &str,
) -> anyhow::Result<()> {
    let command = match topic {
        TOPIC_CMD_MODE => parse_mode(message),
        TOPIC_CMD_TARGET => parse_target(message),
        TOPIC_CMD_FAN => parse_fan(message),
        TOPIC_CMD_PRESET => parse_preset(message),
        TOPIC_CMD_SCHEDULE => {
            let schedule =
                serde_json::from_str::<Schedule>(message).context("invalid schedule payload")?;
            return install_schedule(state, nvs_store, schedule).map(|_| ());
        }
        TOPIC_IR_RECEIVED => {
            let timings =
                serde_json::from_str::<Vec<i32>>(message).context("invalid IR timings payload")?;
            let sequence = PulseSequence::from_timings(ACP24_CARRIER_HZ, &timings);
            if lock(&state.controller).on_receive(&sequence) {
                queue_state_save(state, monotonic_ms());
            }
            return Ok(());
        }
        _ => return Ok(()),
    };

    let command = command.map_err(|message| anyhow!(message))?;
    execute(state, command)?;
    Ok(())
}

fn execute(state: &SharedState, command: Command) -> Result<(), ClimateError> {
    command.apply(&mut lock(&state.controller))?;
    queue_state_save(state, monotonic_ms());
    Ok(())
}

fn install_schedule(
    state: &SharedState,
    nvs_store: &NvsStore,
    mut schedule: Schedule,
) -> anyhow::Result<Schedule> {
    {
        let controller = lock(&state.controller);
        schedule.normalize(controller.config());
    }
    *lock(&state.schedule) = schedule.clone();
    nvs_store.save_schedule(&schedule)?;
    Ok(schedule)
}

fn build_status(state: &SharedState) -> ControllerStatus {
    let now = state.clock.now();
    let (schedule_enabled, next_event) = {
        let schedule = lock(&state.schedule);
        (
            schedule.enabled,
            now.and_then(|now| schedule.next_event_epoch(now)),
        )
    };

    lock(&state.controller).status(
        schedule_enabled,
        next_event,
        state.clock.is_synced(),
        &state.clock.timezone(),
    )
}

fn create_http_server(
    state: SharedState,
    nvs_store: NvsStore,
) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        stack_size: 16 * 1024,
        ..Default::default()
    };

    let mut server = EspHttpServer::new(&conf)?;

    {
        let state = state.clone();
        server.fn_handler::<anyhow::Error, _>("/api/status", Method::Get, move |req| {
            let status = build_status(&state);
            write_json(req, &status)
        })?;
    }

    let commands: [(&str, fn(&str) -> Result<Command, String>); 4] = [
        ("/api/mode", parse_mode),
        ("/api/target", parse_target),
        ("/api/fan", parse_fan),
        ("/api/preset", parse_preset),
    ];
    for (uri, parse) in commands {
        let state = state.clone();
        server.fn_handler::<anyhow::Error, _>(uri, Method::Post, move |req| {
            let Some(value) = query_param(req.uri(), "value") else {
                return write_error(req, 400, "Missing 'value' parameter");
            };
            let command = match parse(&value) {
                Ok(command) => command,
                Err(message) => return write_error(req, 400, &message),
            };
            command_response(req, &state, command)
        })?;
    }

    {
        let state = state.clone();
        server.fn_handler::<anyhow::Error, _>("/api/ir/resend", Method::Post, move |req| {
            command_response(req, &state, Command::Resend)
        })?;
    }

    {
        let state = state.clone();
        server.fn_handler::<anyhow::Error, _>("/api/ir/diagnostics", Method::Get, move |req| {
            let controller = lock(&state.controller);
            let payload = serde_json::json!({
                "enabled": controller.transport().is_enabled(),
                "diagnostics": controller.diagnostics(),
            });
            drop(controller);
            write_json(req, &payload)
        })?;
    }

    {
        let state = state.clone();
        server.fn_handler::<anyhow::Error, _>("/api/schedule", Method::Get, move |req| {
            let schedule = lock(&state.schedule).clone();
            write_json(req, &schedule)
        })?;
    }

    {
        let state = state.clone();
        let nvs_store = nvs_store.clone();
        server.fn_handler::<anyhow::Error, _>("/api/schedule", Method::Put, move |mut req| {
            let body = read_request_body(&mut req)?;
            let Ok(schedule) = serde_json::from_slice::<Schedule>(&body) else {
                return write_error(req, 400, "Invalid schedule payload");
            };
            match install_schedule(&state, &nvs_store, schedule) {
                Ok(schedule) => write_json(req, &schedule),
                Err(err) => {
                    warn!("failed to persist schedule update: {err:#}");
                    write_error(req, 500, "Failed to persist schedule")
                }
            }
        })?;
    }

    {
        let state = state.clone();
        server.fn_handler::<anyhow::Error, _>("/api/time", Method::Get, move |req| {
            write_json(req, &time_status(&state))
        })?;
    }

    {
        server.fn_handler::<anyhow::Error, _>("/api/timezone", Method::Put, move |mut req| {
            let body = read_request_body(&mut req)?;
            let Ok(update) = serde_json::from_slice::<TimezoneUpdate>(&body) else {
                return write_error(req, 400, "Invalid timezone payload");
            };
            if state.clock.set_timezone(update.timezone.trim()).is_err() {
                return write_error(req, 400, "Invalid timezone value");
            }
            if let Err(err) = persist_runtime_from_state(&nvs_store, &state) {
                warn!("failed to persist timezone update: {err:#}");
                return write_error(req, 500, "Failed to persist runtime settings");
            }
            write_json(req, &time_status(&state))
        })?;
    }

    Ok(server)
}

fn command_response(
    req: Request<&mut EspHttpConnection<'_>>,
    state: &SharedState,
    command: Command,
) -> anyhow::Result<()> {
    match execute(state, command) {
        Ok(()) => write_json(req, &build_status(state)),
        Err(err) if err.is_rejected_command() => write_error(req, 400, &err.to_string()),
        Err(err) => write_error(req, 503, &err.to_string()),
    }
}

fn time_status(state: &SharedState) -> TimeStatus {
    TimeStatus {
        time_synced: state.clock.is_synced(),
        timezone: state.clock.timezone(),
        now_epoch: Utc::now().timestamp(),
    }
}

fn read_request_body(req: &mut Request<&mut EspHttpConnection<'_>>) -> anyhow::Result<Vec<u8>> {
    let len = req.content_len().unwrap_or(0) as usize;
    if len > MAX_HTTP_BODY {
        return Err(anyhow!("request body too large"));
    }

    let mut body = vec![0_u8; len];
    if len > 0 {
        req.read_exact(&mut body)?;
    }
    Ok(body)
}

fn write_json<T: Serialize>(
    req: Request<&mut EspHttpConnection<'_>>,
    payload: &T,
) -> anyhow::Result<()> {
    let body = serde_json::to_vec(payload)?;
    req.into_response(
        200,
        Some("OK"),
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

fn write_error(
    req: Request<&mut EspHttpConnection<'_>>,
    status_code: u16,
    message: &str,
) -> anyhow::Result<()> {
    let body = serde_json::to_vec(&serde_json::json!({ "error": message }))?;
    req.into_response(
        status_code,
        None,
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

fn query_param(uri: &str, key: &str) -> Option<String> {
    let query = uri.split_once('?')?.1;
    query.split('&').find_map(|pair| {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        (name == key).then(|| value.replace('+', " "))
    })
}

fn queue_state_save(state: &SharedState, now_ms: u64) {
    *lock(&state.state_save_deadline_ms) = Some(now_ms.saturating_add(STATE_SAVE_DEBOUNCE_MS));
}

/// Flash writes are debounced so bursts of commands cost one NVS write.
fn flush_pending_state_save(nvs_store: &NvsStore, state: &SharedState, now_ms: u64) {
    let due = {
        let mut deadline = lock(&state.state_save_deadline_ms);
        match *deadline {
            Some(due_ms) if now_ms >= due_ms => {
                *deadline = None;
                true
            }
            _ => false,
        }
    };

    if !due {
        return;
    }

    if let Err(err) = persist_runtime_from_state(nvs_store, state) {
        warn!("failed to persist climate state: {err:#}");
        *lock(&state.state_save_deadline_ms) = Some(now_ms.saturating_add(STATE_SAVE_RETRY_MS));
    }
}

/// A failed load skips the save so unreadable settings are never replaced by defaults.
fn persist_runtime_from_state(nvs_store: &NvsStore, state: &SharedState) -> anyhow::Result<()> {
    nvs_store.update_runtime_config(|runtime| {
        runtime.state.last = Some(*lock(&state.controller).state());
        runtime.timezone = state.clock.timezone();
    })
}

impl NvsStore {
    fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let _guard = lock(&self.lock);
        self.read_json(NVS_RUNTIME_KEY)
            .map(Option::unwrap_or_default)
    }

    /// Load, edit and save under one lock so concurrent saves cannot interleave.
    fn update_runtime_config(&self, update: impl FnOnce(&mut RuntimeConfig)) -> anyhow::Result<()> {
        let _guard = lock(&self.lock);
        let mut runtime: RuntimeConfig = self.read_json(NVS_RUNTIME_KEY)?.unwrap_or_default();
        update(&mut runtime);
        self.write_json(NVS_RUNTIME_KEY, &runtime)
    }

    fn load_schedule(&self) -> anyhow::Result<Schedule> {
        let _guard = lock(&self.lock);
        self.read_json(NVS_SCHEDULE_KEY)
            .map(Option::unwrap_or_default)
    }

    fn save_schedule(&self, schedule: &Schedule) -> anyhow::Result<()> {
        let _guard = lock(&self.lock);
        self.write_json(NVS_SCHEDULE_KEY, schedule)
    }

    fn read_json<T: for<'de> Deserialize<'de>>(&self, key: &str) -> anyhow::Result<Option<T>> {
        let nvs = EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)?;
        let mut buffer = vec![0_u8; NVS_BUFFER_BYTES];

        match nvs.get_str(key, &mut buffer)? {
            Some(value) => Ok(Some(
                serde_json::from_str(value).with_context(|| format!("corrupt NVS entry `{key}`"))?,
            )),
            None => Ok(None),
        }
    }

    fn write_json<T: Serialize>(&self, key: &str, value: &T) -> anyhow::Result<()> {
        let mut nvs = EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)?;
        let payload = serde_json::to_string(value)?;
        nvs.set_str(key, &payload)?;
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn init_watchdog(timeout_sec: u32) -> anyhow::Result<()> {
    let config = esp_idf_svc::sys::esp_task_wdt_config_t {
        timeout_ms: timeout_sec.saturating_mul(1000),
        idle_core_mask: 0,
        trigger_panic: true,
    };
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_init(&config) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_init failed with code {}", rc))
}

fn add_current_task_to_watchdog() -> anyhow::Result<()> {
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_add(core::ptr::null_mut()) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_add failed with code {}", rc))
}

fn feed_watchdog() {
    let _ = unsafe { esp_idf_svc::sys::esp_task_wdt_reset() };
}

fn disable_wifi_power_save() {
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_set_ps(0) };
    if rc == esp_idf_svc::sys::ESP_OK {
        info!("wifi power save disabled");
    } else {
        warn!("failed to disable wifi power save: esp_err_t={rc}");
    }
}

fn is_wifi_station_connected() -> bool {
    let mut ap_info = esp_idf_svc::sys::wifi_ap_record_t::default();
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_sta_get_ap_info(&mut ap_info) };
    rc == esp_idf_svc::sys::ESP_OK
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
