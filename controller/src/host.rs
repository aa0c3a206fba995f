use std::{
    collections::HashMap,
    io::ErrorKind,
    net::SocketAddr,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use tokio::{
    net::TcpListener,
    sync::{Mutex, MutexGuard},
};
use tower_http::services::ServeDir;
use tracing::{debug, info, warn};

use acp24_common::{
    codec::ACP24_CARRIER_HZ, Acp24Codec, ClimateController, ClimateError, ClimateMode,
    ClimateState, ClimateStatePayload, Clock, DeviceConfig, FanLevel, IrHardwareConfig, Preset,
    PulseSequence, RuntimeConfig, Schedule, ScheduleAction, TransmitDiagnostics, Transport,
    TransportError, TOPIC_CLIMATE_SCHEDULE_STATE, TOPIC_CLIMATE_STATE, TOPIC_CMD_FAN,
    TOPIC_CMD_MODE, TOPIC_CMD_PRESET, TOPIC_CMD_SCHEDULE, TOPIC_CMD_TARGET, TOPIC_IR_RECEIVED,
};

use crate::zone_clock::ZoneClock;

const MAX_MQTT_PAYLOAD_BYTES: usize = 4096;

/// Host builds have no emitter; frames are logged instead.
struct LogTransport {
    carrier_khz: u32,
}

impl Transport for LogTransport {
    fn send(&mut self, sequence: &PulseSequence) -> Result<(), TransportError> {
        info!(
            "IR frame: {} timings, {}us @ {}kHz",
            sequence.len(),
            sequence.total_duration_us(),
            self.carrier_khz
        );
        debug!("IR timings: {:?}", sequence.timings());
        Ok(())
    }
}

type HostController = ClimateController<LogTransport>;

#[derive(Clone)]
struct AppState {
    controller: Arc<Mutex<HostController>>,
    schedule: Arc<Mutex<Schedule>>,
    clock: ZoneClock,
    ir: Arc<IrHardwareConfig>,
    mqtt: AsyncClient,
    store: AppStore,
}

#[derive(Clone)]
struct AppStore {
    runtime_path: Arc<PathBuf>,
    schedule_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct TimezoneUpdate {
    timezone: String,
}

#[derive(Debug, Serialize)]
struct TimeStatus {
    #[serde(rename = "timeSynced")]
    time_synced: bool,
    timezone: String,
    #[serde(rename = "nowEpoch")]
    now_epoch: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct IrConfigView {
    #[serde(rename = "senderPin")]
    sender_pin: i32,
    #[serde(rename = "receiverPin", default)]
    receiver_pin: Option<i32>,
    #[serde(rename = "txRmtChannel")]
    tx_rmt_channel: u8,
    #[serde(rename = "rxRmtChannel")]
    rx_rmt_channel: u8,
    #[serde(rename = "carrierKHz")]
    carrier_khz: u32,
    #[serde(rename = "tolerancePercent")]
    tolerance_percent: u8,
    repeat: u8,
}

#[derive(Debug, Serialize)]
struct IrConfigUpdateResponse {
    #[serde(rename = "restartRequired")]
    restart_required: bool,
    ir: IrConfigView,
}

#[derive(Debug, Serialize)]
struct IrDiagnosticsView {
    enabled: bool,
    #[serde(rename = "senderPin")]
    sender_pin: i32,
    #[serde(rename = "carrierKHz")]
    carrier_khz: u32,
    #[serde(flatten)]
    counters: TransmitDiagnostics,
}

#[derive(Debug, Serialize)]
struct IrReceiveResponse {
    accepted: bool,
    state: ClimateStatePayload,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::new();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    runtime.ir.sanitize();

    let config = DeviceConfig::from_settings(runtime.device.clone())
        .context("invalid device configuration")?;
    let codec = Acp24Codec::for_device(&config)
        .context("device range cannot be encoded")?
        .with_tolerance(runtime.ir.tolerance_percent)
        .with_repeat(runtime.ir.repeat);

    // The host trusts the system clock.
    let clock = ZoneClock::new(&runtime.timezone);
    clock.mark_synced(true);

    let transport = LogTransport {
        carrier_khz: runtime.ir.carrier_khz,
    };
    let mut controller =
        ClimateController::with_codec(config, codec, transport, Some(Box::new(clock.clone())))
            .context("failed to create climate controller")?;

    if let Some(last) = runtime.state.last {
        match controller.restore_state(last) {
            Ok(()) => info!("restored climate state: {last:?}"),
            Err(err) => warn!("ignoring persisted climate state: {err}"),
        }
    }

    let mut schedule = store.load_schedule().await.unwrap_or_else(|err| {
        warn!("failed to load schedule from store: {err:#}");
        Schedule::default()
    });
    schedule.normalize(controller.config());

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or(runtime.network.mqtt_host.clone());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(runtime.network.mqtt_port);

    let mut mqtt_options = MqttOptions::new("acp24-controller-rust", mqtt_host, mqtt_port);
    let mqtt_user = std::env::var("MQTT_USER").unwrap_or(runtime.network.mqtt_user.clone());
    let mqtt_pass = std::env::var("MQTT_PASS").unwrap_or(runtime.network.mqtt_pass.clone());
    if !mqtt_user.is_empty() {
        mqtt_options.set_credentials(mqtt_user, mqtt_pass);
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);

    let app_state = AppState {
        controller: Arc::new(Mutex::new(controller)),
        schedule: Arc::new(Mutex::new(schedule)),
        clock,
        ir: Arc::new(runtime.ir.clone()),
        mqtt,
        store,
    };

    subscribe_topics(&app_state.mqtt).await?;
    spawn_mqtt_loop(app_state.clone(), eventloop);
    spawn_control_loop(app_state.clone());
    spawn_state_publish_loop(app_state.clone());

    let web_root = std::env::var("ACP24_WEB_ROOT")
        .unwrap_or_else(|_| format!("{}/web", env!("CARGO_MANIFEST_DIR")));
    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/mode", post(handle_set_mode))
        .route("/api/target", post(handle_set_target))
        .route("/api/fan", post(handle_set_fan))
        .route("/api/preset", post(handle_set_preset))
        .route("/api/ir/resend", post(handle_ir_resend))
        .route("/api/ir/receive", post(handle_ir_receive))
        .route(
            "/api/ir/config",
            get(handle_get_ir_config).put(handle_put_ir_config),
        )
        .route("/api/ir/diagnostics", get(handle_get_ir_diagnostics))
        .route(
            "/api/schedule",
            get(handle_get_schedule).put(handle_put_schedule),
        )
        .route("/api/time", get(handle_get_time))
        .route("/api/timezone", put(handle_put_timezone))
        .fallback_service(ServeDir::new(web_root))
        .with_state(app_state);

    let port = std::env::var("ACP24_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn subscribe_topics(mqtt: &AsyncClient) -> anyhow::Result<()> {
    let topics = [
        TOPIC_CMD_MODE,
        TOPIC_CMD_TARGET,
        TOPIC_CMD_FAN,
        TOPIC_CMD_PRESET,
        TOPIC_CMD_SCHEDULE,
        TOPIC_IR_RECEIVED,
    ];

    for topic in topics {
        mqtt.subscribe(topic, QoS::AtMostOnce).await?;
    }
    Ok(())
}

fn spawn_mqtt_loop(app_state: AppState, mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Err(err) =
                        handle_mqtt_message(&app_state, message.topic, message.payload.to_vec())
                            .await
                    {
                        warn!("mqtt message handling error: {err:#}");
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

/// Applies the schedule whenever the active entry changes. Manual commands in
/// between are left alone until the next entry takes over.
fn spawn_control_loop(app_state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        let mut last_action: Option<ScheduleAction> = None;

        loop {
            interval.tick().await;

            let Some(now) = app_state.clock.now() else {
                continue;
            };

            let action = {
                let schedule = app_state.schedule.lock().await;
                schedule.current_action(now)
            };

            let Some(action) = action else {
                last_action = None;
                continue;
            };
            if last_action == Some(action) {
                continue;
            }
            last_action = Some(action);

            let result = {
                let mut controller = app_state.controller.lock().await;
                controller.apply_schedule_action(&action)
            };

            match result {
                Ok(true) => {
                    info!("schedule applied: {action:?}");
                    after_state_change(&app_state).await;
                }
                Ok(false) => {}
                Err(err) => warn!("schedule action {action:?} failed: {err}"),
            }
        }
    });
}

fn spawn_state_publish_loop(app_state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        loop {
            interval.tick().await;
            publish_state(&app_state).await;

            let schedule_payload = {
                let schedule = app_state.schedule.lock().await;
                serde_json::to_vec(&*schedule)
            };

            match schedule_payload {
                Ok(body) => {
                    if let Err(err) = app_state
                        .mqtt
                        .publish(TOPIC_CLIMATE_SCHEDULE_STATE, QoS::AtLeastOnce, true, body)
                        .await
                    {
                        warn!("schedule state publish failed: {err}");
                    }
                }
                Err(err) => warn!("schedule serialization failed: {err}"),
            }
        }
    });
}

async fn publish_state(app_state: &AppState) {
    let payload = {
        let controller = app_state.controller.lock().await;
        serde_json::to_vec(&controller.state_payload())
    };

    match payload {
        Ok(body) => {
            if let Err(err) = app_state
                .mqtt
                .publish(TOPIC_CLIMATE_STATE, QoS::AtLeastOnce, true, body)
                .await
            {
                warn!("climate state publish failed: {err}");
            }
        }
        Err(err) => warn!("climate state serialization failed: {err}"),
    }
}

/// Runs one controller command under the lock, then persists and publishes the result.
async fn execute<F>(app_state: &AppState, command: F) -> Result<(), ClimateError>
where
    F: FnOnce(&mut HostController) -> Result<(), ClimateError>,
{
    {
        let mut controller = app_state.controller.lock().await;
        command(&mut *controller)?;
    }
    after_state_change(app_state).await;
    Ok(())
}

async fn after_state_change(app_state: &AppState) {
    if let Err(err) = persist_runtime_from_state(app_state).await {
        warn!("failed to persist climate state: {err:#}");
    }
    publish_state(app_state).await;
}

async fn receive_frame(app_state: &AppState, timings: &[i32]) -> bool {
    let sequence = PulseSequence::from_timings(ACP24_CARRIER_HZ, timings);
    let accepted = {
        let mut controller = app_state.controller.lock().await;
        controller.on_receive(&sequence)
    };
    if accepted {
        after_state_change(app_state).await;
    }
    accepted
}

async fn handle_mqtt_message(
    app_state: &AppState,
    topic: String,
    payload: Vec<u8>,
) -> anyhow::Result<()> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(());
    }

    let message = String::from_utf8(payload).context("non utf8 mqtt payload")?;
    let message = message.trim();

    match topic.as_str() {
        TOPIC_CMD_MODE => {
            let mode = message.parse::<ClimateMode>()?;
            execute(app_state, |controller| controller.set_mode(mode)).await?;
        }
        TOPIC_CMD_TARGET => {
            let target = message
                .parse::<f32>()
                .with_context(|| format!("invalid target `{message}`"))?;
            execute(app_state, |controller| {
                controller.set_target_temperature(target)
            })
            .await?;
        }
        TOPIC_CMD_FAN => {
            let fan = message.parse::<FanLevel>()?;
            execute(app_state, |controller| controller.set_fan_level(fan)).await?;
        }
        TOPIC_CMD_PRESET => {
            let preset = message.parse::<Preset>()?;
            execute(app_state, |controller| controller.set_preset(preset)).await?;
        }
        TOPIC_CMD_SCHEDULE => {
            let mut schedule =
                serde_json::from_str::<Schedule>(message).context("invalid schedule payload")?;
            install_schedule(app_state, &mut schedule).await?;
        }
        TOPIC_IR_RECEIVED => {
            let timings =
                serde_json::from_str::<Vec<i32>>(message).context("invalid IR timings payload")?;
            receive_frame(app_state, &timings).await;
        }
        _ => {}
    }

    Ok(())
}

async fn install_schedule(app_state: &AppState, schedule: &mut Schedule) -> anyhow::Result<()> {
    let config = app_state.controller.lock().await.config().clone();
    schedule.normalize(&config);
    {
        let mut active = app_state.schedule.lock().await;
        *active = schedule.clone();
    }
    app_state.store.save_schedule(schedule).await
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let now = state.clock.now();
    let (schedule_enabled, next_schedule) = {
        let schedule = state.schedule.lock().await;
        (
            schedule.enabled,
            now.and_then(|now| schedule.next_event_epoch(now)),
        )
    };

    let status = {
        let controller = state.controller.lock().await;
        controller.status(
            schedule_enabled,
            next_schedule,
            state.clock.is_synced(),
            &state.clock.timezone(),
        )
    };

    Json(status)
}

async fn handle_set_mode(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let mode = match value.parse::<ClimateMode>() {
        Ok(mode) => mode,
        Err(err) => return climate_error_response(&err),
    };

    command_response(state, move |controller| controller.set_mode(mode)).await
}

async fn handle_set_target(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let Ok(target) = value.parse::<f32>() else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid temperature value");
    };

    command_response(state, move |controller| {
        controller.set_target_temperature(target)
    })
    .await
}

async fn handle_set_fan(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let fan = match value.parse::<FanLevel>() {
        Ok(fan) => fan,
        Err(err) => return climate_error_response(&err),
    };

    command_response(state, move |controller| controller.set_fan_level(fan)).await
}

async fn handle_set_preset(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let preset = match value.parse::<Preset>() {
        Ok(preset) => preset,
        Err(err) => return climate_error_response(&err),
    };

    command_response(state, move |controller| controller.set_preset(preset)).await
}

async fn handle_ir_resend(State(state): State<AppState>) -> impl IntoResponse {
    command_response(state, |controller| controller.transmit_state()).await
}

async fn command_response<F>(state: AppState, command: F) -> axum::response::Response
where
    F: FnOnce(&mut HostController) -> Result<(), ClimateError>,
{
    match execute(&state, command).await {
        Ok(()) => handle_get_status(State(state)).await.into_response(),
        Err(err) => climate_error_response(&err),
    }
}

async fn handle_ir_receive(
    State(state): State<AppState>,
    Json(timings): Json<Vec<i32>>,
) -> impl IntoResponse {
    let accepted = receive_frame(&state, &timings).await;
    let payload = state.controller.lock().await.state_payload();
    Json(IrReceiveResponse {
        accepted,
        state: payload,
    })
}

async fn handle_get_schedule(State(state): State<AppState>) -> impl IntoResponse {
    let schedule = state.schedule.lock().await.clone();
    Json(schedule)
}

async fn handle_put_schedule(
    State(state): State<AppState>,
    Json(mut schedule): Json<Schedule>,
) -> impl IntoResponse {
    if let Err(err) = install_schedule(&state, &mut schedule).await {
        warn!("failed to persist schedule update: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist schedule",
        );
    }

    handle_get_schedule(State(state)).await.into_response()
}

async fn handle_get_time(State(state): State<AppState>) -> impl IntoResponse {
    Json(TimeStatus {
        time_synced: state.clock.is_synced(),
        timezone: state.clock.timezone(),
        now_epoch: Utc::now().timestamp(),
    })
}

async fn handle_put_timezone(
    State(state): State<AppState>,
    Json(update): Json<TimezoneUpdate>,
) -> impl IntoResponse {
    if state.clock.set_timezone(update.timezone.trim()).is_err() {
        return error_response(StatusCode::BAD_REQUEST, "Invalid timezone value");
    }

    if let Err(err) = persist_runtime_from_state(&state).await {
        warn!("failed to persist timezone update: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist runtime settings",
        );
    }

    handle_get_time(State(state)).await.into_response()
}

async fn handle_get_ir_config(State(state): State<AppState>) -> impl IntoResponse {
    let runtime = state
        .store
        .load_runtime_config()
        .await
        .unwrap_or_else(|err| {
            warn!("failed to load ir config from store: {err:#}");
            RuntimeConfig::default()
        });
    Json(build_ir_config_view(&runtime.ir))
}

async fn handle_put_ir_config(
    State(state): State<AppState>,
    Json(update): Json<IrConfigView>,
) -> impl IntoResponse {
    if let Err(message) = validate_ir_update(&update) {
        return error_response(StatusCode::BAD_REQUEST, message);
    }

    let mut edit = match state.store.edit_runtime().await {
        Ok(edit) => edit,
        Err(err) => {
            warn!("failed to load existing runtime config for ir update: {err:#}");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to load ir settings",
            );
        }
    };

    let previous = edit.runtime.ir.clone();
    apply_ir_update(&mut edit.runtime.ir, &update);
    let runtime = edit.runtime.clone();

    if let Err(err) = edit.save().await {
        warn!("failed to persist ir config update: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist ir settings",
        );
    }

    Json(IrConfigUpdateResponse {
        restart_required: previous != runtime.ir,
        ir: build_ir_config_view(&runtime.ir),
    })
    .into_response()
}

async fn handle_get_ir_diagnostics(State(state): State<AppState>) -> impl IntoResponse {
    let (enabled, counters) = {
        let controller = state.controller.lock().await;
        (
            controller.transport().is_enabled(),
            controller.diagnostics().clone(),
        )
    };

    Json(IrDiagnosticsView {
        enabled,
        sender_pin: state.ir.sender_pin,
        carrier_khz: state.ir.carrier_khz,
        counters,
    })
}

impl AppStore {
    fn new() -> Self {
        let data_dir = std::env::var("ACP24_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.acp24"));
        Self::at(&data_dir)
    }

    fn at(data_dir: &std::path::Path) -> Self {
        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
            schedule_path: Arc::new(data_dir.join("schedule.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let _guard = self.lock.lock().await;
        self.read_runtime().await
    }

    /// Loads the runtime config and keeps the store locked until the edit is saved.
    async fn edit_runtime(&self) -> anyhow::Result<RuntimeEdit<'_>> {
        let guard = self.lock.lock().await;
        let runtime = self.read_runtime().await?;
        Ok(RuntimeEdit {
            _guard: guard,
            store: self,
            runtime,
        })
    }

    async fn read_runtime(&self) -> anyhow::Result<RuntimeConfig> {
        match tokio::fs::read(self.runtime_path.as_ref()).await {
            Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }

    async fn write_runtime(&self, runtime: &RuntimeConfig) -> anyhow::Result<()> {
        let path = self.runtime_path.as_ref().clone();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(runtime)?;
        tokio::fs::write(path, payload).await?;
        Ok(())
    }

    async fn load_schedule(&self) -> anyhow::Result<Schedule> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.schedule_path.as_ref()).await {
            Ok(raw) => Ok(serde_json::from_slice::<Schedule>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Schedule::default()),
            Err(err) => Err(err.into()),
        }
    }

    async fn save_schedule(&self, schedule: &Schedule) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.schedule_path.as_ref().clone();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(schedule)?;
        tokio::fs::write(path, payload).await?;
        Ok(())
    }
}

struct RuntimeEdit<'a> {
    _guard: MutexGuard<'a, ()>,
    store: &'a AppStore,
    runtime: RuntimeConfig,
}

impl RuntimeEdit<'_> {
    async fn save(self) -> anyhow::Result<()> {
        self.store.write_runtime(&self.runtime).await
    }
}

/// The controller state is read while the store is locked, so concurrent
/// saves land in the order the state changed.
async fn persist_runtime_from_state(state: &AppState) -> anyhow::Result<()> {
    let mut edit = state.store.edit_runtime().await?;
    let last: ClimateState = *state.controller.lock().await.state();
    edit.runtime.state.last = Some(last);
    edit.runtime.timezone = state.clock.timezone();
    edit.save().await
}

fn build_ir_config_view(ir: &IrHardwareConfig) -> IrConfigView {
    IrConfigView {
        sender_pin: ir.sender_pin,
        receiver_pin: ir.receiver_pin,
        tx_rmt_channel: ir.tx_rmt_channel,
        rx_rmt_channel: ir.rx_rmt_channel,
        carrier_khz: ir.carrier_khz,
        tolerance_percent: ir.tolerance_percent,
        repeat: ir.repeat,
    }
}

fn validate_ir_update(update: &IrConfigView) -> Result<(), &'static str> {
    if update.sender_pin < 0 {
        return Err("senderPin must be >= 0");
    }
    if update.receiver_pin == Some(update.sender_pin) {
        return Err("receiverPin must differ from senderPin");
    }
    if update.tx_rmt_channel > 7 || update.rx_rmt_channel > 7 {
        return Err("RMT channels must be between 0 and 7");
    }
    if update.tx_rmt_channel == update.rx_rmt_channel {
        return Err("txRmtChannel and rxRmtChannel must differ");
    }
    if !(10..=100).contains(&update.carrier_khz) {
        return Err("carrierKHz must be between 10 and 100");
    }
    if !(5..=50).contains(&update.tolerance_percent) {
        return Err("tolerancePercent must be between 5 and 50");
    }
    if !(1..=4).contains(&update.repeat) {
        return Err("repeat must be between 1 and 4");
    }
    Ok(())
}

fn apply_ir_update(ir: &mut IrHardwareConfig, update: &IrConfigView) {
    ir.sender_pin = update.sender_pin;
    ir.receiver_pin = update.receiver_pin;
    ir.tx_rmt_channel = update.tx_rmt_channel;
    ir.rx_rmt_channel = update.rx_rmt_channel;
    ir.carrier_khz = update.carrier_khz;
    ir.tolerance_percent = update.tolerance_percent;
    ir.repeat = update.repeat;
    ir.sanitize();
}

fn climate_error_response(err: &ClimateError) -> axum::response::Response {
    let status = if err.is_rejected_command() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    error_response(status, &err.to_string())
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}
