use core::convert::TryInto;
use std::{
    sync::OnceLock,
    thread,
    time::{Duration, Instant},
};

use anyhow::Context;
use esp_idf_hal::{
    delay::BLOCK,
    gpio::{InputPin, OutputPin},
    peripheral::Peripheral,
    rmt::{
        config::{CarrierConfig, DutyPercent, ReceiveConfig, TransmitConfig},
        PinState, Pulse, PulseTicks, Receive, RmtChannel, RxRmtDriver, TxRmtDriver,
        VariableLengthSignal,
    },
    units::FromValueType,
};
use log::{debug, warn};

use acp24_common::{PulseSequence, Transport, TransportError};

// 80 MHz APB clock / 80 gives one tick per microsecond.
const IR_TICK_DIVIDER: u8 = 80;
const MIN_SEND_INTERVAL_MS: u64 = 300;
const RX_IDLE_THRESHOLD_US: u16 = 15_000;
const RX_FILTER_TICKS: u8 = 100;
const RX_RING_BUFFER_ITEMS: usize = 1_000;
const RX_MAX_PULSE_PAIRS: usize = 128;

/// Sends ACP24 frames through an RMT channel with a modulated carrier.
pub struct RmtTransport {
    tx: TxRmtDriver<'static>,
    last_send_ms: Option<u64>,
}

impl RmtTransport {
    pub fn new<C, P>(
        channel: impl Peripheral<P = C> + 'static,
        pin: impl Peripheral<P = P> + 'static,
        carrier_khz: u32,
    ) -> anyhow::Result<Self>
    where
        C: RmtChannel,
        P: OutputPin,
    {
        let carrier = CarrierConfig::new()
            .frequency(carrier_khz.kHz().into())
            .carrier_level(PinState::High)
            .duty_percent(DutyPercent::new(33)?);

        let config = TransmitConfig::new()
            .clock_divider(IR_TICK_DIVIDER)
            .carrier(Some(carrier))
            .idle(Some(PinState::Low));

        let tx = TxRmtDriver::new(channel, pin, &config).context("failed to init RMT IR driver")?;

        Ok(Self {
            tx,
            last_send_ms: None,
        })
    }

    fn rate_limit(&self) {
        let now = monotonic_ms();
        if let Some(last) = self.last_send_ms {
            let elapsed = now.saturating_sub(last);
            if elapsed < MIN_SEND_INTERVAL_MS {
                thread::sleep(Duration::from_millis(MIN_SEND_INTERVAL_MS - elapsed));
            }
        }
    }
}

impl Transport for RmtTransport {
    fn send(&mut self, sequence: &PulseSequence) -> Result<(), TransportError> {
        let durations = sequence.to_alternating();
        if durations.is_empty() {
            return Ok(());
        }

        self.rate_limit();

        let mut pulses = Vec::with_capacity(durations.len());
        for (index, duration) in durations.iter().enumerate() {
            let level = if index % 2 == 0 {
                PinState::High
            } else {
                PinState::Low
            };

            let ticks = u16::try_from(*duration)
                .ok()
                .and_then(|ticks| PulseTicks::new(ticks).ok())
                .ok_or_else(|| {
                    TransportError::Hardware(format!("pulse of {duration}us exceeds RMT range"))
                })?;
            pulses.push(Pulse::new(level, ticks));
        }

        let pulse_refs: Vec<&Pulse> = pulses.iter().collect();
        let mut signal = VariableLengthSignal::with_capacity(pulses.len());
        signal
            .push(pulse_refs)
            .map_err(|err| TransportError::Hardware(format!("RMT signal build failed: {err}")))?;

        self.tx
            .start_blocking(&signal)
            .map_err(|err| TransportError::Hardware(format!("RMT transmit failed: {err}")))?;

        self.last_send_ms = Some(monotonic_ms());
        debug!("IR frame sent: {} pulses", pulses.len());
        Ok(())
    }
}

/// Captures frames from a demodulating IR receiver on an RMT channel.
pub struct RmtReceiver {
    rx: RxRmtDriver<'static>,
    buffer: Vec<(Pulse, Pulse)>,
}

impl RmtReceiver {
    pub fn new<C, P>(
        channel: impl Peripheral<P = C> + 'static,
        pin: impl Peripheral<P = P> + 'static,
    ) -> anyhow::Result<Self>
    where
        C: RmtChannel,
        P: InputPin,
    {
        let config = ReceiveConfig::new()
            .clock_divider(IR_TICK_DIVIDER)
            .idle_threshold(RX_IDLE_THRESHOLD_US)
            .filter_ticks_thresh(RX_FILTER_TICKS);

        let mut rx = RxRmtDriver::new(channel, pin, &config, RX_RING_BUFFER_ITEMS)
            .context("failed to init RMT IR receiver")?;
        rx.start().context("failed to start RMT IR receiver")?;

        Ok(Self {
            rx,
            buffer: vec![(Pulse::zero(), Pulse::zero()); RX_MAX_PULSE_PAIRS],
        })
    }

    /// Blocks until the receiver goes idle after a burst. Overflowing bursts are dropped.
    pub fn next_frame(&mut self, carrier_hz: u32) -> anyhow::Result<Option<PulseSequence>> {
        match self.rx.receive(&mut self.buffer, BLOCK)? {
            Receive::Read(len) => Ok(Some(pulses_to_sequence(
                carrier_hz,
                &self.buffer[..len.min(self.buffer.len())],
            ))),
            Receive::Overflow(len) => {
                warn!("IR capture overflow ({len} pulse pairs), dropping");
                Ok(None)
            }
            Receive::Timeout => Ok(None),
        }
    }
}

fn pulses_to_sequence(carrier_hz: u32, pairs: &[(Pulse, Pulse)]) -> PulseSequence {
    let levels = pairs
        .iter()
        .flat_map(|(first, second)| [first, second])
        .map(|pulse| (pulse.pin_state == PinState::High, u32::from(pulse.ticks.ticks())));
    PulseSequence::from_levels(carrier_hz, true, levels)
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
