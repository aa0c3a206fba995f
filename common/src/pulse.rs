//! Carrier-modulated mark/space timing sequences.
//!
//! Durations are signed microseconds: positive values are marks (carrier on),
//! negative values are spaces (carrier off).

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PulseSequence {
    carrier_hz: u32,
    timings: Vec<i32>,
}

impl PulseSequence {
    /// Builds a sequence from signed timings, merging same-sign neighbours and dropping zeros.
    pub fn from_timings(carrier_hz: u32, timings: &[i32]) -> Self {
        let mut builder = PulseSequenceBuilder::new(carrier_hz);
        for &timing in timings {
            if timing > 0 {
                builder.mark(timing.unsigned_abs());
            } else if timing < 0 {
                builder.space(timing.unsigned_abs());
            }
        }
        builder.build()
    }

    /// Alternating durations starting with a mark, as produced by raw capture tools.
    pub fn from_alternating(carrier_hz: u32, durations: &[u16]) -> Self {
        let mut builder = PulseSequenceBuilder::new(carrier_hz);
        for (index, duration) in durations.iter().enumerate() {
            if index % 2 == 0 {
                builder.mark(u32::from(*duration));
            } else {
                builder.space(u32::from(*duration));
            }
        }
        builder.build()
    }

    /// Converts captured `(line_high, duration)` levels. A demodulating receiver
    /// is active-low: the line sits low while the carrier is present.
    pub fn from_levels<I>(carrier_hz: u32, active_low: bool, levels: I) -> Self
    where
        I: IntoIterator<Item = (bool, u32)>,
    {
        let mut builder = PulseSequenceBuilder::new(carrier_hz);
        for (line_high, duration) in levels {
            if line_high != active_low {
                builder.mark(duration);
            } else {
                builder.space(duration);
            }
        }
        builder.build()
    }

    pub fn carrier_hz(&self) -> u32 {
        self.carrier_hz
    }

    pub fn timings(&self) -> &[i32] {
        &self.timings
    }

    pub fn len(&self) -> usize {
        self.timings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timings.is_empty()
    }

    pub fn total_duration_us(&self) -> u64 {
        self.timings
            .iter()
            .map(|timing| u64::from(timing.unsigned_abs()))
            .sum()
    }

    /// Unsigned durations with a leading mark. Leading spaces are dropped.
    pub fn to_alternating(&self) -> Vec<u32> {
        self.timings
            .iter()
            .skip_while(|timing| **timing < 0)
            .map(|timing| timing.unsigned_abs())
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct PulseSequenceBuilder {
    carrier_hz: u32,
    timings: Vec<i32>,
}

impl PulseSequenceBuilder {
    pub fn new(carrier_hz: u32) -> Self {
        Self {
            carrier_hz,
            timings: Vec::new(),
        }
    }

    pub fn with_capacity(carrier_hz: u32, capacity: usize) -> Self {
        Self {
            carrier_hz,
            timings: Vec::with_capacity(capacity),
        }
    }

    pub fn mark(&mut self, duration_us: u32) -> &mut Self {
        self.push(clamp_i32(duration_us));
        self
    }

    pub fn space(&mut self, duration_us: u32) -> &mut Self {
        self.push(-clamp_i32(duration_us));
        self
    }

    pub fn build(self) -> PulseSequence {
        PulseSequence {
            carrier_hz: self.carrier_hz,
            timings: self.timings,
        }
    }

    fn push(&mut self, timing: i32) {
        if timing == 0 {
            return;
        }
        match self.timings.last_mut() {
            Some(last) if last.signum() == timing.signum() => {
                *last = last.saturating_add(timing);
            }
            _ => self.timings.push(timing),
        }
    }
}

fn clamp_i32(duration_us: u32) -> i32 {
    i32::try_from(duration_us).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn builder_merges_adjacent_same_sign_durations() {
        let mut builder = PulseSequenceBuilder::new(38_000);
        builder.mark(400).mark(100).space(975).space(0).space(25).mark(400);
        let sequence = builder.build();

        assert_eq!(sequence.timings(), &[500, -1000, 400]);
        assert_eq!(sequence.total_duration_us(), 1_900);
        assert_eq!(sequence.carrier_hz(), 38_000);
    }

    #[test]
    fn alternating_capture_maps_to_signed_timings() {
        let sequence = PulseSequence::from_alternating(38_000, &[400, 975, 400, 1350, 400]);
        assert_eq!(sequence.timings(), &[400, -975, 400, -1350, 400]);
        assert_eq!(sequence.to_alternating(), vec![400, 975, 400, 1350, 400]);
    }

    #[test]
    fn from_timings_drops_zeros_and_leading_space_is_skipped_for_rmt() {
        let sequence = PulseSequence::from_timings(38_000, &[-2_000, 0, 400, -975]);
        assert_eq!(sequence.timings(), &[-2_000, 400, -975]);
        assert_eq!(sequence.to_alternating(), vec![400, 975]);
    }

    #[test]
    fn active_low_capture_treats_low_line_as_mark() {
        let levels = [(false, 400), (true, 975), (true, 25), (false, 400), (true, 0)];
        let sequence = PulseSequence::from_levels(38_000, true, levels);
        assert_eq!(sequence.timings(), &[400, -1000, 400]);

        let inverted = PulseSequence::from_levels(38_000, false, levels);
        assert_eq!(inverted.timings(), &[-400, 1000, -400]);
    }
}
