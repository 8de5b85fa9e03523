//! Per-pin PWM decoder.
//!
//! The edge handler runs in interrupt context and the aggregator polls from
//! its own thread. Everything the poller reads (period, high time and the
//! liveness flags) is packed into a single `AtomicU64`, so a reader always
//! sees one consistent sample and the writer never blocks.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use serde::Serialize;

use crate::config::ChannelConfig;
use crate::edges::Edge;
use crate::quantize::quantize;

/// Shortest accepted interval (exclusive), 1 kHz.
pub const MIN_INTERVAL_US: u64 = 1_000;
/// Longest accepted interval (exclusive), 10 Hz.
pub const MAX_INTERVAL_US: u64 = 100_000;
/// Frame period assumed after a reset (50 Hz).
pub const NOMINAL_PERIOD_US: u32 = 20_000;

const NO_EDGE: u64 = u64::MAX;
const FIELD_MASK: u64 = 0xFF_FFFF;
const HIGH_SHIFT: u32 = 24;
const DIED_BIT: u64 = 1 << 48;
const STARTED_BIT: u64 = 1 << 49;

/// One consistent reading of a decoder's shared state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PulseSample {
    pub period_us: Option<u32>,
    pub high_time_us: Option<u32>,
    pub died: bool,
    pub started: bool,
}

impl PulseSample {
    // Accepted intervals are always non-zero, so 0 encodes "none".
    fn pack(self) -> u64 {
        let period = self.period_us.unwrap_or(0) as u64 & FIELD_MASK;
        let high = self.high_time_us.unwrap_or(0) as u64 & FIELD_MASK;
        let mut word = period | (high << HIGH_SHIFT);
        if self.died {
            word |= DIED_BIT;
        }
        if self.started {
            word |= STARTED_BIT;
        }
        word
    }

    fn unpack(word: u64) -> Self {
        let period = (word & FIELD_MASK) as u32;
        let high = ((word >> HIGH_SHIFT) & FIELD_MASK) as u32;
        PulseSample {
            period_us: (period != 0).then_some(period),
            high_time_us: (high != 0).then_some(high),
            died: word & DIED_BIT != 0,
            started: word & STARTED_BIT != 0,
        }
    }
}

fn in_band(interval_us: u64) -> bool {
    interval_us > MIN_INTERVAL_US && interval_us < MAX_INTERVAL_US
}

/// Diagnostic view of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DecoderSnapshot {
    pub pin: u8,
    pub period_us: Option<u32>,
    pub high_time_us: Option<u32>,
    pub min_high_us: Option<u32>,
    pub max_high_us: Option<u32>,
    pub died: bool,
    pub started: bool,
}

impl DecoderSnapshot {
    pub fn frequency_hz(&self) -> f64 {
        match self.period_us {
            Some(period) => 1_000_000.0 / period as f64,
            None => 0.0,
        }
    }

    pub fn duty_cycle(&self) -> f64 {
        match (self.high_time_us, self.period_us) {
            (Some(high), Some(period)) => 100.0 * high as f64 / period as f64,
            _ => 0.0,
        }
    }
}

pub struct ChannelDecoder {
    config: ChannelConfig,
    sample: AtomicU64,
    // Only the edge handler touches this one.
    last_rising_us: AtomicU64,
    min_high_us: AtomicU32,
    max_high_us: AtomicU32,
}

impl ChannelDecoder {
    pub fn new(config: ChannelConfig) -> Self {
        ChannelDecoder {
            config,
            sample: AtomicU64::new(PulseSample::default().pack()),
            last_rising_us: AtomicU64::new(NO_EDGE),
            min_high_us: AtomicU32::new(u32::MAX),
            max_high_us: AtomicU32::new(0),
        }
    }

    pub fn pin(&self) -> u8 {
        self.config.pin
    }

    fn update(&self, f: impl Fn(PulseSample) -> PulseSample) {
        // The closure always returns Some, so this never fails.
        let _ = self
            .sample
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                Some(f(PulseSample::unpack(word)).pack())
            });
    }

    /// Edge handler. Intervals outside the 10 Hz to 1 kHz band are noise and
    /// leave the sample untouched.
    pub fn on_edge(&self, edge: Edge, timestamp_us: u64) {
        let last = self.last_rising_us.load(Ordering::Relaxed);
        let interval = if last == NO_EDGE {
            None
        } else {
            Some(timestamp_us.wrapping_sub(last)).filter(|t| in_band(*t))
        };

        match edge {
            Edge::Rising => {
                self.last_rising_us.store(timestamp_us, Ordering::Relaxed);
                if let Some(period) = interval {
                    self.update(|s| PulseSample {
                        period_us: Some(period as u32),
                        died: false,
                        started: true,
                        ..s
                    });
                }
            }
            Edge::Falling => {
                if let Some(high) = interval {
                    let high = high as u32;
                    self.update(|s| PulseSample {
                        high_time_us: Some(high),
                        died: false,
                        ..s
                    });
                    self.min_high_us.fetch_min(high, Ordering::Relaxed);
                    self.max_high_us.fetch_max(high, Ordering::Relaxed);
                }
            }
        }
    }

    /// Returns whether the channel died since the last check, then re-arms
    /// the flag. Once started, a channel that sees no edge before the next
    /// check reports dead.
    pub fn check(&self) -> bool {
        let previous = self
            .sample
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                let s = PulseSample::unpack(word);
                Some(PulseSample { died: s.started, ..s }.pack())
            })
            .unwrap_or_else(|word| word);
        PulseSample::unpack(previous).died
    }

    pub fn sample(&self) -> PulseSample {
        PulseSample::unpack(self.sample.load(Ordering::Acquire))
    }

    /// Current high time clamped into the channel range and quantized.
    /// A channel that never produced a pulse reads neutral.
    pub fn value(&self, levels: u32) -> f64 {
        match self.sample().high_time_us {
            Some(high) => {
                let (min, max) = (self.config.min_us(), self.config.max_us());
                quantize((high as f64).clamp(min, max), Some(max), Some(min), levels)
            }
            None => 0.0,
        }
    }

    /// What `value` reads for a centred channel: level zero, or the
    /// midpoint pulse width when values pass through unquantized.
    pub fn neutral(&self, levels: u32) -> f64 {
        if levels == 0 {
            self.config.mid_us
        } else {
            0.0
        }
    }

    /// Centre the channel: high time to the midpoint, period to the nominal
    /// frame. Liveness flags are left alone.
    pub fn reset(&self) {
        let mid = self.config.mid_us.round() as u32;
        self.update(|s| PulseSample {
            period_us: Some(NOMINAL_PERIOD_US),
            high_time_us: Some(mid),
            ..s
        });
    }

    pub fn snapshot(&self) -> DecoderSnapshot {
        let sample = self.sample();
        let min = self.min_high_us.load(Ordering::Relaxed);
        let max = self.max_high_us.load(Ordering::Relaxed);
        DecoderSnapshot {
            pin: self.config.pin,
            period_us: sample.period_us,
            high_time_us: sample.high_time_us,
            min_high_us: (min != u32::MAX).then_some(min),
            max_high_us: (max != 0).then_some(max),
            died: sample.died,
            started: sample.started,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder() -> ChannelDecoder {
        ChannelDecoder::new(ChannelConfig::new(4, 1500.0, 500.0))
    }

    fn pulse(decoder: &ChannelDecoder, at: u64, width: u64) {
        decoder.on_edge(Edge::Rising, at);
        decoder.on_edge(Edge::Falling, at + width);
    }

    #[test]
    fn sample_packing_keeps_every_field() {
        let sample = PulseSample {
            period_us: Some(20_000),
            high_time_us: Some(1_750),
            died: true,
            started: true,
        };
        assert_eq!(sample, PulseSample::unpack(sample.pack()));
        assert_eq!(PulseSample::default(), PulseSample::unpack(0));
    }

    #[test]
    fn in_band_frames_are_decoded() {
        let d = decoder();
        pulse(&d, 0, 1_750);
        pulse(&d, 20_000, 1_750);
        let s = d.sample();
        assert_eq!(s.period_us, Some(20_000));
        assert_eq!(s.high_time_us, Some(1_750));
        assert!(s.started);
        assert_eq!(d.value(10), 5.0);
    }

    #[test]
    fn no_pulses_reads_neutral() {
        let d = decoder();
        assert_eq!(d.value(10), 0.0);
        assert!(!d.check());
        assert!(!d.check());
    }

    #[test]
    fn out_of_band_pair_is_ignored() {
        let d = decoder();
        d.on_edge(Edge::Rising, 0);
        d.on_edge(Edge::Falling, 900);
        d.on_edge(Edge::Rising, 500);
        assert_eq!(d.sample(), PulseSample::default());

        d.on_edge(Edge::Rising, 200_000);
        assert_eq!(d.sample().period_us, None);
    }

    #[test]
    fn check_reports_death_once_started() {
        let d = decoder();
        pulse(&d, 0, 1_500);
        pulse(&d, 20_000, 1_500);
        assert!(!d.check());
        assert!(d.check());
        pulse(&d, 40_000, 1_500);
        assert!(!d.check());
    }

    #[test]
    fn out_of_band_edges_do_not_revive() {
        let d = decoder();
        pulse(&d, 0, 1_500);
        pulse(&d, 20_000, 1_500);
        d.check();
        d.on_edge(Edge::Rising, 20_500);
        d.on_edge(Edge::Falling, 20_900);
        assert!(d.check());
    }

    #[test]
    fn value_is_clamped_into_range() {
        let d = decoder();
        pulse(&d, 0, 2_400);
        assert_eq!(d.value(10), 10.0);
        pulse(&d, 20_000, 1_100);
        assert_eq!(d.value(10), -8.0);
        assert_eq!(d.value(0), 1_100.0);
    }

    #[test]
    fn reset_centres_the_channel() {
        let d = decoder();
        pulse(&d, 0, 1_900);
        pulse(&d, 20_000, 1_900);
        d.reset();
        let s = d.sample();
        assert_eq!(s.high_time_us, Some(1_500));
        assert_eq!(s.period_us, Some(NOMINAL_PERIOD_US));
        assert!(s.started);
        assert_eq!(d.value(10), 0.0);
        assert_eq!(d.value(0), d.neutral(0));
    }

    #[test]
    fn snapshot_tracks_extremes() {
        let d = decoder();
        pulse(&d, 0, 1_200);
        pulse(&d, 20_000, 1_800);
        pulse(&d, 40_000, 1_500);
        let snap = d.snapshot();
        assert_eq!(snap.min_high_us, Some(1_200));
        assert_eq!(snap.max_high_us, Some(1_800));
        assert_eq!(snap.frequency_hz(), 50.0);
        assert_eq!(snap.duty_cycle(), 7.5);
    }
}
