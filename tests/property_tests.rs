//! Property tests for the pure parts of the pipeline: quantizer, decoder
//! noise rejection, both aggregation strategies and the two mappers.

use proptest::prelude::*;
use rcboat::aggregator::{ChannelInput, PeriodicAverage, RateLimited, step};
use rcboat::config::ChannelConfig;
use rcboat::decoder::ChannelDecoder;
use rcboat::edges::Edge;
use rcboat::mapper::{differential, symmetric_turn};
use rcboat::quantize::quantize;

const SLACK: f64 = 1e-12;

fn in_unit(v: f64) -> bool {
    (-1.0 - SLACK..=1.0 + SLACK).contains(&v)
}

// ── Quantizer ────────────────────────────────────────────────

proptest! {
    #[test]
    fn zero_levels_passes_through(v in -1e6f64..1e6, max in -1e3f64..1e3, min in -1e3f64..1e3) {
        prop_assert_eq!(quantize(v, Some(max), Some(min), 0), v);
    }

    #[test]
    fn zero_width_channel_reads_zero(v in -1e6f64..1e6, edge in -1e3f64..1e3, levels in 1u32..100) {
        prop_assert_eq!(quantize(v, Some(edge), Some(edge), levels), 0.0);
        prop_assert_eq!(quantize(v, None, Some(edge), levels), 0.0);
    }

    #[test]
    fn bounds_and_midpoint(min in -1e4f64..1e4, width in 1e-2f64..1e4, levels in 1u32..50) {
        let max = min + width;
        let q = levels as f64;
        prop_assert_eq!(quantize(min, Some(max), Some(min), levels), -q);
        prop_assert_eq!(quantize(max, Some(max), Some(min), levels), q);
        prop_assert_eq!(quantize(min + width / 2.0, Some(max), Some(min), levels), 0.0);
    }

    #[test]
    fn clamped_input_stays_in_level_range(
        min in -1e4f64..1e4,
        width in 1e-2f64..1e4,
        t in 0.0f64..=1.0,
        levels in 1u32..50,
    ) {
        let max = min + width;
        let v = (min + t * width).clamp(min, max);
        let level = quantize(v, Some(max), Some(min), levels);
        prop_assert!(level.abs() <= levels as f64);
        prop_assert_eq!(level, level.floor());
    }
}

// ── Decoder noise rejection ──────────────────────────────────

fn out_of_band() -> impl Strategy<Value = u64> {
    prop_oneof![1u64..=1_000, 100_000u64..1_000_000]
}

proptest! {
    #[test]
    fn out_of_band_edges_change_nothing(
        gap in out_of_band(),
        width in out_of_band(),
        high in 1_001u64..3_000,
    ) {
        let decoder = ChannelDecoder::new(ChannelConfig::new(4, 1500.0, 500.0));
        for frame in 0..3u64 {
            decoder.on_edge(Edge::Rising, frame * 20_000);
            decoder.on_edge(Edge::Falling, frame * 20_000 + high);
        }
        decoder.check();
        prop_assert!(decoder.check(), "quiet channel reads dead");
        let before = decoder.sample();

        let rising = 40_000 + gap;
        decoder.on_edge(Edge::Rising, rising);
        decoder.on_edge(Edge::Falling, rising + width);

        let after = decoder.sample();
        prop_assert_eq!(after.period_us, before.period_us);
        prop_assert_eq!(after.high_time_us, before.high_time_us);
        prop_assert!(decoder.check(), "noise must not revive the channel");
    }
}

// ── Aggregation ──────────────────────────────────────────────

proptest! {
    #[test]
    fn periodic_mean_of_constant_is_exact(k in -100i32..=100, span in 1usize..50) {
        let mut periodic = PeriodicAverage::new(1, span);
        let input = [ChannelInput::alive(k as f64)];
        for _ in 1..span {
            prop_assert_eq!(periodic.tick(&input), None);
        }
        prop_assert_eq!(periodic.tick(&input), Some(vec![k as f64]));
    }

    #[test]
    fn periodic_dead_ticks_contribute_neutral(
        k in -100i32..=100,
        neutral in prop_oneof![Just(0i32), 900i32..=2_100],
        span in 2usize..40,
        alive_for in 0usize..40,
    ) {
        let alive_for = alive_for % span;
        let mut periodic = PeriodicAverage::with_neutral(vec![neutral as f64], span);
        let mut emitted = None;
        for tick in 0..span {
            let input = if tick < alive_for {
                ChannelInput::alive(k as f64)
            } else {
                ChannelInput::dead()
            };
            emitted = periodic.tick(&[input]);
        }
        let dead_for = span - alive_for;
        let total = k as f64 * alive_for as f64 + neutral as f64 * dead_for as f64;
        let expected = total / span as f64;
        prop_assert_eq!(emitted, Some(vec![expected]));
    }

    #[test]
    fn reactive_dead_channel_is_zero_after_one_tick(
        current in -1e3f64..1e3,
        smoothing in 0.0f64..5.0,
    ) {
        let mut reactive = RateLimited::new(vec![current], smoothing);
        reactive.tick(&[ChannelInput::dead()]);
        prop_assert_eq!(reactive.current()[0], 0.0);
    }

    /// The minimum step keeps the direction of the change, including when the
    /// target crosses zero, and never shortens a change.
    #[test]
    fn minimum_step_keeps_direction(change in -50.0f64..50.0, smoothing in 0.0f64..5.0) {
        let stepped = step(change, smoothing);
        if change == 0.0 {
            prop_assert_eq!(stepped, 0.0);
        } else {
            prop_assert_eq!(stepped.signum(), change.signum());
            prop_assert_eq!(stepped.abs(), change.abs().max(smoothing));
        }
    }

    /// Integral levels with a step of at most one are tracked exactly in a
    /// single tick, whatever the sign of either end.
    #[test]
    fn integral_levels_track_exactly(
        from in -10i32..=10,
        to in -10i32..=10,
        smoothing in prop_oneof![Just(0.0), Just(0.5), Just(1.0)],
    ) {
        let mut reactive = RateLimited::new(vec![from as f64], smoothing);
        let emitted = reactive.tick(&[ChannelInput::alive(to as f64)]);
        prop_assert_eq!(reactive.current()[0], to as f64);
        prop_assert_eq!(emitted.is_some(), from != to);
    }
}

// ── Mapping ──────────────────────────────────────────────────

proptest! {
    #[test]
    fn symmetric_turn_never_saturates(
        x in -1.0f64..=1.0,
        y in -1.0f64..=1.0,
        thrust_delta in 0.0f64..10.0,
    ) {
        let command = symmetric_turn(x, y, thrust_delta);
        prop_assert!(in_unit(command.left), "left {}", command.left);
        prop_assert!(in_unit(command.right), "right {}", command.right);
        prop_assert_eq!(command.center, y);
        prop_assert_eq!(command.rudder, x);
    }

    #[test]
    fn differential_output_is_clamped(
        x in -2.0f64..=2.0,
        y in -2.0f64..=2.0,
        thrust_delta in 0.0f64..10.0,
    ) {
        let command = differential(x, y, thrust_delta);
        for value in [command.left, command.right, command.center, command.rudder] {
            prop_assert!((-1.0..=1.0).contains(&value));
        }
    }

    #[test]
    fn turning_direction_is_the_same_both_ways(x in 0.01f64..=1.0, y in 0.01f64..=1.0) {
        let ahead = differential(x, y, 1.0);
        let astern = differential(x, -y, 1.0);
        prop_assert!(ahead.left >= ahead.right);
        prop_assert!(astern.left <= astern.right);
    }
}
