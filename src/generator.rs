//! Receiver-like test signal: two PWM outputs sweeping a slow circle so a
//! bench boat can be exercised without a transmitter.

use log::{error, info};
use rppal::gpio::OutputPin;
use std::f64::consts::TAU;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::worker::Worker;

/// A pin that can hold a pulse of a given width at a given frame rate.
pub trait PulseOutput: Send {
    fn set_pulse(&mut self, frequency_hz: f64, pulse_us: f64) -> Result<()>;
}

impl PulseOutput for OutputPin {
    fn set_pulse(&mut self, frequency_hz: f64, pulse_us: f64) -> Result<()> {
        let duty_cycle = (pulse_us * frequency_hz / 1_000_000.0).clamp(0.0, 1.0);
        self.set_pwm_frequency(frequency_hz, duty_cycle)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeneratorConfig {
    pub frequency_hz: f64,
    pub max_us: f64,
    pub min_us: f64,
    pub step: Duration,
    pub revolution: Duration,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig {
            frequency_hz: 50.0,
            max_us: 2020.0,
            min_us: 1010.0,
            step: Duration::from_millis(100),
            revolution: Duration::from_secs(60),
        }
    }
}

/// Map `value` in [-1, 1] onto the pulse range.
pub fn to_pulse(value: f64, max: f64, min: f64) -> f64 {
    (max + min) / 2.0 + value * (max - min) / 2.0
}

/// Rudder and motor positions `(cos θ, sin θ)` after `elapsed`.
pub fn sweep(elapsed: Duration, revolution: Duration) -> (f64, f64) {
    let theta = TAU * elapsed.as_secs_f64() / revolution.as_secs_f64();
    (theta.cos(), theta.sin())
}

pub struct SignalGenerator {
    worker: Worker,
}

impl SignalGenerator {
    pub fn start<R, M>(mut rudder: R, mut motor: M, config: GeneratorConfig) -> Result<Self>
    where
        R: PulseOutput + 'static,
        M: PulseOutput + 'static,
    {
        info!(
            "Generating {} Hz, {} to {} µs",
            config.frequency_hz, config.min_us, config.max_us
        );
        let worker = Worker::spawn("pwm-generator", move |token| {
            let base = Instant::now();
            while !token.is_cancelled() {
                let (cos, sin) = sweep(base.elapsed(), config.revolution);
                let rudder_us = to_pulse(cos, config.max_us, config.min_us);
                let motor_us = to_pulse(sin, config.max_us, config.min_us);
                let driven = rudder
                    .set_pulse(config.frequency_hz, rudder_us)
                    .and_then(|_| motor.set_pulse(config.frequency_hz, motor_us));
                if let Err(e) = driven {
                    error!("Generator output failed: {}", e);
                    break;
                }
                thread::sleep(config.step);
            }
        })?;
        Ok(SignalGenerator { worker })
    }

    pub fn is_running(&self) -> bool {
        !self.worker.is_finished()
    }

    pub fn cancel(&mut self, bound: Duration) -> Result<()> {
        info!("Stopping {}", self.worker.name());
        self.worker.stop(bound)
    }
}
