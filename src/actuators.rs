use log::debug;
use rppal::gpio::{Gpio, OutputPin};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::{HardwareSettings, MotorPins};
use crate::error::Result;
use crate::mapper::MotionCommand;

const SERVO_FREQUENCY: f64 = 50.0;
const SERVO_PERIOD_US: f64 = 1_000_000.0 / SERVO_FREQUENCY;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Actuator {
    Left,
    Right,
    Center,
    Rudder,
}

impl Actuator {
    pub const ALL: [Actuator; 4] = [
        Actuator::Left,
        Actuator::Right,
        Actuator::Center,
        Actuator::Rudder,
    ];
}

/// Whatever physically moves the boat. Values are forces in [-1, 1].
pub trait Actuators: Send {
    fn set_value(&mut self, actuator: Actuator, value: f64) -> Result<()>;

    fn apply(&mut self, command: &MotionCommand) -> Result<()> {
        self.set_value(Actuator::Left, command.left)?;
        self.set_value(Actuator::Right, command.right)?;
        self.set_value(Actuator::Center, command.center)?;
        self.set_value(Actuator::Rudder, command.rudder)
    }

    fn stop(&mut self) -> Result<()> {
        self.apply(&MotionCommand::neutral())
    }
}

struct Motor {
    forward: OutputPin,
    backward: OutputPin,
    _enable: Option<OutputPin>,
    frequency: f64,
}

impl Motor {
    fn new(gpio: &Gpio, pins: &MotorPins, frequency: f64) -> Result<Self> {
        let mut forward = gpio.get(pins.forward)?.into_output_low();
        forward.set_pwm_frequency(frequency, 0.0)?;
        let mut backward = gpio.get(pins.backward)?.into_output_low();
        backward.set_pwm_frequency(frequency, 0.0)?;
        let enable = match pins.enable {
            Some(pin) => Some(gpio.get(pin)?.into_output_high()),
            None => None,
        };
        Ok(Motor {
            forward,
            backward,
            _enable: enable,
            frequency,
        })
    }

    fn set(&mut self, value: f64) -> Result<()> {
        let value = value.clamp(-1.0, 1.0);
        self.forward.set_pwm_frequency(self.frequency, value.max(0.0))?;
        self.backward.set_pwm_frequency(self.frequency, (-value).max(0.0))?;
        Ok(())
    }
}

struct Servo {
    pin: OutputPin,
    min_us: f64,
    max_us: f64,
}

impl Servo {
    fn set(&mut self, value: f64) -> Result<()> {
        let value = value.clamp(-1.0, 1.0);
        let pulse_us = self.min_us + (value + 1.0) / 2.0 * (self.max_us - self.min_us);
        self.pin.set_pwm_frequency(SERVO_FREQUENCY, pulse_us / SERVO_PERIOD_US)?;
        Ok(())
    }
}

/// Three H-bridge motors and a rudder servo on the Pi's GPIO header.
pub struct RppalActuators {
    left: Motor,
    right: Motor,
    center: Motor,
    rudder: Servo,
}

impl RppalActuators {
    pub fn new(hardware: &HardwareSettings) -> Result<Self> {
        let gpio = Gpio::new()?;
        let mut actuators = RppalActuators {
            left: Motor::new(&gpio, &hardware.left, hardware.motor_pwm_hz)?,
            right: Motor::new(&gpio, &hardware.right, hardware.motor_pwm_hz)?,
            center: Motor::new(&gpio, &hardware.center, hardware.motor_pwm_hz)?,
            rudder: Servo {
                pin: gpio.get(hardware.rudder)?.into_output(),
                min_us: hardware.servo_min_us as f64,
                max_us: hardware.servo_max_us as f64,
            },
        };
        actuators.stop()?;
        Ok(actuators)
    }
}

impl Actuators for RppalActuators {
    fn set_value(&mut self, actuator: Actuator, value: f64) -> Result<()> {
        debug!("{:?} <- {:.3}", actuator, value);
        match actuator {
            Actuator::Left => self.left.set(value),
            Actuator::Right => self.right.set(value),
            Actuator::Center => self.center.set(value),
            Actuator::Rudder => self.rudder.set(value),
        }
    }
}

/// Records the last value per actuator instead of driving pins. Clones share
/// the same record, so one copy can drive a boat while another inspects it.
#[derive(Debug, Clone, Default)]
pub struct SimulatedActuators {
    last: Arc<Mutex<MotionCommand>>,
    writes: Arc<Mutex<usize>>,
}

impl SimulatedActuators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> MotionCommand {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn writes(&self) -> usize {
        *self.writes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Actuators for SimulatedActuators {
    fn set_value(&mut self, actuator: Actuator, value: f64) -> Result<()> {
        let value = value.clamp(-1.0, 1.0);
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        match actuator {
            Actuator::Left => last.left = value,
            Actuator::Right => last.right = value,
            Actuator::Center => last.center = value,
            Actuator::Rudder => last.rudder = value,
        }
        *self.writes.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulated_actuators_clamp_and_share() {
        let mut actuators = SimulatedActuators::new();
        let observer = actuators.clone();
        let command = MotionCommand {
            left: 1.5,
            right: -0.5,
            center: 0.25,
            rudder: -3.0,
        };
        actuators.apply(&command).unwrap();
        let clamped = MotionCommand {
            left: 1.0,
            right: -0.5,
            center: 0.25,
            rudder: -1.0,
        };
        assert_eq!(observer.last(), clamped);
        assert_eq!(observer.writes(), Actuator::ALL.len());

        actuators.stop().unwrap();
        assert!(observer.last().is_neutral());
    }
}
