use anyhow::{Context, Result};
use log::info;
use rppal::gpio::Gpio;
use std::env;
use std::io;
use std::time::Duration;

use rcboat::generator::{GeneratorConfig, SignalGenerator};

const RUDDER_PIN: u8 = 13;
const MOTOR_PIN: u8 = 18;

fn pin_arg(index: usize, default: u8) -> Result<u8> {
    match env::args().nth(index) {
        Some(arg) => arg.parse().with_context(|| format!("bad pin number {:?}", arg)),
        None => Ok(default),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let rudder_pin = pin_arg(1, RUDDER_PIN)?;
    let motor_pin = pin_arg(2, MOTOR_PIN)?;
    let gpio = Gpio::new()?;
    let rudder = gpio.get(rudder_pin)?.into_output_low();
    let motor = gpio.get(motor_pin)?.into_output_low();

    let config = GeneratorConfig::default();
    let mut generator = SignalGenerator::start(rudder, motor, config)?;
    info!("Rudder on GPIO {}, motor on GPIO {}, press Enter to stop", rudder_pin, motor_pin);

    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    generator.cancel(config.step * 2)?;
    Ok(())
}
