use anyhow::{Context, Result};
use log::{error, info, warn};
use std::env;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rcboat::actuators::RppalActuators;
use rcboat::boat::Boat;
use rcboat::config::{Control, Settings};
use rcboat::edges::RppalEdgeSource;
use rcboat::pointer::PointerController;
use rcboat::radio::RadioControlBoat;
use rcboat::websocket::PointerServer;
use rcboat::worker::Worker;

const DEFAULT_SETTINGS: &str = "settings.json";
const SERVER_STOP: Duration = Duration::from_secs(1);

fn load_settings(path: &str) -> Result<Settings> {
    if !Path::new(path).exists() {
        warn!("{} not found, using defaults", path);
        return Ok(Settings::default());
    }
    Settings::load(path).with_context(|| format!("loading {}", path))
}

fn wait_for_enter() -> Result<()> {
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(())
}

fn run_radio(settings: &Settings, actuators: RppalActuators) -> Result<()> {
    let source = RppalEdgeSource::new()?;
    let mut boat = RadioControlBoat::new(settings, Box::new(source), actuators)?;
    boat.start()?;
    info!("{} running, press Enter to stop", settings.name);
    wait_for_enter()?;

    for channel in boat.channels() {
        info!(
            "pin {}: {:.1} Hz, {:.2}% duty, high {:?}..{:?} µs",
            channel.pin,
            channel.frequency_hz(),
            channel.duty_cycle(),
            channel.min_high_us,
            channel.max_high_us
        );
    }
    boat.terminate()?;
    Ok(())
}

fn run_pointer(settings: &Settings, actuators: RppalActuators) -> Result<()> {
    let controller = PointerController::new(Boat::new(actuators)?, &settings.mapping);
    let server = Arc::new(PointerServer::new(controller, settings.pointer.clone()));
    let listener = server.bind()?;

    let serving = Arc::clone(&server);
    let mut worker = Worker::spawn("pointer-server", move |token| {
        if let Err(e) = serving.serve(listener, &token) {
            error!("Pointer server failed: {}", e);
        }
    })?;
    info!("Pointer control on {}, press Enter to stop", settings.pointer.listen);
    wait_for_enter()?;

    if let Err(e) = worker.stop(SERVER_STOP) {
        error!("{}", e);
    }
    server.terminate()?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let path = env::args().nth(1).unwrap_or_else(|| DEFAULT_SETTINGS.to_string());
    let settings = load_settings(&path)?;
    settings.validate()?;
    info!("Starting {} ({:?} control)", settings.name, settings.control);

    let actuators = RppalActuators::new(&settings.hardware)?;
    match settings.control {
        Control::Radio => run_radio(&settings, actuators),
        Control::Pointer => run_pointer(&settings, actuators),
    }
}
