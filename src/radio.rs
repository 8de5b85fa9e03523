use log::{error, warn};
use std::sync::{Arc, Mutex, PoisonError};

use crate::actuators::Actuators;
use crate::aggregator::{Aggregator, AggregatorConfig};
use crate::boat::{Boat, BoatSnapshot};
use crate::config::{ChannelConfig, Settings};
use crate::decoder::DecoderSnapshot;
use crate::edges::EdgeSource;
use crate::error::{Error, Result};
use crate::mapper::{MappingMode, MotionMapper};

const TURN: usize = 0;
const THRUST: usize = 1;

/// Turns aggregated channel values back into stick positions in [-1, 1].
#[derive(Debug, Clone, Copy)]
pub struct Dequantizer {
    levels: u32,
    turn: ChannelConfig,
    thrust: ChannelConfig,
}

impl Dequantizer {
    pub fn new(levels: u32, channels: &[ChannelConfig]) -> Result<Self> {
        match channels {
            [turn, thrust, ..] => Ok(Dequantizer {
                levels,
                turn: *turn,
                thrust: *thrust,
            }),
            _ => Err(Error::InvalidChannels(
                "radio control needs a turn and a thrust channel".into(),
            )),
        }
    }

    /// With no quantization the values are raw pulse widths, except that a
    /// zero reading means the channel was centred.
    fn axis(&self, value: f64, channel: &ChannelConfig) -> f64 {
        let axis = if self.levels > 0 {
            value / self.levels as f64
        } else if value == 0.0 {
            0.0
        } else {
            (value - channel.mid_us) / channel.range_us
        };
        axis.clamp(-1.0, 1.0)
    }

    /// `(x, y)` from a value snapshot; missing entries read neutral.
    pub fn axes(&self, values: &[f64]) -> (f64, f64) {
        let x = values.get(TURN).map_or(0.0, |v| self.axis(*v, &self.turn));
        let y = values.get(THRUST).map_or(0.0, |v| self.axis(*v, &self.thrust));
        (x, y)
    }
}

/// A boat steered by a hobby receiver: channel 0 turns, channel 1 drives.
pub struct RadioControlBoat<A: Actuators + 'static> {
    aggregator: Aggregator,
    boat: Arc<Mutex<Boat<A>>>,
}

impl<A: Actuators + 'static> RadioControlBoat<A> {
    pub fn new(settings: &Settings, source: Box<dyn EdgeSource>, actuators: A) -> Result<Self> {
        let config = AggregatorConfig::from_settings(settings)?;
        let dequantizer = Dequantizer::new(config.levels, &config.channels)?;
        let mapper = MotionMapper::new(MappingMode::Differential, &settings.mapping);
        let boat = Arc::new(Mutex::new(Boat::new(actuators)?));
        let aggregator = Aggregator::new(config, source)?;

        let driven = Arc::clone(&boat);
        aggregator.when_value_changes(Some(Box::new(move |values: &[f64]| {
            let (x, y) = dequantizer.axes(values);
            let command = mapper.map(x, y);
            let mut boat = driven.lock().unwrap_or_else(PoisonError::into_inner);
            if let Err(e) = boat.set_motion(command) {
                error!("Failed to drive boat: {}", e);
            }
        })));

        let watched = Arc::clone(&boat);
        aggregator.when_health_changes(Some(Box::new(move |health: &[bool]| {
            if health.iter().any(|alive| !alive) {
                warn!("Channel lost {:?}, centring", health);
                let mut boat = watched.lock().unwrap_or_else(PoisonError::into_inner);
                if let Err(e) = boat.stop() {
                    error!("Failed to centre boat: {}", e);
                }
            }
        })));

        Ok(RadioControlBoat { aggregator, boat })
    }

    pub fn start(&mut self) -> Result<()> {
        self.aggregator.start()
    }

    pub fn snapshot(&self) -> BoatSnapshot {
        self.boat.lock().unwrap_or_else(PoisonError::into_inner).snapshot()
    }

    pub fn channels(&self) -> Vec<DecoderSnapshot> {
        self.aggregator.snapshot()
    }

    /// Stop listening and shut the motors down. Both steps always run.
    pub fn terminate(&mut self) -> Result<()> {
        let stopped = self.aggregator.stop();
        let terminated = self.boat.lock().unwrap_or_else(PoisonError::into_inner).terminate();
        stopped.and(terminated)
    }
}
