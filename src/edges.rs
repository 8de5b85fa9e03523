use log::{debug, info};
use rppal::gpio::{Gpio, InputPin, Level, Trigger};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
}

impl From<Level> for Edge {
    fn from(level: Level) -> Self {
        match level {
            Level::High => Edge::Rising,
            Level::Low => Edge::Falling,
        }
    }
}

/// Called from interrupt context with the edge and its timestamp in µs.
pub type EdgeHandler = Box<dyn FnMut(Edge, u64) + Send + 'static>;

/// Anything that can deliver per-pin edge events.
pub trait EdgeSource: Send {
    fn attach(&mut self, pin: u8, handler: EdgeHandler) -> Result<()>;
    fn detach(&mut self, pin: u8) -> Result<()>;
}

/// Edge source backed by rppal's asynchronous GPIO interrupts.
pub struct RppalEdgeSource {
    gpio: Gpio,
    epoch: Instant,
    pins: HashMap<u8, InputPin>,
}

impl RppalEdgeSource {
    pub fn new() -> Result<Self> {
        let gpio = Gpio::new()?;
        Ok(RppalEdgeSource {
            gpio,
            epoch: Instant::now(),
            pins: HashMap::new(),
        })
    }
}

impl EdgeSource for RppalEdgeSource {
    fn attach(&mut self, pin: u8, mut handler: EdgeHandler) -> Result<()> {
        let mut input = self.gpio.get(pin)?.into_input();
        let epoch = self.epoch;
        input.set_async_interrupt(Trigger::Both, move |level: Level| {
            handler(Edge::from(level), epoch.elapsed().as_micros() as u64);
        })?;
        info!("GPIO {} listening for edges", pin);
        self.pins.insert(pin, input);
        Ok(())
    }

    fn detach(&mut self, pin: u8) -> Result<()> {
        let mut input = self.pins.remove(&pin).ok_or(Error::NotAttached(pin))?;
        input.clear_async_interrupt()?;
        info!("GPIO {} released", pin);
        Ok(())
    }
}

/// In-process edge source. Events are delivered synchronously on the
/// caller's thread, which makes decoder timing fully reproducible.
#[derive(Clone, Default)]
pub struct SimulatedEdges {
    handlers: Arc<Mutex<HashMap<u8, EdgeHandler>>>,
}

impl SimulatedEdges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_attached(&self, pin: u8) -> bool {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&pin)
    }

    /// Deliver one edge. Returns false when nothing listens on `pin`.
    pub fn fire(&self, pin: u8, edge: Edge, timestamp_us: u64) -> bool {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        match handlers.get_mut(&pin) {
            Some(handler) => {
                handler(edge, timestamp_us);
                true
            }
            None => false,
        }
    }

    /// One high pulse of `width_us` starting at `rising_us`.
    pub fn pulse(&self, pin: u8, rising_us: u64, width_us: u64) -> bool {
        self.fire(pin, Edge::Rising, rising_us)
            && self.fire(pin, Edge::Falling, rising_us + width_us)
    }

    /// `count` consecutive pulses with a fixed frame period.
    /// Returns the timestamp at which the next frame would start.
    pub fn pulse_train(
        &self,
        pin: u8,
        start_us: u64,
        period_us: u64,
        width_us: u64,
        count: usize,
    ) -> u64 {
        let mut at = start_us;
        for _ in 0..count {
            self.pulse(pin, at, width_us);
            at += period_us;
        }
        at
    }
}

impl EdgeSource for SimulatedEdges {
    fn attach(&mut self, pin: u8, handler: EdgeHandler) -> Result<()> {
        debug!("Simulated pin {} attached", pin);
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pin, handler);
        Ok(())
    }

    fn detach(&mut self, pin: u8) -> Result<()> {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&pin)
            .map(|_| ())
            .ok_or(Error::NotAttached(pin))
    }
}
