//! Polls a set of channel decoders on a fixed period and turns their
//! readings into value and health events.

use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use crate::config::{Aggregation, ChannelConfig, Settings};
use crate::decoder::{ChannelDecoder, DecoderSnapshot};
use crate::edges::EdgeSource;
use crate::error::{Error, Result};
use crate::worker::Worker;

pub type ValueCallback = Box<dyn FnMut(&[f64]) + Send>;
pub type HealthCallback = Box<dyn FnMut(&[bool]) + Send>;

/// One channel's reading for a single tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelInput {
    pub alive: bool,
    pub value: f64,
}

impl ChannelInput {
    pub fn alive(value: f64) -> Self {
        ChannelInput { alive: true, value }
    }

    pub fn dead() -> Self {
        ChannelInput {
            alive: false,
            value: 0.0,
        }
    }
}

/// What a tick wants to tell the consumers. Health goes out first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickEvents {
    pub health: Option<Vec<bool>>,
    pub values: Option<Vec<f64>>,
}

/// Remembers the last published liveness and reports flips.
#[derive(Debug, Clone)]
pub struct HealthTracker {
    alive: Vec<bool>,
}

impl HealthTracker {
    pub fn new(channels: usize) -> Self {
        HealthTracker {
            alive: vec![true; channels],
        }
    }

    pub fn liveness(&self) -> &[bool] {
        &self.alive
    }

    pub fn update(&mut self, alive: &[bool]) -> Option<Vec<bool>> {
        if self.alive == alive {
            return None;
        }
        self.alive = alive.to_vec();
        Some(self.alive.clone())
    }
}

/// Collects `span` ticks per channel and publishes their mean once per span.
/// A dead tick contributes the channel's neutral reading.
#[derive(Debug, Clone)]
pub struct PeriodicAverage {
    span: usize,
    neutral: Vec<f64>,
    sums: Vec<f64>,
    ticks: usize,
}

impl PeriodicAverage {
    /// Quantized channels, where neutral is zero.
    pub fn new(channels: usize, span: usize) -> Self {
        Self::with_neutral(vec![0.0; channels], span)
    }

    pub fn with_neutral(neutral: Vec<f64>, span: usize) -> Self {
        PeriodicAverage {
            span: span.max(1),
            sums: vec![0.0; neutral.len()],
            neutral,
            ticks: 0,
        }
    }

    pub fn tick(&mut self, inputs: &[ChannelInput]) -> Option<Vec<f64>> {
        for ((sum, input), neutral) in self.sums.iter_mut().zip(inputs).zip(&self.neutral) {
            *sum += if input.alive { input.value } else { *neutral };
        }
        self.ticks += 1;
        if self.ticks < self.span {
            return None;
        }
        let span = self.span as f64;
        let means = self.sums.iter().map(|sum| sum / span).collect();
        self.sums.iter_mut().for_each(|sum| *sum = 0.0);
        self.ticks = 0;
        Some(means)
    }
}

/// Follows each channel with a minimum step. A dead channel snaps straight
/// back to zero.
#[derive(Debug, Clone)]
pub struct RateLimited {
    smoothing: f64,
    current: Vec<f64>,
}

impl RateLimited {
    pub fn new(initial: Vec<f64>, smoothing: f64) -> Self {
        RateLimited { smoothing, current: initial }
    }

    pub fn current(&self) -> &[f64] {
        &self.current
    }

    pub fn tick(&mut self, inputs: &[ChannelInput]) -> Option<Vec<f64>> {
        let mut changed = false;
        for (current, input) in self.current.iter_mut().zip(inputs) {
            let change = if !input.alive {
                -*current
            } else {
                step(input.value - *current, self.smoothing)
            };
            if change != 0.0 {
                *current += change;
                changed = true;
            }
        }
        changed.then(|| self.current.clone())
    }
}

/// Widen a non-zero change to at least `smoothing`, keeping its direction.
pub fn step(change: f64, smoothing: f64) -> f64 {
    if smoothing > 0.0 && change != 0.0 && change.abs() < smoothing {
        smoothing.copysign(change)
    } else {
        change
    }
}

#[derive(Debug, Clone)]
pub enum Strategy {
    Periodic(PeriodicAverage),
    Reactive(RateLimited),
}

impl Strategy {
    pub fn tick(&mut self, inputs: &[ChannelInput]) -> Option<Vec<f64>> {
        match self {
            Strategy::Periodic(periodic) => periodic.tick(inputs),
            Strategy::Reactive(reactive) => reactive.tick(inputs),
        }
    }
}

/// Per-tick state of the polling loop, independent of any thread.
#[derive(Debug, Clone)]
pub struct Poller {
    strategy: Strategy,
    health: HealthTracker,
}

impl Poller {
    pub fn new(strategy: Strategy, channels: usize) -> Self {
        Poller {
            strategy,
            health: HealthTracker::new(channels),
        }
    }

    pub fn liveness(&self) -> &[bool] {
        self.health.liveness()
    }

    pub fn step(&mut self, inputs: &[ChannelInput]) -> TickEvents {
        let alive: Vec<bool> = inputs.iter().map(|i| i.alive).collect();
        TickEvents {
            health: self.health.update(&alive),
            values: self.strategy.tick(inputs),
        }
    }

    /// Read every decoder once. Channels that just died are recentred so a
    /// later revival starts from neutral.
    pub fn poll(&mut self, decoders: &[Arc<ChannelDecoder>], levels: u32) -> TickEvents {
        let inputs: Vec<ChannelInput> = decoders
            .iter()
            .zip(self.health.liveness())
            .map(|(decoder, &was_alive)| {
                if decoder.check() {
                    if was_alive {
                        decoder.reset();
                    }
                    ChannelInput::dead()
                } else {
                    ChannelInput::alive(decoder.value(levels))
                }
            })
            .collect();
        self.step(&inputs)
    }
}

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub name: String,
    pub channels: Vec<ChannelConfig>,
    pub levels: u32,
    pub period: Duration,
    pub aggregation: Aggregation,
    pub smoothing: f64,
}

impl AggregatorConfig {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        settings.validate()?;
        Ok(AggregatorConfig {
            name: settings.name.clone(),
            channels: settings.channel_configs()?,
            levels: settings.levels,
            period: settings.poll_period()?,
            aggregation: settings.aggregation,
            smoothing: settings.smoothing(),
        })
    }
}

#[derive(Default)]
struct Callbacks {
    value: Option<ValueCallback>,
    health: Option<HealthCallback>,
}

impl Callbacks {
    fn dispatch(&mut self, events: TickEvents) {
        if let (Some(health), Some(callback)) = (events.health, self.health.as_mut()) {
            callback(health.as_slice());
        }
        if let (Some(values), Some(callback)) = (events.values, self.value.as_mut()) {
            callback(values.as_slice());
        }
    }
}

pub struct Aggregator {
    config: AggregatorConfig,
    decoders: Vec<Arc<ChannelDecoder>>,
    source: Box<dyn EdgeSource>,
    callbacks: Arc<Mutex<Callbacks>>,
    worker: Option<Worker>,
    stopped: bool,
}

impl Aggregator {
    /// Attach one decoder per channel. If any pin cannot be attached the
    /// ones already attached are released again.
    pub fn new(config: AggregatorConfig, mut source: Box<dyn EdgeSource>) -> Result<Self> {
        if config.channels.is_empty() {
            return Err(Error::InvalidChannels("no channels given".into()));
        }
        let mut decoders: Vec<Arc<ChannelDecoder>> = Vec::with_capacity(config.channels.len());
        for channel in &config.channels {
            let decoder = Arc::new(ChannelDecoder::new(*channel));
            let handler = Arc::clone(&decoder);
            let attached = source.attach(
                channel.pin,
                Box::new(move |edge, ts| handler.on_edge(edge, ts)),
            );
            if let Err(e) = attached {
                for attached in &decoders {
                    let _ = source.detach(attached.pin());
                }
                return Err(e);
            }
            debug!(
                "{}: decoder on pin {} ({} ± {} µs)",
                config.name, channel.pin, channel.mid_us, channel.range_us
            );
            decoders.push(decoder);
        }
        Ok(Aggregator {
            config,
            decoders,
            source,
            callbacks: Arc::new(Mutex::new(Callbacks::default())),
            worker: None,
            stopped: false,
        })
    }

    pub fn when_value_changes(&self, callback: Option<ValueCallback>) {
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner).value = callback;
    }

    pub fn when_health_changes(&self, callback: Option<HealthCallback>) {
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner).health = callback;
    }

    /// Current quantized reading of every channel, without waiting for a tick.
    pub fn values(&self) -> Vec<f64> {
        self.decoders.iter().map(|d| d.value(self.config.levels)).collect()
    }

    pub fn snapshot(&self) -> Vec<DecoderSnapshot> {
        self.decoders.iter().map(|d| d.snapshot()).collect()
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() || self.stopped {
            return Err(Error::AlreadyStarted(self.config.name.clone()));
        }
        let strategy = match self.config.aggregation {
            Aggregation::Periodic { span } => {
                let levels = self.config.levels;
                let neutral = self.decoders.iter().map(|d| d.neutral(levels)).collect();
                Strategy::Periodic(PeriodicAverage::with_neutral(neutral, span))
            }
            Aggregation::Reactive => {
                Strategy::Reactive(RateLimited::new(self.values(), self.config.smoothing))
            }
        };
        let mut poller = Poller::new(strategy, self.decoders.len());
        let decoders = self.decoders.clone();
        let callbacks = Arc::clone(&self.callbacks);
        let period = self.config.period;
        let levels = self.config.levels;
        let name = self.config.name.clone();

        let worker = Worker::spawn(&self.config.name, move |token| {
            loop {
                thread::sleep(period);
                if token.is_cancelled() {
                    break;
                }
                let events = poller.poll(&decoders, levels);
                if let Some(health) = &events.health {
                    log_health(&name, &decoders, health);
                }
                callbacks.lock().unwrap_or_else(PoisonError::into_inner).dispatch(events);
            }
            debug!("{} polling stopped", name);
        })?;
        info!(
            "{} polling {} channels every {:?} ({:?})",
            self.config.name,
            self.decoders.len(),
            period,
            self.config.aggregation
        );
        self.worker = Some(worker);
        Ok(())
    }

    /// Stop polling, release the pins and centre the consumers. Safe to call
    /// more than once; the first failure is returned after everything else
    /// has been attempted.
    pub fn stop(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        let mut outcome = Ok(());

        if let Some(worker) = self.worker.as_mut() {
            if let Err(e) = worker.stop(self.config.period * 2) {
                error!("{}: {}", self.config.name, e);
                outcome = Err(e);
            }
        }
        for decoder in &self.decoders {
            if let Err(e) = self.source.detach(decoder.pin()) {
                error!("{}: releasing pin {} failed: {}", self.config.name, decoder.pin(), e);
                if outcome.is_ok() {
                    outcome = Err(e);
                }
            }
        }

        let mut callbacks = self.callbacks.lock().unwrap_or_else(PoisonError::into_inner);
        callbacks.health = None;
        if let Some(callback) = callbacks.value.as_mut() {
            callback(vec![0.0; self.decoders.len()].as_slice());
        }
        info!("{} stopped", self.config.name);
        outcome
    }
}

impl Drop for Aggregator {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("{} did not stop cleanly: {}", self.config.name, e);
        }
    }
}

fn log_health(name: &str, decoders: &[Arc<ChannelDecoder>], health: &[bool]) {
    for (decoder, alive) in decoders.iter().zip(health) {
        if *alive {
            info!("{}: pin {} alive", name, decoder.pin());
        } else {
            warn!("{}: pin {} died", name, decoder.pin());
        }
    }
}
