use log::{debug, info, warn};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::worker::Worker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Alive,
    Failed,
}

type Check = Box<dyn FnMut() -> Health + Send>;
type Terminal = Box<dyn FnOnce() + Send>;

/// Periodically runs a health check. The first failure ends the loop and
/// fires the terminal callback exactly once; clearing the callback ends it
/// quietly. A stopped heartbeat cannot be restarted.
pub struct Heartbeat {
    name: String,
    period: Duration,
    check: Option<Check>,
    when_stopped: Arc<Mutex<Option<Terminal>>>,
    worker: Option<Worker>,
}

impl Heartbeat {
    pub fn new<F>(name: &str, period: Duration, check: F) -> Self
    where
        F: FnMut() -> Health + Send + 'static,
    {
        Heartbeat {
            name: name.to_string(),
            period,
            check: Some(Box::new(check)),
            when_stopped: Arc::new(Mutex::new(None)),
            worker: None,
        }
    }

    pub fn when_stopped<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut slot = self.when_stopped.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(Box::new(callback));
    }

    /// Ask the loop to end after its current sleep without firing the callback.
    pub fn clear_when_stopped(&self) {
        self.when_stopped.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    pub fn start(&mut self) -> Result<()> {
        if self.when_stopped.lock().unwrap_or_else(PoisonError::into_inner).is_none() {
            return Err(Error::MissingTerminalCallback(self.name.clone()));
        }
        let mut check = self.check.take().ok_or_else(|| Error::AlreadyStarted(self.name.clone()))?;

        let name = self.name.clone();
        let period = self.period;
        let when_stopped = Arc::clone(&self.when_stopped);
        let worker = Worker::spawn(&self.name, move |token| {
            loop {
                thread::sleep(period);
                let armed = when_stopped.lock().unwrap_or_else(PoisonError::into_inner).is_some();
                if token.is_cancelled() || !armed {
                    debug!("Heartbeat {} stopped", name);
                    break;
                }
                if check() == Health::Failed {
                    warn!("Heartbeat {} failed", name);
                    let callback =
                        when_stopped.lock().unwrap_or_else(PoisonError::into_inner).take();
                    if let Some(callback) = callback {
                        callback();
                    }
                    break;
                }
            }
        })?;
        info!("Heartbeat {} started every {:?}", self.name, self.period);
        self.worker = Some(worker);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    pub fn join(&mut self, bound: Duration) -> Result<()> {
        match self.worker.as_mut() {
            Some(worker) => worker.join_timeout(bound),
            None => Ok(()),
        }
    }

    /// Graceful stop: clear the callback, cancel, and wait up to two periods.
    pub fn stop(&mut self) -> Result<()> {
        self.clear_when_stopped();
        match self.worker.as_mut() {
            Some(worker) => worker.stop(self.period * 2),
            None => Ok(()),
        }
    }
}
