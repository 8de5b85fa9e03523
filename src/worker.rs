use log::debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

const JOIN_POLL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A named thread that owns its loop and stops when its token is cancelled.
/// Cancellation is cooperative: the loop notices it on its next wake-up.
pub struct Worker {
    name: String,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn spawn<F>(name: &str, body: F) -> Result<Self>
    where
        F: FnOnce(CancellationToken) + Send + 'static,
    {
        let token = CancellationToken::new();
        let inner = token.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(inner))?;
        debug!("Worker {} spawned", name);
        Ok(Worker {
            name: name.to_string(),
            token,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Wait at most `bound` for the thread to exit. On timeout the worker
    /// stays joinable so a later call can try again.
    pub fn join_timeout(&mut self, bound: Duration) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        let deadline = Instant::now() + bound;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                self.handle = Some(handle);
                return Err(Error::JoinTimeout {
                    name: self.name.clone(),
                    waited: bound,
                });
            }
            thread::sleep(JOIN_POLL);
        }
        handle
            .join()
            .map_err(|_| Error::WorkerPanicked(self.name.clone()))?;
        debug!("Worker {} joined", self.name);
        Ok(())
    }

    pub fn stop(&mut self, bound: Duration) -> Result<()> {
        self.cancel();
        self.join_timeout(bound)
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_worker_joins() {
        let mut worker = Worker::spawn("spin", |token| {
            while !token.is_cancelled() {
                thread::sleep(Duration::from_millis(2));
            }
        })
        .unwrap();
        assert!(!worker.is_finished());
        worker.stop(Duration::from_millis(500)).unwrap();
        assert!(worker.is_finished());
        worker.join_timeout(Duration::ZERO).unwrap();
    }

    #[test]
    fn stuck_worker_times_out() {
        let mut worker =
            Worker::spawn("stuck", |_| thread::sleep(Duration::from_millis(300))).unwrap();
        let err = worker.stop(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, Error::JoinTimeout { ref name, .. } if name == "stuck"));
        worker.join_timeout(Duration::from_secs(2)).unwrap();
    }

    #[test]
    fn panicking_worker_is_reported() {
        let mut worker = Worker::spawn("boom", |_| panic!("boom")).unwrap();
        let err = worker.join_timeout(Duration::from_secs(2)).unwrap_err();
        assert!(matches!(err, Error::WorkerPanicked(_)));
    }
}
