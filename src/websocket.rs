use log::{debug, error, info, warn};
use std::io::ErrorKind;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use tungstenite::{accept, Message, WebSocket};

use crate::actuators::Actuators;
use crate::boat::BoatSnapshot;
use crate::config::PointerSettings;
use crate::error::Result;
use crate::heartbeat::{Health, Heartbeat};
use crate::pointer::{PointerController, PointerEvent, PointerMessage};
use crate::worker::CancellationToken;

const ACCEPT_POLL: Duration = Duration::from_millis(50);
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(10);

/// Serves one pointer client at a time over a WebSocket and feeds its
/// presses into the controller. A link that goes quiet for longer than the
/// configured timeout counts as a disconnect.
pub struct PointerServer<A: Actuators + 'static> {
    controller: Arc<Mutex<PointerController<A>>>,
    settings: PointerSettings,
}

impl<A: Actuators + 'static> PointerServer<A> {
    pub fn new(controller: PointerController<A>, settings: PointerSettings) -> Self {
        PointerServer {
            controller: Arc::new(Mutex::new(controller)),
            settings,
        }
    }

    pub fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(&self.settings.listen)?;
        listener.set_nonblocking(true)?;
        info!("Pointer server listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    pub fn snapshot(&self) -> BoatSnapshot {
        self.controller.lock().unwrap_or_else(PoisonError::into_inner).snapshot()
    }

    /// Accept clients until `shutdown` is cancelled. Sessions run on the
    /// calling thread, so a second client waits until the first one leaves.
    pub fn serve(&self, listener: TcpListener, shutdown: &CancellationToken) -> Result<()> {
        while !shutdown.is_cancelled() {
            match listener.accept() {
                Ok((stream, peer)) => {
                    info!("Pointer client {} connected", peer);
                    if let Err(e) = self.session(stream, shutdown) {
                        warn!("Pointer session with {} ended: {}", peer, e);
                    }
                    info!("Pointer client {} disconnected", peer);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                Err(e) => error!("Connection error: {}", e),
            }
        }
        debug!("Pointer server stopped");
        Ok(())
    }

    pub fn terminate(&self) -> Result<()> {
        self.controller.lock().unwrap_or_else(PoisonError::into_inner).terminate()
    }

    fn handle(&self, event: PointerEvent) {
        let mut controller = self.controller.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = controller.handle(event) {
            error!("Pointer event {:?} failed: {}", event, e);
        }
    }

    fn session(&self, stream: TcpStream, shutdown: &CancellationToken) -> Result<()> {
        let timeout = self.settings.link_timeout();
        stream.set_nonblocking(false)?;
        let mut websocket = accept(stream).map_err(|e| match e {
            tungstenite::HandshakeError::Failure(e) => e,
            tungstenite::HandshakeError::Interrupted(_) => tungstenite::Error::ConnectionClosed,
        })?;
        // Reads wake up regularly so the watchdog and shutdown are noticed.
        websocket
            .get_ref()
            .set_read_timeout(Some((timeout / 4).max(MIN_READ_TIMEOUT)))?;
        self.handle(PointerEvent::Connected);

        let heard = Arc::new(AtomicBool::new(true));
        let lost = Arc::new(AtomicBool::new(false));
        let mut heartbeat = {
            let heard = Arc::clone(&heard);
            Heartbeat::new("pointer-link", timeout, move || {
                if heard.swap(false, Ordering::AcqRel) {
                    Health::Alive
                } else {
                    Health::Failed
                }
            })
        };
        {
            let controller = Arc::clone(&self.controller);
            let lost = Arc::clone(&lost);
            heartbeat.when_stopped(move || {
                warn!("Pointer link silent, centring");
                let mut controller = controller.lock().unwrap_or_else(PoisonError::into_inner);
                if let Err(e) = controller.handle(PointerEvent::Disconnected) {
                    error!("Failed to centre boat: {}", e);
                }
                lost.store(true, Ordering::Release);
            });
        }
        heartbeat.start()?;

        let outcome = self.read_loop(&mut websocket, &heard, &lost, shutdown);

        if let Err(e) = heartbeat.stop() {
            warn!("Pointer link watchdog: {}", e);
        }
        if !lost.load(Ordering::Acquire) {
            self.handle(PointerEvent::Disconnected);
        }
        outcome
    }

    fn read_loop(
        &self,
        websocket: &mut WebSocket<TcpStream>,
        heard: &AtomicBool,
        lost: &AtomicBool,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        loop {
            if lost.load(Ordering::Acquire) || shutdown.is_cancelled() {
                let closed = websocket.close(None).and_then(|()| websocket.flush());
                log_close(closed);
                return Ok(());
            }
            match websocket.read() {
                Ok(Message::Text(text)) => {
                    heard.store(true, Ordering::Release);
                    match serde_json::from_str::<PointerMessage>(&text) {
                        Ok(message) => {
                            self.handle(PointerEvent::from(message));
                            let reply = serde_json::to_string(&self.snapshot())?;
                            websocket.send(Message::Text(reply))?;
                        }
                        Err(e) => warn!("JSON parse error: {}", e),
                    }
                }
                Ok(Message::Close(_)) => {
                    // Reading the frame queued our reply; push it out.
                    log_close(websocket.flush());
                    return Ok(());
                }
                Ok(_) => heard.store(true, Ordering::Release),
                Err(tungstenite::Error::Io(e))
                    if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                Err(tungstenite::Error::ConnectionClosed) => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// A peer that hung up first is the normal end of a session.
fn log_close(closed: tungstenite::Result<()>) {
    match closed {
        Ok(()) | Err(tungstenite::Error::ConnectionClosed) => {}
        Err(tungstenite::Error::AlreadyClosed) => debug!("Pointer link already closed"),
        Err(e) => warn!("Failed to close pointer link: {}", e),
    }
}
