use std::time::Duration;

/// Errors raised by the decoding pipeline and the boat around it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid channel configuration: {0}")]
    InvalidChannels(String),

    #[error("Invalid setting: {0}")]
    InvalidSetting(String),

    #[error("Heartbeat {0} has no terminal callback")]
    MissingTerminalCallback(String),

    #[error("{0} was already started")]
    AlreadyStarted(String),

    #[error("Worker {name} did not exit within {waited:?}")]
    JoinTimeout { name: String, waited: Duration },

    #[error("Worker {0} panicked")]
    WorkerPanicked(String),

    #[error("Pin {0} has no edge handler attached")]
    NotAttached(u8),

    #[error("GPIO error: {0}")]
    Gpio(#[from] rppal::gpio::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
