//! Radio-control boat pipeline: receiver PWM decoding, channel aggregation,
//! motion mapping and the boat around it.

pub mod actuators;
pub mod aggregator;
pub mod boat;
pub mod config;
pub mod decoder;
pub mod edges;
pub mod error;
pub mod generator;
pub mod heartbeat;
pub mod mapper;
pub mod pointer;
pub mod quantize;
pub mod radio;
pub mod websocket;
pub mod worker;

pub use error::{Error, Result};
