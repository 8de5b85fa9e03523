use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::decoder::MAX_INTERVAL_US;
use crate::error::{Error, Result};

/// One receiver channel: the pin it arrives on and the pulse widths it spans.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelConfig {
    pub pin: u8,
    pub mid_us: f64,
    pub range_us: f64,
}

impl ChannelConfig {
    pub fn new(pin: u8, mid_us: f64, range_us: f64) -> Self {
        ChannelConfig { pin, mid_us, range_us }
    }

    pub fn max_us(&self) -> f64 {
        self.mid_us + self.range_us
    }

    pub fn min_us(&self) -> f64 {
        self.mid_us - self.range_us
    }

    /// Build channels from `(pin, mid, range)` triples, rejecting the whole
    /// set if any triple is unusable.
    pub fn from_triples(triples: &[(u8, f64, f64)]) -> Result<Vec<ChannelConfig>> {
        if triples.is_empty() {
            return Err(Error::InvalidChannels("no channels given".into()));
        }
        let mut seen = HashSet::new();
        let mut channels = Vec::with_capacity(triples.len());
        for &(pin, mid_us, range_us) in triples {
            if !seen.insert(pin) {
                return Err(Error::InvalidChannels(format!("pin {} listed twice", pin)));
            }
            if !mid_us.is_finite() || !range_us.is_finite() || range_us <= 0.0 {
                return Err(Error::InvalidChannels(format!(
                    "pin {} needs a finite positive range (mid {}, range {})",
                    pin, mid_us, range_us
                )));
            }
            if mid_us - range_us <= 0.0 {
                return Err(Error::InvalidChannels(format!(
                    "pin {} range {} reaches below zero from mid {}",
                    pin, range_us, mid_us
                )));
            }
            // Longer pulses are discarded as glitches, so the top would never read.
            if mid_us + range_us >= MAX_INTERVAL_US as f64 {
                return Err(Error::InvalidChannels(format!(
                    "pin {} range {} from mid {} reaches past {} us",
                    pin, range_us, mid_us, MAX_INTERVAL_US
                )));
            }
            channels.push(ChannelConfig::new(pin, mid_us, range_us));
        }
        Ok(channels)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// Average `span` polls and publish once per span.
    Periodic { span: usize },
    /// Track every poll with a minimum step.
    Reactive,
}

impl Default for Aggregation {
    fn default() -> Self {
        Aggregation::Periodic { span: 20 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Control {
    #[default]
    Radio,
    Pointer,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Trims {
    pub left: f64,
    pub right: f64,
    pub center: f64,
    pub servo: f64,
}

impl Default for Trims {
    fn default() -> Self {
        Trims {
            left: 1.0,
            right: 1.0,
            center: 1.0,
            servo: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingSettings {
    pub thrust_delta: f64,
    pub trims: Trims,
}

impl Default for MappingSettings {
    fn default() -> Self {
        MappingSettings {
            thrust_delta: 1.0,
            trims: Trims::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotorPins {
    pub forward: u8,
    pub backward: u8,
    #[serde(default)]
    pub enable: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareSettings {
    pub left: MotorPins,
    pub right: MotorPins,
    pub center: MotorPins,
    pub rudder: u8,
    pub motor_pwm_hz: f64,
    pub servo_min_us: u64,
    pub servo_max_us: u64,
}

impl Default for HardwareSettings {
    fn default() -> Self {
        HardwareSettings {
            left: MotorPins {
                forward: 20,
                backward: 21,
                enable: Some(19),
            },
            right: MotorPins {
                forward: 7,
                backward: 1,
                enable: Some(12),
            },
            center: MotorPins {
                forward: 23,
                backward: 24,
                enable: Some(18),
            },
            rudder: 13,
            motor_pwm_hz: 100.0,
            servo_min_us: 1000,
            servo_max_us: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PointerSettings {
    pub listen: String,
    pub link_timeout_ms: u64,
}

impl Default for PointerSettings {
    fn default() -> Self {
        PointerSettings {
            listen: String::from("0.0.0.0:10013"),
            link_timeout_ms: 500,
        }
    }
}

impl PointerSettings {
    pub fn link_timeout(&self) -> Duration {
        Duration::from_millis(self.link_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub name: String,
    pub channels: Vec<(u8, f64, f64)>,
    pub levels: u32,
    pub poll_rate_hz: f64,
    pub aggregation: Aggregation,
    pub smoothing: Option<f64>,
    pub control: Control,
    pub mapping: MappingSettings,
    pub hardware: HardwareSettings,
    pub pointer: PointerSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            name: String::from("RCListener"),
            channels: vec![(4, 1569.0, 550.0), (5, 1507.0, 412.0)],
            levels: 10,
            poll_rate_hz: 10.0,
            aggregation: Aggregation::default(),
            smoothing: None,
            control: Control::default(),
            mapping: MappingSettings::default(),
            hardware: HardwareSettings::default(),
            pointer: PointerSettings::default(),
        }
    }
}

impl Settings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Settings::from_json(&content)
    }

    /// Malformed JSON is a `Json` error. Well-formed JSON of the wrong shape
    /// is `InvalidChannels` when the channel list is at fault and
    /// `InvalidSetting` otherwise.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        if let Some(channels) = value.get("channels") {
            Vec::<(u8, f64, f64)>::deserialize(channels)
                .map_err(|e| Error::InvalidChannels(format!("channels: {}", e)))?;
        }
        let settings =
            Settings::deserialize(value).map_err(|e| Error::InvalidSetting(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let channels = self.channel_configs()?;
        if !(self.poll_rate_hz.is_finite() && self.poll_rate_hz > 0.0) {
            return Err(Error::InvalidSetting(format!("poll rate {} Hz", self.poll_rate_hz)));
        }
        self.poll_period()?;
        if let Aggregation::Periodic { span: 0 } = self.aggregation {
            return Err(Error::InvalidSetting("periodic span must be at least 1".into()));
        }
        if self.smoothing.is_some_and(|s| !(s >= 0.0)) {
            return Err(Error::InvalidSetting("smoothing must be zero or positive".into()));
        }
        if !(self.mapping.thrust_delta >= 0.0) {
            return Err(Error::InvalidSetting("thrust delta must be zero or positive".into()));
        }
        if self.hardware.servo_min_us >= self.hardware.servo_max_us {
            return Err(Error::InvalidSetting("servo pulse range is empty".into()));
        }
        if self.control == Control::Radio && channels.len() < 2 {
            return Err(Error::InvalidChannels(
                "radio control needs a turn and a thrust channel".into(),
            ));
        }
        Ok(())
    }

    pub fn channel_configs(&self) -> Result<Vec<ChannelConfig>> {
        ChannelConfig::from_triples(&self.channels)
    }

    pub fn poll_period(&self) -> Result<Duration> {
        Duration::try_from_secs_f64(1.0 / self.poll_rate_hz).map_err(|e| {
            Error::InvalidSetting(format!("poll rate {} Hz: {}", self.poll_rate_hz, e))
        })
    }

    /// Minimum step for reactive tracking, a tenth of the level count unless set.
    pub fn smoothing(&self) -> f64 {
        self.smoothing.unwrap_or(self.levels as f64 / 10.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.smoothing(), 1.0);
        assert_eq!(settings.poll_period().unwrap(), Duration::from_millis(100));
        let channels = settings.channel_configs().unwrap();
        assert_eq!(channels[0].max_us(), 2119.0);
        assert_eq!(channels[1].min_us(), 1095.0);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let settings = Settings::from_json(
            r#"{
                "channels": [[17, 1500, 500], [27, 1500, 500]],
                "aggregation": "reactive",
                "smoothing": 0
            }"#,
        )
        .unwrap();
        assert_eq!(settings.aggregation, Aggregation::Reactive);
        assert_eq!(settings.smoothing(), 0.0);
        assert_eq!(settings.levels, 10);
        assert_eq!(settings.pointer.link_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn periodic_span_parses() {
        let settings =
            Settings::from_json(r#"{ "aggregation": { "periodic": { "span": 5 } } }"#).unwrap();
        assert_eq!(settings.aggregation, Aggregation::Periodic { span: 5 });
    }

    #[test]
    fn wrong_triple_arity_is_rejected() {
        let err = Settings::from_json(r#"{ "channels": [[4, 1500], [5, 1500, 400]] }"#);
        assert!(matches!(err, Err(Error::InvalidChannels(_))));
    }

    #[test]
    fn mistyped_settings_are_not_blamed_on_channels() {
        let err = Settings::from_json(r#"{ "levels": "ten" }"#);
        assert!(matches!(err, Err(Error::InvalidSetting(_))));
        let err = Settings::from_json(r#"{ "aggregation": "sometimes" }"#);
        assert!(matches!(err, Err(Error::InvalidSetting(_))));
        let err = Settings::from_json(r#"{ "levels": 10, "#);
        assert!(matches!(err, Err(Error::Json(_))));
    }

    #[test]
    fn bad_channel_sets_are_rejected() {
        assert!(ChannelConfig::from_triples(&[]).is_err());
        let twice = [(4, 1500.0, 500.0), (4, 1500.0, 500.0)];
        assert!(ChannelConfig::from_triples(&twice).is_err());
        assert!(ChannelConfig::from_triples(&[(4, 1500.0, 0.0)]).is_err());
        assert!(ChannelConfig::from_triples(&[(4, 400.0, 500.0)]).is_err());
        assert!(ChannelConfig::from_triples(&[(4, f64::NAN, 500.0)]).is_err());
    }

    #[test]
    fn channels_must_fit_the_accepted_pulse_window() {
        assert!(ChannelConfig::from_triples(&[(4, 99_000.0, 1_000.0)]).is_err());
        assert!(ChannelConfig::from_triples(&[(4, 20_000_000.0, 500.0)]).is_err());
        let widest = ChannelConfig::from_triples(&[(4, 50_000.0, 49_000.0)]).unwrap();
        assert_eq!(widest[0].max_us(), 99_000.0);
    }

    #[test]
    fn radio_needs_two_channels() {
        let mut settings = Settings::default();
        settings.channels.truncate(1);
        assert!(matches!(settings.validate(), Err(Error::InvalidChannels(_))));
        settings.control = Control::Pointer;
        settings.validate().unwrap();
    }

    #[test]
    fn zero_span_and_rate_are_rejected() {
        let mut settings = Settings::default();
        settings.aggregation = Aggregation::Periodic { span: 0 };
        assert!(settings.validate().is_err());
        let mut settings = Settings::default();
        settings.poll_rate_hz = 0.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn vanishing_poll_rate_is_an_error() {
        let mut settings = Settings::default();
        settings.poll_rate_hz = 1e-20;
        assert!(matches!(settings.validate(), Err(Error::InvalidSetting(_))));
        assert!(settings.poll_period().is_err());
    }
}
