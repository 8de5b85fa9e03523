use serde::{Deserialize, Serialize};

use crate::config::{MappingSettings, Trims};

/// Output of the mapper, every field in [-1, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MotionCommand {
    pub left: f64,
    pub right: f64,
    pub center: f64,
    pub rudder: f64,
}

impl MotionCommand {
    pub fn neutral() -> Self {
        Self::default()
    }

    pub fn is_neutral(&self) -> bool {
        *self == Self::neutral()
    }

    fn trimmed(self, trims: &Trims) -> Self {
        MotionCommand {
            left: self.left * trims.left,
            right: self.right * trims.right,
            center: self.center * trims.center,
            rudder: self.rudder * trims.servo,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingMode {
    /// Continuous pointer input. The turn correction never exceeds the
    /// headroom left by the thrust.
    SymmetricTurn,
    /// Receiver sticks. Combine first, then clamp each output.
    Differential,
}

#[derive(Debug, Clone, Copy)]
pub struct MotionMapper {
    mode: MappingMode,
    thrust_delta: f64,
    trims: Trims,
}

impl MotionMapper {
    pub fn new(mode: MappingMode, settings: &MappingSettings) -> Self {
        MotionMapper {
            mode,
            thrust_delta: settings.thrust_delta,
            trims: settings.trims,
        }
    }

    /// Map a turn `x` and thrust `y` into actuator values.
    pub fn map(&self, x: f64, y: f64) -> MotionCommand {
        let command = match self.mode {
            MappingMode::SymmetricTurn => symmetric_turn(x, y, self.thrust_delta),
            MappingMode::Differential => differential(x, y, self.thrust_delta),
        };
        command.trimmed(&self.trims)
    }
}

pub fn symmetric_turn(x: f64, y: f64, thrust_delta: f64) -> MotionCommand {
    let (x, y) = (x.clamp(-1.0, 1.0), y.clamp(-1.0, 1.0));
    let mut command = MotionCommand {
        left: y,
        right: y,
        center: y,
        rudder: x,
    };
    if x != 0.0 {
        let cap = if y >= 0.0 { 1.0 - y } else { 1.0 + y };
        let backwards = if y < 0.0 { -1.0 } else { 1.0 };
        let delta = (x.abs() * thrust_delta).min(cap) * x.signum() * backwards;
        command.left += delta;
        command.right -= delta;
    }
    command
}

pub fn differential(x: f64, y: f64, thrust_delta: f64) -> MotionCommand {
    let mut delta = x * thrust_delta;
    if y < 0.0 {
        delta = -delta;
    }
    MotionCommand {
        left: (y + delta).clamp(-1.0, 1.0),
        right: (y - delta).clamp(-1.0, 1.0),
        center: y.clamp(-1.0, 1.0),
        rudder: x.clamp(-1.0, 1.0),
    }
}
