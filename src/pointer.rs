use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::actuators::Actuators;
use crate::boat::{Boat, BoatSnapshot};
use crate::config::MappingSettings;
use crate::error::Result;
use crate::mapper::{MappingMode, MotionMapper};

/// Normalized pointer positions, `x` and `y` in [-1, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerEvent {
    Connected,
    Disconnected,
    Pressed { x: f64, y: f64 },
    Moved { x: f64, y: f64 },
    Released { x: f64, y: f64 },
    DoublePressed { x: f64, y: f64 },
}

/// What a pointer client sends over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PointerMessage {
    Press { x: f64, y: f64 },
    Move { x: f64, y: f64 },
    Release { x: f64, y: f64 },
    Double { x: f64, y: f64 },
}

impl From<PointerMessage> for PointerEvent {
    fn from(message: PointerMessage) -> Self {
        match message {
            PointerMessage::Press { x, y } => PointerEvent::Pressed { x, y },
            PointerMessage::Move { x, y } => PointerEvent::Moved { x, y },
            PointerMessage::Release { x, y } => PointerEvent::Released { x, y },
            PointerMessage::Double { x, y } => PointerEvent::DoublePressed { x, y },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    /// The pointer steers the boat.
    #[default]
    Navigate,
    /// The pointer aims; the boat holds still.
    Target,
}

impl ControlMode {
    pub fn next(self, event: &PointerEvent) -> ControlMode {
        match (self, event) {
            (_, PointerEvent::Disconnected) => ControlMode::Navigate,
            (ControlMode::Navigate, PointerEvent::DoublePressed { .. }) => ControlMode::Target,
            (ControlMode::Target, PointerEvent::DoublePressed { .. }) => ControlMode::Navigate,
            (mode, _) => mode,
        }
    }
}

pub struct PointerController<A: Actuators> {
    boat: Boat<A>,
    mapper: MotionMapper,
    mode: ControlMode,
}

impl<A: Actuators> PointerController<A> {
    pub fn new(boat: Boat<A>, mapping: &MappingSettings) -> Self {
        PointerController {
            boat,
            mapper: MotionMapper::new(MappingMode::SymmetricTurn, mapping),
            mode: ControlMode::default(),
        }
    }

    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    pub fn snapshot(&self) -> BoatSnapshot {
        self.boat.snapshot()
    }

    pub fn handle(&mut self, event: PointerEvent) -> Result<()> {
        let next = self.mode.next(&event);
        if next != self.mode {
            info!("Pointer mode {:?} -> {:?}", self.mode, next);
            self.mode = next;
            if next == ControlMode::Target {
                self.boat.stop()?;
            }
        }

        match (self.mode, event) {
            (_, PointerEvent::Disconnected) => self.boat.stop(),
            (_, PointerEvent::Connected) | (_, PointerEvent::DoublePressed { .. }) => Ok(()),
            (ControlMode::Navigate, PointerEvent::Pressed { x, y })
            | (ControlMode::Navigate, PointerEvent::Moved { x, y }) => {
                self.boat.set_motion(self.mapper.map(x, y))
            }
            (ControlMode::Navigate, PointerEvent::Released { .. }) => self.boat.stop(),
            (ControlMode::Target, event) => {
                debug!("Target mode ignores {:?}", event);
                Ok(())
            }
        }
    }

    pub fn terminate(&mut self) -> Result<()> {
        self.boat.terminate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuators::SimulatedActuators;
    use crate::boat::BoatState;

    fn controller() -> (PointerController<SimulatedActuators>, SimulatedActuators) {
        let actuators = SimulatedActuators::new();
        let boat = Boat::new(actuators.clone()).unwrap();
        (PointerController::new(boat, &MappingSettings::default()), actuators)
    }

    #[test]
    fn transition_table() {
        let double = PointerEvent::DoublePressed { x: 0.0, y: 0.0 };
        let moved = PointerEvent::Moved { x: 0.1, y: 0.1 };
        assert_eq!(ControlMode::Navigate.next(&double), ControlMode::Target);
        assert_eq!(ControlMode::Target.next(&double), ControlMode::Navigate);
        assert_eq!(ControlMode::Target.next(&PointerEvent::Disconnected), ControlMode::Navigate);
        assert_eq!(ControlMode::Target.next(&moved), ControlMode::Target);
        assert_eq!(ControlMode::Navigate.next(&PointerEvent::Connected), ControlMode::Navigate);
    }

    #[test]
    fn press_drives_and_release_centres() {
        let (mut controller, actuators) = controller();
        controller.handle(PointerEvent::Pressed { x: 0.0, y: 0.5 }).unwrap();
        assert_eq!(actuators.last().center, 0.5);
        assert_eq!(controller.snapshot().state, BoatState::Active);

        controller.handle(PointerEvent::Released { x: 0.0, y: 0.5 }).unwrap();
        assert!(actuators.last().is_neutral());
        assert_eq!(controller.snapshot().state, BoatState::Neutral);
    }

    #[test]
    fn target_mode_holds_the_boat() {
        let (mut controller, actuators) = controller();
        controller.handle(PointerEvent::Moved { x: 0.3, y: 0.8 }).unwrap();
        controller.handle(PointerEvent::DoublePressed { x: 0.3, y: 0.8 }).unwrap();
        assert_eq!(controller.mode(), ControlMode::Target);
        assert!(actuators.last().is_neutral());

        controller.handle(PointerEvent::Moved { x: 0.9, y: 0.9 }).unwrap();
        assert!(actuators.last().is_neutral());

        controller.handle(PointerEvent::Disconnected).unwrap();
        assert_eq!(controller.mode(), ControlMode::Navigate);
    }

    #[test]
    fn messages_parse_from_json() {
        let message: PointerMessage =
            serde_json::from_str(r#"{"type":"move","x":0.25,"y":-1}"#).unwrap();
        assert_eq!(PointerEvent::from(message), PointerEvent::Moved { x: 0.25, y: -1.0 });
        assert!(serde_json::from_str::<PointerMessage>(r#"{"type":"swipe","x":0,"y":0}"#).is_err());
    }
}
