use log::{debug, info};
use serde::Serialize;

use crate::actuators::Actuators;
use crate::error::Result;
use crate::mapper::MotionCommand;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BoatState {
    Neutral,
    Active,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoatSnapshot {
    pub state: BoatState,
    pub motion: MotionCommand,
}

/// Thin shell around the actuators that tracks whether the boat is moving.
/// Once terminated every command is ignored.
pub struct Boat<A: Actuators> {
    actuators: A,
    state: BoatState,
    motion: MotionCommand,
}

impl<A: Actuators> Boat<A> {
    pub fn new(mut actuators: A) -> Result<Self> {
        actuators.stop()?;
        Ok(Boat {
            actuators,
            state: BoatState::Neutral,
            motion: MotionCommand::neutral(),
        })
    }

    pub fn state(&self) -> BoatState {
        self.state
    }

    pub fn motion(&self) -> MotionCommand {
        self.motion
    }

    pub fn snapshot(&self) -> BoatSnapshot {
        BoatSnapshot {
            state: self.state,
            motion: self.motion,
        }
    }

    pub fn set_motion(&mut self, command: MotionCommand) -> Result<()> {
        if self.state == BoatState::Terminated {
            debug!("Ignoring {:?}, boat terminated", command);
            return Ok(());
        }
        self.actuators.apply(&command)?;
        self.motion = command;
        let next = if command.is_neutral() {
            BoatState::Neutral
        } else {
            BoatState::Active
        };
        self.transition(next);
        Ok(())
    }

    /// Centre everything.
    pub fn stop(&mut self) -> Result<()> {
        if self.state == BoatState::Terminated {
            return Ok(());
        }
        self.actuators.stop()?;
        self.motion = MotionCommand::neutral();
        self.transition(BoatState::Neutral);
        Ok(())
    }

    pub fn terminate(&mut self) -> Result<()> {
        if self.state == BoatState::Terminated {
            return Ok(());
        }
        let outcome = self.actuators.stop();
        self.motion = MotionCommand::neutral();
        self.transition(BoatState::Terminated);
        outcome
    }

    fn transition(&mut self, next: BoatState) {
        if self.state != next {
            info!("Boat {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }
}
