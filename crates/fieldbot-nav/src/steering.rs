//! Single-step steering toward a field point and the turn damper.

use std::collections::VecDeque;

use fieldbot_core::normalize_angle_deg;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::command::{Command, TurnDirection};
use crate::params::NavParams;

/// Outcome of one steering step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Steering {
    /// The tip is within the proximity radius of the target.
    Arrived,
    Command(Command),
}

/// A turn that was sent to the robot.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub direction: TurnDirection,
    pub degrees: f64,
}

const SAME_MAGNITUDE_EPS: f64 = 1e-6;

/// Remembers the last two turns and halves a turn that would repeat a
/// left/right/left (or right/left/right) swing of equal size.
#[derive(Clone, Debug, Default)]
pub struct TurnDamper {
    history: VecDeque<TurnRecord>,
}

impl TurnDamper {
    const CAPACITY: usize = 2;

    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded turns, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &TurnRecord> {
        self.history.iter()
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    /// Damp `degrees` if needed, record the emitted turn and return its
    /// magnitude.
    pub fn apply(&mut self, direction: TurnDirection, degrees: f64, min_turn_deg: f64) -> f64 {
        let emitted = if self.is_oscillating(direction, degrees) {
            let damped = (degrees / 2.0).max(min_turn_deg);
            log::debug!("oscillating turn {direction:?} {degrees:.1} damped to {damped:.1}");
            damped
        } else {
            degrees
        };

        if self.history.len() == Self::CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(TurnRecord {
            direction,
            degrees: emitted,
        });
        emitted
    }

    fn is_oscillating(&self, direction: TurnDirection, degrees: f64) -> bool {
        let (Some(older), Some(newer)) = (self.history.front(), self.history.get(1)) else {
            return false;
        };
        newer.direction == older.direction.opposite()
            && (newer.degrees - older.degrees).abs() < SAME_MAGNITUDE_EPS
            && direction == older.direction
            && (degrees - older.degrees).abs() < SAME_MAGNITUDE_EPS
    }
}

/// Next command to bring `tip` to `target`.
///
/// Heading and target angle are measured with y pointing down, so a positive
/// heading error is a clockwise (right) turn.
pub fn compute_command(
    tip: Point2<f64>,
    target: Point2<f64>,
    heading_deg: f64,
    proximity: f64,
    params: &NavParams,
    damper: &mut TurnDamper,
) -> Steering {
    let vector = target - tip;
    let distance = vector.norm();
    if distance <= proximity {
        return Steering::Arrived;
    }

    let target_angle = vector.y.atan2(vector.x).to_degrees();
    let turn_error = normalize_angle_deg(target_angle - heading_deg);

    if turn_error.abs() > params.turn_threshold_deg {
        let direction = if turn_error > 0.0 {
            TurnDirection::Right
        } else {
            TurnDirection::Left
        };
        let max_turn = if distance > 2.0 * proximity {
            30.0
        } else if distance > 1.5 * proximity {
            10.0
        } else {
            5.0
        };
        let degrees = damper.apply(
            direction,
            turn_error.abs().min(max_turn),
            params.min_turn_deg,
        );
        return Steering::Command(Command::turn(direction, degrees));
    }

    damper.clear();
    let mm = params.max_drive_mm.min(distance - proximity).max(0.0);
    Steering::Command(Command::drive(mm))
}
