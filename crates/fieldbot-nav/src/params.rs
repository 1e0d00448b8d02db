use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Navigation tuning, all distances in field units (≈ mm).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavParams {
    /// Arrival radius around a ball.
    pub ball_proximity: f64,
    /// Arrival radius around the goal point.
    pub goal_proximity: f64,
    /// Heading errors above this are corrected by turning in place.
    pub turn_threshold_deg: f64,
    /// Longest single forward drive.
    pub max_drive_mm: f64,
    /// Floor for damped turns.
    pub min_turn_deg: f64,
    /// Distance from the marker midpoint to the collecting tip.
    pub tip_offset: f64,
    /// A detection this close to the current target is the same ball.
    pub target_match_radius: f64,
    /// How long an unseen target is still pursued, seconds.
    pub ball_grace_period_s: f64,
    /// Drop-off point.
    pub goal: Point2<f64>,
    /// Forward nudge while the gate is open during collection.
    pub collect_nudge_mm: f64,
    /// Reverse distance after the ball is pushed out at the goal.
    pub drop_reverse_mm: f64,
}

impl Default for NavParams {
    fn default() -> Self {
        Self {
            ball_proximity: 75.0,
            goal_proximity: 50.0,
            turn_threshold_deg: 20.0,
            max_drive_mm: 200.0,
            min_turn_deg: 5.0,
            tip_offset: 60.0,
            target_match_radius: 20.0,
            ball_grace_period_s: 15.0,
            goal: Point2::new(100.0, 600.0),
            collect_nudge_mm: 50.0,
            drop_reverse_mm: 100.0,
        }
    }
}
