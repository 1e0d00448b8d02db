//! Ball collection / goal delivery state machine.

use std::time::{Duration, Instant};

use fieldbot_core::Pose;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::command::Command;
use crate::params::NavParams;
use crate::steering::{compute_command, Steering, TurnDamper};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationState {
    SearchingBall,
    MovingToBall,
    CollectingBall,
    MovingToGoal,
    DroppingBall,
}

/// What the caller should dispatch after one engine step.
#[derive(Clone, Debug, PartialEq)]
pub enum Decision {
    /// Nothing to send this frame.
    Idle,
    Steer(Command),
    /// Fixed actuator sequence, dispatched in order.
    Sequence(Vec<Command>),
}

impl Decision {
    pub fn commands(&self) -> &[Command] {
        match self {
            Decision::Idle => &[],
            Decision::Steer(cmd) => std::slice::from_ref(cmd),
            Decision::Sequence(cmds) => cmds,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Decision::Idle)
    }
}

/// Field-space navigation driven one frame at a time.
#[derive(Clone, Debug)]
pub struct NavigationEngine {
    params: NavParams,
    state: NavigationState,
    target: Option<Point2<f64>>,
    last_seen: Option<Instant>,
    damper: TurnDamper,
}

impl NavigationEngine {
    pub fn new(params: NavParams) -> Self {
        Self {
            params,
            state: NavigationState::SearchingBall,
            target: None,
            last_seen: None,
            damper: TurnDamper::new(),
        }
    }

    pub fn params(&self) -> &NavParams {
        &self.params
    }

    pub fn state(&self) -> NavigationState {
        self.state
    }

    /// Current ball or goal target.
    pub fn target(&self) -> Option<Point2<f64>> {
        match self.state {
            NavigationState::MovingToGoal => Some(self.params.goal),
            _ => self.target,
        }
    }

    pub fn damper(&self) -> &TurnDamper {
        &self.damper
    }

    /// Collection sequence: open, nudge forward over the ball, stop, close.
    pub fn collect_sequence(&self) -> Vec<Command> {
        vec![
            Command::OpenGate,
            Command::drive(self.params.collect_nudge_mm),
            Command::Stop,
            Command::CloseGate,
        ]
    }

    /// Drop-off sequence at the goal.
    pub fn drop_sequence(&self) -> Vec<Command> {
        vec![
            Command::Stop,
            Command::OpenGate,
            Command::PushOut,
            Command::PushReturn,
            Command::drive(-self.params.drop_reverse_mm),
            Command::CloseGate,
        ]
    }

    /// Advance the state machine with a field-space pose and the ball
    /// detections visible in this frame. Without a pose nothing changes.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(state = ?self.state, balls = balls.len()))
    )]
    pub fn step(&mut self, pose: Option<Pose>, balls: &[Point2<f64>], now: Instant) -> Decision {
        let Some(pose) = pose else {
            return Decision::Idle;
        };
        let tip = pose.point_ahead(self.params.tip_offset);

        loop {
            match self.state {
                NavigationState::SearchingBall => {
                    let Some(ball) = nearest(balls, tip) else {
                        return Decision::Idle;
                    };
                    log::info!("new ball target ({:.0}, {:.0})", ball.x, ball.y);
                    self.target = Some(ball);
                    self.last_seen = Some(now);
                    self.damper.clear();
                    self.state = NavigationState::MovingToBall;
                }
                NavigationState::MovingToBall => {
                    let Some(target) = self.refresh_target(balls, now) else {
                        self.transition(NavigationState::SearchingBall);
                        continue;
                    };
                    let proximity = self.params.ball_proximity;
                    match self.steer(tip, target, pose.heading_deg, proximity) {
                        Some(cmd) => return Decision::Steer(cmd),
                        None => {
                            self.transition(NavigationState::CollectingBall);
                            return Decision::Sequence(self.collect_sequence());
                        }
                    }
                }
                NavigationState::CollectingBall => {
                    if balls.is_empty() {
                        self.transition(NavigationState::MovingToGoal);
                    } else {
                        self.transition(NavigationState::SearchingBall);
                    }
                }
                NavigationState::MovingToGoal => {
                    let (goal, proximity) = (self.params.goal, self.params.goal_proximity);
                    match self.steer(tip, goal, pose.heading_deg, proximity) {
                        Some(cmd) => return Decision::Steer(cmd),
                        None => {
                            self.transition(NavigationState::DroppingBall);
                            return Decision::Sequence(self.drop_sequence());
                        }
                    }
                }
                NavigationState::DroppingBall => {
                    self.transition(NavigationState::SearchingBall);
                }
            }
        }
    }

    /// Current ball target, refreshed from `balls` when one matches. `None`
    /// once the target has been unseen for longer than the grace period.
    fn refresh_target(&mut self, balls: &[Point2<f64>], now: Instant) -> Option<Point2<f64>> {
        let target = self.target?;
        if let Some(ball) = nearest(balls, target)
            .filter(|b| nalgebra::distance(b, &target) <= self.params.target_match_radius)
        {
            self.target = Some(ball);
            self.last_seen = Some(now);
            return Some(ball);
        }

        // negative or NaN periods abandon at once
        let grace = Duration::try_from_secs_f64(self.params.ball_grace_period_s.max(0.0))
            .unwrap_or(Duration::MAX);
        let unseen = self
            .last_seen
            .map_or(Duration::MAX, |seen| now.saturating_duration_since(seen));
        if unseen >= grace {
            log::info!(
                "ball target unseen for {:.1}s, searching again",
                unseen.as_secs_f64()
            );
            None
        } else {
            Some(target)
        }
    }

    /// `None` on arrival.
    fn steer(&mut self, tip: Point2<f64>, target: Point2<f64>, heading: f64, proximity: f64) -> Option<Command> {
        match compute_command(tip, target, heading, proximity, &self.params, &mut self.damper) {
            Steering::Arrived => None,
            Steering::Command(cmd) => {
                log::debug!("{:?}: {cmd}", self.state);
                Some(cmd)
            }
        }
    }

    fn transition(&mut self, next: NavigationState) {
        log::info!("navigation {:?} -> {:?}", self.state, next);
        match next {
            NavigationState::SearchingBall => {
                self.target = None;
                self.last_seen = None;
            }
            NavigationState::MovingToGoal => {
                self.target = None;
            }
            _ => {}
        }
        self.damper.clear();
        self.state = next;
    }
}

fn nearest(points: &[Point2<f64>], from: Point2<f64>) -> Option<Point2<f64>> {
    points.iter().copied().min_by(|a, b| {
        nalgebra::distance_squared(a, &from).total_cmp(&nalgebra::distance_squared(b, &from))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::TurnDirection;
    use crate::steering::TurnRecord;
    use approx::assert_abs_diff_eq;
    use fieldbot_core::Space;

    /// Pose whose tip (60 units ahead) lands on `tip`.
    fn pose_with_tip(tip: (f64, f64), heading_deg: f64) -> Pose {
        let rad = heading_deg.to_radians();
        let position = Point2::new(tip.0 - 60.0 * rad.cos(), tip.1 - 60.0 * rad.sin());
        Pose::new(position, heading_deg, Space::Field)
    }

    fn engine() -> NavigationEngine {
        NavigationEngine::new(NavParams::default())
    }

    fn drive_mm(decision: &Decision) -> f64 {
        match decision {
            Decision::Steer(Command::Drive { mm }) => *mm,
            other => panic!("expected a drive, got {other:?}"),
        }
    }

    #[test]
    fn collects_ball_then_heads_for_goal() {
        let mut nav = engine();
        let t0 = Instant::now();
        let ball = [Point2::new(500.0, 500.0)];

        let first = nav.step(Some(pose_with_tip((500.0, 300.0), 90.0)), &ball, t0);
        assert_eq!(nav.state(), NavigationState::MovingToBall);
        assert_abs_diff_eq!(drive_mm(&first), 125.0, epsilon = 1e-6);

        let arrive = nav.step(
            Some(pose_with_tip((500.0, 430.0), 90.0)),
            &ball,
            t0 + Duration::from_secs(2),
        );
        assert_eq!(nav.state(), NavigationState::CollectingBall);
        assert_eq!(
            arrive,
            Decision::Sequence(vec![
                Command::OpenGate,
                Command::drive(50.0),
                Command::Stop,
                Command::CloseGate,
            ])
        );

        let to_goal = nav.step(
            Some(pose_with_tip((500.0, 430.0), 90.0)),
            &[],
            t0 + Duration::from_secs(3),
        );
        assert_eq!(nav.state(), NavigationState::MovingToGoal);
        assert_eq!(nav.target(), Some(Point2::new(100.0, 600.0)));
        // goal lies down-left of a robot facing +y
        assert_eq!(
            to_goal,
            Decision::Steer(Command::turn(TurnDirection::Right, 30.0))
        );
    }

    #[test]
    fn drops_ball_at_goal_and_searches_again() {
        let mut nav = engine();
        let t0 = Instant::now();
        nav.step(
            Some(pose_with_tip((500.0, 500.0), 90.0)),
            &[Point2::new(500.0, 540.0)],
            t0,
        );
        assert_eq!(nav.state(), NavigationState::CollectingBall);
        nav.step(Some(pose_with_tip((500.0, 500.0), 180.0)), &[], t0);
        assert_eq!(nav.state(), NavigationState::MovingToGoal);

        let drop = nav.step(Some(pose_with_tip((130.0, 600.0), 180.0)), &[], t0);
        assert_eq!(nav.state(), NavigationState::DroppingBall);
        assert_eq!(
            drop.commands(),
            &[
                Command::Stop,
                Command::OpenGate,
                Command::PushOut,
                Command::PushReturn,
                Command::drive(-100.0),
                Command::CloseGate,
            ]
        );

        let next = nav.step(Some(pose_with_tip((130.0, 600.0), 180.0)), &[], t0);
        assert!(next.is_idle());
        assert_eq!(nav.state(), NavigationState::SearchingBall);
    }

    #[test]
    fn collecting_with_balls_left_searches_again() {
        let mut nav = engine();
        let t0 = Instant::now();
        nav.step(
            Some(pose_with_tip((500.0, 500.0), 90.0)),
            &[Point2::new(500.0, 540.0)],
            t0,
        );
        assert_eq!(nav.state(), NavigationState::CollectingBall);

        let other = [Point2::new(900.0, 500.0)];
        let decision = nav.step(Some(pose_with_tip((500.0, 500.0), 0.0)), &other, t0);
        assert_eq!(nav.state(), NavigationState::MovingToBall);
        assert_eq!(nav.target(), Some(other[0]));
        assert_abs_diff_eq!(drive_mm(&decision), 200.0, epsilon = 1e-6);
    }

    #[test]
    fn missing_pose_changes_nothing() {
        let mut nav = engine();
        let t0 = Instant::now();
        let decision = nav.step(None, &[Point2::new(10.0, 10.0)], t0);
        assert!(decision.is_idle());
        assert_eq!(nav.state(), NavigationState::SearchingBall);
        assert_eq!(nav.target(), None);

        assert!(nav.step(Some(pose_with_tip((0.0, 0.0), 0.0)), &[], t0).is_idle());
        assert_eq!(nav.state(), NavigationState::SearchingBall);
    }

    #[test]
    fn picks_ball_nearest_to_tip() {
        let mut nav = engine();
        let balls = [
            Point2::new(1500.0, 900.0),
            Point2::new(700.0, 300.0),
            Point2::new(100.0, 100.0),
        ];
        nav.step(Some(pose_with_tip((600.0, 300.0), 0.0)), &balls, Instant::now());
        assert_eq!(nav.target(), Some(Point2::new(700.0, 300.0)));
    }

    #[test]
    fn moving_target_is_followed() {
        let mut nav = engine();
        let t0 = Instant::now();
        let pose = pose_with_tip((0.0, 0.0), 0.0);
        nav.step(Some(pose), &[Point2::new(1000.0, 0.0)], t0);
        nav.step(Some(pose), &[Point2::new(1012.0, 9.0)], t0);
        assert_eq!(nav.target(), Some(Point2::new(1012.0, 9.0)));
        // a far detection is a different ball and does not replace the target
        nav.step(Some(pose), &[Point2::new(1200.0, 0.0)], t0);
        assert_eq!(nav.target(), Some(Point2::new(1012.0, 9.0)));
    }

    #[test]
    fn lost_ball_is_pursued_for_grace_period() {
        let mut nav = engine();
        let t0 = Instant::now();
        let pose = pose_with_tip((0.0, 0.0), 0.0);
        nav.step(Some(pose), &[Point2::new(1000.0, 0.0)], t0);
        assert_eq!(nav.state(), NavigationState::MovingToBall);

        let during = nav.step(Some(pose), &[], t0 + Duration::from_millis(14_900));
        assert_eq!(nav.state(), NavigationState::MovingToBall);
        assert_abs_diff_eq!(drive_mm(&during), 200.0, epsilon = 1e-6);

        let after = nav.step(Some(pose), &[], t0 + Duration::from_secs(15));
        assert!(after.is_idle());
        assert_eq!(nav.state(), NavigationState::SearchingBall);
        assert_eq!(nav.target(), None);
    }

    #[test]
    fn expired_target_switches_to_visible_ball() {
        let mut nav = engine();
        let t0 = Instant::now();
        let pose = pose_with_tip((0.0, 0.0), 0.0);
        nav.step(Some(pose), &[Point2::new(1000.0, 0.0)], t0);

        let other = Point2::new(0.0, 800.0);
        let decision = nav.step(Some(pose), &[other], t0 + Duration::from_secs(20));
        assert_eq!(nav.state(), NavigationState::MovingToBall);
        assert_eq!(nav.target(), Some(other));
        assert_eq!(
            decision,
            Decision::Steer(Command::turn(TurnDirection::Right, 30.0))
        );
    }

    fn turns(nav: &NavigationEngine) -> Vec<TurnRecord> {
        nav.damper().history().copied().collect()
    }

    #[test]
    fn turn_history_restarts_with_each_target() {
        let mut nav = engine();
        let t0 = Instant::now();
        let pose = pose_with_tip((0.0, 0.0), 0.0);

        nav.step(Some(pose), &[Point2::new(0.0, 1000.0)], t0);
        assert_eq!(
            turns(&nav),
            vec![TurnRecord {
                direction: TurnDirection::Right,
                degrees: 30.0
            }]
        );

        assert!(nav.step(Some(pose), &[], t0 + Duration::from_secs(16)).is_idle());
        assert_eq!(nav.state(), NavigationState::SearchingBall);
        assert!(turns(&nav).is_empty());

        let decision = nav.step(
            Some(pose),
            &[Point2::new(0.0, -800.0)],
            t0 + Duration::from_secs(17),
        );
        assert_eq!(
            decision,
            Decision::Steer(Command::turn(TurnDirection::Left, 30.0))
        );
        assert_eq!(
            turns(&nav),
            vec![TurnRecord {
                direction: TurnDirection::Left,
                degrees: 30.0
            }]
        );
    }

    #[test]
    fn collection_clears_turn_history() {
        let mut nav = engine();
        let t0 = Instant::now();
        let ball = [Point2::new(0.0, 1000.0)];

        nav.step(Some(pose_with_tip((0.0, 0.0), 0.0)), &ball, t0);
        assert_eq!(turns(&nav).len(), 1);

        let arrive = nav.step(Some(pose_with_tip((0.0, 950.0), 90.0)), &ball, t0);
        assert_eq!(nav.state(), NavigationState::CollectingBall);
        assert_eq!(arrive.commands().len(), 4);
        assert!(turns(&nav).is_empty());
    }

    #[test]
    fn invalid_grace_period_abandons_unseen_target() {
        for grace in [-1.0, f64::NAN] {
            let mut nav = NavigationEngine::new(NavParams {
                ball_grace_period_s: grace,
                ..NavParams::default()
            });
            let t0 = Instant::now();
            let pose = pose_with_tip((0.0, 0.0), 0.0);
            nav.step(Some(pose), &[Point2::new(1000.0, 0.0)], t0);
            assert_eq!(nav.state(), NavigationState::MovingToBall);

            assert!(nav.step(Some(pose), &[], t0).is_idle());
            assert_eq!(nav.state(), NavigationState::SearchingBall);
        }
    }
}
