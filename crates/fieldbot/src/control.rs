//! Frame-driven control loop: tracker, field mapping, navigation, dispatch.

use std::path::Path;
use std::time::Instant;

use fieldbot_core::{FieldMapper, Homography, HomographyError, Pose, RgbImageView};
use fieldbot_nav::{Command, Decision, NavigationEngine, NavigationState};
use fieldbot_tracker::{ColorCalibration, MarkerPair, PoseTracker};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::config::{ConfigError, FieldbotConfig};
use crate::transport::{CommandTransport, Reply};

/// Errors that prevent the control loop from starting.
#[derive(thiserror::Error, Debug)]
pub enum ControlError {
    #[error("invalid field calibration: {0}")]
    Homography(#[from] HomographyError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Ball bounding box from the external detector, pixel units.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BallDetection {
    /// Box centre.
    pub x: f64,
    pub y: f64,
    pub confidence: f64,
    pub width: f64,
    pub height: f64,
}

impl BallDetection {
    pub fn center(&self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }
}

/// Drops weak or implausibly sized detections before they reach navigation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionFilter {
    pub min_confidence: f64,
    /// Smallest accepted box side, px.
    pub min_size: f64,
    /// Largest accepted box side, px.
    pub max_size: f64,
}

impl Default for DetectionFilter {
    fn default() -> Self {
        Self {
            min_confidence: 0.2,
            min_size: 10.0,
            max_size: 200.0,
        }
    }
}

impl DetectionFilter {
    pub fn accepts(&self, d: &BallDetection) -> bool {
        let size_ok = |s: f64| (self.min_size..=self.max_size).contains(&s);
        d.confidence >= self.min_confidence && size_ok(d.width) && size_ok(d.height)
    }

    /// Pixel centres of the accepted detections.
    pub fn centers(&self, detections: &[BallDetection]) -> Vec<Point2<f64>> {
        detections
            .iter()
            .filter(|d| self.accepts(d))
            .map(BallDetection::center)
            .collect()
    }
}

/// What happened during one [`ControlLoop::process_frame`] call.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameReport {
    pub pair: Option<MarkerPair>,
    pub field_pose: Option<Pose>,
    /// True once the pose has been seen on enough consecutive frames.
    pub pose_stable: bool,
    pub balls: Vec<Point2<f64>>,
    pub state: NavigationState,
    pub dispatched: Vec<(Command, Reply)>,
}

pub struct ControlLoop<T> {
    tracker: PoseTracker,
    mapper: FieldMapper,
    engine: NavigationEngine,
    transport: T,
    filter: DetectionFilter,
    pose_stable_frames: u32,
    stable_count: u32,
}

impl<T: CommandTransport> ControlLoop<T> {
    /// Build the loop from a config, loading the homography and the colour
    /// calibration it names. A singular homography is rejected here.
    pub fn from_config(config: &FieldbotConfig, transport: T) -> Result<Self, ControlError> {
        let homography = Homography::load(&config.homography_path)?;
        Self::with_homography(config, homography, transport)
    }

    /// Load a JSON config file and build the loop from it.
    pub fn from_config_path(path: impl AsRef<Path>, transport: T) -> Result<Self, ControlError> {
        let config = FieldbotConfig::load_json(path)?;
        Self::from_config(&config, transport)
    }

    pub fn with_homography(
        config: &FieldbotConfig,
        homography: Homography,
        transport: T,
    ) -> Result<Self, ControlError> {
        let mapper = FieldMapper::new(homography)?;
        let colors = ColorCalibration::load_or_default(config.colors_path.as_deref());
        Ok(Self {
            tracker: PoseTracker::new(config.tracker.clone(), colors),
            mapper,
            engine: NavigationEngine::new(config.navigation.clone()),
            transport,
            filter: config.detections.clone(),
            pose_stable_frames: config.pose_stable_frames,
            stable_count: 0,
        })
    }

    pub fn tracker(&self) -> &PoseTracker {
        &self.tracker
    }

    pub fn mapper(&self) -> &FieldMapper {
        &self.mapper
    }

    pub fn engine(&self) -> &NavigationEngine {
        &self.engine
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Run one frame through the pipeline and dispatch whatever navigation
    /// decides, waiting for each reply in turn.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(width = frame.width, height = frame.height))
    )]
    pub fn process_frame(
        &mut self,
        frame: &RgbImageView<'_>,
        detections: &[BallDetection],
        now: Instant,
    ) -> FrameReport {
        let pair = self.tracker.update_pair(frame);
        let field_pose = pair.map(|p| self.mapper.map_pose(p.front, p.back));

        self.stable_count = match field_pose {
            Some(_) => self.stable_count.saturating_add(1),
            None => 0,
        };
        let pose_stable = field_pose.is_some() && self.stable_count >= self.pose_stable_frames;

        let balls = self.mapper.map_to_field(&self.filter.centers(detections));
        let decision = self
            .engine
            .step(field_pose.filter(|_| pose_stable), &balls, now);

        let dispatched = self.dispatch(&decision);
        FrameReport {
            pair,
            field_pose,
            pose_stable,
            balls,
            state: self.engine.state(),
            dispatched,
        }
    }

    fn dispatch(&mut self, decision: &Decision) -> Vec<(Command, Reply)> {
        decision
            .commands()
            .iter()
            .map(|&cmd| {
                let reply = self.transport.send(&cmd);
                match &reply {
                    Reply::Ok(text) => log::debug!("{cmd} -> {text}"),
                    Reply::Error(text) => log::warn!("{cmd} failed: {text}"),
                    Reply::Timeout => log::warn!("{cmd} timed out"),
                }
                (cmd, reply)
            })
            .collect()
    }
}
