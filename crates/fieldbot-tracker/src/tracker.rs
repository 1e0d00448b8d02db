//! Frame-to-frame robot pose tracking from the two marker classes.

use fieldbot_core::{PixelRect, Pose, RgbImageView, Space};
use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::color::ColorCalibration;
use crate::lighting::{equalize_contrast, gray_world, ClaheParams};
use crate::segment::{segment_markers, MarkerCandidate, SegmenterParams};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerParams {
    /// Half-size of the square search window around the last centroid, px.
    pub roi_radius: usize,
    /// Consecutive misses tolerated before the state is dropped.
    pub reset_after_misses: u32,
    /// Accepted pair distance as a multiple of the expected separation.
    pub separation_band: [f64; 2],
    /// Expected separation before the first fix, as a fraction of frame width.
    pub bootstrap_separation_frac: f64,
    /// EMA weight of the newest separation sample.
    pub separation_smoothing: f64,
    /// Apply gray-world colour constancy to the search window.
    pub normalize_lighting: bool,
    /// Apply CLAHE on lightness after the colour correction.
    pub equalize_contrast: bool,
    pub contrast: ClaheParams,
    pub segmenter: SegmenterParams,
}

impl Default for TrackerParams {
    fn default() -> Self {
        Self {
            roi_radius: 100,
            reset_after_misses: 15,
            separation_band: [0.5, 1.5],
            bootstrap_separation_frac: 0.125,
            separation_smoothing: 0.2,
            normalize_lighting: true,
            equalize_contrast: false,
            contrast: ClaheParams::default(),
            segmenter: SegmenterParams::default(),
        }
    }
}

/// Memory carried between frames.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackerState {
    pub last_centroid: Option<Point2<f64>>,
    pub expected_separation: Option<f64>,
    pub miss_count: u32,
}

/// Front/back marker pair chosen for a frame, in full-frame pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkerPair {
    pub front: Point2<f64>,
    pub back: Point2<f64>,
    pub separation: f64,
}

impl MarkerPair {
    pub fn pose(&self) -> Pose {
        Pose::from_markers(self.front, self.back, Space::Pixel)
    }

    pub fn centroid(&self) -> Point2<f64> {
        nalgebra::center(&self.front, &self.back)
    }

    pub fn translated(&self, offset: Vector2<f64>) -> Self {
        Self {
            front: self.front + offset,
            back: self.back + offset,
            separation: self.separation,
        }
    }
}

/// Pick the (front, back) pair whose distance is closest to `expected`,
/// considering only distances within `band * expected`.
pub fn select_pair(
    fronts: &[MarkerCandidate],
    backs: &[MarkerCandidate],
    expected: f64,
    band: [f64; 2],
) -> Option<MarkerPair> {
    let (lo, hi) = (band[0] * expected, band[1] * expected);
    let mut best: Option<(f64, MarkerPair)> = None;
    for f in fronts {
        for b in backs {
            let d = nalgebra::distance(&f.centroid, &b.centroid);
            if d < lo || d > hi {
                continue;
            }
            let err = (d - expected).abs();
            if best.as_ref().is_none_or(|(e, _)| err < *e) {
                best = Some((
                    err,
                    MarkerPair {
                        front: f.centroid,
                        back: b.centroid,
                        separation: d,
                    },
                ));
            }
        }
    }
    best.map(|(_, pair)| pair)
}

/// Stateful two-marker tracker. One instance per camera stream.
#[derive(Clone, Debug)]
pub struct PoseTracker {
    params: TrackerParams,
    colors: ColorCalibration,
    state: TrackerState,
    last_pair: Option<MarkerPair>,
}

impl PoseTracker {
    pub fn new(params: TrackerParams, colors: ColorCalibration) -> Self {
        Self {
            params,
            colors,
            state: TrackerState::default(),
            last_pair: None,
        }
    }

    pub fn params(&self) -> &TrackerParams {
        &self.params
    }

    pub fn colors(&self) -> &ColorCalibration {
        &self.colors
    }

    pub fn state(&self) -> &TrackerState {
        &self.state
    }

    /// Pair found by the most recent `update`, `None` after a miss.
    pub fn last_pair(&self) -> Option<&MarkerPair> {
        self.last_pair.as_ref()
    }

    pub fn reset(&mut self) {
        self.state = TrackerState::default();
        self.last_pair = None;
    }

    /// Track one frame and return the pixel-space pose.
    pub fn update(&mut self, frame: &RgbImageView<'_>) -> Option<Pose> {
        self.update_pair(frame).map(|pair| pair.pose())
    }

    /// Track one frame and return the selected marker pair.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(misses = self.state.miss_count))
    )]
    pub fn update_pair(&mut self, frame: &RgbImageView<'_>) -> Option<MarkerPair> {
        let roi = match self.state.last_centroid {
            Some(c) => PixelRect::square_around(c, self.params.roi_radius, frame.width, frame.height),
            None => frame.bounds(),
        };

        let mut window = frame.crop(roi);
        if self.params.normalize_lighting {
            gray_world(&mut window);
        }
        if self.params.equalize_contrast {
            equalize_contrast(&mut window, &self.params.contrast);
        }
        let (fronts, backs) = segment_markers(&window.view(), &self.colors, &self.params.segmenter);
        log::debug!(
            "roi {}x{}+{}+{}: {} front, {} back candidates",
            roi.width,
            roi.height,
            roi.x,
            roi.y,
            fronts.len(),
            backs.len()
        );

        let expected = self
            .state
            .expected_separation
            .unwrap_or(frame.width as f64 * self.params.bootstrap_separation_frac);

        let Some(pair) = select_pair(&fronts, &backs, expected, self.params.separation_band) else {
            self.miss();
            return None;
        };
        let pair = pair.translated(roi.offset());

        let alpha = self.params.separation_smoothing;
        self.state = TrackerState {
            last_centroid: Some(pair.centroid()),
            expected_separation: Some(match self.state.expected_separation {
                Some(prev) => (1.0 - alpha) * prev + alpha * pair.separation,
                None => pair.separation,
            }),
            miss_count: 0,
        };
        self.last_pair = Some(pair);
        Some(pair)
    }

    fn miss(&mut self) {
        self.last_pair = None;
        self.state.miss_count += 1;
        if self.state.miss_count > self.params.reset_after_misses {
            log::info!(
                "markers lost for {} frames, resetting tracker",
                self.state.miss_count
            );
            self.state = TrackerState::default();
        }
    }
}
