//! Overhead-camera robot tracking from two coloured markers.
//!
//! The robot carries a pink marker at the front and a purple one at the
//! back. [`segment_markers`] finds candidate blobs of each class in a frame,
//! [`PoseTracker`] pairs them frame after frame and reports a pixel-space
//! [`fieldbot_core::Pose`].
//!
//! ```no_run
//! use fieldbot_core::RgbImage;
//! use fieldbot_tracker::{ColorCalibration, PoseTracker, TrackerParams};
//!
//! let frame = RgbImage::filled(640, 480, [0, 0, 0]);
//! let mut tracker = PoseTracker::new(TrackerParams::default(), ColorCalibration::default());
//! if let Some(pose) = tracker.update(&frame.view()) {
//!     println!("robot at {:?}, heading {:.1}", pose.position, pose.heading_deg);
//! }
//! ```

mod color;
mod lighting;
mod overlay;
mod segment;
mod tracker;

pub use color::{any_contains, rgb_to_hsv, ColorCalibration, ColorCalibrationError, HsvRange};
pub use lighting::{clahe, equalize_contrast, gray_world, ClaheParams};
pub use overlay::draw_overlay;
pub use segment::{
    segment, segment_hsv, segment_markers, ContourMoments, HsvFrame, MarkerCandidate, MarkerClass,
    SegmenterParams,
};
pub use tracker::{select_pair, MarkerPair, PoseTracker, TrackerParams, TrackerState};
