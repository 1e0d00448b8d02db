//! Facade crate for the `fieldbot-*` workspace.
//!
//! This crate provides:
//! - re-exports of the geometry, tracking and navigation crates
//! - the JSON configuration ([`FieldbotConfig`])
//! - the command transport ([`CommandTransport`], [`TcpTransport`])
//! - the frame-driven [`ControlLoop`] that ties them together
//!
//! ## Quickstart
//!
//! ```no_run
//! use std::time::Instant;
//!
//! use fieldbot::{rgb_view, ControlLoop, FieldbotConfig, TcpTransport};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = FieldbotConfig::load_json("fieldbot.json")?;
//! let transport = TcpTransport::new(config.transport.clone());
//! let mut control = ControlLoop::from_config(&config, transport)?;
//!
//! let frame = image::open("frame.png")?.to_rgb8();
//! let report = control.process_frame(&rgb_view(&frame), &[], Instant::now());
//! println!("{:?} -> {:?}", report.field_pose, report.state);
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `fieldbot::core`: homography, poses, RGB image views, logger.
//! - `fieldbot::tracker`: marker segmentation and the pose tracker.
//! - `fieldbot::nav`: commands, steering, the navigation state machine.

pub use fieldbot_core as core;
pub use fieldbot_nav as nav;
pub use fieldbot_tracker as tracker;

pub use fieldbot_core::{FieldMapper, Homography, Pose, Space};
pub use fieldbot_nav::{Command, NavParams, NavigationEngine, NavigationState};
pub use fieldbot_tracker::{ColorCalibration, MarkerPair, PoseTracker, TrackerParams};

mod config;
mod control;
mod transport;

pub use config::{ConfigError, FieldbotConfig};
pub use control::{BallDetection, ControlError, ControlLoop, DetectionFilter, FrameReport};
pub use transport::{CommandTransport, Reply, TcpTransport, TransportConfig};

/// Borrow an `image::RgbImage` as the lightweight `fieldbot-core` view type.
pub fn rgb_view(img: &::image::RgbImage) -> fieldbot_core::RgbImageView<'_> {
    fieldbot_core::RgbImageView {
        width: img.width() as usize,
        height: img.height() as usize,
        data: img.as_raw(),
    }
}
