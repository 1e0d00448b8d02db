//! Core geometry for the fieldbot workspace.
//!
//! This crate holds no vision or robot logic. It holds the
//! pixel-to-field homography, planar pose helpers, a light RGB image view and
//! the logger used by the binaries. Tracking lives in `fieldbot-tracker`,
//! decision making in `fieldbot-nav`.

mod geometry;
mod homography;
mod image;
mod logger;

pub use geometry::{heading_deg, normalize_angle_deg, Pose, Space};
pub use homography::{
    estimate_homography, homography_from_4pt, FieldMapper, Homography, HomographyError,
    DEFAULT_FIELD_HEIGHT, DEFAULT_FIELD_WIDTH,
};
pub use image::{PixelRect, RgbImage, RgbImageView};

#[cfg(feature = "tracing")]
pub use logger::{init_tracing, TraceFormat};

pub use logger::{init_from_env, init_with_level, LOG_ENV};
