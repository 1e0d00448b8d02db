//! Colour-threshold marker segmentation.
//!
//! Pipeline per marker class: RGB -> HSV, union of range masks, morphological
//! opening, outer contours, area / circularity gate, centroid from contour
//! moments.

use fieldbot_core::RgbImageView;
use image::GrayImage;
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::distance_transform::Norm;
use imageproc::point::Point;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::color::{any_contains, rgb_to_hsv, ColorCalibration, HsvRange};

/// Which robot marker a blob belongs to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerClass {
    Front,
    Back,
}

/// Blob that passed the shape gate, in the coordinates of the segmented image.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkerCandidate {
    pub centroid: Point2<f64>,
    pub area: f64,
    pub class: MarkerClass,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterParams {
    /// Smallest accepted contour area, px².
    pub min_area: f64,
    /// Largest accepted contour area, px².
    pub max_area: f64,
    /// Minimum `4πA/P²`.
    pub min_circularity: f64,
    /// L1 radius of the opening kernel; 0 disables the opening.
    pub opening_radius: u8,
}

impl Default for SegmenterParams {
    fn default() -> Self {
        Self {
            min_area: 40.0,
            max_area: 3000.0,
            min_circularity: 0.40,
            opening_radius: 2,
        }
    }
}

/// Frame converted to HSV once, shared by both marker classes.
pub struct HsvFrame {
    width: u32,
    height: u32,
    data: Vec<[u8; 3]>,
}

impl HsvFrame {
    pub fn from_rgb(frame: &RgbImageView<'_>) -> Self {
        let data = frame
            .data
            .chunks_exact(3)
            .map(|px| rgb_to_hsv([px[0], px[1], px[2]]))
            .collect();
        Self {
            width: frame.width as u32,
            height: frame.height as u32,
            data,
        }
    }

    /// Binary mask (255 = inside any range).
    pub fn mask(&self, ranges: &[HsvRange]) -> GrayImage {
        let raw = self
            .data
            .iter()
            .map(|&hsv| if any_contains(ranges, hsv) { 255 } else { 0 })
            .collect();
        GrayImage::from_raw(self.width, self.height, raw)
            .unwrap_or_else(|| GrayImage::new(self.width, self.height))
    }
}

/// Segment one marker class.
pub fn segment(
    frame: &RgbImageView<'_>,
    ranges: &[HsvRange],
    class: MarkerClass,
    params: &SegmenterParams,
) -> Vec<MarkerCandidate> {
    let hsv = HsvFrame::from_rgb(frame);
    segment_hsv(&hsv, ranges, class, params)
}

/// Segment both classes, converting the frame to HSV only once.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip_all, fields(width = frame.width, height = frame.height))
)]
pub fn segment_markers(
    frame: &RgbImageView<'_>,
    colors: &ColorCalibration,
    params: &SegmenterParams,
) -> (Vec<MarkerCandidate>, Vec<MarkerCandidate>) {
    let hsv = HsvFrame::from_rgb(frame);
    (
        segment_hsv(&hsv, &colors.front, MarkerClass::Front, params),
        segment_hsv(&hsv, &colors.back, MarkerClass::Back, params),
    )
}

pub fn segment_hsv(
    hsv: &HsvFrame,
    ranges: &[HsvRange],
    class: MarkerClass,
    params: &SegmenterParams,
) -> Vec<MarkerCandidate> {
    if hsv.width == 0 || hsv.height == 0 {
        return Vec::new();
    }
    let mut mask = hsv.mask(ranges);
    if params.opening_radius > 0 {
        mask = imageproc::morphology::open(&mask, Norm::L1, params.opening_radius);
    }
    find_contours::<i32>(&mask)
        .iter()
        .filter(|c| is_external(c))
        .filter_map(|c| accept_contour(&c.points, class, params))
        .collect()
}

fn is_external(contour: &Contour<i32>) -> bool {
    matches!(contour.border_type, BorderType::Outer) && contour.parent.is_none()
}

fn accept_contour(
    points: &[Point<i32>],
    class: MarkerClass,
    params: &SegmenterParams,
) -> Option<MarkerCandidate> {
    let m = ContourMoments::of(points);
    if m.m00 == 0.0 {
        return None;
    }
    let area = m.m00.abs();
    if area < params.min_area || area > params.max_area {
        return None;
    }
    let perimeter = imageproc::geometry::arc_length(points, true);
    if perimeter <= 0.0 {
        return None;
    }
    let circularity = 4.0 * std::f64::consts::PI * area / (perimeter * perimeter);
    if circularity < params.min_circularity {
        return None;
    }
    Some(MarkerCandidate {
        centroid: m.centroid(),
        area,
        class,
    })
}

/// Spatial moments of the polygon traced by a closed contour (Green's
/// theorem). `m00` is the signed polygon area, so a contour collapsed onto a
/// line or a single pixel has `m00 == 0`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ContourMoments {
    pub m00: f64,
    pub m10: f64,
    pub m01: f64,
}

impl ContourMoments {
    pub fn of(points: &[Point<i32>]) -> Self {
        let n = points.len();
        if n < 3 {
            return Self::default();
        }
        let mut m = Self::default();
        for i in 0..n {
            let p = points[i];
            let q = points[(i + 1) % n];
            let (x0, y0, x1, y1) = (p.x as f64, p.y as f64, q.x as f64, q.y as f64);
            let cross = x0 * y1 - x1 * y0;
            m.m00 += cross;
            m.m10 += (x0 + x1) * cross;
            m.m01 += (y0 + y1) * cross;
        }
        m.m00 /= 2.0;
        m.m10 /= 6.0;
        m.m01 /= 6.0;
        m
    }

    /// Caller must have checked `m00 != 0`.
    pub fn centroid(&self) -> Point2<f64> {
        Point2::new(self.m10 / self.m00, self.m01 / self.m00)
    }
}
