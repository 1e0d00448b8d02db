use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};

/// Coordinate system a [`Pose`] is expressed in.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Space {
    /// Image coordinates: origin top-left, y grows downward.
    Pixel,
    /// Rectified playing-field coordinates produced by the homography.
    Field,
}

/// Planar robot pose.
///
/// `heading_deg` is 0 along the positive x axis of `space` and grows
/// clockwise, because y points down both in the image and in the rectified
/// field.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Point2<f64>,
    pub heading_deg: f64,
    pub space: Space,
}

impl Pose {
    pub fn new(position: Point2<f64>, heading_deg: f64, space: Space) -> Self {
        Self {
            position,
            heading_deg,
            space,
        }
    }

    /// Pose defined by a front and a back marker: midpoint plus the
    /// back-to-front direction.
    pub fn from_markers(front: Point2<f64>, back: Point2<f64>, space: Space) -> Self {
        Self {
            position: nalgebra::center(&front, &back),
            heading_deg: heading_deg(front, back),
            space,
        }
    }

    /// Point `offset` units ahead of the position along the heading.
    pub fn point_ahead(&self, offset: f64) -> Point2<f64> {
        let rad = self.heading_deg.to_radians();
        self.position + Vector2::new(rad.cos(), rad.sin()) * offset
    }
}

/// Direction from `back` to `front` in degrees, `atan2(dy, dx)`.
#[inline]
pub fn heading_deg(front: Point2<f64>, back: Point2<f64>) -> f64 {
    (front.y - back.y).atan2(front.x - back.x).to_degrees()
}

/// Wrap an angle in degrees into `(-180, 180]`.
pub fn normalize_angle_deg(angle: f64) -> f64 {
    let wrapped = angle % 360.0;
    if wrapped > 180.0 {
        wrapped - 360.0
    } else if wrapped <= -180.0 {
        wrapped + 360.0
    } else {
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64, tol: f64) {
        assert!((a - b).abs() < tol, "expected {b:.6}, got {a:.6}");
    }

    #[test]
    fn heading_follows_image_axes() {
        let east = heading_deg(Point2::new(120.0, 80.0), Point2::new(100.0, 80.0));
        assert_close(east, 0.0, 1e-9);

        let up = heading_deg(Point2::new(100.0, 60.0), Point2::new(100.0, 80.0));
        assert_close(up, -90.0, 1e-9);

        let down = heading_deg(Point2::new(100.0, 100.0), Point2::new(100.0, 80.0));
        assert_close(down, 90.0, 1e-9);
    }

    #[test]
    fn normalize_maps_into_half_open_range() {
        assert_close(normalize_angle_deg(0.0), 0.0, 1e-12);
        assert_close(normalize_angle_deg(180.0), 180.0, 1e-12);
        assert_close(normalize_angle_deg(-180.0), 180.0, 1e-12);
        assert_close(normalize_angle_deg(190.0), -170.0, 1e-12);
        assert_close(normalize_angle_deg(-190.0), 170.0, 1e-12);
        assert_close(normalize_angle_deg(725.0), 5.0, 1e-9);
        assert_close(normalize_angle_deg(-540.0), 180.0, 1e-9);
    }

    #[test]
    fn pose_from_markers_uses_midpoint() {
        let pose = Pose::from_markers(
            Point2::new(120.0, 80.0),
            Point2::new(100.0, 80.0),
            Space::Pixel,
        );
        assert_close(pose.position.x, 110.0, 1e-12);
        assert_close(pose.position.y, 80.0, 1e-12);
        assert_close(pose.heading_deg, 0.0, 1e-12);
    }

    #[test]
    fn point_ahead_moves_along_heading() {
        let pose = Pose::new(Point2::new(500.0, 240.0), 90.0, Space::Field);
        let tip = pose.point_ahead(60.0);
        assert_close(tip.x, 500.0, 1e-9);
        assert_close(tip.y, 300.0, 1e-9);
    }
}
