use std::fs;
use std::path::Path;

use nalgebra::{DMatrix, Matrix3, Point2, SMatrix, SVector, Vector3};
use serde::{Deserialize, Serialize};

use crate::geometry::{Pose, Space};

/// Width of the rectified field in field units.
pub const DEFAULT_FIELD_WIDTH: f64 = 1800.0;
/// Height of the rectified field in field units.
pub const DEFAULT_FIELD_HEIGHT: f64 = 1200.0;

/// Errors produced while loading or validating a homography.
#[derive(thiserror::Error, Debug)]
pub enum HomographyError {
    #[error("homography matrix is singular")]
    SingularMatrix,
    #[error("homography contains non-finite entries")]
    NonFinite,
    #[error("expected 9 homography entries, found {found}")]
    Shape { found: usize },
    #[error("invalid homography entry {token:?}")]
    Parse { token: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// 3x3 projective transform, `dst ~ H * src`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "[[f64; 3]; 3]", into = "[[f64; 3]; 3]")]
pub struct Homography {
    pub h: Matrix3<f64>,
}

impl Homography {
    pub fn new(h: Matrix3<f64>) -> Self {
        Self { h }
    }

    pub fn identity() -> Self {
        Self::new(Matrix3::identity())
    }

    pub fn from_array(rows: [[f64; 3]; 3]) -> Self {
        Self::new(Matrix3::from_fn(|r, c| rows[r][c]))
    }

    pub fn to_array(&self) -> [[f64; 3]; 3] {
        let mut rows = [[0.0; 3]; 3];
        for (r, row) in rows.iter_mut().enumerate() {
            for (c, v) in row.iter_mut().enumerate() {
                *v = self.h[(r, c)];
            }
        }
        rows
    }

    /// Apply with homogeneous divide. Points on the line at infinity map to
    /// non-finite coordinates.
    #[inline]
    pub fn apply(&self, p: Point2<f64>) -> Point2<f64> {
        let v = self.h * Vector3::new(p.x, p.y, 1.0);
        Point2::new(v[0] / v[2], v[1] / v[2])
    }

    pub fn apply_all(&self, pts: &[Point2<f64>]) -> Vec<Point2<f64>> {
        pts.iter().map(|&p| self.apply(p)).collect()
    }

    /// Matrix inverse, rejecting singular and non-finite matrices.
    pub fn inverse(&self) -> Result<Self, HomographyError> {
        if self.h.iter().any(|v| !v.is_finite()) {
            return Err(HomographyError::NonFinite);
        }
        let scale = self.h.amax();
        if scale == 0.0 {
            return Err(HomographyError::SingularMatrix);
        }
        // scale-free determinant so that the threshold does not depend on units
        if (self.h / scale).determinant().abs() < 1e-12 {
            return Err(HomographyError::SingularMatrix);
        }
        self.h
            .try_inverse()
            .map(Self::new)
            .ok_or(HomographyError::SingularMatrix)
    }

    /// Solve the homography that maps the four pixel corners of the field
    /// (TL, TR, BR, BL) onto the rectangle `(0,0)..(width,height)`.
    pub fn from_field_corners(
        pixel_corners: &[Point2<f64>; 4],
        width: f64,
        height: f64,
    ) -> Option<Self> {
        let field = [
            Point2::new(0.0, 0.0),
            Point2::new(width, 0.0),
            Point2::new(width, height),
            Point2::new(0.0, height),
        ];
        homography_from_4pt(pixel_corners, &field)
    }

    /// Load a homography. `.json` files hold a nested `[[f64; 3]; 3]`; any
    /// other extension is read as nine whitespace or comma separated numbers
    /// in row-major order.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, HomographyError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)?;
        let h = if is_json(path) {
            serde_json::from_str::<Homography>(&raw)?
        } else {
            parse_text(&raw)?
        };
        if h.h.iter().any(|v| !v.is_finite()) {
            return Err(HomographyError::NonFinite);
        }
        log::debug!("loaded homography from {}", path.display());
        Ok(h)
    }

    /// Save in the format selected by the file extension, see [`Homography::load`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), HomographyError> {
        let path = path.as_ref();
        let out = if is_json(path) {
            serde_json::to_string_pretty(self)?
        } else {
            self.to_array()
                .iter()
                .map(|row| format!("{:.10} {:.10} {:.10}", row[0], row[1], row[2]))
                .collect::<Vec<_>>()
                .join("\n")
        };
        fs::write(path, out)?;
        Ok(())
    }
}

impl From<[[f64; 3]; 3]> for Homography {
    fn from(rows: [[f64; 3]; 3]) -> Self {
        Self::from_array(rows)
    }
}

impl From<Homography> for [[f64; 3]; 3] {
    fn from(h: Homography) -> Self {
        h.to_array()
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

fn parse_text(raw: &str) -> Result<Homography, HomographyError> {
    let values = raw
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .map(|t| {
            t.parse::<f64>().map_err(|_| HomographyError::Parse {
                token: t.to_string(),
            })
        })
        .collect::<Result<Vec<f64>, _>>()?;
    if values.len() != 9 {
        return Err(HomographyError::Shape {
            found: values.len(),
        });
    }
    Ok(Homography::new(Matrix3::from_row_slice(&values)))
}

/// Pixel-to-field mapping for one session.
///
/// Construction validates that the calibration is invertible, so a
/// degenerate matrix is reported once at startup instead of on every frame.
#[derive(Clone, Copy, Debug)]
pub struct FieldMapper {
    field_from_pixel: Homography,
    pixel_from_field: Homography,
}

impl FieldMapper {
    pub fn new(field_from_pixel: Homography) -> Result<Self, HomographyError> {
        let pixel_from_field = field_from_pixel.inverse()?;
        Ok(Self {
            field_from_pixel,
            pixel_from_field,
        })
    }

    pub fn homography(&self) -> &Homography {
        &self.field_from_pixel
    }

    #[inline]
    pub fn to_field(&self, p: Point2<f64>) -> Point2<f64> {
        self.field_from_pixel.apply(p)
    }

    #[inline]
    pub fn to_pixel(&self, p: Point2<f64>) -> Point2<f64> {
        self.pixel_from_field.apply(p)
    }

    /// Map pixel points into field space. Empty in, empty out.
    pub fn map_to_field(&self, pts: &[Point2<f64>]) -> Vec<Point2<f64>> {
        self.field_from_pixel.apply_all(pts)
    }

    /// Inverse of [`FieldMapper::map_to_field`].
    pub fn map_to_pixel(&self, pts: &[Point2<f64>]) -> Vec<Point2<f64>> {
        self.pixel_from_field.apply_all(pts)
    }

    /// Field-space pose from the two pixel-space markers.
    ///
    /// Both markers are mapped before the heading is taken, since the
    /// projective warp does not preserve angles.
    pub fn map_pose(&self, front: Point2<f64>, back: Point2<f64>) -> Pose {
        Pose::from_markers(self.to_field(front), self.to_field(back), Space::Field)
    }
}

fn hartley_normalization(cx: f64, cy: f64, mean_dist: f64) -> Matrix3<f64> {
    let s = if mean_dist > 1e-12 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };
    Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0)
}

// translate to the centroid, scale so the mean distance is sqrt(2)
fn normalize_points(pts: &[Point2<f64>]) -> (Vec<Point2<f64>>, Matrix3<f64>) {
    let n = pts.len() as f64;
    let (sx, sy) = pts.iter().fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    let (cx, cy) = (sx / n, sy / n);
    let mean_dist = pts
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;

    let t = hartley_normalization(cx, cy, mean_dist);
    let out = pts
        .iter()
        .map(|p| {
            let v = t * Vector3::new(p.x, p.y, 1.0);
            Point2::new(v[0], v[1])
        })
        .collect();
    (out, t)
}

fn finish(hn: Matrix3<f64>, t_src: Matrix3<f64>, t_dst: Matrix3<f64>) -> Option<Homography> {
    let h = t_dst.try_inverse()? * hn * t_src;
    let s = h[(2, 2)];
    if s.abs() < 1e-12 {
        return None;
    }
    Some(Homography::new(h / s))
}

/// Direct linear transform for `dst ~ H * src` from four or more
/// correspondences.
pub fn estimate_homography(src: &[Point2<f64>], dst: &[Point2<f64>]) -> Option<Homography> {
    if src.len() != dst.len() || src.len() < 4 {
        return None;
    }
    if src.len() == 4 {
        let s: &[Point2<f64>; 4] = src.try_into().ok()?;
        let d: &[Point2<f64>; 4] = dst.try_into().ok()?;
        return homography_from_4pt(s, d);
    }

    let (s, ts) = normalize_points(src);
    let (d, td) = normalize_points(dst);

    let mut a = DMatrix::<f64>::zeros(2 * s.len(), 9);
    for (k, (p, q)) in s.iter().zip(&d).enumerate() {
        let (x, y, u, v) = (p.x, p.y, q.x, q.y);
        a[(2 * k, 0)] = -x;
        a[(2 * k, 1)] = -y;
        a[(2 * k, 2)] = -1.0;
        a[(2 * k, 6)] = u * x;
        a[(2 * k, 7)] = u * y;
        a[(2 * k, 8)] = u;

        a[(2 * k + 1, 3)] = -x;
        a[(2 * k + 1, 4)] = -y;
        a[(2 * k + 1, 5)] = -1.0;
        a[(2 * k + 1, 6)] = v * x;
        a[(2 * k + 1, 7)] = v * y;
        a[(2 * k + 1, 8)] = v;
    }

    // null vector of A: last row of V^T
    let vt = a.svd(false, true).v_t?;
    let h = vt.row(vt.nrows().checked_sub(1)?);
    let hn = Matrix3::from_fn(|r, c| h[r * 3 + c]);
    finish(hn, ts, td)
}

/// Exact homography from four correspondences, `h33` fixed to 1.
pub fn homography_from_4pt(
    src: &[Point2<f64>; 4],
    dst: &[Point2<f64>; 4],
) -> Option<Homography> {
    let (s, ts) = normalize_points(src);
    let (d, td) = normalize_points(dst);

    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();
    for k in 0..4 {
        let (x, y, u, v) = (s[k].x, s[k].y, d[k].x, d[k].y);

        let r0 = 2 * k;
        a[(r0, 0)] = x;
        a[(r0, 1)] = y;
        a[(r0, 2)] = 1.0;
        a[(r0, 6)] = -u * x;
        a[(r0, 7)] = -u * y;
        b[r0] = u;

        let r1 = 2 * k + 1;
        a[(r1, 3)] = x;
        a[(r1, 4)] = y;
        a[(r1, 5)] = 1.0;
        a[(r1, 6)] = -v * x;
        a[(r1, 7)] = -v * y;
        b[r1] = v;
    }

    let x = a.lu().solve(&b)?;
    let hn = Matrix3::new(x[0], x[1], x[2], x[3], x[4], x[5], x[6], x[7], 1.0);
    finish(hn, ts, td)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: Point2<f64>, b: Point2<f64>, tol: f64) {
        assert!(
            (a.x - b.x).abs() < tol && (a.y - b.y).abs() < tol,
            "expected ({:.6},{:.6}) ~ ({:.6},{:.6}) within {}",
            a.x,
            a.y,
            b.x,
            b.y,
            tol
        );
    }

    fn camera_corners() -> [Point2<f64>; 4] {
        [
            Point2::new(212.0, 95.0),
            Point2::new(1690.0, 130.0),
            Point2::new(1760.0, 1010.0),
            Point2::new(160.0, 980.0),
        ]
    }

    #[test]
    fn field_corners_map_to_rectangle() {
        let corners = camera_corners();
        let h = Homography::from_field_corners(&corners, DEFAULT_FIELD_WIDTH, DEFAULT_FIELD_HEIGHT)
            .expect("solvable");
        let expected = [
            Point2::new(0.0, 0.0),
            Point2::new(DEFAULT_FIELD_WIDTH, 0.0),
            Point2::new(DEFAULT_FIELD_WIDTH, DEFAULT_FIELD_HEIGHT),
            Point2::new(0.0, DEFAULT_FIELD_HEIGHT),
        ];
        for (c, e) in corners.iter().zip(expected) {
            assert_close(h.apply(*c), e, 1e-6);
        }
    }

    #[test]
    fn mapper_round_trips_field_points() {
        let h = Homography::from_field_corners(&camera_corners(), 1800.0, 1200.0).expect("h");
        let mapper = FieldMapper::new(h).expect("invertible");

        let field: Vec<Point2<f64>> = (0..=6)
            .flat_map(|j| (0..=9).map(move |i| Point2::new(i as f64 * 200.0, j as f64 * 200.0)))
            .collect();
        let pixels = mapper.map_to_pixel(&field);
        let back = mapper.map_to_field(&pixels);
        for (p, q) in field.iter().zip(&back) {
            assert_close(*q, *p, 1e-3);
        }
    }

    #[test]
    fn empty_input_maps_to_empty_output() {
        let mapper = FieldMapper::new(Homography::identity()).expect("identity");
        assert!(mapper.map_to_field(&[]).is_empty());
        assert!(mapper.map_to_pixel(&[]).is_empty());
    }

    #[test]
    fn singular_matrix_is_rejected() {
        let h = Homography::from_array([[1.0, 2.0, 3.0], [2.0, 4.0, 6.0], [0.0, 0.0, 1.0]]);
        assert!(matches!(h.inverse(), Err(HomographyError::SingularMatrix)));
        assert!(matches!(
            FieldMapper::new(h),
            Err(HomographyError::SingularMatrix)
        ));
        assert!(matches!(
            Homography::new(Matrix3::zeros()).inverse(),
            Err(HomographyError::SingularMatrix)
        ));
    }

    #[test]
    fn dlt_handles_overdetermined_case() {
        let ground_truth = Homography::new(Matrix3::new(
            1.0, 0.2, 12.0, //
            -0.1, 0.9, 6.0, //
            0.0006, 0.0004, 1.0,
        ));
        let src: Vec<Point2<f64>> = (0..3)
            .flat_map(|y| (0..3).map(move |x| Point2::new(x as f64 * 40.0, y as f64 * 50.0)))
            .collect();
        let dst = ground_truth.apply_all(&src);

        let estimated = estimate_homography(&src, &dst).expect("estimate");
        for p in [Point2::new(0.0, 0.0), Point2::new(60.0, 40.0), Point2::new(80.0, 90.0)] {
            assert_close(estimated.apply(p), ground_truth.apply(p), 1e-6);
        }
        assert!(estimate_homography(&src[..3], &dst[..3]).is_none());
    }

    #[test]
    fn mapped_pose_recomputes_heading_in_field_space() {
        let h = Homography::from_array([[2.0, 0.0, 10.0], [0.0, 2.0, 20.0], [0.0, 0.0, 1.0]]);
        let mapper = FieldMapper::new(h).expect("invertible");
        let pose = mapper.map_pose(Point2::new(100.0, 60.0), Point2::new(100.0, 80.0));
        assert_eq!(pose.space, Space::Field);
        assert_close(pose.position, Point2::new(210.0, 160.0), 1e-9);
        assert!((pose.heading_deg + 90.0).abs() < 1e-9);
    }

    #[test]
    fn text_and_json_files_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let h = Homography::from_field_corners(&camera_corners(), 1800.0, 1200.0).expect("h");

        for name in ["h.json", "h.txt"] {
            let path = dir.path().join(name);
            h.save(&path).expect("save");
            let loaded = Homography::load(&path).expect("load");
            let p = Point2::new(900.0, 500.0);
            assert_close(loaded.apply(p), h.apply(p), 1e-4);
        }
    }

    #[test]
    fn malformed_text_file_reports_shape() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("h.txt");
        fs::write(&path, "1 0 0\n0 1 0\n").expect("write");
        assert!(matches!(
            Homography::load(&path),
            Err(HomographyError::Shape { found: 6 })
        ));

        fs::write(&path, "1 0 0\n0 one 0\n0 0 1").expect("write");
        assert!(matches!(
            Homography::load(&path),
            Err(HomographyError::Parse { .. })
        ));
    }
}
