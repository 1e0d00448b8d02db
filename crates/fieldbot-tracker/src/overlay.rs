//! Debug rendering of a tracked marker pair.

use fieldbot_core::RgbImageView;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut};
use nalgebra::Point2;

use crate::tracker::MarkerPair;

const FRONT: Rgb<u8> = Rgb([255, 0, 0]);
const BACK: Rgb<u8> = Rgb([0, 0, 255]);
const AXIS: Rgb<u8> = Rgb([0, 255, 0]);
const CENTROID: Rgb<u8> = Rgb([255, 255, 0]);

/// Copy of `frame` with both markers, the centre line and the centroid drawn
/// on top. `None` if the view buffer is inconsistent with its size.
pub fn draw_overlay(frame: &RgbImageView<'_>, pair: &MarkerPair) -> Option<RgbImage> {
    let mut img = RgbImage::from_raw(frame.width as u32, frame.height as u32, frame.data.to_vec())?;
    let centroid = pair.centroid();

    draw_line_segment_mut(&mut img, to_f32(pair.back), to_f32(pair.front), AXIS);
    draw_filled_circle_mut(&mut img, to_i32(pair.front), 5, FRONT);
    draw_filled_circle_mut(&mut img, to_i32(pair.back), 5, BACK);
    draw_filled_circle_mut(&mut img, to_i32(centroid), 3, CENTROID);
    Some(img)
}

fn to_f32(p: Point2<f64>) -> (f32, f32) {
    (p.x as f32, p.y as f32)
}

fn to_i32(p: Point2<f64>) -> (i32, i32) {
    (p.x.round() as i32, p.y.round() as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draws_markers_without_touching_input() {
        let src = fieldbot_core::RgbImage::filled(64, 48, [10, 10, 10]);
        let pair = MarkerPair {
            front: Point2::new(40.0, 20.0),
            back: Point2::new(20.0, 20.0),
            separation: 20.0,
        };
        let out = draw_overlay(&src.view(), &pair).expect("overlay");
        assert_eq!(out.dimensions(), (64, 48));
        assert_eq!(*out.get_pixel(40, 20), FRONT);
        assert_eq!(*out.get_pixel(20, 20), BACK);
        assert_eq!(*out.get_pixel(30, 20), CENTROID);
        assert_eq!(*out.get_pixel(30, 10), Rgb([10, 10, 10]));
        assert_eq!(src.view().pixel(40, 20), [10, 10, 10]);
    }
}
