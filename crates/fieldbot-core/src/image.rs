use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};

/// Borrowed 8-bit RGB frame, row-major, `data.len() == width * height * 3`.
#[derive(Clone, Copy, Debug)]
pub struct RgbImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [u8],
}

/// Owned 8-bit RGB image with the same layout as [`RgbImageView`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RgbImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

/// Axis-aligned pixel rectangle, `x..x+width` by `y..y+height`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl PixelRect {
    pub fn full(width: usize, height: usize) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    /// Square window of half-size `radius` centred on `center`, clipped to a
    /// `width` x `height` frame. Empty when the centre lies far outside.
    pub fn square_around(center: Point2<f64>, radius: usize, width: usize, height: usize) -> Self {
        let cx = center.x.floor() as i64;
        let cy = center.y.floor() as i64;
        let r = radius as i64;
        let x0 = (cx - r).clamp(0, width as i64);
        let y0 = (cy - r).clamp(0, height as i64);
        let x1 = (cx + r).clamp(x0, width as i64);
        let y1 = (cy + r).clamp(y0, height as i64);
        Self {
            x: x0 as usize,
            y: y0 as usize,
            width: (x1 - x0) as usize,
            height: (y1 - y0) as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Translation from ROI-local to full-frame coordinates.
    pub fn offset(&self) -> Vector2<f64> {
        Vector2::new(self.x as f64, self.y as f64)
    }
}

impl<'a> RgbImageView<'a> {
    /// `None` when the buffer length does not match the dimensions.
    pub fn new(width: usize, height: usize, data: &'a [u8]) -> Option<Self> {
        (data.len() == width * height * 3).then_some(Self {
            width,
            height,
            data,
        })
    }

    #[inline]
    pub fn pixel(&self, x: usize, y: usize) -> [u8; 3] {
        let i = (y * self.width + x) * 3;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }

    pub fn bounds(&self) -> PixelRect {
        PixelRect::full(self.width, self.height)
    }

    /// Copy out the part of `rect` that lies inside the image.
    pub fn crop(&self, rect: PixelRect) -> RgbImage {
        let x0 = rect.x.min(self.width);
        let y0 = rect.y.min(self.height);
        let w = rect.width.min(self.width - x0);
        let h = rect.height.min(self.height - y0);

        let mut data = Vec::with_capacity(w * h * 3);
        for y in y0..y0 + h {
            let start = (y * self.width + x0) * 3;
            data.extend_from_slice(&self.data[start..start + w * 3]);
        }
        RgbImage {
            width: w,
            height: h,
            data,
        }
    }

    pub fn to_owned_image(&self) -> RgbImage {
        RgbImage {
            width: self.width,
            height: self.height,
            data: self.data.to_vec(),
        }
    }
}

impl RgbImage {
    /// Image filled with a single colour.
    pub fn filled(width: usize, height: usize, rgb: [u8; 3]) -> Self {
        Self {
            width,
            height,
            data: rgb.repeat(width * height),
        }
    }

    pub fn view(&self) -> RgbImageView<'_> {
        RgbImageView {
            width: self.width,
            height: self.height,
            data: &self.data,
        }
    }

    #[inline]
    pub fn put_pixel(&mut self, x: usize, y: usize, rgb: [u8; 3]) {
        if x < self.width && y < self.height {
            let i = (y * self.width + x) * 3;
            self.data[i..i + 3].copy_from_slice(&rgb);
        }
    }

    /// Paint a filled disk, clipped to the image.
    pub fn fill_disk(&mut self, center: Point2<f64>, radius: f64, rgb: [u8; 3]) {
        let r2 = radius * radius;
        let y0 = (center.y - radius).floor().max(0.0) as usize;
        let x0 = (center.x - radius).floor().max(0.0) as usize;
        let y1 = ((center.y + radius).ceil().max(0.0) as usize).min(self.height);
        let x1 = ((center.x + radius).ceil().max(0.0) as usize).min(self.width);
        for y in y0..y1 {
            for x in x0..x1 {
                let dx = x as f64 + 0.5 - center.x;
                let dy = y as f64 + 0.5 - center.y;
                if dx * dx + dy * dy <= r2 {
                    self.put_pixel(x, y, rgb);
                }
            }
        }
    }
}
