//! Lighting normalisation applied to the search window before segmentation.

use fieldbot_core::RgbImage;
use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};

/// Gray-world colour constancy: scale each channel so that its mean matches
/// the mean over all three channels. Damps colour casts from changing room
/// light before the fixed HSV thresholds are applied.
pub fn gray_world(img: &mut RgbImage) {
    let n = (img.width * img.height) as f64;
    if n == 0.0 {
        return;
    }

    let mut sums = [0.0f64; 3];
    for px in img.data.chunks_exact(3) {
        for (s, &v) in sums.iter_mut().zip(px) {
            *s += v as f64;
        }
    }
    let means = sums.map(|s| s / n + 1e-6);
    let avg = means.iter().sum::<f64>() / 3.0;
    let gains = means.map(|m| avg / m);

    for px in img.data.chunks_exact_mut(3) {
        for (v, g) in px.iter_mut().zip(gains) {
            *v = (*v as f64 * g).round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// Contrast-limited adaptive histogram equalisation settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaheParams {
    /// Tiles per image side.
    pub tiles: u32,
    /// Histogram clip height as a multiple of the uniform bin height.
    pub clip_limit: f64,
}

impl Default for ClaheParams {
    fn default() -> Self {
        Self {
            tiles: 8,
            clip_limit: 2.0,
        }
    }
}

/// CLAHE on the CIE L* channel; a* and b* are carried through untouched so
/// marker hues survive.
pub fn equalize_contrast(img: &mut RgbImage, params: &ClaheParams) {
    if img.width == 0 || img.height == 0 {
        return;
    }

    let labs: Vec<[f64; 3]> = img
        .data
        .chunks_exact(3)
        .map(|px| rgb_to_lab([px[0], px[1], px[2]]))
        .collect();
    let lightness = labs
        .iter()
        .map(|lab| (lab[0] * 255.0 / 100.0).round().clamp(0.0, 255.0) as u8)
        .collect();
    let Some(lightness) = GrayImage::from_raw(img.width as u32, img.height as u32, lightness)
    else {
        return;
    };

    let equalized = clahe(&lightness, params);
    for ((px, lab), &l) in img
        .data
        .chunks_exact_mut(3)
        .zip(&labs)
        .zip(equalized.as_raw())
    {
        px.copy_from_slice(&lab_to_rgb([l as f64 * 100.0 / 255.0, lab[1], lab[2]]));
    }
}

/// Per-tile equalisation with clipped histograms, blended bilinearly between
/// the four nearest tile centres.
pub fn clahe(gray: &GrayImage, params: &ClaheParams) -> GrayImage {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return gray.clone();
    }

    let tiles = params.tiles.max(1);
    let tile_w = w.div_ceil(tiles.min(w));
    let tile_h = h.div_ceil(tiles.min(h));
    let nx = w.div_ceil(tile_w);
    let ny = h.div_ceil(tile_h);

    let mut luts = Vec::with_capacity((nx * ny) as usize);
    for ty in 0..ny {
        for tx in 0..nx {
            let x1 = ((tx + 1) * tile_w).min(w);
            let y1 = ((ty + 1) * tile_h).min(h);
            let mut hist = [0u32; 256];
            for y in ty * tile_h..y1 {
                for x in tx * tile_w..x1 {
                    hist[gray.get_pixel(x, y).0[0] as usize] += 1;
                }
            }
            let area = (x1 - tx * tile_w) * (y1 - ty * tile_h);
            luts.push(tile_lut(&mut hist, area, params.clip_limit));
        }
    }

    // tile index and blend weight of the nearer centre on one axis
    let axis = |p: u32, size: u32, n: u32| -> (usize, usize, f32) {
        let f = (p as f32 + 0.5) / size as f32 - 0.5;
        if f <= 0.0 {
            return (0, 0, 0.0);
        }
        let lo = (f.floor() as u32).min(n - 1);
        let hi = (lo + 1).min(n - 1);
        (lo as usize, hi as usize, f - f.floor())
    };

    let nx = nx as usize;
    GrayImage::from_fn(w, h, |x, y| {
        let v = gray.get_pixel(x, y).0[0] as usize;
        let (x0, x1, wx) = axis(x, tile_w, nx as u32);
        let (y0, y1, wy) = axis(y, tile_h, ny);
        let at = |tx: usize, ty: usize| luts[ty * nx + tx][v] as f32;
        let top = at(x0, y0) * (1.0 - wx) + at(x1, y0) * wx;
        let bottom = at(x0, y1) * (1.0 - wx) + at(x1, y1) * wx;
        Luma([(top * (1.0 - wy) + bottom * wy).round().clamp(0.0, 255.0) as u8])
    })
}

fn tile_lut(hist: &mut [u32; 256], area: u32, clip_limit: f64) -> [u8; 256] {
    if clip_limit > 0.0 {
        let clip = ((clip_limit * area as f64 / 256.0) as u32).max(1);
        let mut excess = 0u32;
        for bin in hist.iter_mut() {
            if *bin > clip {
                excess += *bin - clip;
                *bin = clip;
            }
        }

        let batch = excess / 256;
        let residual = (excess % 256) as usize;
        for bin in hist.iter_mut() {
            *bin += batch;
        }
        if residual > 0 {
            let step = (256 / residual).max(1);
            for bin in hist.iter_mut().step_by(step).take(residual) {
                *bin += 1;
            }
        }
    }

    let scale = 255.0 / area.max(1) as f64;
    let mut lut = [0u8; 256];
    let mut cdf = 0u32;
    for (out, &count) in lut.iter_mut().zip(hist.iter()) {
        cdf += count;
        *out = (cdf as f64 * scale).round().min(255.0) as u8;
    }
    lut
}

// sRGB / CIE Lab (D65), L* in [0, 100].
const WHITE_X: f64 = 0.950456;
const WHITE_Z: f64 = 1.088754;
const LAB_EPS: f64 = 0.008856;

fn to_linear(v: u8) -> f64 {
    let c = v as f64 / 255.0;
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

fn from_linear(c: f64) -> u8 {
    let c = c.clamp(0.0, 1.0);
    let s = if c <= 0.0031308 {
        12.92 * c
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    };
    (s * 255.0).round().clamp(0.0, 255.0) as u8
}

fn lab_f(t: f64) -> f64 {
    if t > LAB_EPS {
        t.cbrt()
    } else {
        7.787 * t + 16.0 / 116.0
    }
}

fn lab_f_inv(f: f64) -> f64 {
    let t = f * f * f;
    if t > LAB_EPS {
        t
    } else {
        (f - 16.0 / 116.0) / 7.787
    }
}

fn rgb_to_lab(rgb: [u8; 3]) -> [f64; 3] {
    let [r, g, b] = rgb.map(to_linear);
    let x = 0.412453 * r + 0.357580 * g + 0.180423 * b;
    let y = 0.212671 * r + 0.715160 * g + 0.072169 * b;
    let z = 0.019334 * r + 0.119193 * g + 0.950227 * b;

    let (fx, fy, fz) = (lab_f(x / WHITE_X), lab_f(y), lab_f(z / WHITE_Z));
    [116.0 * fy - 16.0, 500.0 * (fx - fy), 200.0 * (fy - fz)]
}

fn lab_to_rgb(lab: [f64; 3]) -> [u8; 3] {
    let fy = (lab[0] + 16.0) / 116.0;
    let fx = fy + lab[1] / 500.0;
    let fz = fy - lab[2] / 200.0;
    let (x, y, z) = (WHITE_X * lab_f_inv(fx), lab_f_inv(fy), WHITE_Z * lab_f_inv(fz));

    let r = 3.240479 * x - 1.537150 * y - 0.498535 * z;
    let g = -0.969256 * x + 1.875991 * y + 0.041556 * z;
    let b = 0.055648 * x - 0.204043 * y + 1.057311 * z;
    [from_linear(r), from_linear(g), from_linear(b)]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spread(img: &GrayImage) -> u8 {
        let (lo, hi) = img
            .pixels()
            .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p.0[0]), hi.max(p.0[0])));
        hi - lo
    }

    #[test]
    fn removes_uniform_colour_cast() {
        let mut img = RgbImage::filled(8, 8, [120, 100, 80]);
        gray_world(&mut img);
        let px = img.view().pixel(3, 3);
        assert!(px.iter().all(|&v| (v as i32 - 100).abs() <= 1), "{px:?}");
    }

    #[test]
    fn neutral_image_is_unchanged() {
        let mut img = RgbImage::filled(4, 4, [60, 60, 60]);
        img.put_pixel(1, 1, [90, 90, 90]);
        let before = img.clone();
        gray_world(&mut img);
        assert_eq!(img, before);
    }

    #[test]
    fn empty_image_is_a_no_op() {
        let mut img = RgbImage::filled(0, 0, [0, 0, 0]);
        gray_world(&mut img);
        assert!(img.data.is_empty());
        equalize_contrast(&mut img, &ClaheParams::default());
        assert!(img.data.is_empty());
    }

    #[test]
    fn clahe_stretches_low_contrast_texture() {
        // 16 grey levels, evenly spread inside every 32x32 tile
        let gray = GrayImage::from_fn(256, 256, |x, y| Luma([100 + ((x + y) % 16) as u8]));
        assert_eq!(spread(&gray), 15);

        let out = clahe(&gray, &ClaheParams::default());
        assert!(spread(&out) >= 30, "spread {}", spread(&out));

        // ordering of grey levels is preserved
        let a = out.get_pixel(128, 128).0[0];
        let b = out.get_pixel(143, 128).0[0];
        assert!(b > a, "{a} vs {b}");
    }

    #[test]
    fn clahe_keeps_flat_image_flat() {
        let gray = GrayImage::from_pixel(64, 48, Luma([80]));
        let out = clahe(&gray, &ClaheParams::default());
        assert_eq!(spread(&out), 0);
    }

    #[test]
    fn lab_conversion_is_stable_for_marker_colours() {
        for rgb in [[255, 0, 180], [100, 0, 200], [40, 40, 40], [30, 120, 40]] {
            let back = lab_to_rgb(rgb_to_lab(rgb));
            for (a, b) in rgb.iter().zip(back) {
                assert!((*a as i32 - b as i32).abs() <= 1, "{rgb:?} -> {back:?}");
            }
        }
    }

    #[test]
    fn equalization_keeps_grey_neutral_and_boosts_contrast() {
        let mut img = RgbImage::filled(256, 256, [0, 0, 0]);
        for y in 0..256 {
            for x in 0..256 {
                let v = 100 + ((x + y) % 16) as u8;
                img.put_pixel(x, y, [v, v, v]);
            }
        }
        equalize_contrast(&mut img, &ClaheParams::default());

        let mut lo = u8::MAX;
        let mut hi = u8::MIN;
        for px in img.data.chunks_exact(3) {
            assert!((px[0] as i32 - px[1] as i32).abs() <= 1, "{px:?}");
            assert!((px[1] as i32 - px[2] as i32).abs() <= 1, "{px:?}");
            lo = lo.min(px[1]);
            hi = hi.max(px[1]);
        }
        assert!(hi - lo > 20, "green spread {}", hi - lo);
    }
}
