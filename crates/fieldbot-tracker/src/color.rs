//! HSV conversion, inclusive HSV ranges and the marker colour calibration.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::MarkerClass;

/// Errors produced while reading a colour calibration file.
#[derive(thiserror::Error, Debug)]
pub enum ColorCalibrationError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("no HSV range configured for the {class:?} marker")]
    EmptyClass { class: MarkerClass },
}

/// Convert one RGB pixel to 8-bit HSV: `H` in `0..=179` (degrees / 2),
/// `S` and `V` in `0..=255`.
#[inline]
pub fn rgb_to_hsv([r, g, b]: [u8; 3]) -> [u8; 3] {
    let (rf, gf, bf) = (r as f32, g as f32, b as f32);
    let v = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let diff = v - min;

    let s = if v > 0.0 { diff * 255.0 / v } else { 0.0 };
    let h = if diff == 0.0 {
        0.0
    } else if v == rf {
        60.0 * (gf - bf) / diff
    } else if v == gf {
        120.0 + 60.0 * (bf - rf) / diff
    } else {
        240.0 + 60.0 * (rf - gf) / diff
    };
    let h = if h < 0.0 { h + 360.0 } else { h };

    [
        ((h / 2.0).round() as u16 % 180) as u8,
        s.round() as u8,
        v as u8,
    ]
}

/// Inclusive HSV box. When `lo[0] > hi[0]` the hue test wraps through 0,
/// which is how the reds and pinks that straddle both ends of the hue circle
/// are expressed in a single range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HsvRange {
    pub lo: [u8; 3],
    pub hi: [u8; 3],
}

impl HsvRange {
    pub const fn new(lo: [u8; 3], hi: [u8; 3]) -> Self {
        Self { lo, hi }
    }

    #[inline]
    pub fn contains(&self, hsv: [u8; 3]) -> bool {
        let [h, s, v] = hsv;
        let hue = if self.lo[0] <= self.hi[0] {
            self.lo[0] <= h && h <= self.hi[0]
        } else {
            h >= self.lo[0] || h <= self.hi[0]
        };
        hue && (self.lo[1]..=self.hi[1]).contains(&s) && (self.lo[2]..=self.hi[2]).contains(&v)
    }
}

/// True when any of `ranges` accepts the pixel.
#[inline]
pub fn any_contains(ranges: &[HsvRange], hsv: [u8; 3]) -> bool {
    ranges.iter().any(|r| r.contains(hsv))
}

/// HSV ranges for the two robot markers.
///
/// The JSON form accepts `front`/`back` (or the older `pink`/`purple`) keys.
/// Each entry is either a list of `{lo, hi}` ranges or a single object with
/// `lo`/`hi` and an optional second `lo2`/`hi2` pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorCalibration {
    #[serde(alias = "pink", deserialize_with = "deserialize_ranges")]
    pub front: Vec<HsvRange>,
    #[serde(alias = "purple", deserialize_with = "deserialize_ranges")]
    pub back: Vec<HsvRange>,
}

impl Default for ColorCalibration {
    fn default() -> Self {
        Self {
            // pink sits on both sides of hue 0
            front: vec![
                HsvRange::new([155, 60, 60], [179, 255, 255]),
                HsvRange::new([0, 60, 60], [10, 255, 255]),
            ],
            back: vec![HsvRange::new([110, 40, 40], [140, 255, 255])],
        }
    }
}

impl ColorCalibration {
    pub fn ranges(&self, class: MarkerClass) -> &[HsvRange] {
        match class {
            MarkerClass::Front => &self.front,
            MarkerClass::Back => &self.back,
        }
    }

    /// Read and validate a calibration file.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ColorCalibrationError> {
        let raw = fs::read_to_string(path)?;
        let calib: Self = serde_json::from_str(&raw)?;
        for class in [MarkerClass::Front, MarkerClass::Back] {
            if calib.ranges(class).is_empty() {
                return Err(ColorCalibrationError::EmptyClass { class });
            }
        }
        Ok(calib)
    }

    /// Load `path` if given and present; fall back to the built-in ranges
    /// otherwise. A file that exists but cannot be used is logged and ignored.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };
        if !path.exists() {
            log::info!(
                "colour calibration {} not found, using built-in marker ranges",
                path.display()
            );
            return Self::default();
        }
        match Self::load_json(path) {
            Ok(calib) => calib,
            Err(err) => {
                log::warn!(
                    "could not load colour calibration {}: {err}; using built-in marker ranges",
                    path.display()
                );
                Self::default()
            }
        }
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ColorCalibrationError> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RangeSpec {
    List(Vec<HsvRange>),
    Pair {
        lo: [u8; 3],
        hi: [u8; 3],
        #[serde(default)]
        lo2: Option<[u8; 3]>,
        #[serde(default)]
        hi2: Option<[u8; 3]>,
    },
}

fn deserialize_ranges<'de, D>(deserializer: D) -> Result<Vec<HsvRange>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match RangeSpec::deserialize(deserializer)? {
        RangeSpec::List(ranges) => ranges,
        RangeSpec::Pair { lo, hi, lo2, hi2 } => {
            let mut out = vec![HsvRange::new(lo, hi)];
            if let (Some(lo2), Some(hi2)) = (lo2, hi2) {
                out.push(HsvRange::new(lo2, hi2));
            }
            out
        }
    })
}
