//! JSON configuration for the control loop and the CLI.

use std::fs;
use std::path::{Path, PathBuf};

use fieldbot_nav::NavParams;
use fieldbot_tracker::TrackerParams;
use serde::{Deserialize, Serialize};

use crate::control::DetectionFilter;
use crate::transport::TransportConfig;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

fn default_pose_stable_frames() -> u32 {
    3
}

/// Everything the control loop needs besides the frames themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldbotConfig {
    /// Pixel to field homography, JSON or nine-number text.
    pub homography_path: PathBuf,
    /// Marker colour ranges; built-in ranges when unset or missing.
    #[serde(default)]
    pub colors_path: Option<PathBuf>,
    #[serde(default)]
    pub tracker: TrackerParams,
    #[serde(default)]
    pub navigation: NavParams,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub detections: DetectionFilter,
    /// Consecutive frames with a pose before navigation starts acting on it.
    #[serde(default = "default_pose_stable_frames")]
    pub pose_stable_frames: u32,
}

impl Default for FieldbotConfig {
    fn default() -> Self {
        Self {
            homography_path: PathBuf::from("homography.json"),
            colors_path: None,
            tracker: TrackerParams::default(),
            navigation: NavParams::default(),
            transport: TransportConfig::default(),
            detections: DetectionFilter::default(),
            pose_stable_frames: default_pose_stable_frames(),
        }
    }
}

impl FieldbotConfig {
    /// Load a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}
