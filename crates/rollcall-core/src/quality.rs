//! Capture quality gate.
//!
//! Decides whether a frame is sharp enough to be worth sending to feature
//! extraction. The gate never retries; a rejection carries the reason back to
//! the capture loop, which prompts for a recapture.

use crate::frame::Frame;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_SHARPNESS_THRESHOLD: f64 = 100.0;
/// Dark-pixel limit to use when the dark check is switched on.
pub const DEFAULT_DARK_FRACTION: f32 = 0.95;

/// Quality gate tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Laplacian variance a frame must exceed.
    pub sharpness_threshold: f64,
    /// Accept `sharpness == threshold` as well.
    pub inclusive: bool,
    /// Reject frames whose dark-pixel fraction exceeds this. Off (`None`)
    /// unless the capture loop asks for it.
    pub dark_fraction: Option<f32>,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            sharpness_threshold: DEFAULT_SHARPNESS_THRESHOLD,
            inclusive: false,
            dark_fraction: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RejectReason {
    /// Frame too small for the edge kernel, or its buffer is short.
    EmptyFrame,
    TooDark { dark_fraction: f32 },
    TooBlurry { sharpness: f64, threshold: f64 },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::EmptyFrame => write!(f, "frame is empty; check the camera feed"),
            RejectReason::TooDark { dark_fraction } => write!(
                f,
                "frame too dark ({:.0}% dark pixels); improve lighting and recapture",
                dark_fraction * 100.0
            ),
            RejectReason::TooBlurry {
                sharpness,
                threshold,
            } => write!(
                f,
                "frame too blurry (sharpness {sharpness:.1}, need > {threshold:.1}); hold still and recapture"
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Assessment {
    Accept { sharpness: f64 },
    Reject(RejectReason),
}

impl Assessment {
    pub fn is_accept(&self) -> bool {
        matches!(self, Assessment::Accept { .. })
    }
}

#[derive(Debug, Clone, Default)]
pub struct QualityGate {
    config: QualityConfig,
}

impl QualityGate {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    /// Check a frame: emptiness, then darkness, then sharpness.
    pub fn assess(&self, frame: &Frame) -> Assessment {
        if !frame.has_interior() {
            return Assessment::Reject(RejectReason::EmptyFrame);
        }

        if let Some(limit) = self.config.dark_fraction {
            let dark_fraction = frame.dark_fraction();
            if dark_fraction > limit {
                tracing::debug!(dark_fraction, limit, "quality: frame rejected as dark");
                return Assessment::Reject(RejectReason::TooDark { dark_fraction });
            }
        }

        let sharpness = frame.laplacian_variance();
        if self.passes(sharpness) {
            Assessment::Accept { sharpness }
        } else {
            tracing::debug!(
                sharpness,
                threshold = self.config.sharpness_threshold,
                "quality: frame rejected as blurry"
            );
            Assessment::Reject(RejectReason::TooBlurry {
                sharpness,
                threshold: self.config.sharpness_threshold,
            })
        }
    }

    /// Threshold rule on a precomputed sharpness metric.
    pub fn passes(&self, sharpness: f64) -> bool {
        if self.config.inclusive {
            sharpness >= self.config.sharpness_threshold
        } else {
            sharpness > self.config.sharpness_threshold
        }
    }
}
