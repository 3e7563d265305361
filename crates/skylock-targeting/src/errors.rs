//! Angular and range error computation from the locked target.

use serde::Deserialize;

use skylock_proto::math::pixel_to_angles;
use skylock_proto::now_ts;
use skylock_proto::types::{CameraIntrinsics, Errors, Track};

#[derive(Debug, Clone, Deserialize)]
pub struct RangeConfig {
    pub desired_range_m: f64,
    pub min_range_m: f64,
    pub max_range_m: f64,
}

impl Default for RangeConfig {
    fn default() -> Self {
        Self {
            desired_range_m: 10.0,
            min_range_m: 3.0,
            max_range_m: 50.0,
        }
    }
}

/// Maps the locked target's bbox center through the pinhole model to yaw and
/// pitch errors, and the measured depth to a range error.
#[derive(Debug)]
pub struct ErrorComputer {
    intrinsics: CameraIntrinsics,
    range: RangeConfig,
}

impl ErrorComputer {
    pub fn new(intrinsics: CameraIntrinsics, range: RangeConfig) -> Self {
        Self { intrinsics, range }
    }

    /// Runtime depth-range adjustment (SetDepthRange command).
    pub fn set_depth_range(&mut self, min_m: f64, max_m: f64) {
        self.range.min_range_m = min_m.min(max_m);
        self.range.max_range_m = min_m.max(max_m);
    }

    pub fn range_config(&self) -> &RangeConfig {
        &self.range
    }

    /// With no lock or no track the result is zero errors with validity
    /// flags down; the absence of a valid message is the error signal.
    pub fn compute(&self, track: Option<&Track>, depth_m: Option<f64>, lock_valid: bool) -> Errors {
        let track = match (lock_valid, track) {
            (true, Some(t)) => t,
            _ => return Errors::invalid(lock_valid),
        };

        let (cx, cy) = track.bbox.center();
        let (yaw_error_rad, pitch_error_rad) = pixel_to_angles(cx, cy, &self.intrinsics);

        let mut errors = Errors {
            yaw_error_rad,
            pitch_error_rad,
            range_error_m: 0.0,
            track_valid: true,
            depth_valid: false,
            lock_valid,
            timestamp: now_ts(),
        };

        if let Some(d) = depth_m {
            errors.depth_valid = self.range.min_range_m <= d && d <= self.range.max_range_m;
            // Out-of-range depth still yields an error estimate; the flag
            // tells control not to act on it.
            errors.range_error_m = d - self.range.desired_range_m;
        }

        errors
    }

    /// Raw errors for an arbitrary pixel, bypassing lock state. Diagnostic
    /// path for GCS click feedback.
    pub fn compute_from_pixel(&self, u: f64, v: f64, depth_m: Option<f64>) -> (f64, f64, f64) {
        let (yaw_error, pitch_error) = pixel_to_angles(u, v, &self.intrinsics);
        let range_error = depth_m.map(|d| d - self.range.desired_range_m).unwrap_or(0.0);
        (yaw_error, pitch_error, range_error)
    }

    /// True when the target sits within the given angular thresholds of the
    /// optical axis.
    pub fn is_centered(&self, errors: &Errors, yaw_threshold_rad: f64, pitch_threshold_rad: f64) -> bool {
        errors.all_valid()
            && errors.yaw_error_rad.abs() < yaw_threshold_rad
            && errors.pitch_error_rad.abs() < pitch_threshold_rad
    }

    pub fn is_in_range(&self, errors: &Errors, threshold_m: f64) -> bool {
        errors.depth_valid && errors.range_error_m.abs() < threshold_m
    }
}
