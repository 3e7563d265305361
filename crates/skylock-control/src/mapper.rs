//! Error-to-setpoint mapping for fixed-wing intent control.
//!
//! A fixed wing turns by banking: yaw error maps to roll, pitch error to
//! pitch, range error to thrust (flight profile only).

use serde::Deserialize;

use skylock_proto::filters::{clamp, deadband};
use skylock_proto::types::{Errors, Setpoint};

#[derive(Debug, Clone, Deserialize)]
pub struct ControlGains {
    /// deg of roll per rad of yaw error.
    pub yaw_to_roll: f64,
    /// deg of pitch per rad of pitch error.
    pub pitch_to_pitch: f64,
    /// normalized thrust per meter of range error.
    pub range_to_thrust: f64,
}

impl Default for ControlGains {
    fn default() -> Self {
        Self {
            yaw_to_roll: 30.0,
            pitch_to_pitch: 20.0,
            range_to_thrust: 0.05,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControlLimits {
    pub roll_limit_deg: f64,
    pub pitch_limit_deg: f64,
    pub thrust_min: f64,
    pub thrust_max: f64,
}

impl Default for ControlLimits {
    fn default() -> Self {
        Self {
            roll_limit_deg: 20.0,
            pitch_limit_deg: 10.0,
            thrust_min: 0.0,
            thrust_max: 1.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControlConfig {
    pub gains: ControlGains,
    pub limits: ControlLimits,
    /// Never true on the bench profile.
    pub thrust_enabled: bool,
    pub yaw_deadband_rad: f64,
    pub pitch_deadband_rad: f64,
    pub range_deadband_m: f64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            gains: ControlGains::default(),
            limits: ControlLimits::default(),
            thrust_enabled: false,
            yaw_deadband_rad: 0.02,
            pitch_deadband_rad: 0.02,
            range_deadband_m: 0.5,
        }
    }
}

/// Proportional map with per-axis deadbands and saturation.
#[derive(Debug)]
pub struct ControlMapper {
    config: ControlConfig,
}

impl ControlMapper {
    pub fn new(config: ControlConfig) -> Self {
        Self { config }
    }

    pub fn map(&self, errors: &Errors) -> Setpoint {
        if !errors.lock_valid || !errors.track_valid {
            return Setpoint::neutral();
        }

        let yaw_error = deadband(errors.yaw_error_rad, self.config.yaw_deadband_rad);
        let pitch_error = deadband(errors.pitch_error_rad, self.config.pitch_deadband_rad);
        let range_error = if errors.depth_valid {
            deadband(errors.range_error_m, self.config.range_deadband_m)
        } else {
            0.0
        };

        // Target right of center -> bank right; above center -> pitch up;
        // too far -> more thrust.
        let roll_deg = yaw_error * self.config.gains.yaw_to_roll;
        let pitch_deg = pitch_error * self.config.gains.pitch_to_pitch;
        let thrust = if self.config.thrust_enabled && errors.depth_valid {
            range_error * self.config.gains.range_to_thrust
        } else {
            0.0
        };

        Setpoint::new(
            clamp(
                roll_deg,
                -self.config.limits.roll_limit_deg,
                self.config.limits.roll_limit_deg,
            ),
            clamp(
                pitch_deg,
                -self.config.limits.pitch_limit_deg,
                self.config.limits.pitch_limit_deg,
            ),
            // Yaw is handled through roll on a fixed wing.
            0.0,
            clamp(
                thrust,
                self.config.limits.thrust_min,
                self.config.limits.thrust_max,
            ),
        )
    }

    pub fn roll_for_yaw_error(&self, yaw_error_rad: f64) -> f64 {
        clamp(
            yaw_error_rad * self.config.gains.yaw_to_roll,
            -self.config.limits.roll_limit_deg,
            self.config.limits.roll_limit_deg,
        )
    }

    pub fn pitch_for_pitch_error(&self, pitch_error_rad: f64) -> f64 {
        clamp(
            pitch_error_rad * self.config.gains.pitch_to_pitch,
            -self.config.limits.pitch_limit_deg,
            self.config.limits.pitch_limit_deg,
        )
    }
}
