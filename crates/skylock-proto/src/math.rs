//! Quaternion and pinhole-camera math for attitude encoding and targeting.

use crate::types::CameraIntrinsics;

/// Quaternion in Hamilton convention, stored `(w, x, y, z)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quaternion {
    pub fn identity() -> Self {
        Self { w: 1.0, x: 0.0, y: 0.0, z: 0.0 }
    }

    pub fn norm(&self) -> f64 {
        (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Degenerate (near-zero) quaternions normalize to identity.
    pub fn normalized(&self) -> Self {
        let n = self.norm();
        if n < 1e-10 {
            return Self::identity();
        }
        Self {
            w: self.w / n,
            x: self.x / n,
            y: self.y / n,
            z: self.z / n,
        }
    }

    /// Hamilton product `self * rhs`.
    pub fn multiply(&self, rhs: &Quaternion) -> Quaternion {
        Quaternion {
            w: self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            x: self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            y: self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            z: self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        }
    }

    /// `[w, x, y, z]` as f32, the wire order for attitude targets.
    pub fn to_wire(&self) -> [f32; 4] {
        [self.w as f32, self.x as f32, self.y as f32, self.z as f32]
    }
}

/// Euler (ZYX order) to quaternion. Angles in radians.
pub fn euler_to_quaternion(roll_rad: f64, pitch_rad: f64, yaw_rad: f64) -> Quaternion {
    let (sr, cr) = (roll_rad / 2.0).sin_cos();
    let (sp, cp) = (pitch_rad / 2.0).sin_cos();
    let (sy, cy) = (yaw_rad / 2.0).sin_cos();

    Quaternion {
        w: cr * cp * cy + sr * sp * sy,
        x: sr * cp * cy - cr * sp * sy,
        y: cr * sp * cy + sr * cp * sy,
        z: cr * cp * sy - sr * sp * cy,
    }
    .normalized()
}

/// Quaternion to Euler (ZYX order), `(roll, pitch, yaw)` in radians.
/// Pitch saturates at ±π/2 when the sine term leaves [-1, 1].
pub fn quaternion_to_euler(q: &Quaternion) -> (f64, f64, f64) {
    let sinr_cosp = 2.0 * (q.w * q.x + q.y * q.z);
    let cosr_cosp = 1.0 - 2.0 * (q.x * q.x + q.y * q.y);
    let roll = sinr_cosp.atan2(cosr_cosp);

    let sinp = 2.0 * (q.w * q.y - q.z * q.x);
    let pitch = if sinp.abs() >= 1.0 {
        (std::f64::consts::FRAC_PI_2).copysign(sinp)
    } else {
        sinp.asin()
    };

    let siny_cosp = 2.0 * (q.w * q.z + q.x * q.y);
    let cosy_cosp = 1.0 - 2.0 * (q.y * q.y + q.z * q.z);
    let yaw = siny_cosp.atan2(cosy_cosp);

    (roll, pitch, yaw)
}

/// Pixel coordinates to angular offsets from the optical axis.
///
/// Positive yaw error = target right of center. Positive pitch error =
/// target above center (image y grows downward, hence the sign flip).
pub fn pixel_to_angles(u: f64, v: f64, intr: &CameraIntrinsics) -> (f64, f64) {
    let dx = u - intr.cx;
    let dy = v - intr.cy;
    let yaw_error = dx.atan2(intr.fx);
    let pitch_error = -dy.atan2(intr.fy);
    (yaw_error, pitch_error)
}

/// 3x3 rotation matrix from Euler angles (ZYX order), row-major.
pub fn rotation_matrix_from_euler(roll: f64, pitch: f64, yaw: f64) -> [[f64; 3]; 3] {
    let (sr, cr) = roll.sin_cos();
    let (sp, cp) = pitch.sin_cos();
    let (sy, cy) = yaw.sin_cos();

    [
        [cp * cy, sr * sp * cy - cr * sy, cr * sp * cy + sr * sy],
        [cp * sy, sr * sp * sy + cr * cy, cr * sp * sy - sr * cy],
        [-sp, sr * cp, cr * cp],
    ]
}

pub fn deg_to_rad(degrees: f64) -> f64 {
    degrees.to_radians()
}

pub fn rad_to_deg(radians: f64) -> f64 {
    radians.to_degrees()
}

/// Wrap an angle into [-π, π].
pub fn normalize_angle(mut angle_rad: f64) -> f64 {
    use std::f64::consts::PI;
    while angle_rad > PI {
        angle_rad -= 2.0 * PI;
    }
    while angle_rad < -PI {
        angle_rad += 2.0 * PI;
    }
    angle_rad
}
