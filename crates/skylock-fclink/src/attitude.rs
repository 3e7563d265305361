//! SET_ATTITUDE_TARGET encoding.
//!
//! Roll/pitch/yaw in degrees become a normalized ZYX Hamilton quaternion;
//! the type mask ignores body rates and uses attitude + thrust.

use mavlink::common::{AttitudeTargetTypemask, MavMessage, SET_ATTITUDE_TARGET_DATA};

use skylock_proto::math::{deg_to_rad, euler_to_quaternion, Quaternion};
use skylock_proto::types::Setpoint;

/// Ignore body roll/pitch/yaw rates (bits 0-2); attitude bit 7 stays clear.
pub fn default_type_mask() -> AttitudeTargetTypemask {
    AttitudeTargetTypemask::ATTITUDE_TARGET_TYPEMASK_BODY_ROLL_RATE_IGNORE
        | AttitudeTargetTypemask::ATTITUDE_TARGET_TYPEMASK_BODY_PITCH_RATE_IGNORE
        | AttitudeTargetTypemask::ATTITUDE_TARGET_TYPEMASK_BODY_YAW_RATE_IGNORE
}

/// Quaternion for an attitude setpoint, normalized.
pub fn attitude_quaternion(roll_deg: f64, pitch_deg: f64, yaw_deg: f64) -> Quaternion {
    euler_to_quaternion(deg_to_rad(roll_deg), deg_to_rad(pitch_deg), deg_to_rad(yaw_deg))
}

/// Full SET_ATTITUDE_TARGET message for a setpoint.
pub fn build_attitude_target(
    setpoint: &Setpoint,
    time_boot_ms: u32,
    target_system: u8,
    target_component: u8,
) -> MavMessage {
    let q = attitude_quaternion(setpoint.roll_deg, setpoint.pitch_deg, setpoint.yaw_deg);

    MavMessage::SET_ATTITUDE_TARGET(SET_ATTITUDE_TARGET_DATA {
        time_boot_ms,
        q: q.to_wire(),
        body_roll_rate: 0.0,
        body_pitch_rate: 0.0,
        body_yaw_rate: 0.0,
        thrust: setpoint.thrust as f32,
        target_system,
        target_component,
        type_mask: default_type_mask(),
        ..Default::default()
    })
}
