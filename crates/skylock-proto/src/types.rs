//! Data model shared by every node on the bus.

use serde::{Deserialize, Serialize};

use crate::now_ts;

/// Axis-aligned bounding box in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    /// Normalizes corner order so `x2 >= x1` and `y2 >= y1` always hold.
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    pub fn contains(&self, u: f64, v: f64) -> bool {
        self.x1 <= u && u <= self.x2 && self.y1 <= v && v <= self.y2
    }
}

/// Tracked object with an ID that is stable across frames. Re-use of an id
/// after a gap is the tracker's contract, not ours.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub track_id: u64,
    pub bbox: BoundingBox,
    pub class_id: i32,
    pub label: String,
    pub confidence: f64,
    pub timestamp: f64,
    /// Pixels/sec, when the tracker estimates one.
    pub velocity: Option<(f64, f64)>,
}

/// Tracks from a single frame. Insertion order carries no meaning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackList {
    pub tracks: Vec<Track>,
    pub frame_id: u64,
    pub timestamp: f64,
}

impl TrackList {
    pub fn find(&self, track_id: u64) -> Option<&Track> {
        self.tracks.iter().find(|t| t.track_id == track_id)
    }
}

/// Pinhole camera intrinsics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockStatus {
    Unlocked,
    Locking,
    Locked,
    Lost,
}

/// Current target lock state as published on `lock_state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockState {
    pub status: LockStatus,
    pub locked_track_id: Option<u64>,
    pub lock_timestamp: Option<f64>,
    pub frames_since_lock: u32,
}

impl LockState {
    pub fn unlocked() -> Self {
        Self {
            status: LockStatus::Unlocked,
            locked_track_id: None,
            lock_timestamp: None,
            frames_since_lock: 0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.status == LockStatus::Locked && self.locked_track_id.is_some()
    }
}

/// Tracking errors for control.
///
/// Sign conventions: positive yaw error = target right of center, positive
/// pitch error = target above center, positive range error = target farther
/// than the desired range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Errors {
    pub yaw_error_rad: f64,
    pub pitch_error_rad: f64,
    pub range_error_m: f64,
    pub track_valid: bool,
    pub depth_valid: bool,
    pub lock_valid: bool,
    pub timestamp: f64,
}

impl Errors {
    /// Zero errors with all validity flags false, except the lock flag which
    /// is reported as observed.
    pub fn invalid(lock_valid: bool) -> Self {
        Self {
            yaw_error_rad: 0.0,
            pitch_error_rad: 0.0,
            range_error_m: 0.0,
            track_valid: false,
            depth_valid: false,
            lock_valid,
            timestamp: now_ts(),
        }
    }

    pub fn all_valid(&self) -> bool {
        self.track_valid && self.depth_valid && self.lock_valid
    }
}

/// Attitude + thrust setpoint streamed to the flight controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Setpoint {
    pub roll_deg: f64,
    pub pitch_deg: f64,
    pub yaw_deg: f64,
    pub thrust: f64,
    pub timestamp: f64,
}

impl Setpoint {
    pub fn new(roll_deg: f64, pitch_deg: f64, yaw_deg: f64, thrust: f64) -> Self {
        Self {
            roll_deg,
            pitch_deg,
            yaw_deg,
            thrust,
            timestamp: now_ts(),
        }
    }

    pub fn neutral() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0)
    }
}

/// Operator command arriving over the FC link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum UserCommand {
    StartTracking,
    StopTracking,
    SelectTargetById { track_id: u64 },
    SelectTargetByPixel { u: i32, v: i32 },
    SetDepthRange { min_m: f64, max_m: f64 },
    ClearLock,
    RequestTrackList,
}

/// Flight controller telemetry snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub armed: bool,
    pub mode: String,
    pub battery_voltage: f64,
    pub battery_remaining: i32,
    pub gps_fix: u8,
    pub timestamp: f64,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self {
            armed: false,
            mode: "UNKNOWN".to_string(),
            battery_voltage: 0.0,
            battery_remaining: 0,
            gps_fix: 0,
            timestamp: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryStatus {
    Unknown,
    Bat1Active,
    Bat2Active,
    /// Invalid switch states.
    BothOn,
    BothOff,
}

/// Battery switch state from the GPIO bridge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryState {
    pub bat1_active: bool,
    pub bat2_active: bool,
    pub timestamp: f64,
}

impl BatteryState {
    pub fn status(&self) -> BatteryStatus {
        match (self.bat1_active, self.bat2_active) {
            (true, false) => BatteryStatus::Bat1Active,
            (false, true) => BatteryStatus::Bat2Active,
            (true, true) => BatteryStatus::BothOn,
            (false, false) => BatteryStatus::BothOff,
        }
    }

    /// 1, 2, or 0 for an invalid switch state. 0 is wire-level only; in-core
    /// consumers should match on `status()`.
    pub fn active_bat(&self) -> i32 {
        match self.status() {
            BatteryStatus::Bat1Active => 1,
            BatteryStatus::Bat2Active => 2,
            _ => 0,
        }
    }
}

/// Every payload that crosses the bus, tagged so subscribers can reconstruct
/// the correct variant without out-of-band knowledge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BusMessage {
    Tracks(TrackList),
    Lock(LockState),
    Errors(Errors),
    Setpoint(Setpoint),
    Battery(BatteryState),
    Command(UserCommand),
    Telemetry(Telemetry),
}
