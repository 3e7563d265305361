//! Custom telemetry injection toward the ground station.
//!
//! Named scalar values keep the GCS widgets fed without a custom dialect:
//! battery switch state at 2 Hz, track count at up to 5 Hz, lock status on
//! change, tracking errors at control rate.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use mavlink::common::{MavMessage, NAMED_VALUE_FLOAT_DATA, NAMED_VALUE_INT_DATA};
use tracing::warn;

use skylock_proto::types::BatteryState;

use crate::commands::encode_name;
use crate::link::FcLink;

const BATTERY_INTERVAL: Duration = Duration::from_millis(500);
const TRACKS_INTERVAL: Duration = Duration::from_millis(200);

/// No-lock sentinel for the compact TRK_LOCK_ID channel. Wire-level only.
const NO_LOCK_ID: i32 = -1;

#[derive(Debug, Clone, Copy)]
pub enum DebugValue {
    Int(i32),
    Float(f32),
}

pub struct TelemetryInjector {
    link: FcLink,
    last_battery: Option<Instant>,
    last_tracks: Option<Instant>,
    last_lock: Option<(bool, i32)>,
}

impl TelemetryInjector {
    pub fn new(link: FcLink) -> Self {
        Self {
            link,
            last_battery: None,
            last_tracks: None,
            last_lock: None,
        }
    }

    fn send_int(&self, name: &str, value: i32) {
        let msg = MavMessage::NAMED_VALUE_INT(NAMED_VALUE_INT_DATA {
            time_boot_ms: self.link.boot_millis(),
            value,
            name: encode_name(name),
        });
        if let Err(e) = self.link.send(&msg) {
            warn!("inject: {} send failed: {:#}", name, e);
        }
    }

    fn send_float(&self, name: &str, value: f32) {
        let msg = MavMessage::NAMED_VALUE_FLOAT(NAMED_VALUE_FLOAT_DATA {
            time_boot_ms: self.link.boot_millis(),
            value,
            name: encode_name(name),
        });
        if let Err(e) = self.link.send(&msg) {
            warn!("inject: {} send failed: {:#}", name, e);
        }
    }

    /// Battery switch state, rate-capped to 2 Hz unless forced.
    pub fn send_battery_state(&mut self, state: &BatteryState, force: bool) {
        if !force {
            if let Some(last) = self.last_battery {
                if last.elapsed() < BATTERY_INTERVAL {
                    return;
                }
            }
        }
        self.last_battery = Some(Instant::now());

        self.send_int("BAT1_ACTIVE", state.bat1_active as i32);
        self.send_int("BAT2_ACTIVE", state.bat2_active as i32);
        self.send_int("ACTIVE_BAT", state.active_bat());
    }

    /// Track count summary, at most 5 Hz. The full list never crosses this
    /// link; it is bandwidth we do not have.
    pub fn send_track_count(&mut self, count: usize) {
        if let Some(last) = self.last_tracks {
            if last.elapsed() < TRACKS_INTERVAL {
                return;
            }
        }
        self.last_tracks = Some(Instant::now());
        self.send_int("TRK_COUNT", count as i32);
    }

    /// Lock status, emitted only on change.
    pub fn send_lock_status(&mut self, locked_track_id: Option<u64>, lock_valid: bool) {
        let id = locked_track_id.map(|v| v as i32).unwrap_or(NO_LOCK_ID);
        if self.last_lock == Some((lock_valid, id)) {
            return;
        }
        self.last_lock = Some((lock_valid, id));

        self.send_int("TRK_LOCKED", lock_valid as i32);
        self.send_int("TRK_LOCK_ID", id);
    }

    /// Tracking errors in degrees, uncapped (runs at control rate).
    pub fn send_tracking_errors(&mut self, yaw_error_deg: f64, pitch_error_deg: f64) {
        self.send_float("TRK_YAW_ERR", yaw_error_deg as f32);
        self.send_float("TRK_PIT_ERR", pitch_error_deg as f32);
    }

    /// Arbitrary named debug values; names are truncated to the 10-byte
    /// wire limit.
    pub fn send_debug_values(&mut self, values: &HashMap<String, DebugValue>) {
        for (name, value) in values {
            match value {
                DebugValue::Int(v) => self.send_int(name, *v),
                DebugValue::Float(v) => self.send_float(name, *v),
            }
        }
    }
}
