//! The closed topic set.

pub const TRACKS: &str = "tracks";
pub const LOCK_STATE: &str = "lock_state";
pub const ERRORS: &str = "errors";
pub const SETPOINTS: &str = "setpoints";
pub const BATTERY_STATE: &str = "battery_state";
pub const QGC_CMDS: &str = "qgc_cmds";
pub const TELEMETRY: &str = "telemetry";
pub const FRAMES: &str = "frames";

/// Wildcard registration, matches every topic on a producer.
pub const ALL: &str = "*";
