//! Fixed port assignments. Each producer owns one port; there is no broker,
//! so a crashing node takes down exactly its own streams.

/// Camera bridge, publishes `frames` (internal).
pub const CAMERA: u16 = 5550;
/// Detector/tracker, publishes `tracks`.
pub const DETECTOR: u16 = 5551;
/// Targeting node, publishes `lock_state` and `errors`.
pub const TARGETING: u16 = 5552;
/// Control node, publishes `setpoints`.
pub const CONTROL: u16 = 5553;
/// Flight-link node, publishes `qgc_cmds` and `telemetry`.
pub const FLIGHT_LINK: u16 = 5554;
/// GPIO bridge, publishes `battery_state`.
pub const GPIO: u16 = 5555;
