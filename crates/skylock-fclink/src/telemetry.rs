//! Flight-controller telemetry ingest.

use std::time::Instant;

use mavlink::common::{MavMessage, MavModeFlag, MavType};
use serde::Deserialize;

use skylock_proto::now_ts;
use skylock_proto::types::Telemetry;

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    /// Link considered down after this heartbeat silence.
    pub heartbeat_timeout_ms: f64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_ms: 3000.0,
        }
    }
}

/// PX4 main-mode field of the heartbeat custom mode.
fn decode_px4_mode(custom_mode: u32) -> String {
    let main_mode = (custom_mode >> 16) & 0xFF;
    match main_mode {
        0 => "MANUAL".to_string(),
        1 => "ALTITUDE".to_string(),
        2 => "POSITION".to_string(),
        3 => "AUTO.MISSION".to_string(),
        4 => "AUTO.LOITER".to_string(),
        5 => "AUTO.RTL".to_string(),
        6 => "OFFBOARD".to_string(),
        7 => "STABILIZED".to_string(),
        8 => "ACRO".to_string(),
        other => format!("MODE_{}", other),
    }
}

/// Classifies incoming messages and keeps the latest vehicle state.
#[derive(Debug)]
pub struct TelemetryReceiver {
    config: TelemetryConfig,
    last_heartbeat: Option<Instant>,
    telemetry: Telemetry,
}

impl TelemetryReceiver {
    pub fn new(config: TelemetryConfig) -> Self {
        Self {
            config,
            last_heartbeat: None,
            telemetry: Telemetry::default(),
        }
    }

    pub fn process_message(&mut self, msg: &MavMessage) {
        match msg {
            MavMessage::HEARTBEAT(hb) => {
                // Only vehicle heartbeats count for liveness; GCS and other
                // companions also chatter on this link.
                if !matches!(
                    hb.mavtype,
                    MavType::MAV_TYPE_FIXED_WING
                        | MavType::MAV_TYPE_QUADROTOR
                        | MavType::MAV_TYPE_GENERIC
                ) {
                    return;
                }
                self.last_heartbeat = Some(Instant::now());
                self.telemetry.armed = hb
                    .base_mode
                    .contains(MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED);
                self.telemetry.mode = decode_px4_mode(hb.custom_mode);
                self.telemetry.timestamp = now_ts();
            }
            MavMessage::SYS_STATUS(status) => {
                if status.voltage_battery != u16::MAX && status.voltage_battery > 0 {
                    self.telemetry.battery_voltage = status.voltage_battery as f64 / 1000.0;
                }
                if status.battery_remaining >= 0 {
                    self.telemetry.battery_remaining = status.battery_remaining as i32;
                }
            }
            MavMessage::BATTERY_STATUS(status) => {
                let total_mv: u32 = status
                    .voltages
                    .iter()
                    .filter(|&&v| v < u16::MAX)
                    .map(|&v| v as u32)
                    .sum();
                if total_mv > 0 {
                    self.telemetry.battery_voltage = total_mv as f64 / 1000.0;
                }
                if status.battery_remaining >= 0 {
                    self.telemetry.battery_remaining = status.battery_remaining as i32;
                }
            }
            MavMessage::GPS_RAW_INT(gps) => {
                self.telemetry.gps_fix = gps.fix_type as u8;
            }
            _ => {}
        }
    }

    pub fn is_connected(&self) -> bool {
        match self.last_heartbeat {
            Some(t) => t.elapsed().as_secs_f64() * 1000.0 < self.config.heartbeat_timeout_ms,
            None => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.telemetry.armed
    }

    pub fn mode(&self) -> &str {
        &self.telemetry.mode
    }

    pub fn is_offboard(&self) -> bool {
        self.telemetry.mode == "OFFBOARD"
    }

    pub fn time_since_heartbeat_ms(&self) -> Option<f64> {
        self.last_heartbeat.map(|t| t.elapsed().as_secs_f64() * 1000.0)
    }

    pub fn telemetry(&self) -> Telemetry {
        self.telemetry.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mavlink::common::{
        BATTERY_STATUS_DATA, GPS_RAW_INT_DATA, GpsFixType, HEARTBEAT_DATA, SYS_STATUS_DATA,
    };

    fn vehicle_heartbeat(custom_mode: u32, armed: bool) -> MavMessage {
        let mut base_mode = MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED;
        if armed {
            base_mode |= MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED;
        }
        MavMessage::HEARTBEAT(HEARTBEAT_DATA {
            custom_mode,
            mavtype: MavType::MAV_TYPE_FIXED_WING,
            base_mode,
            ..Default::default()
        })
    }

    #[test]
    fn heartbeat_sets_liveness_and_mode() {
        let mut rx = TelemetryReceiver::new(TelemetryConfig::default());
        assert!(!rx.is_connected());

        rx.process_message(&vehicle_heartbeat(6 << 16, true));
        assert!(rx.is_connected());
        assert!(rx.is_armed());
        assert!(rx.is_offboard());
        assert_eq!(rx.mode(), "OFFBOARD");
        assert!(rx.time_since_heartbeat_ms().unwrap() < 100.0);
    }

    #[test]
    fn gcs_heartbeat_does_not_count() {
        let mut rx = TelemetryReceiver::new(TelemetryConfig::default());
        rx.process_message(&MavMessage::HEARTBEAT(HEARTBEAT_DATA {
            mavtype: MavType::MAV_TYPE_GCS,
            ..Default::default()
        }));
        assert!(!rx.is_connected());
    }

    #[test]
    fn heartbeat_timeout_disconnects() {
        let mut rx = TelemetryReceiver::new(TelemetryConfig {
            heartbeat_timeout_ms: 10.0,
        });
        rx.process_message(&vehicle_heartbeat(0, false));
        assert!(rx.is_connected());
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(!rx.is_connected());
    }

    #[test]
    fn mode_table_covers_known_modes() {
        let mut rx = TelemetryReceiver::new(TelemetryConfig::default());
        rx.process_message(&vehicle_heartbeat(4 << 16, false));
        assert_eq!(rx.mode(), "AUTO.LOITER");
        rx.process_message(&vehicle_heartbeat(42 << 16, false));
        assert_eq!(rx.mode(), "MODE_42");
    }

    #[test]
    fn sys_status_battery_fields() {
        let mut rx = TelemetryReceiver::new(TelemetryConfig::default());
        rx.process_message(&MavMessage::SYS_STATUS(SYS_STATUS_DATA {
            voltage_battery: 11_800,
            battery_remaining: 73,
            ..Default::default()
        }));
        let t = rx.telemetry();
        assert!((t.battery_voltage - 11.8).abs() < 1e-9);
        assert_eq!(t.battery_remaining, 73);
    }

    #[test]
    fn sys_status_invalid_fields_ignored() {
        let mut rx = TelemetryReceiver::new(TelemetryConfig::default());
        rx.process_message(&MavMessage::SYS_STATUS(SYS_STATUS_DATA {
            voltage_battery: 12_000,
            battery_remaining: 50,
            ..Default::default()
        }));
        rx.process_message(&MavMessage::SYS_STATUS(SYS_STATUS_DATA {
            voltage_battery: u16::MAX,
            battery_remaining: -1,
            ..Default::default()
        }));
        let t = rx.telemetry();
        assert!((t.battery_voltage - 12.0).abs() < 1e-9);
        assert_eq!(t.battery_remaining, 50);
    }

    #[test]
    fn battery_status_sums_cells() {
        let mut rx = TelemetryReceiver::new(TelemetryConfig::default());
        let mut voltages = [u16::MAX; 10];
        voltages[0] = 3900;
        voltages[1] = 3950;
        voltages[2] = 3920;
        rx.process_message(&MavMessage::BATTERY_STATUS(BATTERY_STATUS_DATA {
            voltages,
            battery_remaining: 64,
            ..Default::default()
        }));
        let t = rx.telemetry();
        assert!((t.battery_voltage - 11.77).abs() < 1e-9);
        assert_eq!(t.battery_remaining, 64);
    }

    #[test]
    fn gps_fix_type_recorded() {
        let mut rx = TelemetryReceiver::new(TelemetryConfig::default());
        rx.process_message(&MavMessage::GPS_RAW_INT(GPS_RAW_INT_DATA {
            fix_type: GpsFixType::GPS_FIX_TYPE_3D_FIX,
            ..Default::default()
        }));
        assert_eq!(rx.telemetry().gps_fix, GpsFixType::GPS_FIX_TYPE_3D_FIX as u8);
    }
}
