pub mod attitude;
pub mod commands;
pub mod inject;
pub mod link;
pub mod node;
pub mod offboard;
pub mod telemetry;

use serde::Deserialize;

use skylock_failsafe::FailsafeConfig;

use crate::offboard::OffboardConfig;
use crate::telemetry::TelemetryConfig;

/// Flight-link node configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FlightLinkConfig {
    /// `udpin` binds and answers the first peer (MAVProxy output),
    /// `udpout` connects out to a known endpoint.
    pub connection: String,
    pub host: String,
    pub port: u16,

    /// MAVLink ids we use (companion side).
    pub system_id: u8,
    pub component_id: u8,

    /// Target system/component (FC side). 1/1 for PX4.
    pub target_system: u8,
    pub target_component: u8,

    /// Main loop rate; the setpoint stream runs on its own worker.
    pub update_rate_hz: f64,
    /// Freshness window for the targeting error stream.
    pub track_timeout_ms: f64,

    pub offboard: OffboardConfig,
    pub telemetry: TelemetryConfig,
    pub failsafe: FailsafeConfig,
}

impl FlightLinkConfig {
    pub fn connection_url(&self) -> String {
        format!("{}:{}:{}", self.connection, self.host, self.port)
    }
}

impl Default for FlightLinkConfig {
    fn default() -> Self {
        Self {
            connection: "udpin".to_string(),
            host: "127.0.0.1".to_string(),
            port: 14551,
            system_id: 255,
            component_id: 190,
            target_system: 1,
            target_component: 1,
            update_rate_hz: 50.0,
            track_timeout_ms: 500.0,
            offboard: OffboardConfig::default(),
            telemetry: TelemetryConfig::default(),
            failsafe: FailsafeConfig::default(),
        }
    }
}
