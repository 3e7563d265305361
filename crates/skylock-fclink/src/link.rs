//! MAVLink connection to the flight controller / ground station.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use mavlink::common::{
    HEARTBEAT_DATA, MavAutopilot, MavMessage, MavModeFlag, MavState, MavType,
};
use mavlink::{MavConnection, MavHeader};
use tracing::info;

/// Shared handle to one MAVLink UDP connection. Clones share the socket and
/// the sequence counter; send and receive may run on different threads.
#[derive(Clone)]
pub struct FcLink {
    conn: Arc<Box<dyn MavConnection<MavMessage> + Sync + Send>>,
    seq: Arc<AtomicU8>,
    epoch: Instant,
    sys_id: u8,
    comp_id: u8,
    target_sys: u8,
    target_comp: u8,
}

impl FcLink {
    /// `url` is a mavlink address string, e.g. `udpin:0.0.0.0:14551` or
    /// `udpout:192.168.1.100:14550`.
    pub fn open(url: &str, sys_id: u8, comp_id: u8, target_sys: u8, target_comp: u8) -> Result<Self> {
        let conn = mavlink::connect::<MavMessage>(url)
            .with_context(|| format!("mavlink connect {}", url))?;
        info!("fclink: connected via {}", url);
        Ok(Self {
            conn: Arc::new(conn),
            seq: Arc::new(AtomicU8::new(0)),
            epoch: Instant::now(),
            sys_id,
            comp_id,
            target_sys,
            target_comp,
        })
    }

    /// Monotonic milliseconds since the link opened, truncated to 32 bits;
    /// the `time_boot_ms` stamp for every outgoing message.
    pub fn boot_millis(&self) -> u32 {
        self.epoch.elapsed().as_millis() as u32
    }

    pub fn target_system(&self) -> u8 {
        self.target_sys
    }

    pub fn target_component(&self) -> u8 {
        self.target_comp
    }

    pub fn send(&self, msg: &MavMessage) -> Result<()> {
        let hdr = MavHeader {
            system_id: self.sys_id,
            component_id: self.comp_id,
            sequence: self.seq.fetch_add(1, Ordering::Relaxed),
        };
        self.conn.send(&hdr, msg).context("mavlink send")?;
        Ok(())
    }

    /// Blocking receive; run from a dedicated reader thread, never from the
    /// node loop.
    pub fn recv(&self) -> Result<MavMessage> {
        let (_hdr, msg) = self
            .conn
            .recv()
            .map_err(|e| anyhow::anyhow!("mavlink recv: {e:?}"))?;
        Ok(msg)
    }

    /// Companion-computer heartbeat.
    pub fn send_heartbeat(&self) -> Result<()> {
        let hb = HEARTBEAT_DATA {
            custom_mode: 0,
            mavtype: MavType::MAV_TYPE_ONBOARD_CONTROLLER,
            autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
            base_mode: MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED,
            system_status: MavState::MAV_STATE_ACTIVE,
            mavlink_version: 3,
        };
        self.send(&MavMessage::HEARTBEAT(hb))
    }
}
