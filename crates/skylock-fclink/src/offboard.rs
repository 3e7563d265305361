//! Offboard session management.
//!
//! PX4 only accepts an offboard-mode request while setpoints are already
//! arriving, and drops out of offboard if the stream stalls. The session
//! therefore runs a dedicated streaming worker that publishes the shared
//! setpoint at a fixed rate no matter what the node loop is doing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use mavlink::common::{MavCmd, MavMessage, MavModeFlag, MavResult, COMMAND_LONG_DATA};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use skylock_proto::types::Setpoint;

use crate::attitude::build_attitude_target;
use crate::link::FcLink;

/// PX4 custom main mode for offboard, in the upper half of custom_mode.
const PX4_CUSTOM_MODE_OFFBOARD: u32 = 6 << 16;

/// How long to pre-stream before requesting the mode switch.
const PRE_STREAM: Duration = Duration::from_millis(500);
/// Neutral handoff window on stop, so the FC latches neutral, not the last
/// tracking setpoint.
const STOP_HANDOFF: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Deserialize)]
pub struct OffboardConfig {
    pub setpoint_rate_hz: f64,
    pub heartbeat_rate_hz: f64,
    pub mode_timeout_s: f64,
    pub arm_timeout_s: f64,
}

impl Default for OffboardConfig {
    fn default() -> Self {
        Self {
            setpoint_rate_hz: 30.0,
            heartbeat_rate_hz: 1.0,
            mode_timeout_s: 5.0,
            arm_timeout_s: 5.0,
        }
    }
}

/// Latest command acknowledgement seen by the link reader.
pub type AckSlot = Arc<Mutex<Option<(MavCmd, MavResult)>>>;

pub struct OffboardSession {
    link: FcLink,
    config: OffboardConfig,
    /// The one shared mutable cell of this process: worker reads, node
    /// writes, each under a single O(1) lock hold.
    setpoint: Arc<Mutex<Setpoint>>,
    streaming: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    ack: AckSlot,
    active: bool,
}

impl OffboardSession {
    /// `ack` is fed by the link reader thread; the session only polls it.
    pub fn new(link: FcLink, config: OffboardConfig, ack: AckSlot) -> Self {
        Self {
            link,
            config,
            setpoint: Arc::new(Mutex::new(Setpoint::neutral())),
            streaming: Arc::new(AtomicBool::new(false)),
            worker: None,
            ack,
            active: false,
        }
    }

    /// Replace the streamed setpoint.
    pub fn update_setpoint(&self, setpoint: Setpoint) {
        *self.setpoint.lock().unwrap() = setpoint;
    }

    pub fn current_setpoint(&self) -> Setpoint {
        *self.setpoint.lock().unwrap()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Relaxed)
    }

    /// Pre-stream, then request offboard mode and wait for the ack.
    pub async fn start(&mut self) -> bool {
        if self.active {
            warn!("offboard: session already active");
            return true;
        }

        self.start_streaming();
        info!("offboard: pre-streaming setpoints");
        tokio::time::sleep(PRE_STREAM).await;

        self.ack.lock().unwrap().take();
        if let Err(e) = self.request_offboard_mode() {
            error!("offboard: mode request failed: {:#}", e);
            self.stop_streaming();
            return false;
        }

        let deadline = Instant::now() + Duration::from_secs_f64(self.config.mode_timeout_s);
        while Instant::now() < deadline {
            let ack = self.ack.lock().unwrap().take();
            if let Some((cmd, result)) = ack {
                if cmd == MavCmd::MAV_CMD_DO_SET_MODE {
                    if result == MavResult::MAV_RESULT_ACCEPTED {
                        self.active = true;
                        info!("offboard: mode active");
                        return true;
                    }
                    warn!("offboard: mode change rejected: {:?}", result);
                    self.stop_streaming();
                    return false;
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        warn!("offboard: mode change timeout");
        self.stop_streaming();
        false
    }

    /// Force neutral into the stream, hold the handoff window, then stop
    /// the worker.
    pub async fn stop(&mut self) {
        if !self.active && !self.is_streaming() {
            return;
        }
        info!("offboard: stopping session");

        self.update_setpoint(Setpoint::neutral());
        tokio::time::sleep(STOP_HANDOFF).await;

        self.stop_streaming();
        self.active = false;
        info!("offboard: session stopped");
    }

    fn request_offboard_mode(&self) -> anyhow::Result<()> {
        let cmd = COMMAND_LONG_DATA {
            target_system: self.link.target_system(),
            target_component: self.link.target_component(),
            command: MavCmd::MAV_CMD_DO_SET_MODE,
            confirmation: 0,
            param1: MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED.bits() as f32,
            param2: PX4_CUSTOM_MODE_OFFBOARD as f32,
            param3: 0.0,
            param4: 0.0,
            param5: 0.0,
            param6: 0.0,
            param7: 0.0,
        };
        info!("offboard: requesting mode switch");
        self.link.send(&MavMessage::COMMAND_LONG(cmd))
    }

    fn start_streaming(&mut self) {
        if self.is_streaming() {
            return;
        }
        self.streaming.store(true, Ordering::Relaxed);

        let link = self.link.clone();
        let setpoint = Arc::clone(&self.setpoint);
        let streaming = Arc::clone(&self.streaming);
        let setpoint_period = Duration::from_secs_f64(1.0 / self.config.setpoint_rate_hz);
        let heartbeat_period = Duration::from_secs_f64(1.0 / self.config.heartbeat_rate_hz);

        self.worker = Some(std::thread::spawn(move || {
            let mut last_heartbeat = Instant::now() - heartbeat_period;
            while streaming.load(Ordering::Relaxed) {
                let loop_start = Instant::now();

                let sp = *setpoint.lock().unwrap();
                let msg = build_attitude_target(
                    &sp,
                    link.boot_millis(),
                    link.target_system(),
                    link.target_component(),
                );
                if let Err(e) = link.send(&msg) {
                    debug!("offboard: setpoint send failed: {:#}", e);
                }

                if last_heartbeat.elapsed() >= heartbeat_period {
                    if let Err(e) = link.send_heartbeat() {
                        debug!("offboard: heartbeat send failed: {:#}", e);
                    }
                    last_heartbeat = Instant::now();
                }

                let elapsed = loop_start.elapsed();
                if elapsed < setpoint_period {
                    std::thread::sleep(setpoint_period - elapsed);
                }
            }
        }));
        debug!("offboard: streaming worker started");
    }

    fn stop_streaming(&mut self) {
        self.streaming.store(false, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            // The worker exits within one setpoint period.
            let _ = worker.join();
        }
        debug!("offboard: streaming worker stopped");
    }
}

impl Drop for OffboardSession {
    fn drop(&mut self) {
        self.streaming.store(false, Ordering::Relaxed);
    }
}
