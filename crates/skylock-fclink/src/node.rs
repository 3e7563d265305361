//! Flight-link node: bridges the bus to the MAVLink side.
//!
//! Owns the offboard session, ingests FC telemetry and operator commands,
//! republishes commands onto the bus, injects custom telemetry, and runs
//! the failsafe manager that arbitrates what the offboard stream carries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use mavlink::common::MavMessage;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use skylock_bus::{ports, topics, Publisher, Subscriber};
use skylock_failsafe::FailsafeManager;
use skylock_proto::math::rad_to_deg;
use skylock_proto::types::{
    BatteryState, BusMessage, Errors, LockState, Setpoint, UserCommand,
};

use crate::commands::parse_message;
use crate::inject::TelemetryInjector;
use crate::link::FcLink;
use crate::offboard::{AckSlot, OffboardSession};
use crate::telemetry::TelemetryReceiver;
use crate::FlightLinkConfig;

const TELEMETRY_PUBLISH_INTERVAL: Duration = Duration::from_secs(1);

pub struct FlightLinkNode {
    config: FlightLinkConfig,
    link: FcLink,
    offboard: OffboardSession,
    injector: TelemetryInjector,
    failsafe: FailsafeManager,
    receiver: Arc<Mutex<TelemetryReceiver>>,
    ack: AckSlot,

    publisher: Publisher,
    setpoint_sub: Subscriber,
    battery_sub: Subscriber,
    targeting_sub: Subscriber,
    tracks_sub: Subscriber,

    cmd_rx: mpsc::Receiver<UserCommand>,
    cmd_tx: mpsc::Sender<UserCommand>,

    tracking_active: bool,
    current_setpoint: Setpoint,
    current_battery: Option<BatteryState>,
    last_errors: Option<(Errors, Instant)>,
    last_lock: Option<(LockState, Instant)>,
    track_count: Option<usize>,
    last_telemetry_pub: Option<Instant>,
}

impl FlightLinkNode {
    pub fn new(config: FlightLinkConfig, bus_host: &str) -> Result<Self> {
        let link = FcLink::open(
            &config.connection_url(),
            config.system_id,
            config.component_id,
            config.target_system,
            config.target_component,
        )?;

        let ack: AckSlot = Arc::new(Mutex::new(None));
        let offboard = OffboardSession::new(link.clone(), config.offboard.clone(), Arc::clone(&ack));
        let injector = TelemetryInjector::new(link.clone());
        let failsafe = FailsafeManager::new(config.failsafe.clone());
        let receiver = Arc::new(Mutex::new(TelemetryReceiver::new(config.telemetry.clone())));

        let publisher = Publisher::new(ports::FLIGHT_LINK).context("bind flight-link publisher")?;
        let mut setpoint_sub =
            Subscriber::new(bus_host, ports::CONTROL).context("connect setpoints subscriber")?;
        let mut battery_sub =
            Subscriber::new(bus_host, ports::GPIO).context("connect battery subscriber")?;
        let mut targeting_sub =
            Subscriber::new(bus_host, ports::TARGETING).context("connect targeting subscriber")?;
        let mut tracks_sub =
            Subscriber::new(bus_host, ports::DETECTOR).context("connect tracks subscriber")?;
        setpoint_sub.subscribe(topics::SETPOINTS);
        battery_sub.subscribe(topics::BATTERY_STATE);
        targeting_sub.subscribe(topics::ERRORS);
        targeting_sub.subscribe(topics::LOCK_STATE);
        tracks_sub.subscribe(topics::TRACKS);

        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        info!("fclink: node ready at {} Hz", config.update_rate_hz);
        Ok(Self {
            config,
            link,
            offboard,
            injector,
            failsafe,
            receiver,
            ack,
            publisher,
            setpoint_sub,
            battery_sub,
            targeting_sub,
            tracks_sub,
            cmd_rx,
            cmd_tx,
            tracking_active: false,
            current_setpoint: Setpoint::neutral(),
            current_battery: None,
            last_errors: None,
            last_lock: None,
            track_count: None,
            last_telemetry_pub: None,
        })
    }

    pub async fn run(&mut self, run: Arc<AtomicBool>) -> Result<()> {
        self.spawn_reader(Arc::clone(&run));

        let period = Duration::from_secs_f64(1.0 / self.config.update_rate_hz);
        while run.load(Ordering::Relaxed) {
            let loop_start = tokio::time::Instant::now();

            self.process_commands().await;
            let fresh_errors = self.receive_bus();
            self.update_failsafe();
            self.feed_offboard();
            self.send_injected_telemetry(fresh_errors);
            self.publish_telemetry();

            let elapsed = loop_start.elapsed();
            if elapsed < period {
                tokio::time::sleep(period - elapsed).await;
            }
        }

        // Neutral handoff before the sockets go away.
        self.offboard.stop().await;
        info!("fclink: node stopped");
        Ok(())
    }

    /// Dedicated blocking reader; the mavlink recv has no non-blocking form
    /// worth trusting across transports.
    fn spawn_reader(&self, run: Arc<AtomicBool>) {
        let link = self.link.clone();
        let receiver = Arc::clone(&self.receiver);
        let ack = Arc::clone(&self.ack);
        let cmd_tx = self.cmd_tx.clone();

        std::thread::spawn(move || {
            while run.load(Ordering::Relaxed) {
                let msg = match link.recv() {
                    Ok(msg) => msg,
                    Err(_) => {
                        std::thread::sleep(Duration::from_millis(10));
                        continue;
                    }
                };

                receiver.lock().unwrap().process_message(&msg);

                if let MavMessage::COMMAND_ACK(data) = &msg {
                    *ack.lock().unwrap() = Some((data.command, data.result));
                }

                if let Some(cmd) = parse_message(&msg) {
                    // Lossy by policy; a dropped command is retried by the
                    // operator, not queued behind stale ones.
                    if cmd_tx.try_send(cmd).is_err() {
                        warn!("fclink: command queue full, dropped");
                    }
                }
            }
        });
    }

    async fn process_commands(&mut self) {
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            info!("fclink: command {:?}", cmd);
            self.publisher
                .publish(topics::QGC_CMDS, &BusMessage::Command(cmd.clone()));

            match cmd {
                UserCommand::StartTracking => {
                    self.tracking_active = true;
                    if !self.offboard.is_active() && !self.offboard.start().await {
                        warn!("fclink: offboard session failed to start");
                    }
                }
                UserCommand::StopTracking => {
                    self.tracking_active = false;
                    self.offboard.stop().await;
                }
                _ => {}
            }
        }
    }

    /// Drain every bus input, keeping the freshest item each. Returns true
    /// when a new errors message arrived this tick.
    fn receive_bus(&mut self) -> bool {
        while let Some((_, msg)) = self.setpoint_sub.receive(Duration::ZERO) {
            if let BusMessage::Setpoint(sp) = msg {
                self.current_setpoint = sp;
            }
        }

        while let Some((_, msg)) = self.battery_sub.receive(Duration::ZERO) {
            if let BusMessage::Battery(state) = msg {
                self.current_battery = Some(state);
            }
        }

        let mut fresh_errors = false;
        while let Some((_, msg)) = self.targeting_sub.receive(Duration::ZERO) {
            match msg {
                BusMessage::Errors(e) => {
                    self.last_errors = Some((e, Instant::now()));
                    fresh_errors = true;
                }
                BusMessage::Lock(state) => {
                    self.last_lock = Some((state, Instant::now()));
                }
                _ => {}
            }
        }

        while let Some((_, msg)) = self.tracks_sub.receive(Duration::ZERO) {
            if let BusMessage::Tracks(list) = msg {
                self.track_count = Some(list.tracks.len());
            }
        }

        fresh_errors
    }

    fn update_failsafe(&mut self) {
        let track_timeout = Duration::from_secs_f64(self.config.track_timeout_ms / 1000.0);

        // Real targeting freshness, not a setpoint-timestamp proxy.
        let track_valid = matches!(
            &self.last_errors,
            Some((e, at)) if e.track_valid && at.elapsed() < track_timeout
        );
        let lock_valid = matches!(
            &self.last_lock,
            Some((state, at)) if state.is_valid() && at.elapsed() < track_timeout
        );
        let telemetry_valid = self.receiver.lock().unwrap().is_connected();

        self.failsafe.update(track_valid, telemetry_valid, lock_valid);
    }

    fn feed_offboard(&mut self) {
        let sp = if self.failsafe.should_command_neutral() {
            Setpoint::neutral()
        } else {
            self.current_setpoint
        };
        self.offboard.update_setpoint(sp);
    }

    fn send_injected_telemetry(&mut self, fresh_errors: bool) {
        if let Some(battery) = self.current_battery {
            self.injector.send_battery_state(&battery, false);
        }

        if let Some(count) = self.track_count {
            self.injector.send_track_count(count);
        }

        match &self.last_lock {
            Some((state, _)) => {
                self.injector
                    .send_lock_status(state.locked_track_id, state.is_valid());
            }
            None => self.injector.send_lock_status(None, false),
        }

        if fresh_errors {
            if let Some((e, _)) = &self.last_errors {
                self.injector.send_tracking_errors(
                    rad_to_deg(e.yaw_error_rad),
                    rad_to_deg(e.pitch_error_rad),
                );
            }
        }
    }

    fn publish_telemetry(&mut self) {
        let due = self
            .last_telemetry_pub
            .map(|t| t.elapsed() >= TELEMETRY_PUBLISH_INTERVAL)
            .unwrap_or(true);
        if !due {
            return;
        }
        self.last_telemetry_pub = Some(Instant::now());

        let telemetry = self.receiver.lock().unwrap().telemetry();
        debug!(
            "fclink: mode={} armed={} failsafe={:?}",
            telemetry.mode,
            telemetry.armed,
            self.failsafe.state()
        );
        self.publisher
            .publish(topics::TELEMETRY, &BusMessage::Telemetry(telemetry));
    }
}
