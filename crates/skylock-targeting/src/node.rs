//! Targeting node: consumes tracks and operator commands, owns the lock,
//! publishes lock state and tracking errors.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info};

use skylock_bus::{ports, topics, Publisher, Subscriber};
use skylock_proto::types::{BusMessage, CameraIntrinsics, TrackList, UserCommand};

use crate::depth::DepthSource;
use crate::errors::{ErrorComputer, RangeConfig};
use crate::lock::{LockConfig, LockManager};

#[derive(Debug, Clone)]
pub struct TargetingNodeConfig {
    pub lock: LockConfig,
    pub range: RangeConfig,
    pub intrinsics: CameraIntrinsics,
    pub update_rate_hz: f64,
    /// Host the producer ports live on (single-host deployment).
    pub bus_host: String,
}

pub struct TargetingNode {
    config: TargetingNodeConfig,
    lock: LockManager,
    errors: ErrorComputer,
    depth: Option<Box<dyn DepthSource>>,

    publisher: Publisher,
    track_sub: Subscriber,
    cmd_sub: Subscriber,

    tracking_enabled: bool,
    current_tracks: Option<TrackList>,
    tick: u64,
}

impl TargetingNode {
    /// `depth` is the optional camera-bridge seam; without it range errors
    /// stay flagged invalid.
    pub fn new(config: TargetingNodeConfig, depth: Option<Box<dyn DepthSource>>) -> Result<Self> {
        let publisher = Publisher::new(ports::TARGETING).context("bind targeting publisher")?;
        let mut track_sub = Subscriber::new(&config.bus_host, ports::DETECTOR)
            .context("connect tracks subscriber")?;
        let mut cmd_sub = Subscriber::new(&config.bus_host, ports::FLIGHT_LINK)
            .context("connect command subscriber")?;
        track_sub.subscribe(topics::TRACKS);
        cmd_sub.subscribe(topics::QGC_CMDS);

        let lock = LockManager::new(config.lock.clone());
        let errors = ErrorComputer::new(config.intrinsics, config.range.clone());

        info!("targeting: node ready at {} Hz", config.update_rate_hz);
        Ok(Self {
            config,
            lock,
            errors,
            depth,
            publisher,
            track_sub,
            cmd_sub,
            tracking_enabled: false,
            current_tracks: None,
            tick: 0,
        })
    }

    pub async fn run(&mut self, run: Arc<AtomicBool>) -> Result<()> {
        let period = Duration::from_secs_f64(1.0 / self.config.update_rate_hz);

        while run.load(Ordering::Relaxed) {
            let loop_start = tokio::time::Instant::now();

            self.process_commands();
            self.process_tracks();

            if self.tracking_enabled && self.current_tracks.is_some() {
                self.compute_and_publish();
            } else {
                // Keep subscriber registrations flowing even while idle.
                self.publisher.poll();
            }

            self.tick += 1;
            let elapsed = loop_start.elapsed();
            if elapsed < period {
                tokio::time::sleep(period - elapsed).await;
            }
        }

        info!("targeting: node stopped");
        Ok(())
    }

    fn process_commands(&mut self) {
        while let Some((_, msg)) = self.cmd_sub.receive(Duration::ZERO) {
            if let BusMessage::Command(cmd) = msg {
                self.handle_command(cmd);
            }
        }
    }

    fn handle_command(&mut self, cmd: UserCommand) {
        info!("targeting: command {:?}", cmd);
        match cmd {
            UserCommand::StartTracking => {
                self.tracking_enabled = true;
            }
            UserCommand::StopTracking => {
                self.tracking_enabled = false;
                self.lock.clear_lock();
            }
            UserCommand::SelectTargetById { track_id } => {
                if let Some(tracks) = &self.current_tracks {
                    self.lock.select_by_id(track_id, &tracks.tracks);
                }
            }
            UserCommand::SelectTargetByPixel { u, v } => {
                if let Some(tracks) = &self.current_tracks {
                    self.lock.select_by_pixel(u as f64, v as f64, &tracks.tracks);
                }
            }
            UserCommand::SetDepthRange { min_m, max_m } => {
                self.errors.set_depth_range(min_m, max_m);
            }
            UserCommand::ClearLock => {
                self.lock.clear_lock();
            }
            UserCommand::RequestTrackList => {
                if let Some(tracks) = self.current_tracks.clone() {
                    self.publisher
                        .publish(topics::TRACKS, &BusMessage::Tracks(tracks));
                }
            }
        }
    }

    fn process_tracks(&mut self) {
        // Drain and keep only the freshest frame.
        while let Some((_, msg)) = self.track_sub.receive(Duration::ZERO) {
            if let BusMessage::Tracks(list) = msg {
                self.current_tracks = Some(list);
            }
        }
    }

    fn compute_and_publish(&mut self) {
        let Some(track_list) = self.current_tracks.clone() else {
            return;
        };

        let lock_state = self.lock.update(&track_list.tracks);
        self.publisher
            .publish(topics::LOCK_STATE, &BusMessage::Lock(lock_state.clone()));

        let locked_track = self.lock.get_locked_track(&track_list.tracks);

        let depth_m = match (self.depth.as_mut(), self.lock.locked_bbox()) {
            (Some(source), Some(bbox)) if locked_track.is_some() => {
                source.query_depth_roi(bbox.x1, bbox.y1, bbox.x2, bbox.y2)
            }
            _ => None,
        };

        let errors = self
            .errors
            .compute(locked_track, depth_m, lock_state.is_valid());
        self.publisher
            .publish(topics::ERRORS, &BusMessage::Errors(errors));

        if self.tick % 100 == 0 {
            debug!(
                "targeting: status={:?} yaw_err={:.3} pitch_err={:.3} depth={:?}",
                lock_state.status, errors.yaw_error_rad, errors.pitch_error_rad, depth_m
            );
        }
    }
}
