//! Control node: maps the freshest errors through the safety pipeline and
//! publishes setpoints.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info};

use skylock_bus::{ports, topics, Publisher, Subscriber};
use skylock_proto::types::{BusMessage, Errors, Setpoint};

use crate::mapper::{ControlConfig, ControlMapper};
use crate::safety::{SafetyConfig, SafetyManager};

#[derive(Debug, Clone)]
pub struct ControlNodeConfig {
    pub control: ControlConfig,
    pub safety: SafetyConfig,
    pub update_rate_hz: f64,
    pub bus_host: String,
}

pub struct ControlNode {
    config: ControlNodeConfig,
    mapper: ControlMapper,
    safety: SafetyManager,

    publisher: Publisher,
    error_sub: Subscriber,

    last_errors: Option<Errors>,
    tick: u64,
}

impl ControlNode {
    pub fn new(config: ControlNodeConfig) -> Result<Self> {
        let publisher = Publisher::new(ports::CONTROL).context("bind control publisher")?;
        let mut error_sub = Subscriber::new(&config.bus_host, ports::TARGETING)
            .context("connect errors subscriber")?;
        error_sub.subscribe(topics::ERRORS);

        let mapper = ControlMapper::new(config.control.clone());
        let safety = SafetyManager::new(config.safety.clone());

        info!(
            "control: node ready at {} Hz (bench={})",
            config.update_rate_hz, config.safety.bench_mode
        );
        Ok(Self {
            config,
            mapper,
            safety,
            publisher,
            error_sub,
            last_errors: None,
            tick: 0,
        })
    }

    pub async fn run(&mut self, run: Arc<AtomicBool>) -> Result<()> {
        let period = Duration::from_secs_f64(1.0 / self.config.update_rate_hz);

        while run.load(Ordering::Relaxed) {
            let loop_start = tokio::time::Instant::now();

            self.receive_errors();
            let setpoint = self.compute_setpoint();
            self.publisher
                .publish(topics::SETPOINTS, &BusMessage::Setpoint(setpoint));

            self.tick += 1;
            if self.tick % 100 == 0 {
                self.log_status(&setpoint);
            }

            let elapsed = loop_start.elapsed();
            if elapsed < period {
                tokio::time::sleep(period - elapsed).await;
            }
        }

        // The last message downstream sees must be exactly neutral.
        let neutral = self.safety.force_neutral();
        self.publisher
            .publish(topics::SETPOINTS, &BusMessage::Setpoint(neutral));
        info!("control: node stopped, neutral published");
        Ok(())
    }

    fn receive_errors(&mut self) {
        while let Some((_, msg)) = self.error_sub.receive(Duration::ZERO) {
            if let BusMessage::Errors(errors) = msg {
                self.last_errors = Some(errors);
            }
        }
    }

    fn compute_setpoint(&mut self) -> Setpoint {
        let Some(errors) = self.last_errors else {
            return Setpoint::neutral();
        };

        let raw = self.mapper.map(&errors);
        self.safety.apply(
            &raw,
            errors.lock_valid,
            errors.track_valid,
            // Telemetry freshness is escalated by the failsafe manager on
            // the flight link; this node gates only on its own stream.
            true,
        )
    }

    fn log_status(&self, setpoint: &Setpoint) {
        if let Some(e) = &self.last_errors {
            debug!(
                "control: tick {} yaw_err={:.3} pitch_err={:.3} -> roll={:.1} pitch={:.1} thrust={:.2}",
                self.tick, e.yaw_error_rad, e.pitch_error_rad,
                setpoint.roll_deg, setpoint.pitch_deg, setpoint.thrust
            );
        }
    }
}
