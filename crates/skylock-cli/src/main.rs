use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use skylock_control::{ControlConfig, ControlNode, ControlNodeConfig, SafetyConfig};
use skylock_failsafe::{FailsafeAction, FailsafeConfig};
use skylock_fclink::node::FlightLinkNode;
use skylock_fclink::offboard::OffboardConfig;
use skylock_fclink::telemetry::TelemetryConfig;
use skylock_fclink::FlightLinkConfig;
use skylock_proto::types::CameraIntrinsics;
use skylock_targeting::{LockConfig, RangeConfig, TargetingNode, TargetingNodeConfig};

#[derive(Debug, Parser)]
#[command(name = "skylock", version, about = "Skylock - vision-guided targeting and offboard control stack")]
struct Cli {
    /// Directory holding skylock.toml and modes/.
    #[arg(long, default_value = "configs")]
    config_dir: String,

    /// Profile under modes/ (bench or flight).
    #[arg(long, default_value = "bench")]
    mode: String,

    /// Override the ground-station / FC link host.
    #[arg(long)]
    gcs_ip: Option<String>,

    /// Log level when RUST_LOG is not set.
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the targeting node (lock + errors).
    Targeting,
    /// Run the control node (mapping + safety).
    Control,
    /// Run the flight-link node (offboard + telemetry).
    FlightLink,
    /// Run all nodes in one process (bench use).
    All,
    /// Validate the configuration and exit.
    Doctor,
}

// ---- configuration files ----

#[derive(Debug, serde::Deserialize)]
struct Config {
    bus: BusCfg,
    camera: CameraCfg,
    targeting: TargetingCfg,
    control: ControlCfg,
    fclink: FclinkCfg,
}

#[derive(Debug, serde::Deserialize)]
struct BusCfg {
    host: String,
}

#[derive(Debug, serde::Deserialize)]
struct CameraCfg {
    fx: f64,
    fy: f64,
    cx: f64,
    cy: f64,
    width: u32,
    height: u32,
}

#[derive(Debug, serde::Deserialize)]
struct TargetingCfg {
    update_rate_hz: f64,
    lock: LockConfig,
    range: RangeConfig,
}

#[derive(Debug, serde::Deserialize)]
struct ControlCfg {
    update_rate_hz: f64,
    gains: GainsCfg,
    deadband: DeadbandCfg,
}

#[derive(Debug, serde::Deserialize)]
struct GainsCfg {
    yaw_to_roll: f64,
    pitch_to_pitch: f64,
    range_to_thrust: f64,
}

#[derive(Debug, serde::Deserialize)]
struct DeadbandCfg {
    yaw_rad: f64,
    pitch_rad: f64,
    range_m: f64,
}

#[derive(Debug, serde::Deserialize)]
struct FclinkCfg {
    connection: String,
    host: String,
    port: u16,
    system_id: u8,
    component_id: u8,
    target_system: u8,
    target_component: u8,
    update_rate_hz: f64,
    heartbeat_timeout_ms: f64,
}

/// The per-profile overlay (modes/bench.toml, modes/flight.toml).
#[derive(Debug, serde::Deserialize)]
struct ModeConfig {
    control: ModeControlCfg,
    safety: SafetyConfig,
    offboard: OffboardConfig,
    failsafe: FailsafeConfig,
}

#[derive(Debug, serde::Deserialize)]
struct ModeControlCfg {
    thrust_enabled: bool,
    thrust_max: f64,
    roll_limit_deg: f64,
    pitch_limit_deg: f64,
}

fn load_config(dir: &str) -> Result<Config> {
    let path = Path::new(dir).join("skylock.toml");
    let s = std::fs::read_to_string(&path)
        .with_context(|| format!("read config {}", path.display()))?;
    toml::from_str(&s).with_context(|| format!("parse config {}", path.display()))
}

fn load_mode(dir: &str, mode: &str) -> Result<ModeConfig> {
    let path = Path::new(dir).join("modes").join(format!("{}.toml", mode));
    let s = std::fs::read_to_string(&path)
        .with_context(|| format!("read mode config {}", path.display()))?;
    let mut cfg: ModeConfig =
        toml::from_str(&s).with_context(|| format!("parse mode config {}", path.display()))?;

    // The bench profile is the hardware-in-loop safety net; no file gets to
    // weaken it.
    if mode == "bench" {
        cfg.safety.bench_mode = true;
        cfg.control.thrust_enabled = false;
        cfg.failsafe.action = FailsafeAction::Neutral;
    }
    Ok(cfg)
}

// ---- per-node config assembly ----

fn intrinsics(cfg: &Config) -> CameraIntrinsics {
    CameraIntrinsics {
        fx: cfg.camera.fx,
        fy: cfg.camera.fy,
        cx: cfg.camera.cx,
        cy: cfg.camera.cy,
        width: cfg.camera.width,
        height: cfg.camera.height,
    }
}

fn targeting_config(cfg: &Config) -> TargetingNodeConfig {
    TargetingNodeConfig {
        lock: cfg.targeting.lock.clone(),
        range: cfg.targeting.range.clone(),
        intrinsics: intrinsics(cfg),
        update_rate_hz: cfg.targeting.update_rate_hz,
        bus_host: cfg.bus.host.clone(),
    }
}

fn control_config(cfg: &Config, mode: &ModeConfig) -> ControlNodeConfig {
    ControlNodeConfig {
        control: ControlConfig {
            gains: skylock_control::ControlGains {
                yaw_to_roll: cfg.control.gains.yaw_to_roll,
                pitch_to_pitch: cfg.control.gains.pitch_to_pitch,
                range_to_thrust: cfg.control.gains.range_to_thrust,
            },
            limits: skylock_control::ControlLimits {
                roll_limit_deg: mode.control.roll_limit_deg,
                pitch_limit_deg: mode.control.pitch_limit_deg,
                thrust_min: 0.0,
                thrust_max: mode.control.thrust_max,
            },
            thrust_enabled: mode.control.thrust_enabled,
            yaw_deadband_rad: cfg.control.deadband.yaw_rad,
            pitch_deadband_rad: cfg.control.deadband.pitch_rad,
            range_deadband_m: cfg.control.deadband.range_m,
        },
        safety: mode.safety.clone(),
        update_rate_hz: cfg.control.update_rate_hz,
        bus_host: cfg.bus.host.clone(),
    }
}

fn flight_link_config(cfg: &Config, mode: &ModeConfig, gcs_ip: Option<&str>) -> FlightLinkConfig {
    FlightLinkConfig {
        connection: cfg.fclink.connection.clone(),
        host: gcs_ip.unwrap_or(&cfg.fclink.host).to_string(),
        port: cfg.fclink.port,
        system_id: cfg.fclink.system_id,
        component_id: cfg.fclink.component_id,
        target_system: cfg.fclink.target_system,
        target_component: cfg.fclink.target_component,
        update_rate_hz: cfg.fclink.update_rate_hz,
        track_timeout_ms: mode.safety.track_timeout_ms,
        offboard: mode.offboard.clone(),
        telemetry: TelemetryConfig {
            heartbeat_timeout_ms: cfg.fclink.heartbeat_timeout_ms,
        },
        failsafe: mode.failsafe.clone(),
    }
}

// ---- entry ----

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .init();

    let cfg = load_config(&cli.config_dir)?;
    let mode = load_mode(&cli.config_dir, &cli.mode)?;
    info!("skylock: mode={} config_dir={}", cli.mode, cli.config_dir);

    let run = Arc::new(AtomicBool::new(true));
    spawn_shutdown_watcher(Arc::clone(&run));

    match cli.cmd {
        Command::Targeting => {
            let mut node = TargetingNode::new(targeting_config(&cfg), None)?;
            node.run(run).await?;
        }
        Command::Control => {
            let mut node = ControlNode::new(control_config(&cfg, &mode))?;
            node.run(run).await?;
        }
        Command::FlightLink => {
            let fc = flight_link_config(&cfg, &mode, cli.gcs_ip.as_deref());
            let mut node = FlightLinkNode::new(fc, &cfg.bus.host)?;
            node.run(run).await?;
        }
        Command::All => run_all(&cfg, &mode, cli.gcs_ip.as_deref(), run).await?,
        Command::Doctor => doctor(&cfg, &mode, &cli.mode)?,
    }

    Ok(())
}

fn spawn_shutdown_watcher(run: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("skylock: shutdown signal received");
            run.store(false, Ordering::Relaxed);
        }
    });
}

/// Bench-style single-process deployment: every node as a task, same bus.
async fn run_all(
    cfg: &Config,
    mode: &ModeConfig,
    gcs_ip: Option<&str>,
    run: Arc<AtomicBool>,
) -> Result<()> {
    info!("skylock: starting all nodes");

    let mut targeting = TargetingNode::new(targeting_config(cfg), None)?;
    let mut control = ControlNode::new(control_config(cfg, mode))?;
    let mut fclink = FlightLinkNode::new(flight_link_config(cfg, mode, gcs_ip), &cfg.bus.host)?;

    let run_t = Arc::clone(&run);
    let run_c = Arc::clone(&run);
    let run_f = Arc::clone(&run);

    let targeting = tokio::spawn(async move { targeting.run(run_t).await });
    let control = tokio::spawn(async move { control.run(run_c).await });
    let fclink = tokio::spawn(async move { fclink.run(run_f).await });

    let (t, c, f) = tokio::try_join!(targeting, control, fclink).context("node task panicked")?;
    t?;
    c?;
    f?;
    Ok(())
}

fn doctor(cfg: &Config, mode: &ModeConfig, mode_name: &str) -> Result<()> {
    info!("doctor: checking configuration");

    anyhow::ensure!(cfg.camera.fx > 0.0 && cfg.camera.fy > 0.0, "camera focal lengths must be positive");
    anyhow::ensure!(
        cfg.camera.width > 0 && cfg.camera.height > 0,
        "camera resolution must be positive"
    );

    anyhow::ensure!(cfg.targeting.update_rate_hz > 0.0, "targeting.update_rate_hz invalid");
    anyhow::ensure!(cfg.control.update_rate_hz > 0.0, "control.update_rate_hz invalid");
    anyhow::ensure!(cfg.fclink.update_rate_hz > 0.0, "fclink.update_rate_hz invalid");

    anyhow::ensure!(
        cfg.targeting.lock.lock_timeout_ms < cfg.targeting.lock.reacquire_timeout_ms,
        "lock_timeout_ms must be below reacquire_timeout_ms"
    );
    anyhow::ensure!(
        cfg.targeting.range.min_range_m < cfg.targeting.range.max_range_m,
        "depth range bounds inverted"
    );

    anyhow::ensure!(
        mode.safety.roll_limit_deg > 0.0 && mode.safety.pitch_limit_deg > 0.0,
        "safety limits must be positive"
    );
    anyhow::ensure!(
        mode.safety.roll_slew_rate_deg_s > 0.0 && mode.safety.pitch_slew_rate_deg_s > 0.0,
        "slew rates must be positive"
    );
    anyhow::ensure!(
        mode.failsafe.track_lost_warning_ms < mode.failsafe.track_lost_failsafe_ms,
        "track warning threshold must be below failsafe threshold"
    );
    anyhow::ensure!(
        mode.failsafe.telemetry_lost_warning_ms < mode.failsafe.telemetry_lost_failsafe_ms,
        "telemetry warning threshold must be below failsafe threshold"
    );
    anyhow::ensure!(mode.offboard.setpoint_rate_hz >= 10.0, "offboard stream below 10 Hz will drop out");

    if mode_name == "bench" {
        anyhow::ensure!(mode.safety.bench_mode, "bench profile without bench_mode");
        anyhow::ensure!(!mode.control.thrust_enabled, "bench profile with thrust enabled");
    }
    if mode.control.thrust_enabled && mode.safety.bench_mode {
        warn!("doctor: thrust_enabled is ignored while bench_mode is set");
    }

    info!("doctor: OK");
    Ok(())
}
