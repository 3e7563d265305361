//! Safety pipeline between the control mapper and the flight link.
//!
//! Every raw setpoint passes, in order: validity gate, EMA smoothing, slew
//! rate limiting, hard clamp, bench-mode thrust override.

use std::time::Instant;

use serde::Deserialize;
use tracing::{info, warn};

use skylock_proto::filters::{clamp, EmaFilter, SlewRateLimiter};
use skylock_proto::types::Setpoint;

#[derive(Debug, Clone, Deserialize)]
pub struct SafetyConfig {
    pub roll_ema_alpha: f64,
    pub pitch_ema_alpha: f64,
    pub roll_slew_rate_deg_s: f64,
    pub pitch_slew_rate_deg_s: f64,
    pub roll_limit_deg: f64,
    pub pitch_limit_deg: f64,
    pub track_timeout_ms: f64,
    pub telemetry_timeout_ms: f64,
    /// Thrust is forced to exactly zero while true. Hardware-in-loop
    /// invariant; do not route around.
    pub bench_mode: bool,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            roll_ema_alpha: 0.3,
            pitch_ema_alpha: 0.3,
            roll_slew_rate_deg_s: 30.0,
            pitch_slew_rate_deg_s: 20.0,
            roll_limit_deg: 20.0,
            pitch_limit_deg: 10.0,
            track_timeout_ms: 500.0,
            telemetry_timeout_ms: 1000.0,
            bench_mode: true,
        }
    }
}

#[derive(Debug)]
pub struct SafetyManager {
    config: SafetyConfig,

    roll_ema: EmaFilter,
    pitch_ema: EmaFilter,
    roll_slew: SlewRateLimiter,
    pitch_slew: SlewRateLimiter,

    last_valid: Option<Instant>,
    last_telemetry: Option<Instant>,
    failsafe_active: bool,
}

impl SafetyManager {
    pub fn new(config: SafetyConfig) -> Self {
        info!("safety: initialized (bench_mode={})", config.bench_mode);
        Self {
            roll_ema: EmaFilter::new(config.roll_ema_alpha),
            pitch_ema: EmaFilter::new(config.pitch_ema_alpha),
            roll_slew: SlewRateLimiter::new(config.roll_slew_rate_deg_s),
            pitch_slew: SlewRateLimiter::new(config.pitch_slew_rate_deg_s),
            last_valid: None,
            last_telemetry: None,
            failsafe_active: false,
            config,
        }
    }

    /// Run one raw setpoint through the pipeline.
    pub fn apply(
        &mut self,
        setpoint: &Setpoint,
        lock_valid: bool,
        track_fresh: bool,
        telemetry_fresh: bool,
    ) -> Setpoint {
        if telemetry_fresh {
            self.last_telemetry = Some(Instant::now());
        }

        if !self.gates_pass(lock_valid, track_fresh, telemetry_fresh) {
            return self.failsafe_setpoint();
        }

        self.last_valid = Some(Instant::now());
        self.failsafe_active = false;

        let roll = self.roll_ema.update(setpoint.roll_deg);
        let pitch = self.pitch_ema.update(setpoint.pitch_deg);

        let roll = self.roll_slew.update(roll);
        let pitch = self.pitch_slew.update(pitch);

        let roll = clamp(roll, -self.config.roll_limit_deg, self.config.roll_limit_deg);
        let pitch = clamp(pitch, -self.config.pitch_limit_deg, self.config.pitch_limit_deg);

        let thrust = if self.config.bench_mode { 0.0 } else { setpoint.thrust };

        Setpoint::new(roll, pitch, setpoint.yaw_deg, thrust)
    }

    fn gates_pass(&mut self, lock_valid: bool, track_fresh: bool, telemetry_fresh: bool) -> bool {
        if !lock_valid {
            if !self.failsafe_active {
                warn!("safety: lock invalid, holding neutral");
            }
            return false;
        }
        if !track_fresh {
            if !self.failsafe_active {
                warn!("safety: track stale, holding neutral");
            }
            return false;
        }

        // Own-stream freshness only; cross-cutting escalation belongs to the
        // failsafe manager.
        if let Some(last) = self.last_valid {
            let since_ms = last.elapsed().as_secs_f64() * 1000.0;
            if since_ms > self.config.track_timeout_ms {
                if !self.failsafe_active {
                    warn!("safety: track timeout ({:.0}ms), holding neutral", since_ms);
                }
                return false;
            }
        }

        if !telemetry_fresh {
            if let Some(last) = self.last_telemetry {
                let since_ms = last.elapsed().as_secs_f64() * 1000.0;
                if since_ms > self.config.telemetry_timeout_ms {
                    if !self.failsafe_active {
                        warn!("safety: telemetry timeout ({:.0}ms), holding neutral", since_ms);
                    }
                    return false;
                }
            }
        }

        true
    }

    /// Roll and pitch slew toward zero through the normal limiters so entry
    /// into failsafe is step-free; thrust cuts immediately.
    fn failsafe_setpoint(&mut self) -> Setpoint {
        self.failsafe_active = true;
        let roll = self.roll_slew.update(0.0);
        let pitch = self.pitch_slew.update(0.0);
        Setpoint::new(roll, pitch, 0.0, 0.0)
    }

    /// Snap everything to zero, bypassing smoothing and slew. Used at node
    /// shutdown so the final published setpoint is exactly neutral.
    pub fn force_neutral(&mut self) -> Setpoint {
        self.roll_ema.reset(Some(0.0));
        self.pitch_ema.reset(Some(0.0));
        self.roll_slew.reset(Some(0.0));
        self.pitch_slew.reset(Some(0.0));
        Setpoint::neutral()
    }

    pub fn reset(&mut self) {
        self.roll_ema.reset(None);
        self.pitch_ema.reset(None);
        self.roll_slew.reset(None);
        self.pitch_slew.reset(None);
        self.last_valid = None;
        self.last_telemetry = None;
        self.failsafe_active = false;
        info!("safety: reset");
    }

    pub fn is_failsafe_active(&self) -> bool {
        self.failsafe_active
    }

    pub fn bench_mode(&self) -> bool {
        self.config.bench_mode
    }

    pub fn set_bench_mode(&mut self, enabled: bool) {
        self.config.bench_mode = enabled;
        info!("safety: bench_mode={}", enabled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    fn manager() -> SafetyManager {
        SafetyManager::new(SafetyConfig {
            roll_ema_alpha: 0.5,
            pitch_ema_alpha: 0.5,
            ..SafetyConfig::default()
        })
    }

    fn sp(roll: f64, pitch: f64, thrust: f64) -> Setpoint {
        Setpoint::new(roll, pitch, 0.0, thrust)
    }

    #[test]
    fn roll_never_exceeds_limit() {
        let mut m = manager();
        for _ in 0..100 {
            let out = m.apply(&sp(50.0, 0.0, 0.0), true, true, true);
            assert!(out.roll_deg <= 20.0);
            sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn negative_roll_clamped() {
        let mut m = manager();
        for _ in 0..100 {
            let out = m.apply(&sp(-50.0, 0.0, 0.0), true, true, true);
            assert!(out.roll_deg >= -20.0);
            sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn pitch_never_exceeds_limit() {
        let mut m = manager();
        for _ in 0..100 {
            let out = m.apply(&sp(0.0, 30.0, 0.0), true, true, true);
            assert!(out.pitch_deg <= 10.0);
            sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn invalid_lock_enters_failsafe_with_zero_thrust() {
        let mut m = manager();
        let out = m.apply(&sp(15.0, 5.0, 0.5), false, true, true);
        assert!(m.is_failsafe_active());
        assert_eq!(out.thrust, 0.0);
    }

    #[test]
    fn stale_track_enters_failsafe() {
        let mut m = manager();
        m.apply(&sp(15.0, 5.0, 0.0), true, false, true);
        assert!(m.is_failsafe_active());
    }

    #[test]
    fn bench_mode_thrust_is_bit_zero() {
        let mut m = manager();
        for _ in 0..10 {
            let out = m.apply(&sp(5.0, 2.0, 1.0), true, true, true);
            assert_eq!(out.thrust.to_bits(), 0.0f64.to_bits());
        }
    }

    #[test]
    fn flight_mode_passes_thrust_through() {
        let mut m = SafetyManager::new(SafetyConfig {
            bench_mode: false,
            ..SafetyConfig::default()
        });
        let out = m.apply(&sp(0.0, 0.0, 0.42), true, true, true);
        assert_eq!(out.thrust, 0.42);
    }

    #[test]
    fn ema_converges_to_constant_input() {
        let mut m = manager();
        let mut last = 0.0;
        for _ in 0..50 {
            last = m.apply(&sp(10.0, 0.0, 0.0), true, true, true).roll_deg;
            sleep(Duration::from_millis(10));
        }
        assert!((last - 10.0).abs() < 1.0);
    }

    #[test]
    fn slew_bounds_consecutive_outputs() {
        let mut m = manager();
        // Settle at zero first.
        for _ in 0..10 {
            m.apply(&sp(0.0, 0.0, 0.0), true, true, true);
            sleep(Duration::from_millis(5));
        }
        // Step command; the output must move no faster than the slew rate.
        let start = Instant::now();
        let mut out = Setpoint::neutral();
        while start.elapsed() < Duration::from_millis(100) {
            out = m.apply(&sp(20.0, 0.0, 0.0), true, true, true);
            sleep(Duration::from_millis(10));
        }
        let allowed = 30.0 * start.elapsed().as_secs_f64() + 0.2;
        assert!(
            out.roll_deg <= allowed,
            "roll {} exceeded slew allowance {}",
            out.roll_deg,
            allowed
        );
        assert!(out.roll_deg < 15.0);
    }

    #[test]
    fn failsafe_ramps_toward_neutral_not_step() {
        let mut m = manager();
        // Build up some roll.
        for _ in 0..30 {
            m.apply(&sp(15.0, 0.0, 0.0), true, true, true);
            sleep(Duration::from_millis(5));
        }
        let before = m.apply(&sp(15.0, 0.0, 0.0), true, true, true);
        assert!(before.roll_deg > 2.0);

        // Gate closes: output decays through the slew limiter.
        let after = m.apply(&sp(15.0, 0.0, 0.0), false, true, true);
        assert!(after.roll_deg > 0.0);
        assert!(after.roll_deg <= before.roll_deg);
        assert_eq!(after.thrust, 0.0);
    }

    #[test]
    fn recovery_continues_from_current_state() {
        let mut m = manager();
        for _ in 0..20 {
            m.apply(&sp(10.0, 0.0, 0.0), true, true, true);
            sleep(Duration::from_millis(5));
        }
        m.apply(&sp(10.0, 0.0, 0.0), false, true, true);
        let resumed = m.apply(&sp(10.0, 0.0, 0.0), true, true, true);
        // No reset to zero on recovery; the filters keep their state.
        assert!(resumed.roll_deg > 1.0);
        assert!(!m.is_failsafe_active());
    }

    #[test]
    fn force_neutral_is_exact_and_immediate() {
        let mut m = manager();
        for _ in 0..20 {
            m.apply(&sp(18.0, 8.0, 0.0), true, true, true);
            sleep(Duration::from_millis(5));
        }
        let out = m.force_neutral();
        assert_eq!(out.roll_deg, 0.0);
        assert_eq!(out.pitch_deg, 0.0);
        assert_eq!(out.thrust, 0.0);
    }

    #[test]
    fn reset_clears_failsafe_latch() {
        let mut m = manager();
        m.apply(&sp(5.0, 0.0, 0.0), false, true, true);
        assert!(m.is_failsafe_active());
        m.reset();
        assert!(!m.is_failsafe_active());
    }
}
