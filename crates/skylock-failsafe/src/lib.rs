//! Cross-cutting failsafe state machine.
//!
//! Consumed by the flight link (which substitutes neutral setpoints into the
//! offboard stream while `should_command_neutral` holds) and indirectly by
//! control through the messages it sees.

use std::time::Instant;

use serde::Deserialize;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailsafeState {
    /// Normal operation.
    Nominal,
    /// Degraded inputs, continue with caution.
    Warning,
    /// Critical loss, command neutral.
    Failsafe,
    /// Inputs recovered, waiting for sustained confirmation.
    Recovery,
}

/// Terminal behavior once failsafe latches. The bench profile only ever
/// uses `Neutral`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailsafeAction {
    Neutral,
    Loiter,
    Rtl,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FailsafeConfig {
    pub track_lost_warning_ms: f64,
    pub track_lost_failsafe_ms: f64,
    pub telemetry_lost_warning_ms: f64,
    pub telemetry_lost_failsafe_ms: f64,
    /// How long conditions must stay nominal before Recovery completes.
    pub recovery_confirmation_ms: f64,
    pub action: FailsafeAction,
}

impl Default for FailsafeConfig {
    fn default() -> Self {
        Self {
            track_lost_warning_ms: 250.0,
            track_lost_failsafe_ms: 500.0,
            telemetry_lost_warning_ms: 500.0,
            telemetry_lost_failsafe_ms: 1000.0,
            recovery_confirmation_ms: 500.0,
            action: FailsafeAction::Neutral,
        }
    }
}

#[derive(Debug)]
pub struct FailsafeManager {
    config: FailsafeConfig,
    state: FailsafeState,
    last_track_ok: Option<Instant>,
    last_telem_ok: Option<Instant>,
    recovery_start: Option<Instant>,
}

impl FailsafeManager {
    pub fn new(config: FailsafeConfig) -> Self {
        Self {
            config,
            state: FailsafeState::Nominal,
            last_track_ok: None,
            last_telem_ok: None,
            recovery_start: None,
        }
    }

    /// Feed one tick of input validity and get the resulting state.
    pub fn update(&mut self, track_valid: bool, telemetry_valid: bool, lock_valid: bool) -> FailsafeState {
        let now = Instant::now();

        if track_valid && lock_valid {
            self.last_track_ok = Some(now);
        }
        if telemetry_valid {
            self.last_telem_ok = Some(now);
        }

        let track_elapsed = elapsed_ms(self.last_track_ok, now);
        let telem_elapsed = elapsed_ms(self.last_telem_ok, now);

        let desired = self.evaluate(track_elapsed, telem_elapsed);
        let next = self.transition(desired, now);

        if next != self.state {
            info!("failsafe: {:?} -> {:?}", self.state, next);
            self.state = next;
        }
        self.state
    }

    fn evaluate(&self, track_elapsed_ms: f64, telem_elapsed_ms: f64) -> FailsafeState {
        if track_elapsed_ms >= self.config.track_lost_failsafe_ms
            || telem_elapsed_ms >= self.config.telemetry_lost_failsafe_ms
        {
            return FailsafeState::Failsafe;
        }
        if track_elapsed_ms >= self.config.track_lost_warning_ms
            || telem_elapsed_ms >= self.config.telemetry_lost_warning_ms
        {
            return FailsafeState::Warning;
        }
        FailsafeState::Nominal
    }

    fn transition(&mut self, desired: FailsafeState, now: Instant) -> FailsafeState {
        use FailsafeState::*;
        match self.state {
            Nominal | Warning => match desired {
                // Escalation (and Warning's de-escalation) is immediate.
                Nominal | Warning | Failsafe => desired,
                Recovery => self.state,
            },
            Failsafe => {
                if desired == Nominal || desired == Warning {
                    self.recovery_start = Some(now);
                    Recovery
                } else {
                    Failsafe
                }
            }
            Recovery => match desired {
                Failsafe => {
                    self.recovery_start = None;
                    Failsafe
                }
                Nominal => {
                    let held_ms = self
                        .recovery_start
                        .map(|t| now.duration_since(t).as_secs_f64() * 1000.0)
                        .unwrap_or(0.0);
                    if held_ms >= self.config.recovery_confirmation_ms {
                        self.recovery_start = None;
                        Nominal
                    } else {
                        Recovery
                    }
                }
                _ => Recovery,
            },
        }
    }

    pub fn reset(&mut self) {
        self.state = FailsafeState::Nominal;
        self.recovery_start = None;
        let now = Instant::now();
        self.last_track_ok = Some(now);
        self.last_telem_ok = Some(now);
        info!("failsafe: reset");
    }

    pub fn state(&self) -> FailsafeState {
        self.state
    }

    pub fn action(&self) -> FailsafeAction {
        self.config.action
    }

    pub fn is_failsafe(&self) -> bool {
        matches!(self.state, FailsafeState::Failsafe | FailsafeState::Recovery)
    }

    /// While true the offboard stream carries the neutral setpoint no matter
    /// what control publishes.
    pub fn should_command_neutral(&self) -> bool {
        self.is_failsafe()
    }
}

fn elapsed_ms(since: Option<Instant>, now: Instant) -> f64 {
    match since {
        Some(t) => now.duration_since(t).as_secs_f64() * 1000.0,
        // Never-seen counts as infinitely stale.
        None => f64::INFINITY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    fn fast_config() -> FailsafeConfig {
        FailsafeConfig {
            track_lost_warning_ms: 30.0,
            track_lost_failsafe_ms: 60.0,
            telemetry_lost_warning_ms: 30.0,
            telemetry_lost_failsafe_ms: 60.0,
            recovery_confirmation_ms: 50.0,
            action: FailsafeAction::Neutral,
        }
    }

    #[test]
    fn starts_nominal_with_valid_inputs() {
        let mut fs = FailsafeManager::new(fast_config());
        assert_eq!(fs.update(true, true, true), FailsafeState::Nominal);
        assert!(!fs.should_command_neutral());
    }

    #[test]
    fn never_seen_inputs_go_straight_to_failsafe() {
        let mut fs = FailsafeManager::new(fast_config());
        assert_eq!(fs.update(false, false, false), FailsafeState::Failsafe);
    }

    #[test]
    fn track_loss_escalates_through_warning() {
        let mut fs = FailsafeManager::new(fast_config());
        fs.update(true, true, true);

        sleep(Duration::from_millis(40));
        assert_eq!(fs.update(false, true, true), FailsafeState::Warning);

        sleep(Duration::from_millis(40));
        assert_eq!(fs.update(false, true, true), FailsafeState::Failsafe);
        assert!(fs.should_command_neutral());
    }

    #[test]
    fn telemetry_loss_also_escalates() {
        let mut fs = FailsafeManager::new(fast_config());
        fs.update(true, true, true);
        sleep(Duration::from_millis(70));
        assert_eq!(fs.update(true, false, true), FailsafeState::Failsafe);
    }

    #[test]
    fn lock_invalid_counts_as_track_loss() {
        let mut fs = FailsafeManager::new(fast_config());
        fs.update(true, true, true);
        sleep(Duration::from_millis(70));
        // Track reports valid but the lock is gone: still stale.
        assert_eq!(fs.update(true, true, false), FailsafeState::Failsafe);
    }

    #[test]
    fn recovery_requires_sustained_nominal() {
        let mut fs = FailsafeManager::new(fast_config());
        fs.update(true, true, true);
        sleep(Duration::from_millis(70));
        assert_eq!(fs.update(false, true, true), FailsafeState::Failsafe);

        // Inputs return: Recovery, still commanding neutral.
        assert_eq!(fs.update(true, true, true), FailsafeState::Recovery);
        assert!(fs.should_command_neutral());

        // Not yet confirmed.
        sleep(Duration::from_millis(10));
        assert_eq!(fs.update(true, true, true), FailsafeState::Recovery);

        // Confirmation window elapsed.
        sleep(Duration::from_millis(60));
        assert_eq!(fs.update(true, true, true), FailsafeState::Nominal);
        assert!(!fs.should_command_neutral());
    }

    #[test]
    fn recovery_aborts_back_to_failsafe() {
        let mut fs = FailsafeManager::new(fast_config());
        fs.update(true, true, true);
        sleep(Duration::from_millis(70));
        fs.update(false, true, true);
        assert_eq!(fs.update(true, true, true), FailsafeState::Recovery);

        sleep(Duration::from_millis(70));
        assert_eq!(fs.update(false, true, true), FailsafeState::Failsafe);
    }

    #[test]
    fn failsafe_never_jumps_straight_to_nominal() {
        let mut fs = FailsafeManager::new(fast_config());
        fs.update(true, true, true);
        sleep(Duration::from_millis(70));
        assert_eq!(fs.update(false, true, true), FailsafeState::Failsafe);

        // However healthy the inputs, the first step out is Recovery.
        let next = fs.update(true, true, true);
        assert_ne!(next, FailsafeState::Nominal);
        assert_eq!(next, FailsafeState::Recovery);
    }

    #[test]
    fn warning_deescalates_immediately() {
        let mut fs = FailsafeManager::new(fast_config());
        fs.update(true, true, true);
        sleep(Duration::from_millis(40));
        assert_eq!(fs.update(false, true, true), FailsafeState::Warning);
        assert_eq!(fs.update(true, true, true), FailsafeState::Nominal);
    }

    #[test]
    fn reset_restores_nominal() {
        let mut fs = FailsafeManager::new(fast_config());
        fs.update(false, false, false);
        assert!(fs.is_failsafe());
        fs.reset();
        assert_eq!(fs.state(), FailsafeState::Nominal);
        assert_eq!(fs.update(true, true, true), FailsafeState::Nominal);
    }
}
