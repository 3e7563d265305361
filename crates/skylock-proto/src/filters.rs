//! Signal conditioning used by the safety pipeline and the battery bridge
//! contract.

use std::time::Instant;

/// Exponential moving average: `y <- alpha * x + (1 - alpha) * y`.
///
/// Higher alpha = faster response, less smoothing. The first sample passes
/// through unfiltered.
#[derive(Debug, Clone)]
pub struct EmaFilter {
    alpha: f64,
    value: Option<f64>,
}

impl EmaFilter {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, value: None }
    }

    pub fn update(&mut self, x: f64) -> f64 {
        let y = match self.value {
            None => x,
            Some(prev) => self.alpha * x + (1.0 - self.alpha) * prev,
        };
        self.value = Some(y);
        y
    }

    pub fn reset(&mut self, value: Option<f64>) {
        self.value = value;
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

/// Bounds the rate of change of a signal to `max_rate` units per second.
#[derive(Debug, Clone)]
pub struct SlewRateLimiter {
    max_rate: f64,
    last_value: Option<f64>,
    last_time: Option<Instant>,
}

impl SlewRateLimiter {
    pub fn new(max_rate: f64) -> Self {
        Self {
            max_rate,
            last_value: None,
            last_time: None,
        }
    }

    /// Rate-limit with wall-clock dt since the previous update.
    pub fn update(&mut self, value: f64) -> f64 {
        let now = Instant::now();
        let dt = self.last_time.map(|t| now.duration_since(t).as_secs_f64());
        self.last_time = Some(now);
        self.step(value, dt)
    }

    /// Rate-limit with an explicit dt (seconds). Does not touch the wall
    /// clock; timing-sensitive tests use this.
    pub fn update_with_dt(&mut self, value: f64, dt: f64) -> f64 {
        self.step(value, Some(dt))
    }

    fn step(&mut self, value: f64, dt: Option<f64>) -> f64 {
        let last = match self.last_value {
            None => {
                self.last_value = Some(value);
                return value;
            }
            Some(v) => v,
        };

        let dt = match dt {
            Some(dt) if dt > 0.0 => dt,
            _ => return last,
        };

        let max_change = self.max_rate * dt;
        let delta = (value - last).clamp(-max_change, max_change);
        let out = last + delta;
        self.last_value = Some(out);
        out
    }

    pub fn reset(&mut self, value: Option<f64>) {
        self.last_value = value;
        self.last_time = value.map(|_| Instant::now());
    }

    pub fn value(&self) -> Option<f64> {
        self.last_value
    }
}

/// Digital debouncer: the output only follows the input once it has been
/// stable for `debounce_ms`.
#[derive(Debug, Clone)]
pub struct Debouncer {
    debounce_ms: f64,
    current: Option<bool>,
    pending: Option<bool>,
    pending_since: Option<Instant>,
}

impl Debouncer {
    pub fn new(debounce_ms: f64) -> Self {
        Self {
            debounce_ms,
            current: None,
            pending: None,
            pending_since: None,
        }
    }

    pub fn update(&mut self, value: bool) -> bool {
        let current = match self.current {
            None => {
                self.current = Some(value);
                return value;
            }
            Some(c) => c,
        };

        if value == current {
            self.pending = None;
            self.pending_since = None;
            return current;
        }

        if self.pending != Some(value) {
            self.pending = Some(value);
            self.pending_since = Some(Instant::now());
            return current;
        }

        if let Some(since) = self.pending_since {
            if since.elapsed().as_secs_f64() * 1000.0 >= self.debounce_ms {
                self.current = Some(value);
                self.pending = None;
                self.pending_since = None;
                return value;
            }
        }
        current
    }

    pub fn reset(&mut self, value: Option<bool>) {
        self.current = value;
        self.pending = None;
        self.pending_since = None;
    }

    pub fn state(&self) -> Option<bool> {
        self.current
    }
}

/// First-order low-pass filter parameterized by cutoff and sample rate.
#[derive(Debug, Clone)]
pub struct LowPassFilter {
    alpha: f64,
    value: Option<f64>,
}

impl LowPassFilter {
    pub fn new(cutoff_freq_hz: f64, sample_rate_hz: f64) -> Self {
        let rc = 1.0 / (2.0 * std::f64::consts::PI * cutoff_freq_hz);
        let dt = 1.0 / sample_rate_hz;
        Self {
            alpha: dt / (rc + dt),
            value: None,
        }
    }

    pub fn update(&mut self, x: f64) -> f64 {
        let y = match self.value {
            None => x,
            Some(prev) => self.alpha * x + (1.0 - self.alpha) * prev,
        };
        self.value = Some(y);
        y
    }

    pub fn reset(&mut self, value: Option<f64>) {
        self.value = value;
    }
}

pub fn clamp(value: f64, min_val: f64, max_val: f64) -> f64 {
    value.max(min_val).min(max_val)
}

/// Magnitudes at or below the threshold become exactly zero.
pub fn deadband(value: f64, threshold: f64) -> f64 {
    if value.abs() <= threshold {
        0.0
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ema_first_sample_passes_through() {
        let mut f = EmaFilter::new(0.3);
        assert_eq!(f.update(10.0), 10.0);
    }

    #[test]
    fn ema_converges_to_constant_input() {
        let mut f = EmaFilter::new(0.3);
        let mut y = 0.0;
        for _ in 0..60 {
            y = f.update(10.0);
        }
        assert!((y - 10.0).abs() < 1e-6);
    }

    #[test]
    fn ema_reset_clears_state() {
        let mut f = EmaFilter::new(0.5);
        f.update(8.0);
        f.reset(None);
        assert_eq!(f.update(2.0), 2.0);
    }

    #[test]
    fn slew_first_sample_passes_through() {
        let mut s = SlewRateLimiter::new(30.0);
        assert_eq!(s.update_with_dt(17.0, 0.01), 17.0);
    }

    #[test]
    fn slew_limits_rate_of_change() {
        let mut s = SlewRateLimiter::new(30.0);
        s.reset(Some(0.0));
        // 30 units/s over 10 ms allows 0.3 per step.
        let y = s.update_with_dt(20.0, 0.01);
        assert!((y - 0.3).abs() < 1e-9);
        let y = s.update_with_dt(20.0, 0.01);
        assert!((y - 0.6).abs() < 1e-9);
    }

    #[test]
    fn slew_symmetric_downwards() {
        let mut s = SlewRateLimiter::new(10.0);
        s.reset(Some(5.0));
        let y = s.update_with_dt(-5.0, 0.1);
        assert!((y - 4.0).abs() < 1e-9);
    }

    #[test]
    fn slew_zero_dt_holds_value() {
        let mut s = SlewRateLimiter::new(10.0);
        s.reset(Some(3.0));
        assert_eq!(s.update_with_dt(100.0, 0.0), 3.0);
    }

    #[test]
    fn slew_small_step_unclipped() {
        let mut s = SlewRateLimiter::new(30.0);
        s.reset(Some(0.0));
        let y = s.update_with_dt(0.1, 0.1);
        assert!((y - 0.1).abs() < 1e-9);
    }

    #[test]
    fn debouncer_ignores_short_glitch() {
        let mut d = Debouncer::new(50.0);
        assert!(!d.update(false));
        // Glitch shorter than the window does not flip the output.
        assert!(!d.update(true));
        assert!(!d.update(false));
        assert_eq!(d.state(), Some(false));
    }

    #[test]
    fn debouncer_follows_stable_change() {
        let mut d = Debouncer::new(5.0);
        assert!(!d.update(false));
        assert!(!d.update(true));
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(d.update(true));
    }

    #[test]
    fn clamp_bounds() {
        assert_eq!(clamp(5.0, -1.0, 1.0), 1.0);
        assert_eq!(clamp(-5.0, -1.0, 1.0), -1.0);
        assert_eq!(clamp(0.5, -1.0, 1.0), 0.5);
    }

    #[test]
    fn deadband_boundary_is_zero() {
        assert_eq!(deadband(0.02, 0.02), 0.0);
        assert_eq!(deadband(-0.02, 0.02), 0.0);
        // One ULP above the threshold passes through.
        let above = f64::from_bits(0.02f64.to_bits() + 1);
        assert_eq!(deadband(above, 0.02), above);
        assert_eq!(deadband(0.5, 0.02), 0.5);
    }

    #[test]
    fn lowpass_tracks_constant() {
        let mut f = LowPassFilter::new(5.0, 100.0);
        let mut y = 0.0;
        for _ in 0..400 {
            y = f.update(1.0);
        }
        assert!((y - 1.0).abs() < 1e-3);
    }
}
