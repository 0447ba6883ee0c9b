//! Reconnect backoff tuning (§4.7): "Reconnect uses exponential backoff
//! capped at ≈2⁹ seconds." Modeled as a plain config struct queried by the
//! reconnect loop on each attempt — a stateless delay function rather than
//! a framework-managed timer resource, since there is no host application
//! loop to hang a `Timer` off of outside an ECS app.

use std::time::Duration;

/// `delay = base * factor^min(attempt, max_exponent)`.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectSettings {
    pub base: Duration,
    pub factor: f64,
    pub max_exponent: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(250),
            factor: 2.0,
            max_exponent: 9,
        }
    }
}

impl ReconnectSettings {
    /// The delay to wait before the `attempt`'th reconnect try (0-indexed:
    /// `attempt == 0` is the first retry after an initial failure).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(self.max_exponent);
        let scale = self.factor.powi(exponent as i32);
        self.base.mul_f64(scale)
    }
}
