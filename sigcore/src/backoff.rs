use std::time::Duration;

pub const DEFAULT_RECONNECT_BASE: Duration = Duration::from_secs(1);
pub const DEFAULT_RECONNECT_MAX: Duration = Duration::from_secs(30);

/// Exponential reconnect delay: `min(max, base * 2^attempt)`.
///
/// `attempt` is the number of failed cycles since the last successful open,
/// so the first reconnect after a drop waits `base`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl ReconnectPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RECONNECT_BASE, DEFAULT_RECONNECT_MAX)
    }
}
