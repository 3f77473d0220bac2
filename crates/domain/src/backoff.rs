use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff: `base * multiplier^attempt`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub multiplier: f64,
    pub max: Duration,
    /// Fraction of the delay that may be added or removed at random, `0.0..=1.0`.
    pub jitter: f64,
}

impl BackoffPolicy {
    pub fn new(base: Duration, multiplier: f64, max: Duration) -> Self {
        Self {
            base,
            multiplier,
            max,
            jitter: 0.0,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Deterministic delay before retry number `attempt` (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(64) as i32);
        let millis = self.base.as_millis() as f64 * factor;
        let capped = millis.min(self.max.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// `delay_for_attempt` spread by `jitter`, never above `max`.
    pub fn jittered_delay<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        if self.jitter <= 0.0 {
            return delay;
        }
        let spread = rng.gen_range(-self.jitter..=self.jitter);
        let millis = (delay.as_millis() as f64 * (1.0 + spread)).max(0.0);
        Duration::from_millis(millis as u64).min(self.max)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), 2.0, Duration::from_secs(300)).with_jitter(0.2)
    }
}

/// Poll-forever connector state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "failures", rename_all = "UPPERCASE")]
pub enum ConnectorState {
    Active,
    /// `n` consecutive transient failures.
    Backoff(u32),
}

impl ConnectorState {
    pub fn on_success(self) -> Self {
        ConnectorState::Active
    }

    pub fn on_failure(self) -> Self {
        match self {
            ConnectorState::Active => ConnectorState::Backoff(1),
            ConnectorState::Backoff(n) => ConnectorState::Backoff(n.saturating_add(1)),
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, ConnectorState::Backoff(_))
    }

    /// Wait before the next poll: the regular interval when healthy, the
    /// backoff delay otherwise.
    pub fn next_delay(&self, poll_interval: Duration, policy: &BackoffPolicy) -> Duration {
        match self {
            ConnectorState::Active => poll_interval,
            ConnectorState::Backoff(n) => policy.delay_for_attempt(n.saturating_sub(1)),
        }
    }
}
