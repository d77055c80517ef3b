//! Kernel configuration.

use std::time::Duration;

/// Kernel-level configuration shared by the service container, the model
/// controller and the reconnection loop.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Identifier of this kernel, used in log fields.
    pub node_id: String,
    /// Upper bound for a service value resolution. `None` waits until the
    /// service settles or the caller cancels.
    pub resolve_timeout: Option<Duration>,
    /// How long `await_stability` and shutdown wait for the container to settle.
    pub stability_timeout: Duration,
    /// Retry behaviour of the reconnection loop.
    pub reconnect: ReconnectPolicy,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            resolve_timeout: Some(Duration::from_secs(30)),
            stability_timeout: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Retry policy for interrupted reconnection attempts.
///
/// Backoff doubles after every consecutive interrupt, starting at
/// `initial_backoff` and never exceeding `max_backoff`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_consecutive_interrupts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1_u32 << shift)
            .min(self.max_backoff)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_consecutive_interrupts: 5,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
        }
    }
}
