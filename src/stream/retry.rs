//! Reconnection and liveness policy.
//!
//! Pure configuration: the policy never holds per-endpoint state, the
//! endpoint's retry count is passed in by the supervisor.

use rand::Rng;
use std::time::Duration;

/// What an idle connection should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Healthy,
    /// Idle long enough to send a probe
    Probe,
    /// Idle past the dead threshold; treat as a failed connection
    Dead,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay indexed by consecutive failures, last entry repeats
    pub backoff: Vec<Duration>,
    /// Maximum random extra delay, as a percentage of the table value
    pub jitter_percent: u8,
    /// Retry count above which the endpoint is dropped
    pub ceiling: u32,
    /// Idle time after which a ping is sent
    pub ping_after: Duration,
    /// Idle time after which the connection is considered dead
    pub dead_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::with_table(
            [1, 2, 4, 8, 16, 32]
                .into_iter()
                .map(Duration::from_secs)
                .collect(),
        )
    }
}

impl RetryPolicy {
    /// Policy over `backoff` with ceiling at twice the table length
    pub fn with_table(backoff: Vec<Duration>) -> Self {
        let ceiling = u32::try_from(backoff.len().saturating_mul(2)).unwrap_or(u32::MAX);
        Self {
            backoff,
            jitter_percent: 20,
            ceiling,
            ping_after: Duration::from_secs(60),
            dead_after: Duration::from_secs(180),
        }
    }

    pub fn with_jitter_percent(mut self, jitter_percent: u8) -> Self {
        self.jitter_percent = jitter_percent.min(100);
        self
    }

    pub fn with_ceiling(mut self, ceiling: u32) -> Self {
        self.ceiling = ceiling;
        self
    }

    pub fn with_liveness(mut self, ping_after: Duration, dead_after: Duration) -> Self {
        self.ping_after = ping_after;
        self.dead_after = dead_after.max(ping_after);
        self
    }

    /// Table delay for the given retry count, without jitter
    pub fn base_delay(&self, retry_count: u32) -> Duration {
        let Some(last) = self.backoff.len().checked_sub(1) else {
            return Duration::ZERO;
        };
        let index = usize::try_from(retry_count).map_or(last, |i| i.min(last));
        self.backoff[index]
    }

    /// Delay before the next attempt: table value plus up to
    /// `jitter_percent`% of it
    pub fn next_delay(&self, retry_count: u32) -> Duration {
        let base = self.base_delay(retry_count);
        let max_jitter = base.as_millis() * u128::from(self.jitter_percent) / 100;
        let max_jitter = u64::try_from(max_jitter).unwrap_or(u64::MAX);
        if max_jitter == 0 {
            return base;
        }

        let jitter = rand::thread_rng().gen_range(0..=max_jitter);
        base.saturating_add(Duration::from_millis(jitter))
    }

    pub const fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count > self.ceiling
    }

    pub fn liveness(&self, idle: Duration, probe_outstanding: bool) -> Liveness {
        if idle >= self.dead_after {
            Liveness::Dead
        } else if idle >= self.ping_after && !probe_outstanding {
            Liveness::Probe
        } else {
            Liveness::Healthy
        }
    }
}
