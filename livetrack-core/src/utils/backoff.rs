use std::time::Duration;
use tinyrand::RandRange;
use tinyrand_std::thread_rand;

const JITTER_RESOLUTION: u64 = 1000;

/// Reconnect schedule of the realtime channel, modelled on the socket.io
/// client defaults (1s doubling up to 5s, ±50% jitter, unlimited attempts).
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub max_attempts: Option<u32>,
    pub delay_min: Duration,
    pub delay_max: Duration,
    pub randomization: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: None,
            delay_min: Duration::from_secs(1),
            delay_max: Duration::from_secs(5),
            randomization: 0.5,
        }
    }
}

impl ReconnectPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Whether another attempt may follow `attempt` failed ones.
    pub fn allows(&self, attempt: u32) -> bool {
        self.enabled && self.max_attempts.is_none_or(|max| attempt < max)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self
            .delay_min
            .saturating_mul(2u32.saturating_pow(attempt.min(16)))
            .min(self.delay_max);

        let randomization = self.randomization.clamp(0.0, 1.0);
        if randomization == 0.0 {
            return base;
        }

        let mut rng = thread_rand();
        let roll = rng.next_range(0..JITTER_RESOLUTION) as f64 / JITTER_RESOLUTION as f64;
        let deviation = base.mul_f64(roll * randomization);
        let jittered = if rng.next_range(0..2u64) == 0 {
            base.saturating_sub(deviation)
        } else {
            base.saturating_add(deviation)
        };
        jittered.min(self.delay_max)
    }
}
