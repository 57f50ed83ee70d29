use std::time::Duration;

use rand::Rng;

use crate::config::ReconnectConfig;

/// Reconnect delay generator.
///
/// The base delay grows by `multiplier` per failed attempt and is capped at
/// `max`. Jitter only ever adds to the base, and each delay is clamped to be
/// at least the previous one, so the sequence never decreases until it
/// reaches the cap.
#[derive(Debug)]
pub struct Backoff {
    config: ReconnectConfig,
    attempt: u32,
    last: Duration,
}

impl Backoff {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt: 0,
            last: Duration::ZERO,
        }
    }

    /// Consecutive failed attempts since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn next_delay(&mut self) -> Duration {
        let max = self.config.max.as_secs_f64();
        let exponent = i32::try_from(self.attempt).unwrap_or(i32::MAX);
        let base = (self.config.initial.as_secs_f64() * self.config.multiplier.powi(exponent))
            .min(max);

        let spread = base * self.config.jitter;
        let jitter = if spread > 0.0 {
            rand::thread_rng().gen_range(0.0..=spread)
        } else {
            0.0
        };

        let delay = Duration::from_secs_f64((base + jitter).min(max)).max(self.last);
        self.attempt = self.attempt.saturating_add(1);
        self.last = delay;
        delay
    }

    /// Called once the channel reaches `ready`.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.last = Duration::ZERO;
    }
}
