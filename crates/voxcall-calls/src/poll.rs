//! Bounded polling with exponential backoff and jitter.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// How often and for how long [`poll_until`] probes.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Randomizes each delay by up to `±(jitter_factor * delay)`.
    pub jitter_factor: f32,
    /// Upper bound on probes, including the first.
    pub max_attempts: u32,
    /// Upper bound on the whole polling loop.
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            jitter_factor: 0.2,
            max_attempts: 60,
            timeout: Duration::from_secs(60),
        }
    }
}

impl PollPolicy {
    /// Delay to wait after the `attempt`-th probe (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self
            .initial_delay
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(10));
        let capped = base.min(self.max_delay);

        if self.jitter_factor <= 0.0 || capped.is_zero() {
            return capped;
        }
        let range = capped.as_millis() as f64 * f64::from(self.jitter_factor.min(1.0));
        let offset = rand::thread_rng().gen_range(-range..=range);
        let millis = (capped.as_millis() as f64 + offset).max(0.0);
        Duration::from_millis(millis as u64)
    }
}

/// Outcome of a single probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus<T> {
    Pending,
    Ready(T),
}

#[derive(Debug, Error)]
pub enum PollError<E> {
    #[error("still pending after {attempts} attempts ({elapsed:?})")]
    Timeout { attempts: u32, elapsed: Duration },
    #[error("{0}")]
    Probe(E),
}

/// Calls `probe` until it reports [`PollStatus::Ready`].
///
/// `probe` receives the 1-based attempt number. A probe error ends polling
/// immediately. Exhausting `max_attempts` or `timeout` yields
/// [`PollError::Timeout`].
pub async fn poll_until<T, E, F, Fut>(policy: &PollPolicy, mut probe: F) -> Result<T, PollError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<PollStatus<T>, E>>,
{
    let started = Instant::now();
    let deadline = started + policy.timeout;
    let mut attempts = 0;

    loop {
        attempts += 1;
        let remaining = deadline.saturating_duration_since(Instant::now());
        let status = match tokio::time::timeout(remaining, probe(attempts)).await {
            Ok(result) => result.map_err(PollError::Probe)?,
            Err(_) => {
                return Err(PollError::Timeout {
                    attempts,
                    elapsed: started.elapsed(),
                })
            }
        };

        if let PollStatus::Ready(value) = status {
            return Ok(value);
        }
        if attempts >= policy.max_attempts {
            return Err(PollError::Timeout {
                attempts,
                elapsed: started.elapsed(),
            });
        }

        let delay = policy.delay_for_attempt(attempts);
        if Instant::now() + delay >= deadline {
            tokio::time::sleep_until(deadline).await;
            return Err(PollError::Timeout {
                attempts,
                elapsed: started.elapsed(),
            });
        }
        tokio::time::sleep(delay).await;
    }
}
