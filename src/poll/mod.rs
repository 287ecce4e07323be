//! Bounded waits for asynchronous convergence.
//!
//! Every wait in the crate goes through [`await_value`]: sleep the initial
//! delay, evaluate, then re-evaluate on a fixed interval until the probe is
//! ready or the timeout elapses. The probe is always evaluated one last time
//! at the deadline. There is no unbounded wait.

use std::future::Future;
use std::time::Duration;

use backon::{BackoffBuilder, ConstantBuilder};
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// Timing of one bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Upper bound on the whole wait, initial delay included.
    pub timeout: Duration,
    /// Pause between evaluations.
    pub interval: Duration,
    /// Pause before the first evaluation.
    pub delay: Duration,
}

impl PollSettings {
    pub fn new(timeout: Duration, interval: Duration, delay: Duration) -> Self {
        Self {
            timeout,
            interval,
            delay,
        }
    }

    /// Constant schedule covering the timeout, plus one slot for the
    /// evaluation at the deadline.
    fn schedule(&self) -> ConstantBuilder {
        let interval = self.interval.max(Duration::from_millis(1));
        let slots = (self.timeout.as_millis() / interval.as_millis()) as usize + 1;
        ConstantBuilder::default()
            .with_delay(interval)
            .with_max_times(slots)
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(30),
            Duration::from_millis(100),
            Duration::ZERO,
        )
    }
}

/// Outcome of one probe evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe<T> {
    Ready(T),
    /// Not converged yet, optionally describing what was observed.
    Pending(Option<String>),
}

impl<T> Probe<T> {
    pub fn pending() -> Self {
        Self::Pending(None)
    }

    pub fn observed(state: impl Into<String>) -> Self {
        Self::Pending(Some(state.into()))
    }
}

/// Result type for poll operations.
pub type Result<T> = std::result::Result<T, PollError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum PollError {
    #[error("Timed out after {waited:?} ({attempts} attempts) waiting for {alias}{}", describe(.last_observed))]
    Timeout {
        alias: String,
        waited: Duration,
        attempts: u32,
        last_observed: Option<String>,
    },
}

fn describe(last_observed: &Option<String>) -> String {
    match last_observed {
        Some(state) => format!("; last observed: {state}"),
        None => String::new(),
    }
}

/// Wait until `probe` yields a value.
///
/// Errors returned by the probe abort the wait immediately. On timeout the
/// error carries the most recent observation the probe reported.
#[tracing::instrument(
    name = "poll.await",
    skip(settings, probe),
    fields(timeout_ms = settings.timeout.as_millis() as u64)
)]
pub async fn await_value<T, E, F, Fut>(
    alias: &str,
    settings: &PollSettings,
    mut probe: F,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<Probe<T>, E>>,
    E: From<PollError>,
{
    let started = Instant::now();
    let deadline = started + settings.timeout;
    let mut attempts = 0u32;
    let mut last_observed = None;

    for pause in std::iter::once(settings.delay).chain(settings.schedule().build()) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let pause = pause.min(remaining);
        if !pause.is_zero() {
            sleep(pause).await;
        }

        attempts += 1;
        match probe().await? {
            Probe::Ready(value) => {
                debug!(attempts, elapsed = ?started.elapsed(), "Poll converged");
                return Ok(value);
            }
            Probe::Pending(observed) => {
                if observed.is_some() {
                    last_observed = observed;
                }
            }
        }

        if Instant::now() >= deadline {
            break;
        }
    }

    let waited = started.elapsed();
    warn!(
        attempts,
        waited = ?waited,
        last_observed = ?last_observed,
        "Poll timed out"
    );

    Err(PollError::Timeout {
        alias: alias.to_string(),
        waited,
        attempts,
        last_observed,
    }
    .into())
}

/// Wait until `predicate` returns true.
pub async fn await_until<F, Fut>(alias: &str, settings: &PollSettings, mut predicate: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    await_value(alias, settings, || {
        let ready = predicate();
        async move {
            Ok::<_, PollError>(if ready.await {
                Probe::Ready(())
            } else {
                Probe::pending()
            })
        }
    })
    .await
}
