//! Retrying remote calls with backoff.
//!
//! [`RetryInvoker`] runs an async call until it succeeds, the give-up
//! predicate rejects the error, the attempt budget is spent or the
//! wall-clock budget runs out. Between attempts it sleeps according to a
//! [`WaitStrategy`], optionally jittered.
//!
//! ```
//! use std::time::Duration;
//! use fleetbroker::shared::retry::{RetryInvoker, WaitStrategy};
//!
//! let invoker: RetryInvoker<String> = RetryInvoker::new(WaitStrategy::exponential())
//!     .max_tries(10)
//!     .max_time(Duration::from_secs(300))
//!     .should_giveup(|err: &String| !err.contains("unavailable"));
//! # let _ = invoker;
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use tokio::time::Instant;
use tracing::{debug, warn};

/// How long to wait before the next attempt, before jitter.
#[derive(Debug, Clone, PartialEq)]
pub enum WaitStrategy {
    /// `base * factor^n` for the n-th retry (0-based), capped at `max`.
    Exponential {
        /// Wait before the first retry.
        base: Duration,
        /// Growth per retry.
        factor: f64,
        /// Upper bound on a single wait.
        max: Option<Duration>,
    },
    /// The same wait every time.
    Constant(Duration),
}

impl WaitStrategy {
    /// One second, doubling, uncapped.
    pub fn exponential() -> Self {
        Self::Exponential {
            base: Duration::from_secs(1),
            factor: 2.0,
            max: None,
        }
    }

    /// The un-jittered wait before retry number `retry` (0-based).
    pub fn delay(&self, retry: u32) -> Duration {
        match self {
            Self::Constant(wait) => *wait,
            Self::Exponential { base, factor, max } => {
                let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
                let cap = max.unwrap_or(Duration::MAX);
                Duration::try_from_secs_f64(base.as_secs_f64() * factor.powi(exponent))
                    .map_or(cap, |wait| wait.min(cap))
            },
        }
    }
}

impl Default for WaitStrategy {
    fn default() -> Self {
        Self::exponential()
    }
}

/// Randomization applied on top of a [`WaitStrategy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Jitter {
    /// Uniform in `[0, wait]`.
    #[default]
    Full,
    /// Wait exactly as computed.
    None,
}

/// Progress of an invocation, handed to the event callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    /// Attempts made so far, including the current one.
    pub tries: u32,
    /// Time since the first attempt started.
    pub elapsed: Duration,
    /// The upcoming sleep, for backoff events.
    pub wait: Option<Duration>,
}

type GiveUp<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;
type Handler = Arc<dyn Fn(&RetryState) + Send + Sync>;

/// Runs a fallible async call with backoff between attempts.
///
/// Defaults: exponential waits with full jitter, no attempt or time
/// budget, every error retryable.
pub struct RetryInvoker<E> {
    wait: WaitStrategy,
    jitter: Jitter,
    max_tries: Option<u32>,
    max_time: Option<Duration>,
    should_giveup: GiveUp<E>,
    on_backoff: Option<Handler>,
    on_giveup: Option<Handler>,
    on_success: Option<Handler>,
    rng: Option<Arc<Mutex<StdRng>>>,
}

impl<E> RetryInvoker<E> {
    /// Creates an invoker using `wait` between attempts.
    pub fn new(wait: WaitStrategy) -> Self {
        Self {
            wait,
            jitter: Jitter::Full,
            max_tries: None,
            max_time: None,
            should_giveup: Arc::new(|_| false),
            on_backoff: None,
            on_giveup: None,
            on_success: None,
            rng: None,
        }
    }

    /// Sets the jitter mode.
    pub fn jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Caps the number of attempts, the first one included.
    pub fn max_tries(mut self, max_tries: u32) -> Self {
        self.max_tries = Some(max_tries);
        self
    }

    /// Caps the total time spent, measured from the first attempt.
    pub fn max_time(mut self, max_time: Duration) -> Self {
        self.max_time = Some(max_time);
        self
    }

    /// Errors for which `predicate` returns `true` are surfaced at once.
    pub fn should_giveup<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.should_giveup = Arc::new(predicate);
        self
    }

    /// Called before every sleep.
    pub fn on_backoff<F>(mut self, handler: F) -> Self
    where
        F: Fn(&RetryState) + Send + Sync + 'static,
    {
        self.on_backoff = Some(Arc::new(handler));
        self
    }

    /// Called once when an error is surfaced.
    pub fn on_giveup<F>(mut self, handler: F) -> Self
    where
        F: Fn(&RetryState) + Send + Sync + 'static,
    {
        self.on_giveup = Some(Arc::new(handler));
        self
    }

    /// Called once when the call succeeds.
    pub fn on_success<F>(mut self, handler: F) -> Self
    where
        F: Fn(&RetryState) + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(handler));
        self
    }

    /// Draws jitter from a generator seeded with `seed`.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Some(Arc::new(Mutex::new(StdRng::seed_from_u64(seed))));
        self
    }

    /// The wait before retry number `retry` (0-based), jitter applied.
    fn next_wait(&self, retry: u32) -> Duration {
        let wait = self.wait.delay(retry);
        match self.jitter {
            Jitter::None => wait,
            Jitter::Full => {
                let ceiling = u64::try_from(wait.as_nanos()).unwrap_or(u64::MAX);
                let nanos = match &self.rng {
                    Some(rng) => rng.lock().random_range(0..=ceiling),
                    None => rand::rng().random_range(0..=ceiling),
                };
                Duration::from_nanos(nanos)
            },
        }
    }

    fn notify(handler: Option<&Handler>, state: &RetryState) {
        if let Some(handler) = handler {
            handler(state);
        }
    }
}

impl<E: fmt::Display> RetryInvoker<E> {
    /// Calls `call` until it succeeds or the invoker gives up, returning
    /// the last error in the latter case.
    pub async fn invoke<T, F, Fut>(&self, mut call: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let start = Instant::now();
        let mut tries = 0u32;

        loop {
            tries = tries.saturating_add(1);
            let err = match call().await {
                Ok(value) => {
                    let state = RetryState {
                        tries,
                        elapsed: start.elapsed(),
                        wait: None,
                    };
                    Self::notify(self.on_success.as_ref(), &state);
                    return Ok(value);
                },
                Err(err) => err,
            };

            let elapsed = start.elapsed();
            let tries_spent = self.max_tries.is_some_and(|max| tries >= max);
            let time_spent = self.max_time.is_some_and(|max| elapsed >= max);
            if (self.should_giveup)(&err) || tries_spent || time_spent {
                warn!(tries, elapsed_ms = elapsed.as_millis() as u64, error = %err, "Giving up");
                let state = RetryState {
                    tries,
                    elapsed,
                    wait: None,
                };
                Self::notify(self.on_giveup.as_ref(), &state);
                return Err(err);
            }

            let mut wait = self.next_wait(tries - 1);
            if let Some(max) = self.max_time {
                wait = wait.min(max.saturating_sub(elapsed));
            }
            debug!(tries, wait_ms = wait.as_millis() as u64, error = %err, "Backing off");
            let state = RetryState {
                tries,
                elapsed,
                wait: Some(wait),
            };
            Self::notify(self.on_backoff.as_ref(), &state);
            tokio::time::sleep(wait).await;
        }
    }
}

impl<E> Clone for RetryInvoker<E> {
    fn clone(&self) -> Self {
        Self {
            wait: self.wait.clone(),
            jitter: self.jitter,
            max_tries: self.max_tries,
            max_time: self.max_time,
            should_giveup: Arc::clone(&self.should_giveup),
            on_backoff: self.on_backoff.clone(),
            on_giveup: self.on_giveup.clone(),
            on_success: self.on_success.clone(),
            rng: self.rng.clone(),
        }
    }
}

impl<E> fmt::Debug for RetryInvoker<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryInvoker")
            .field("wait", &self.wait)
            .field("jitter", &self.jitter)
            .field("max_tries", &self.max_tries)
            .field("max_time", &self.max_time)
            .field("seeded", &self.rng.is_some())
            .finish_non_exhaustive()
    }
}

impl<E> Default for RetryInvoker<E> {
    fn default() -> Self {
        Self::new(WaitStrategy::default())
    }
}
