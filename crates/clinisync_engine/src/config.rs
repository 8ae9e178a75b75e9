//! Configuration for the sync engine.

use rand::Rng;
use std::time::Duration;

/// Configuration for the whole engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Connectivity monitor settings.
    pub connectivity: ConnectivityConfig,
    /// Retry backoff settings.
    pub retry: RetryConfig,
    /// Upper bound for a single dispatch call.
    pub dispatch_timeout: Duration,
    /// Safety-net interval at which the runner drives the queue even
    /// without any event.
    pub tick_interval: Duration,
}

impl EngineConfig {
    /// Creates a configuration with default settings.
    pub fn new() -> Self {
        Self {
            connectivity: ConnectivityConfig::default(),
            retry: RetryConfig::default(),
            dispatch_timeout: Duration::from_secs(30),
            tick_interval: Duration::from_secs(30),
        }
    }

    /// Sets the connectivity configuration.
    pub fn with_connectivity(mut self, connectivity: ConnectivityConfig) -> Self {
        self.connectivity = connectivity;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the dispatch timeout.
    pub fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = timeout;
        self
    }

    /// Sets the periodic tick interval.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the connectivity monitor.
#[derive(Debug, Clone)]
pub struct ConnectivityConfig {
    /// How long the raw signal must stay online before online is published.
    pub debounce: Duration,
    /// Whether the platform link is considered up at start.
    pub initially_online: bool,
}

impl ConnectivityConfig {
    /// Creates a new connectivity configuration.
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            initially_online: false,
        }
    }

    /// Starts with the link up and online already published.
    pub fn with_initially_online(mut self, online: bool) -> Self {
        self.initially_online = online;
        self
    }
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

/// Configuration for retry behavior after transient failures.
///
/// Transient failures are retried indefinitely; only the spacing between
/// attempts is configurable.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Maximum delay between retries, before jitter.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% random jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Calculates the delay after `attempt` failed attempts.
    ///
    /// `attempt` 0 means nothing failed yet and yields no delay.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen::<f64>();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}
