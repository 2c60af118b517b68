//! Configuration for the client and the event loop.
//!
//! Both structs deserialize from JSON with every field optional; missing
//! fields take the defaults below. `validate` rejects values the runtime
//! cannot work with.

use std::time::Duration;

use serde::Deserialize;

use crate::error::CoreError;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    /// `http://host[:port][/prefix]`; resources are appended to it.
    pub base_url: String,
    /// Maximum number of parallel physical connections.
    pub pool_size: usize,
    /// Maximum number of requests waiting for a connection, 0 = unbounded.
    pub queue_bound: usize,
    /// Timeout for requests that do not set their own.
    pub default_timeout_ms: Option<u64>,
    /// Announce large bodies with `Expect: 100-continue`.
    pub expect_100_continue: bool,
    /// Body size from which the `Expect` header is sent.
    pub expect_100_threshold: usize,
    /// How long to wait for `100 Continue` before sending the body anyway.
    pub continue_timeout_ms: u64,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            pool_size: 4,
            queue_bound: 32,
            default_timeout_ms: None,
            expect_100_continue: true,
            expect_100_threshold: 1024,
            continue_timeout_ms: 1000,
        }
    }
}

impl HttpClientConfig {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            ..Self::default()
        }
    }

    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn queue_bound(mut self, queue_bound: usize) -> Self {
        self.queue_bound = queue_bound;
        self
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn from_json(raw: &str) -> Result<Self, CoreError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.pool_size == 0 {
            return Err(CoreError::InvalidConfig("pool_size must be positive".to_string()));
        }
        if self.base_url.is_empty() {
            return Err(CoreError::InvalidConfig("base_url is required".to_string()));
        }
        Ok(())
    }

    pub fn default_timeout_duration(&self) -> Option<Duration> {
        self.default_timeout_ms.map(Duration::from_millis)
    }

    pub fn continue_timeout(&self) -> Duration {
        Duration::from_millis(self.continue_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MessageLoopConfig {
    /// Worker threads started by `MessageLoop::start`.
    pub threads: usize,
    /// Consecutive `process_one` calls granted to a ready source before the
    /// loop moves on.
    pub max_iterations: usize,
    /// Upper bound on one wait, so shutdown is noticed even without a wakeup.
    pub poll_timeout_ms: u64,
}

impl Default for MessageLoopConfig {
    fn default() -> Self {
        Self {
            threads: 1,
            max_iterations: 64,
            poll_timeout_ms: 100,
        }
    }
}

impl MessageLoopConfig {
    pub fn from_json(raw: &str) -> Result<Self, CoreError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.threads == 0 {
            return Err(CoreError::InvalidConfig("threads must be positive".to_string()));
        }
        if self.max_iterations == 0 {
            return Err(CoreError::InvalidConfig("max_iterations must be positive".to_string()));
        }
        Ok(())
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}
