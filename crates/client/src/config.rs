//! Connection configuration

use std::time::Duration;

/// Configuration for a [`crate::Client`].
#[derive(Debug, Clone)]
pub struct Config {
    /// WebSocket endpoint, e.g. `ws://localhost:8787/ws`.
    pub url: String,
    /// Auth token appended to the URL as a `token` query parameter.
    pub token: Option<String>,
    /// Delay before the first reconnect attempt; doubles per attempt.
    pub reconnect_initial_delay: Duration,
    /// Ceiling for the reconnect backoff.
    pub reconnect_max_delay: Duration,
    /// Give up after this many consecutive failed attempts. `None`
    /// retries forever.
    pub max_reconnect_attempts: Option<u32>,
}

impl Config {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
            reconnect_initial_delay: Duration::from_millis(500),
            reconnect_max_delay: Duration::from_secs(30),
            max_reconnect_attempts: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// The URL actually dialed, with the auth token percent-encoded in.
    pub(crate) fn request_url(&self) -> String {
        match &self.token {
            Some(token) => {
                let sep = if self.url.contains('?') { '&' } else { '?' };
                format!("{}{}token={}", self.url, sep, urlencoding::encode(token))
            }
            None => self.url.clone(),
        }
    }

    /// Backoff delay for the given consecutive failure count.
    pub(crate) fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.min(16);
        let delay = self
            .reconnect_initial_delay
            .saturating_mul(2u32.saturating_pow(exp));
        delay.min(self.reconnect_max_delay)
    }
}
