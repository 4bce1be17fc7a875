use std::time::Duration;

const DEFAULT_URL: &str = "http://localhost:8080";
const DEFAULT_DIAL_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_RECONNECT_DELAY_MS: u64 = 1_000;
const DEFAULT_EVENT_BUFFER: usize = 1_024;

/// Connection settings for [`crate::Client`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Backend base URL (`http` or `https`); channel URLs are derived from it.
    pub url: String,
    pub dial_timeout_ms: u64,
    pub reconnect_delay_ms: u64,
    pub event_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            dial_timeout_ms: DEFAULT_DIAL_TIMEOUT_MS,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn from_env() -> Self {
        Self {
            url: std::env::var("RAFFLE_URL")
                .ok()
                .filter(|raw| !raw.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_URL.to_string()),
            dial_timeout_ms: read_ms("RAFFLE_DIAL_TIMEOUT_MS", DEFAULT_DIAL_TIMEOUT_MS),
            reconnect_delay_ms: read_ms("RAFFLE_RECONNECT_DELAY_MS", DEFAULT_RECONNECT_DELAY_MS),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms.max(1))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn event_capacity(&self) -> usize {
        if self.event_buffer == 0 {
            DEFAULT_EVENT_BUFFER
        } else {
            self.event_buffer
        }
    }
}

fn read_ms(key: &str, fallback: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse::<u64>().ok())
        .unwrap_or(fallback)
}
