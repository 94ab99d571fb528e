use std::time::Duration;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_WAIT: Duration = Duration::from_secs(2);

/// Fixed-wait retry schedule for transient Notion failures.
///
/// `max_retries` counts additional attempts, so a policy of 3 sends at most
/// four requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            wait: DEFAULT_RETRY_WAIT,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, wait: Duration) -> Self {
        Self { max_retries, wait }
    }

    /// Delay before the next attempt after an HTTP failure.
    pub fn wait_for(&self, status: u16, retry_after_header: Option<&str>) -> Duration {
        if status == 429 {
            retry_after(retry_after_header, self.wait)
        } else {
            self.wait
        }
    }
}

/// 429 and every 5xx are worth another attempt.
pub fn should_retry(status: u16) -> bool {
    status == 429 || status >= 500
}

/// Parses a `Retry-After` header given in whole seconds.
///
/// HTTP-date values, zero, negatives and garbage all yield `fallback`.
pub fn retry_after(value: Option<&str>, fallback: Duration) -> Duration {
    match value.map(str::trim).and_then(|v| v.parse::<i64>().ok()) {
        Some(secs) if secs > 0 => Duration::from_secs(secs as u64),
        _ => fallback,
    }
}
