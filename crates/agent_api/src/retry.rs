use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

/// Retries allowed after the initial attempt of a one-shot REST call.
/// The live stream never retries here; stream failures go through the
/// status re-check path instead.
pub const MAX_RETRIES: u32 = 3;
/// Delay before the first retry; doubles per attempt up to [`MAX_DELAY`].
pub const BASE_DELAY: Duration = Duration::from_millis(1000);
/// Backoff ceiling.
pub const MAX_DELAY: Duration = Duration::from_secs(30);

/// Rate limiting plus the gateway statuses the agent backend returns
/// while a run host is restarting or draining.
const RETRYABLE_STATUSES: &[u16] = &[429, 500, 502, 503, 504];

fn transient_error_text() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(
            r"(?i)rate.?limit|too.?many.?requests|temporarily.?unavailable|overloaded|gateway.?timeout|connection.?reset",
        )
        .expect("transient-error regex must compile")
    })
}

/// Whether a failed REST call is worth retrying. Matches on the status
/// first, then on transient wording some proxies put in non-retryable
/// status bodies.
pub fn is_retryable_http_error(status: u16, error_text: &str) -> bool {
    RETRYABLE_STATUSES.contains(&status) || transient_error_text().is_match(error_text)
}

/// Backoff delay for a zero-based retry attempt.
pub fn retry_delay(attempt: u32) -> Duration {
    BASE_DELAY
        .saturating_mul(2u32.saturating_pow(attempt.min(16)))
        .min(MAX_DELAY)
}
