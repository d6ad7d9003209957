//! Loader tunables, with environment overrides.
//!
//! The retry budgets are small on purpose: a module process that has not
//! parked itself after a handful of delays is treated as failed rather
//! than waited on forever, and teardown gives up on a process that
//! ignores its termination signals just as quickly.

use std::time::Duration;

/// Extra lookup attempts after the first miss when waiting for a spawned
/// module process to appear.
pub const DEFAULT_FIND_RETRIES: u32 = 3;

/// Extra termination attempts after the first signal during teardown.
pub const DEFAULT_TERM_RETRIES: u32 = 3;

/// Pause between attempts.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 200;

pub const ENV_FIND_RETRIES: &str = "HUNKDL_FIND_RETRIES";
pub const ENV_TERM_RETRIES: &str = "HUNKDL_TERM_RETRIES";
pub const ENV_RETRY_DELAY_MS: &str = "HUNKDL_RETRY_DELAY_MS";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderConfig {
    pub find_retries: u32,
    pub term_retries: u32,
    pub retry_delay: Duration,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            find_retries: DEFAULT_FIND_RETRIES,
            term_retries: DEFAULT_TERM_RETRIES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

impl LoaderConfig {
    /// Defaults, overridden by whichever environment variables parse. An
    /// unparsable value keeps the default and logs rather than failing
    /// the whole loader over a typo.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(value) = std::env::var(ENV_FIND_RETRIES) {
            match parse_count(&value) {
                Some(count) => config.find_retries = count,
                None => log::warn!("ignoring {ENV_FIND_RETRIES}={value:?}"),
            }
        }
        if let Ok(value) = std::env::var(ENV_TERM_RETRIES) {
            match parse_count(&value) {
                Some(count) => config.term_retries = count,
                None => log::warn!("ignoring {ENV_TERM_RETRIES}={value:?}"),
            }
        }
        if let Ok(value) = std::env::var(ENV_RETRY_DELAY_MS) {
            match parse_delay_ms(&value) {
                Some(delay) => config.retry_delay = delay,
                None => log::warn!("ignoring {ENV_RETRY_DELAY_MS}={value:?}"),
            }
        }
        config
    }
}

fn parse_count(value: &str) -> Option<u32> {
    value.trim().parse().ok()
}

fn parse_delay_ms(value: &str) -> Option<Duration> {
    value.trim().parse().map(Duration::from_millis).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LoaderConfig::default();
        assert_eq!(config.find_retries, 3);
        assert_eq!(config.term_retries, 3);
        assert_eq!(config.retry_delay, Duration::from_millis(200));
    }

    #[test]
    fn test_parse_count_accepts_plain_and_padded_numbers() {
        assert_eq!(parse_count("0"), Some(0));
        assert_eq!(parse_count(" 12 "), Some(12));
        assert_eq!(parse_count("4294967295"), Some(u32::MAX));
    }

    #[test]
    fn test_parse_count_rejects_garbage() {
        assert_eq!(parse_count(""), None);
        assert_eq!(parse_count("-1"), None);
        assert_eq!(parse_count("3 tries"), None);
        assert_eq!(parse_count("0x10"), None);
    }

    #[test]
    fn test_parse_delay_is_milliseconds() {
        assert_eq!(parse_delay_ms("50"), Some(Duration::from_millis(50)));
        assert_eq!(parse_delay_ms("0"), Some(Duration::ZERO));
        assert_eq!(parse_delay_ms("fast"), None);
    }
}
