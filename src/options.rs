use std::time::Duration;

use serde::Deserialize;

use crate::{Error, Result};

/// How a request that ran out of acceptable outcomes is reported.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorMode {
    /// Return the last response or the last transport error unchanged.
    Passthrough,
    /// Wrap the outcome in [`Error::RetriesExhausted`].
    #[default]
    Synthesize,
}

/// Configures retry behavior.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// Maximum number of exchanges, the first attempt included.
    pub max_attempts: u32,
    /// Lower backoff bound in milliseconds.
    pub retry_wait_min_ms: u64,
    /// Upper backoff bound in milliseconds.
    pub retry_wait_max_ms: u64,
    pub error_mode: ErrorMode,
    /// Bytes read from a discarded response before it is dropped.
    pub drain_limit_bytes: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_wait_min_ms: 1_000,
            retry_wait_max_ms: 30_000,
            error_mode: ErrorMode::Synthesize,
            drain_limit_bytes: 4_096,
        }
    }
}

impl ClientOptions {
    /// Reads options from the environment, keeping defaults for unset values.
    ///
    /// Reads:
    /// - `RETRYABLE_HTTP_MAX_ATTEMPTS`
    /// - `RETRYABLE_HTTP_RETRY_WAIT_MIN_MS`
    /// - `RETRYABLE_HTTP_RETRY_WAIT_MAX_MS`
    /// - `RETRYABLE_HTTP_ERROR_MODE` (`passthrough` or `synthesize`)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut options = Self::default();
        if let Some(value) = lookup("RETRYABLE_HTTP_MAX_ATTEMPTS") {
            options.max_attempts = parse_number("RETRYABLE_HTTP_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = lookup("RETRYABLE_HTTP_RETRY_WAIT_MIN_MS") {
            options.retry_wait_min_ms = parse_number("RETRYABLE_HTTP_RETRY_WAIT_MIN_MS", &value)?;
        }
        if let Some(value) = lookup("RETRYABLE_HTTP_RETRY_WAIT_MAX_MS") {
            options.retry_wait_max_ms = parse_number("RETRYABLE_HTTP_RETRY_WAIT_MAX_MS", &value)?;
        }
        if let Some(value) = lookup("RETRYABLE_HTTP_ERROR_MODE") {
            options.error_mode = match value.trim().to_ascii_lowercase().as_str() {
                "passthrough" => ErrorMode::Passthrough,
                "synthesize" => ErrorMode::Synthesize,
                other => {
                    return Err(Error::Config(format!(
                        "RETRYABLE_HTTP_ERROR_MODE must be 'passthrough' or 'synthesize', got '{other}'"
                    )))
                }
            };
        }
        Ok(options)
    }

    /// Attempt cap actually enforced; zero is treated as one.
    pub fn effective_max_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    pub fn retry_wait_min(&self) -> Duration {
        Duration::from_millis(self.retry_wait_min_ms)
    }

    pub fn retry_wait_max(&self) -> Duration {
        Duration::from_millis(self.retry_wait_max_ms)
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{name} must be a non-negative integer, got '{value}'")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{ClientOptions, ErrorMode};
    use crate::Error;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn unset_environment_keeps_defaults() {
        let options = ClientOptions::from_lookup(lookup(&[])).expect("defaults");
        assert_eq!(options, ClientOptions::default());
    }

    #[test]
    fn environment_overrides_are_applied() {
        let options = ClientOptions::from_lookup(lookup(&[
            ("RETRYABLE_HTTP_MAX_ATTEMPTS", "3"),
            ("RETRYABLE_HTTP_RETRY_WAIT_MIN_MS", "10"),
            ("RETRYABLE_HTTP_RETRY_WAIT_MAX_MS", " 250 "),
            ("RETRYABLE_HTTP_ERROR_MODE", "Passthrough"),
        ]))
        .expect("valid overrides");

        assert_eq!(options.max_attempts, 3);
        assert_eq!(options.retry_wait_min_ms, 10);
        assert_eq!(options.retry_wait_max_ms, 250);
        assert_eq!(options.error_mode, ErrorMode::Passthrough);
    }

    #[test]
    fn malformed_environment_value_is_config_error() {
        let err = ClientOptions::from_lookup(lookup(&[("RETRYABLE_HTTP_MAX_ATTEMPTS", "many")]))
            .expect_err("must fail");
        assert!(matches!(err, Error::Config(message) if message.contains("MAX_ATTEMPTS")));

        let err = ClientOptions::from_lookup(lookup(&[("RETRYABLE_HTTP_ERROR_MODE", "loud")]))
            .expect_err("must fail");
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn zero_attempts_is_clamped_to_one() {
        let options = ClientOptions {
            max_attempts: 0,
            ..ClientOptions::default()
        };
        assert_eq!(options.effective_max_attempts(), 1);
    }

    #[test]
    fn deserializes_partial_config() {
        let options: ClientOptions = serde_json::from_value(serde_json::json!({
            "max_attempts": 2,
            "error_mode": "passthrough"
        }))
        .expect("valid config");

        assert_eq!(options.max_attempts, 2);
        assert_eq!(options.error_mode, ErrorMode::Passthrough);
        assert_eq!(options.retry_wait_min_ms, 1_000);
    }
}
