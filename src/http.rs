//! Shared outbound HTTP client

use crate::config::HttpConfig;
use crate::error::SafeOutError;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use std::time::Duration;

pub const USER_AGENT: &str = concat!("SafeOut/", env!("CARGO_PKG_VERSION"));

fn base_client(config: &HttpConfig) -> Result<reqwest::Client, SafeOutError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_seconds))
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| SafeOutError::http_client(format!("Failed to create HTTP client: {e}")))
}

/// Client that retries connection failures, 5xx and 429 with exponential
/// backoff before giving up.
pub fn build_client(config: &HttpConfig) -> Result<ClientWithMiddleware, SafeOutError> {
    let retry_policy = ExponentialBackoff::builder().build_with_max_retries(config.max_retries);

    Ok(ClientBuilder::new(base_client(config)?)
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .build())
}

/// Client that sends every request exactly once. Used for logins, where a
/// resend counts as another attempt against the account.
pub fn build_login_client(config: &HttpConfig) -> Result<ClientWithMiddleware, SafeOutError> {
    Ok(ClientBuilder::new(base_client(config)?).build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_carries_version() {
        assert!(USER_AGENT.starts_with("SafeOut/"));
        assert!(USER_AGENT.len() > "SafeOut/".len());
    }

    #[test]
    fn test_build_client() {
        assert!(build_client(&HttpConfig::default()).is_ok());
        assert!(build_login_client(&HttpConfig::default()).is_ok());
    }
}
