//! Engine configuration
//!
//! Defaults suit production gateways (which take tens of minutes to
//! provision); every value can be overridden from `INTERCONNECT_*`
//! environment variables.

use std::env;
use std::time::Duration;

use super::error::InterconnectError;
use super::reconciler::WaitPolicy;
use super::retry::RetryConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Namespace holding the Crossplane claims
    pub namespace: String,
    /// Waiting for both gateways to report ready
    pub gateway_wait: WaitPolicy,
    /// Waiting for both tunnels to report UP
    pub tunnel_wait: WaitPolicy,
    /// Client-side retry for idempotent provider calls
    pub client_retry: RetryConfig,
    /// Retry for each compensating delete
    pub compensation_retry: RetryConfig,
    /// Age after which a file lock is considered abandoned
    pub lock_stale_after: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            namespace: "crossplane-system".to_string(),
            gateway_wait: WaitPolicy::default(),
            tunnel_wait: WaitPolicy {
                poll_interval: Duration::from_secs(10),
                timeout: Duration::from_secs(15 * 60),
                ..WaitPolicy::default()
            },
            client_retry: RetryConfig::default(),
            compensation_retry: RetryConfig {
                max_attempts: 6,
                initial_delay: Duration::from_secs(2),
                max_delay: Duration::from_secs(60),
                backoff_multiplier: 2.0,
            },
            lock_stale_after: Duration::from_secs(2 * 60 * 60),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    ///
    /// - INTERCONNECT_NAMESPACE
    /// - INTERCONNECT_GATEWAY_TIMEOUT_SECS / INTERCONNECT_TUNNEL_TIMEOUT_SECS
    /// - INTERCONNECT_POLL_INTERVAL_SECS / INTERCONNECT_POLL_FLOOR_SECS
    /// - INTERCONNECT_MAX_BACKOFF_SECS
    /// - INTERCONNECT_CLIENT_RETRY_ATTEMPTS / INTERCONNECT_COMPENSATION_ATTEMPTS
    /// - INTERCONNECT_LOCK_STALE_SECS
    pub fn from_env() -> Result<Self, InterconnectError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`EngineConfig::from_env`] with an injectable variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, InterconnectError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(namespace) = lookup("INTERCONNECT_NAMESPACE") {
            config.namespace = namespace;
        }
        if let Some(secs) = parse_u64(&lookup, "INTERCONNECT_GATEWAY_TIMEOUT_SECS")? {
            config.gateway_wait.timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_u64(&lookup, "INTERCONNECT_TUNNEL_TIMEOUT_SECS")? {
            config.tunnel_wait.timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_u64(&lookup, "INTERCONNECT_POLL_INTERVAL_SECS")? {
            config.gateway_wait.poll_interval = Duration::from_secs(secs);
            config.tunnel_wait.poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_u64(&lookup, "INTERCONNECT_POLL_FLOOR_SECS")? {
            config.gateway_wait.poll_floor = Duration::from_secs(secs);
            config.tunnel_wait.poll_floor = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_u64(&lookup, "INTERCONNECT_MAX_BACKOFF_SECS")? {
            config.gateway_wait.max_backoff = Duration::from_secs(secs);
            config.tunnel_wait.max_backoff = Duration::from_secs(secs);
        }
        if let Some(n) = parse_u64(&lookup, "INTERCONNECT_CLIENT_RETRY_ATTEMPTS")? {
            config.client_retry.max_attempts = to_attempts(n);
        }
        if let Some(n) = parse_u64(&lookup, "INTERCONNECT_COMPENSATION_ATTEMPTS")? {
            config.compensation_retry.max_attempts = to_attempts(n);
        }
        if let Some(secs) = parse_u64(&lookup, "INTERCONNECT_LOCK_STALE_SECS")? {
            config.lock_stale_after = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

fn parse_u64<F>(lookup: &F, key: &str) -> Result<Option<u64>, InterconnectError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .map_err(|_| InterconnectError::Validation(format!("{} must be a non-negative integer, got {:?}", key, raw)))
        })
        .transpose()
}

fn to_attempts(n: u64) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX).max(1)
}
