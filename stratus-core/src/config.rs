//! Provider configuration
//!
//! Region, credentials profile, endpoint override and the retry/poll timings
//! are read from the process environment once, at startup, by the entry point.

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;

use crate::reconcile::WaitSpec;
use crate::retry::{Backoff, RetryPolicy};

pub const ENV_REGION: &str = "STRATUS_REGION";
pub const ENV_PROFILE: &str = "AWS_PROFILE";
pub const ENV_ENDPOINT_URL: &str = "STRATUS_ENDPOINT_URL";
pub const ENV_READ_TIMEOUT: &str = "STRATUS_READ_TIMEOUT_SECS";
pub const ENV_WRITE_TIMEOUT: &str = "STRATUS_WRITE_TIMEOUT_SECS";
pub const ENV_POLL_INTERVAL: &str = "STRATUS_POLL_INTERVAL_SECS";
pub const ENV_RETRY_BACKOFF: &str = "STRATUS_RETRY_BACKOFF";

/// Region fallbacks consulted after `STRATUS_REGION`
const REGION_FALLBACKS: &[&str] = &["AWS_REGION", "AWS_DEFAULT_REGION"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("No region configured: set STRATUS_REGION or AWS_REGION")]
    MissingRegion,

    #[error("Invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// Retry and polling timings
#[derive(Debug, Clone, PartialEq)]
pub struct Timeouts {
    /// Ceiling for read-class calls (describe, list)
    pub read: Duration,
    /// Ceiling for write-class calls and for waiting on ordinary operations
    pub write: Duration,
    /// Base delay between retries of a failed call
    pub retry_interval: Duration,
    /// Delay between status polls
    pub poll_interval: Duration,
    /// How long a freshly created object may be invisible to describe
    pub not_found_grace: Duration,
    pub backoff: Backoff,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            read: Duration::from_secs(3 * 60),
            write: Duration::from_secs(5 * 60),
            retry_interval: Duration::from_secs(1),
            poll_interval: Duration::from_secs(5),
            not_found_grace: Duration::from_secs(30),
            backoff: Backoff::Fixed,
        }
    }
}

impl Timeouts {
    pub fn read_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.read, self.retry_interval).with_backoff(self.backoff.clone())
    }

    pub fn write_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.write, self.retry_interval).with_backoff(self.backoff.clone())
    }

    /// Wait for an object to appear and settle, with the write ceiling scaled by `multiplier`
    ///
    /// Long-running provisioning (instances, databases) passes a multiplier
    /// greater than one at the call site.
    pub fn wait_present(&self, multiplier: u32) -> WaitSpec {
        WaitSpec::present(self.write.saturating_mul(multiplier.max(1)), self.poll_interval)
            .with_not_found_grace(self.not_found_grace)
    }

    /// Wait for an object to disappear, with the write ceiling scaled by `multiplier`
    pub fn wait_absent(&self, multiplier: u32) -> WaitSpec {
        WaitSpec::absent(self.write.saturating_mul(multiplier.max(1)), self.poll_interval)
    }
}

/// Provider-wide configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub region: String,
    /// Named credentials profile; the SDK default chain is used when unset
    pub profile: Option<String>,
    /// Endpoint override (e.g., a local emulator)
    pub endpoint_url: Option<String>,
    pub timeouts: Timeouts,
}

impl ProviderConfig {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            profile: None,
            endpoint_url: None,
            timeouts: Timeouts::default(),
        }
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    pub fn with_endpoint_url(mut self, url: impl Into<String>) -> Self {
        self.endpoint_url = Some(url.into());
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Load configuration from an explicit variable map
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(vars, key);

        let region = std::iter::once(ENV_REGION)
            .chain(REGION_FALLBACKS.iter().copied())
            .find_map(|key| lookup(vars, key))
            .ok_or(ConfigError::MissingRegion)?;

        let mut timeouts = Timeouts::default();
        if let Some(v) = get(ENV_READ_TIMEOUT) {
            timeouts.read = parse_secs(ENV_READ_TIMEOUT, v)?;
        }
        if let Some(v) = get(ENV_WRITE_TIMEOUT) {
            timeouts.write = parse_secs(ENV_WRITE_TIMEOUT, v)?;
        }
        if let Some(v) = get(ENV_POLL_INTERVAL) {
            timeouts.poll_interval = parse_secs(ENV_POLL_INTERVAL, v)?;
        }
        if let Some(v) = get(ENV_RETRY_BACKOFF) {
            timeouts.backoff = parse_backoff(v)?;
        }

        Ok(Self {
            region: region.to_string(),
            profile: get(ENV_PROFILE).map(str::to_string),
            endpoint_url: get(ENV_ENDPOINT_URL).map(str::to_string),
            timeouts,
        })
    }
}

fn lookup<'a>(vars: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}

fn parse_secs(key: &str, value: &str) -> Result<Duration, ConfigError> {
    match value.parse::<u64>() {
        Ok(0) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        }),
        Ok(secs) => Ok(Duration::from_secs(secs)),
        Err(e) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Parse a backoff name: `fixed` or `exponential`
pub fn parse_backoff(value: &str) -> Result<Backoff, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "fixed" => Ok(Backoff::Fixed),
        "exponential" => Ok(Backoff::Exponential {
            multiplier: 2.0,
            max_interval: Duration::from_secs(30),
        }),
        _ => Err(ConfigError::InvalidValue {
            key: ENV_RETRY_BACKOFF.to_string(),
            value: value.to_string(),
            reason: "expected 'fixed' or 'exponential'".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::Target;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn region_is_required() {
        assert_eq!(
            ProviderConfig::from_vars(&vars(&[])),
            Err(ConfigError::MissingRegion)
        );
    }

    #[test]
    fn stratus_region_wins_over_aws_region() {
        let config = ProviderConfig::from_vars(&vars(&[
            ("AWS_REGION", "us-east-1"),
            ("STRATUS_REGION", "ap-northeast-1"),
        ]))
        .unwrap();
        assert_eq!(config.region, "ap-northeast-1");
    }

    #[test]
    fn falls_back_to_aws_default_region() {
        let config =
            ProviderConfig::from_vars(&vars(&[("AWS_DEFAULT_REGION", "eu-west-1")])).unwrap();
        assert_eq!(config.region, "eu-west-1");
        assert_eq!(config.profile, None);
        assert_eq!(config.timeouts, Timeouts::default());
    }

    #[test]
    fn reads_overrides() {
        let config = ProviderConfig::from_vars(&vars(&[
            ("AWS_REGION", "us-west-2"),
            ("AWS_PROFILE", "staging"),
            ("STRATUS_ENDPOINT_URL", "http://localhost:4566"),
            ("STRATUS_READ_TIMEOUT_SECS", "60"),
            ("STRATUS_WRITE_TIMEOUT_SECS", "600"),
            ("STRATUS_POLL_INTERVAL_SECS", "2"),
            ("STRATUS_RETRY_BACKOFF", "Exponential"),
        ]))
        .unwrap();

        assert_eq!(config.profile.as_deref(), Some("staging"));
        assert_eq!(config.endpoint_url.as_deref(), Some("http://localhost:4566"));
        assert_eq!(config.timeouts.read, Duration::from_secs(60));
        assert_eq!(config.timeouts.write, Duration::from_secs(600));
        assert_eq!(config.timeouts.poll_interval, Duration::from_secs(2));
        assert!(matches!(config.timeouts.backoff, Backoff::Exponential { .. }));
    }

    #[test]
    fn huge_timeouts_saturate_when_scaled() {
        let config = ProviderConfig::from_vars(&vars(&[
            ("AWS_REGION", "us-west-2"),
            ("STRATUS_WRITE_TIMEOUT_SECS", "18446744073709551615"),
            ("STRATUS_POLL_INTERVAL_SECS", "18446744073709551615"),
        ]))
        .unwrap();

        let present = config.timeouts.wait_present(6);
        assert_eq!(present.timeout, Duration::MAX);
        assert_eq!(config.timeouts.wait_absent(10).timeout, Duration::MAX);

        let spec = WaitSpec::present(Duration::from_secs(60), config.timeouts.poll_interval);
        assert_eq!(spec.not_found_grace, Duration::MAX);
    }

    #[test]
    fn rejects_bad_numbers() {
        let err = ProviderConfig::from_vars(&vars(&[
            ("AWS_REGION", "us-west-2"),
            ("STRATUS_READ_TIMEOUT_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == ENV_READ_TIMEOUT));

        let err = ProviderConfig::from_vars(&vars(&[
            ("AWS_REGION", "us-west-2"),
            ("STRATUS_POLL_INTERVAL_SECS", "0"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("greater than zero"));
    }

    #[test]
    fn rejects_unknown_backoff() {
        assert!(parse_backoff("jittery").is_err());
    }

    #[test]
    fn long_running_waits_scale_the_write_ceiling() {
        let timeouts = Timeouts::default();
        let spec = timeouts.wait_present(10);
        assert_eq!(spec.timeout, Duration::from_secs(50 * 60));
        assert_eq!(spec.target, Target::Present);
        assert_eq!(spec.not_found_grace, timeouts.not_found_grace);

        let spec = timeouts.wait_absent(0);
        assert_eq!(spec.timeout, timeouts.write);
        assert_eq!(spec.target, Target::Absent);
    }

    #[test]
    fn read_and_write_policies_use_distinct_ceilings() {
        let timeouts = Timeouts::default();
        assert!(timeouts.write_policy().max_duration > timeouts.read_policy().max_duration);
    }
}
